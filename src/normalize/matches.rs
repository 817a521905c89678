use chrono::{NaiveDate, NaiveTime};

use super::{collapse_whitespace, NormalizeContext};
use crate::domain::StagingRecord;

/// A structured, validated match candidate. Team and event names ride along
/// raw; the resolver works from their own normalized forms.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMatch {
    pub match_date: Option<NaiveDate>,
    pub match_time: Option<NaiveTime>,
    pub home_team_name: String,
    pub away_team_name: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    /// Deterministic key; synthesized when the source omits one.
    pub source_match_key: String,
    pub division: Option<String>,
    /// Future date with no (or zero) scores on both sides.
    pub is_scheduled: bool,
    pub is_valid: bool,
    pub validation_errors: Vec<String>,
}

// %y must come before %Y: %Y accepts "26" as the literal year 26.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M", "%I:%M %p", "%I:%M%p", "%I %p"];

/// Normalize one staging row into a match candidate. Never panics; all
/// problems land in `validation_errors` with `is_valid = false`.
pub fn normalize_match(record: &StagingRecord, ctx: &NormalizeContext) -> NormalizedMatch {
    let mut errors = Vec::new();

    let home = record
        .home_team_name
        .as_deref()
        .map(collapse_whitespace)
        .unwrap_or_default();
    let away = record
        .away_team_name
        .as_deref()
        .map(collapse_whitespace)
        .unwrap_or_default();

    if home.is_empty() {
        errors.push("missing home team name".to_string());
    }
    if away.is_empty() {
        errors.push("missing away team name".to_string());
    }
    if !home.is_empty() && home.eq_ignore_ascii_case(&away) {
        errors.push("home and away team names are identical".to_string());
    }

    let match_date = match record.match_date.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => match parse_date(raw) {
            Some(date) => {
                if date < ctx.window_start || date > ctx.window_end {
                    errors.push(format!(
                        "match date {date} outside allowed window {}..{}",
                        ctx.window_start, ctx.window_end
                    ));
                    None
                } else {
                    Some(date)
                }
            }
            None => {
                errors.push(format!("unparseable match date: '{raw}'"));
                None
            }
        },
        _ => {
            errors.push("missing match date".to_string());
            None
        }
    };

    let match_time = record
        .match_time
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(parse_time);

    let home_score = coerce_score(record.home_score.as_deref());
    let away_score = coerce_score(record.away_score.as_deref());

    let source_match_key = match record.source_match_id.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => format!("{}:{}", record.source_platform, key),
        _ => synthesize_match_key(record, &home, &away, match_date),
    };

    let is_scheduled = match match_date {
        Some(date) => {
            date > ctx.today
                && home_score.unwrap_or(0) == 0
                && away_score.unwrap_or(0) == 0
        }
        None => false,
    };

    NormalizedMatch {
        match_date,
        match_time,
        home_team_name: home,
        away_team_name: away,
        home_score,
        away_score,
        source_match_key,
        division: super::extract_division_tier(
            record.division.as_deref(),
            record.subdivision.as_deref(),
        ),
        is_scheduled,
        is_valid: errors.is_empty(),
        validation_errors: errors,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let upper = raw.to_uppercase();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&upper, fmt).ok())
}

/// Empty, dash and TBD placeholders are null scores, as is anything else
/// that fails to parse as an integer.
fn coerce_score(raw: Option<&str>) -> Option<i32> {
    let raw = raw?.trim();
    if raw.is_empty() || raw == "-" || raw == "\u{2013}" || raw.eq_ignore_ascii_case("tbd") {
        return None;
    }
    raw.parse::<i32>().ok()
}

/// Deterministic key from platform + event id + sanitized team fragments +
/// date, used when the source carries no match id of its own.
fn synthesize_match_key(
    record: &StagingRecord,
    home: &str,
    away: &str,
    date: Option<NaiveDate>,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        record.source_platform,
        record.source_event_id.as_deref().unwrap_or("noevent"),
        sanitize_fragment(home),
        sanitize_fragment(away),
        date.map(|d| d.to_string()).unwrap_or_else(|| "nodate".to_string()),
    )
}

fn sanitize_fragment(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    cleaned.chars().take(16).collect()
}
