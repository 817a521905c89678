use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use super::collapse_whitespace;
use crate::domain::EventType;

/// A structured league/tournament candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub canonical_name: String,
    pub display_name: String,
    /// Always one of the two values; tournament when ambiguous.
    pub event_type: EventType,
    pub year: Option<i32>,
    /// Derived `YYYY-YY` label.
    pub season: Option<String>,
    pub state: Option<String>,
    pub region: Option<String>,
    pub normalized: bool,
    pub error: Option<String>,
    /// How the type was decided: "learned", "keyword", "duration" or "default".
    pub classification: &'static str,
}

/// Learned keyword-confidence tables for event classification, built from
/// the pattern store at run start. Each keyword maps to
/// (occurrence count, pattern confidence).
#[derive(Debug, Clone, Default)]
pub struct EventKeywordScores {
    pub league: HashMap<String, (i64, f64)>,
    pub tournament: HashMap<String, (i64, f64)>,
}

impl EventKeywordScores {
    fn score(&self, table: &HashMap<String, (i64, f64)>, name_lower: &str) -> f64 {
        table
            .iter()
            .filter(|(keyword, _)| name_lower.contains(keyword.as_str()))
            .map(|(_, (count, confidence))| *count as f64 * confidence)
            .sum()
    }

    /// Classify from learned signal alone. Only trusted when the winning
    /// score exceeds 1.0 and strictly beats the other type.
    pub fn classify(&self, name_lower: &str) -> Option<EventType> {
        let league = self.score(&self.league, name_lower);
        let tournament = self.score(&self.tournament, name_lower);
        if league > 1.0 && league > tournament {
            Some(EventType::League)
        } else if tournament > 1.0 && tournament > league {
            Some(EventType::Tournament)
        } else {
            None
        }
    }
}

const LEAGUE_KEYWORDS: &[&str] = &["league", "conference", "division play", "premier series"];
const TOURNAMENT_KEYWORDS: &[&str] = &[
    "cup",
    "tournament",
    "classic",
    "showcase",
    "invitational",
    "shootout",
    "festival",
    "challenge",
    "jamboree",
    "kickoff",
];

static YEAR4_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(20\d{2})\b").expect("valid regex"));
// Season range like "25-26"
static SEASON_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{2})-(\d{2})\b").expect("valid regex"));
static SEASON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bseason\s+(20\d{2})\b").expect("valid regex"));

// State keyword table: postal codes and full names seen in source data.
const STATE_KEYWORDS: &[(&str, &str)] = &[
    ("kansas city", "MO"),
    ("kansas", "KS"),
    ("missouri", "MO"),
    ("nebraska", "NE"),
    ("iowa", "IA"),
    ("oklahoma", "OK"),
    ("arkansas", "AR"),
    ("colorado", "CO"),
    ("texas", "TX"),
    ("vegas", "NV"),
    ("nevada", "NV"),
];

const REGION_KEYWORDS: &[(&str, &str)] = &[
    ("heartland", "Midwest"),
    ("midwest", "Midwest"),
    ("great plains", "Midwest"),
    ("frontier", "Midwest"),
    ("mountain", "West"),
    ("west coast", "West"),
];

/// Normalize a raw event/competition name. Event duration, when the source
/// provides start and end dates, is only consulted after both the learned
/// and the fixed keyword tables fail to decide.
pub fn normalize_event(
    raw: &str,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    learned: &EventKeywordScores,
) -> NormalizedEvent {
    let display_name = collapse_whitespace(raw);
    if display_name.is_empty() {
        return NormalizedEvent {
            canonical_name: String::new(),
            display_name,
            event_type: EventType::Tournament,
            year: None,
            season: None,
            state: None,
            region: None,
            normalized: false,
            error: Some("empty event name".to_string()),
            classification: "default",
        };
    }
    let name_lower = display_name.to_lowercase();

    let (event_type, classification) = classify_event(&name_lower, start_date, end_date, learned);

    let (year, season) = extract_year_and_season(&display_name);

    let state = STATE_KEYWORDS
        .iter()
        .find(|(keyword, _)| name_lower.contains(keyword))
        .map(|(_, code)| code.to_string());
    let region = REGION_KEYWORDS
        .iter()
        .find(|(keyword, _)| name_lower.contains(keyword))
        .map(|(_, region)| region.to_string());

    NormalizedEvent {
        canonical_name: name_lower,
        display_name,
        event_type,
        year,
        season,
        state,
        region,
        normalized: true,
        error: None,
        classification,
    }
}

/// Fixed-table keywords present in the name for the given type. Feeds the
/// adaptive keyword tables after a classification sticks.
pub fn matched_keywords(name_lower: &str, event_type: EventType) -> Vec<String> {
    let table = match event_type {
        EventType::League => LEAGUE_KEYWORDS,
        EventType::Tournament => TOURNAMENT_KEYWORDS,
    };
    table
        .iter()
        .filter(|k| name_lower.contains(*k))
        .map(|k| k.to_string())
        .collect()
}

fn classify_event(
    name_lower: &str,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    learned: &EventKeywordScores,
) -> (EventType, &'static str) {
    if let Some(kind) = learned.classify(name_lower) {
        return (kind, "learned");
    }

    if LEAGUE_KEYWORDS.iter().any(|k| name_lower.contains(k)) {
        return (EventType::League, "keyword");
    }
    if TOURNAMENT_KEYWORDS.iter().any(|k| name_lower.contains(k)) {
        return (EventType::Tournament, "keyword");
    }

    if let (Some(start), Some(end)) = (start_date, end_date) {
        let days = (end - start).num_days();
        if days >= 0 && days <= 4 {
            return (EventType::Tournament, "duration");
        }
        if days > 30 {
            return (EventType::League, "duration");
        }
    }

    (EventType::Tournament, "default")
}

fn extract_year_and_season(name: &str) -> (Option<i32>, Option<String>) {
    if let Some(caps) = SEASON_WORD_RE.captures(name) {
        let year: i32 = caps[1].parse().unwrap_or(0);
        return (Some(year), Some(season_label(year)));
    }
    if let Some(caps) = YEAR4_RE.captures(name) {
        let year: i32 = caps[1].parse().unwrap_or(0);
        return (Some(year), Some(season_label(year)));
    }
    if let Some(caps) = SEASON_RANGE_RE.captures(name) {
        let first: i32 = caps[1].parse().unwrap_or(0);
        let second: i32 = caps[2].parse().unwrap_or(0);
        // "25-26" is a season range only when the years are consecutive
        if second == first + 1 {
            let year = 2000 + first;
            return (Some(year), Some(season_label(year)));
        }
    }
    (None, None)
}

fn season_label(year: i32) -> String {
    format!("{}-{:02}", year, (year + 1) % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn league_by_fixed_keyword() {
        let event = normalize_event("Heartland Soccer League 2025", None, None, &Default::default());
        assert!(event.normalized);
        assert_eq!(event.event_type, EventType::League);
        assert_eq!(event.year, Some(2025));
        assert_eq!(event.season.as_deref(), Some("2025-26"));
        assert_eq!(event.region.as_deref(), Some("Midwest"));
        assert_eq!(event.classification, "keyword");
    }

    #[test]
    fn tournament_by_fixed_keyword() {
        let event = normalize_event("Vegas Cup 2026", None, None, &Default::default());
        assert_eq!(event.event_type, EventType::Tournament);
        assert_eq!(event.year, Some(2026));
        assert_eq!(event.state.as_deref(), Some("NV"));
    }

    #[test]
    fn learned_signal_beats_fixed_keywords() {
        let mut learned = EventKeywordScores::default();
        // "premier cup series" observed 30 times as a league at 0.9 confidence
        learned
            .league
            .insert("premier cup".to_string(), (30, 0.9));
        let event = normalize_event("Premier Cup Series 2025", None, None, &learned);
        assert_eq!(event.event_type, EventType::League);
        assert_eq!(event.classification, "learned");
    }

    #[test]
    fn weak_learned_signal_is_ignored() {
        let mut learned = EventKeywordScores::default();
        learned.league.insert("vegas".to_string(), (1, 0.5));
        let event = normalize_event("Vegas Cup", None, None, &learned);
        // score 0.5 <= 1.0, falls through to the fixed keyword table
        assert_eq!(event.event_type, EventType::Tournament);
        assert_eq!(event.classification, "keyword");
    }

    #[test]
    fn duration_heuristic_short_is_tournament() {
        let start = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 5, 3).unwrap();
        let event = normalize_event("Spring Fixture", Some(start), Some(end), &Default::default());
        assert_eq!(event.event_type, EventType::Tournament);
        assert_eq!(event.classification, "duration");
    }

    #[test]
    fn duration_heuristic_long_is_league() {
        let start = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 11, 20).unwrap();
        let event = normalize_event("Fall Fixture", Some(start), Some(end), &Default::default());
        assert_eq!(event.event_type, EventType::League);
        assert_eq!(event.classification, "duration");
    }

    #[test]
    fn ambiguous_defaults_to_tournament() {
        let event = normalize_event("Spring Fixture", None, None, &Default::default());
        assert_eq!(event.event_type, EventType::Tournament);
        assert_eq!(event.classification, "default");
    }

    #[test]
    fn season_range_year() {
        let event = normalize_event("Heartland League 25-26", None, None, &Default::default());
        assert_eq!(event.year, Some(2025));
        assert_eq!(event.season.as_deref(), Some("2025-26"));
    }

    #[test]
    fn season_word_year() {
        let event = normalize_event("Premier League Season 2027", None, None, &Default::default());
        assert_eq!(event.year, Some(2027));
        assert_eq!(event.season.as_deref(), Some("2027-28"));
    }

    #[test]
    fn kansas_city_maps_to_missouri_before_kansas() {
        let event = normalize_event("Kansas City Champions Cup", None, None, &Default::default());
        assert_eq!(event.state.as_deref(), Some("MO"));
    }
}
