use once_cell::sync::Lazy;
use regex::Regex;

use super::{collapse_whitespace, NormalizeContext};
use crate::domain::Gender;

/// A structured, validated team candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTeam {
    /// Lowercased, whitespace-collapsed name with the extracted club prefix
    /// removed. Never empty when `normalized` is true.
    pub canonical_name: String,
    pub display_name: String,
    pub club_name: Option<String>,
    pub birth_year: Option<i32>,
    pub gender: Option<Gender>,
    /// Derived `U<n>` label relative to the season year.
    pub age_group: Option<String>,
    pub normalized: bool,
    pub error: Option<String>,
    /// Ordered list of applied heuristics, for auditability.
    pub transformations: Vec<String>,
}

impl NormalizedTeam {
    fn invalid(raw: &str, reason: &str) -> Self {
        Self {
            canonical_name: String::new(),
            display_name: raw.trim().to_string(),
            club_name: None,
            birth_year: None,
            gender: None,
            age_group: None,
            normalized: false,
            error: Some(reason.to_string()),
            transformations: Vec::new(),
        }
    }
}

// Trailing parenthetical suffix like "(U11 Boys)".
static PAREN_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(([^)]*)\)\s*$").expect("valid regex"));

// Explicit 4-digit year, optionally fused to a gender letter ("2014B").
static YEAR4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})([BG])?\b").expect("valid regex"));

// Two-digit year adjacent to a gender letter: "15B" or "B15".
static YEAR2_GENDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:(\d{2})([BG])|([BG])(\d{2}))\b").expect("valid regex"));

// Trailing bare two-digit year.
static YEAR2_TRAILING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{2})$").expect("valid regex"));

// Two-digit year following a known program-level keyword.
static PROGRAM_YEAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(pre-?nal|academy|elite|premier|select|npl|ecnl|dpl)\s+(\d{2})\b")
        .expect("valid regex")
});

static AGE_GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bU-?(\d{1,2})\b").expect("valid regex"));

static GENDER_MALE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(boys?|men|male)\b").expect("valid regex"));
static GENDER_FEMALE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(girls?|women|female)\b").expect("valid regex"));

// A token that marks the end of a club-name prefix: year, age group,
// gender word or embedded gender code.
static MARKER_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:19|20)\d{2}[BG]?|\d{2}[BG]|[BG]\d{2}|U-?\d{1,2}|boys?|girls?|men|women|male|female)$")
        .expect("valid regex")
});

/// Normalize a raw scraped team name into a structured candidate.
///
/// The heuristics run in a fixed order; each one that fires is recorded in
/// `transformations` so a fuzzy merge can later be audited back to the
/// exact rewrites that produced the canonical name.
pub fn normalize_team(raw: &str, ctx: &NormalizeContext) -> NormalizedTeam {
    let trimmed = collapse_whitespace(raw);
    if trimmed.is_empty() {
        return NormalizedTeam::invalid(raw, "empty team name");
    }

    let mut transformations = Vec::new();
    let mut name = trimmed;

    // (a) strip an exactly-duplicated 1- or 2-word prefix
    if let Some(stripped) = strip_duplicate_prefix(&name) {
        name = stripped;
        transformations.push("stripped_duplicate_prefix".to_string());
    }

    // (b) trailing parenthetical suffix like "(U11 Boys)"
    let mut suffix_age: Option<u32> = None;
    let mut suffix_gender: Option<Gender> = None;
    if let Some(caps) = PAREN_SUFFIX_RE.captures(&name) {
        let inner = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        name = PAREN_SUFFIX_RE.replace(&name, "").trim().to_string();
        if let Some(age_caps) = AGE_GROUP_RE.captures(&inner) {
            suffix_age = age_caps[1].parse::<u32>().ok();
        }
        suffix_gender = extract_gender_words(&inner);
        transformations.push("parenthetical_suffix".to_string());
    }
    if name.is_empty() {
        return NormalizedTeam::invalid(raw, "team name empty after suffix removal");
    }

    // (c) birth year, by priority
    let mut gender: Option<Gender> = None;
    let mut birth_year: Option<i32> = None;

    if let Some(caps) = YEAR4_RE.captures(&name) {
        let year: i32 = caps[1].parse().unwrap_or(0);
        if ctx.birth_year_valid(year) {
            birth_year = Some(year);
            if let Some(g) = caps.get(2) {
                gender = Some(letter_gender(g.as_str()));
            }
            transformations.push("birth_year_explicit".to_string());
        }
    }
    if birth_year.is_none() {
        if let Some(caps) = YEAR2_GENDER_RE.captures(&name) {
            let (digits, letter) = match (caps.get(1), caps.get(2), caps.get(3), caps.get(4)) {
                (Some(d), Some(l), _, _) => (d.as_str(), l.as_str()),
                (_, _, Some(l), Some(d)) => (d.as_str(), l.as_str()),
                _ => ("", ""),
            };
            if let Ok(two) = digits.parse::<i32>() {
                let year = 2000 + two;
                if ctx.birth_year_valid(year) {
                    birth_year = Some(year);
                    gender = Some(letter_gender(letter));
                    transformations.push("birth_year_gender_code".to_string());
                }
            }
        }
    }
    if birth_year.is_none() {
        if let Some(caps) = YEAR2_TRAILING_RE.captures(&name) {
            if let Ok(two) = caps[1].parse::<i32>() {
                let year = 2000 + two;
                if ctx.birth_year_valid(year) {
                    birth_year = Some(year);
                    transformations.push("birth_year_trailing".to_string());
                }
            }
        }
    }
    if birth_year.is_none() {
        if let Some(caps) = PROGRAM_YEAR_RE.captures(&name) {
            if let Ok(two) = caps[2].parse::<i32>() {
                let year = 2000 + two;
                if ctx.birth_year_valid(year) {
                    birth_year = Some(year);
                    transformations.push("birth_year_program_keyword".to_string());
                }
            }
        }
    }
    if birth_year.is_none() {
        let age = suffix_age.or_else(|| {
            AGE_GROUP_RE
                .captures(&name)
                .and_then(|caps| caps[1].parse::<u32>().ok())
        });
        if let Some(age) = age {
            let year = ctx.season_year - age as i32;
            if ctx.birth_year_valid(year) {
                birth_year = Some(year);
                transformations.push("birth_year_from_age_group".to_string());
            }
        }
    }

    // (d) gender from explicit words, the suffix, or embedded codes
    if gender.is_none() {
        gender = extract_gender_words(&name);
        if gender.is_some() {
            transformations.push("gender_explicit".to_string());
        }
    }
    if gender.is_none() {
        gender = suffix_gender;
        if gender.is_some() {
            transformations.push("gender_from_suffix".to_string());
        }
    }
    if gender.is_none() {
        if let Some(caps) = YEAR2_GENDER_RE.captures(&name) {
            let letter = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");
            if !letter.is_empty() {
                gender = Some(letter_gender(letter));
                transformations.push("gender_code".to_string());
            }
        }
    }

    // (e) collapse whitespace
    let display_name = collapse_whitespace(&name);

    // (f) club name extraction, with learned override
    let club_name = extract_club_name(&display_name, ctx, &mut transformations);

    // canonical name: the cleaned name minus the club prefix
    let mut canonical_source = display_name.clone();
    if let Some(ref club) = club_name {
        let lowered = canonical_source.to_lowercase();
        let club_lower = club.to_lowercase();
        if lowered.starts_with(&club_lower) {
            canonical_source = canonical_source[club.len()..].trim().to_string();
        }
    }
    if canonical_source.is_empty() {
        // a name that is nothing but its club keeps the full form
        canonical_source = display_name.clone();
    }
    let canonical_name = collapse_whitespace(&canonical_source).to_lowercase();

    let age_group = birth_year.map(|y| format!("U{}", ctx.season_year - y));

    NormalizedTeam {
        canonical_name,
        display_name,
        club_name,
        birth_year,
        gender,
        age_group,
        normalized: true,
        error: None,
        transformations,
    }
}

fn letter_gender(letter: &str) -> Gender {
    if letter.eq_ignore_ascii_case("G") {
        Gender::F
    } else {
        Gender::M
    }
}

fn extract_gender_words(text: &str) -> Option<Gender> {
    if GENDER_FEMALE_RE.is_match(text) {
        Some(Gender::F)
    } else if GENDER_MALE_RE.is_match(text) {
        Some(Gender::M)
    } else {
        None
    }
}

/// Remove an exactly-duplicated 1- or 2-word prefix, once.
/// "KC Fusion KC Fusion 15B Gold" -> "KC Fusion 15B Gold".
fn strip_duplicate_prefix(name: &str) -> Option<String> {
    let tokens: Vec<&str> = name.split_whitespace().collect();
    // prefer the 2-word form so "KC Fusion KC Fusion" drops one "KC Fusion",
    // not one "KC"
    if tokens.len() >= 4
        && tokens[0].eq_ignore_ascii_case(tokens[2])
        && tokens[1].eq_ignore_ascii_case(tokens[3])
    {
        return Some(tokens[2..].join(" "));
    }
    if tokens.len() >= 2 && tokens[0].eq_ignore_ascii_case(tokens[1]) {
        return Some(tokens[1..].join(" "));
    }
    None
}

/// Longest title-cased word run preceding the first year/age/gender marker,
/// capped at 4 words. A previously learned club prefix wins outright.
fn extract_club_name(
    name: &str,
    ctx: &NormalizeContext,
    transformations: &mut Vec<String>,
) -> Option<String> {
    let lowered = name.to_lowercase();
    for learned in &ctx.learned_club_prefixes {
        let learned_lower = learned.to_lowercase();
        if lowered.starts_with(&learned_lower) {
            let boundary = learned.len();
            // only accept on a word boundary
            if name.len() == boundary || name.as_bytes().get(boundary) == Some(&b' ') {
                transformations.push("club_learned".to_string());
                return Some(name[..boundary].to_string());
            }
        }
    }

    let tokens: Vec<&str> = name.split_whitespace().collect();
    let mut run: Vec<&str> = Vec::new();
    for token in &tokens {
        if MARKER_TOKEN_RE.is_match(token) {
            break;
        }
        if !is_title_cased(token) {
            break;
        }
        run.push(token);
        if run.len() == 4 {
            break;
        }
    }
    // a single-token "club" is the whole of most names; require the run to
    // leave something behind for the canonical name
    if run.is_empty() || run.len() == tokens.len() {
        return None;
    }
    transformations.push("club_extracted".to_string());
    Some(run.join(" "))
}

fn is_title_cased(token: &str) -> bool {
    token
        .chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::test_context;

    #[test]
    fn explicit_four_digit_year_with_gender_letter() {
        let team = normalize_team("Rush 2014B Select", &test_context());
        assert!(team.normalized);
        assert_eq!(team.birth_year, Some(2014));
        assert_eq!(team.gender, Some(Gender::M));
        assert_eq!(team.club_name.as_deref(), Some("Rush"));
        assert_eq!(team.canonical_name, "2014b select");
        assert_eq!(team.age_group.as_deref(), Some("U12"));
    }

    #[test]
    fn duplicate_prefix_removed_exactly_once() {
        let team = normalize_team("KC Fusion KC Fusion 15B Gold", &test_context());
        assert!(team.normalized);
        assert_eq!(team.display_name, "KC Fusion 15B Gold");
        assert!(team.canonical_name.starts_with("15b gold"));
        assert_eq!(team.birth_year, Some(2015));
        assert_eq!(team.gender, Some(Gender::M));
        assert!(team
            .transformations
            .contains(&"stripped_duplicate_prefix".to_string()));
    }

    #[test]
    fn single_word_duplicate_prefix() {
        let team = normalize_team("Sporting Sporting Blue Valley 2012G", &test_context());
        assert_eq!(team.display_name, "Sporting Blue Valley 2012G");
        assert_eq!(team.birth_year, Some(2012));
        assert_eq!(team.gender, Some(Gender::F));
    }

    #[test]
    fn parenthetical_suffix_supplies_age_and_gender() {
        let ctx = test_context();
        let team = normalize_team("Legends FC White (U11 Boys)", &ctx);
        assert!(team.normalized);
        // U11 in season 2026 -> born 2015
        assert_eq!(team.birth_year, Some(2015));
        assert_eq!(team.gender, Some(Gender::M));
        assert!(!team.display_name.contains('('));
    }

    #[test]
    fn gender_code_letter_first() {
        let team = normalize_team("Toca B15 Premier", &test_context());
        assert_eq!(team.birth_year, Some(2015));
        assert_eq!(team.gender, Some(Gender::M));
    }

    #[test]
    fn trailing_two_digit_year() {
        let team = normalize_team("Fusion Academy Navy 14", &test_context());
        assert_eq!(team.birth_year, Some(2014));
    }

    #[test]
    fn program_keyword_year() {
        let team = normalize_team("Strikers Pre-NAL 13 White", &test_context());
        assert_eq!(team.birth_year, Some(2013));
    }

    #[test]
    fn out_of_range_year_discarded() {
        let team = normalize_team("Old Boys 1998 Classic", &test_context());
        assert!(team.normalized);
        assert_eq!(team.birth_year, None);
    }

    #[test]
    fn derived_year_respects_injected_season() {
        let mut ctx = test_context();
        ctx.season_year = 2030;
        let team = normalize_team("Galaxy U12 Girls", &ctx);
        assert_eq!(team.birth_year, Some(2018));
        assert_eq!(team.gender, Some(Gender::F));
        assert_eq!(team.age_group.as_deref(), Some("U12"));
    }

    #[test]
    fn learned_club_prefix_overrides_heuristic() {
        let mut ctx = test_context();
        ctx.learned_club_prefixes = vec!["Sporting Blue Valley".to_string()];
        let team = normalize_team("Sporting Blue Valley Pumas 2013B", &ctx);
        assert_eq!(team.club_name.as_deref(), Some("Sporting Blue Valley"));
        assert_eq!(team.canonical_name, "pumas 2013b");
        assert!(team.transformations.contains(&"club_learned".to_string()));
    }

    #[test]
    fn club_run_capped_at_four_words() {
        let team = normalize_team("One Two Three Four Five 2014B", &test_context());
        assert_eq!(team.club_name.as_deref(), Some("One Two Three Four"));
    }

    #[test]
    fn empty_input_is_not_normalized() {
        let team = normalize_team("   ", &test_context());
        assert!(!team.normalized);
        assert!(team.error.is_some());
        assert!(team.canonical_name.is_empty());
    }

    #[test]
    fn canonical_name_never_empty_when_normalized() {
        // name that is nothing but a club-looking run
        let team = normalize_team("Kansas Rush", &test_context());
        assert!(team.normalized);
        assert!(!team.canonical_name.is_empty());
        assert_eq!(team.canonical_name, "kansas rush");
        assert_eq!(team.club_name, None);
    }

    #[test]
    fn transformations_record_order() {
        let team = normalize_team("KC Fusion KC Fusion 15B Gold (U11 Boys)", &test_context());
        assert_eq!(team.transformations[0], "stripped_duplicate_prefix");
        assert_eq!(team.transformations[1], "parenthetical_suffix");
    }
}
