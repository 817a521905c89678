use once_cell::sync::Lazy;
use regex::Regex;

/// Tokens that carry no tier information and get stripped before parsing:
/// age groups, gender words, game formats.
static NOISE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:U-?\d{1,2}|boys?|girls?|men|women|male|female|\d{1,2}v\d{1,2}|soccer|recreational|rec)\b")
        .expect("valid regex")
});

static DIVISION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdivision\s*#?\s*(\d+)\b").expect("valid regex"));

static GROUPING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(flight|group|pool|bracket)\s+([A-Za-z0-9]+)\b").expect("valid regex")
});

// Single letter or letter+digit tier code, e.g. "A", "B1".
static TIER_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^([A-D])(\d)?$").expect("valid regex"));

static ROMAN_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(premier|elite|gold|silver|bronze|platinum)\s+(I{1,3}|IV)\b").expect("valid regex"));

/// Closed vocabulary of named tiers.
const NAMED_TIERS: &[&str] = &[
    "premier", "elite", "select", "gold", "silver", "bronze", "platinum", "copper", "black",
    "white", "blue", "red", "orange", "green", "navy", "royal", "grey", "gray",
];

/// Extract a division/tier label from free text, with the structured
/// per-source subdivision taking priority whenever it is present.
///
/// Returns `None` when nothing distinctive remains after stripping age,
/// gender and format tokens.
pub fn extract_division_tier(raw: Option<&str>, subdivision: Option<&str>) -> Option<String> {
    if let Some(sub) = subdivision.map(str::trim).filter(|s| !s.is_empty()) {
        if sub.chars().all(|c| c.is_ascii_digit()) {
            return Some(format!("Division {sub}"));
        }
        // non-numeric structured subdivisions (e.g. "USA", "CANADA") pass
        // through as-is
        return Some(title_case(sub));
    }

    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(caps) = DIVISION_RE.captures(raw) {
        return Some(format!("Division {}", &caps[1]));
    }
    if let Some(caps) = GROUPING_RE.captures(raw) {
        return Some(format!("{} {}", title_case(&caps[1]), caps[2].to_uppercase()));
    }
    if let Some(caps) = ROMAN_SUFFIX_RE.captures(raw) {
        return Some(format!(
            "{} {}",
            title_case(&caps[1]),
            caps[2].to_uppercase()
        ));
    }

    let stripped = NOISE_RE.replace_all(raw, " ");
    let tokens: Vec<&str> = stripped.split_whitespace().collect();

    for token in &tokens {
        let lower = token.to_lowercase();
        if NAMED_TIERS.contains(&lower.as_str()) {
            return Some(title_case(&lower));
        }
    }
    for token in &tokens {
        if TIER_CODE_RE.is_match(token) {
            return Some(token.to_uppercase());
        }
    }

    None
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_division_number() {
        assert_eq!(
            extract_division_tier(Some("U-11 Boys Division 1"), None),
            Some("Division 1".to_string())
        );
    }

    #[test]
    fn nothing_distinctive_is_none() {
        assert_eq!(extract_division_tier(Some("U13 Boys"), None), None);
        assert_eq!(extract_division_tier(Some("U10 Girls 7v7"), None), None);
        assert_eq!(extract_division_tier(None, None), None);
        assert_eq!(extract_division_tier(Some("  "), None), None);
    }

    #[test]
    fn structured_subdivision_takes_priority() {
        assert_eq!(
            extract_division_tier(Some("U10 Boys"), Some("9")),
            Some("Division 9".to_string())
        );
        // even over an explicit free-text division
        assert_eq!(
            extract_division_tier(Some("U10 Boys Division 2"), Some("3")),
            Some("Division 3".to_string())
        );
        assert_eq!(
            extract_division_tier(Some("U10 Boys"), Some("CANADA")),
            Some("Canada".to_string())
        );
    }

    #[test]
    fn grouping_keywords() {
        assert_eq!(
            extract_division_tier(Some("U12 Boys Flight A"), None),
            Some("Flight A".to_string())
        );
        assert_eq!(
            extract_division_tier(Some("Pool b2"), None),
            Some("Pool B2".to_string())
        );
        assert_eq!(
            extract_division_tier(Some("U14 Girls Bracket 3"), None),
            Some("Bracket 3".to_string())
        );
    }

    #[test]
    fn named_tiers() {
        assert_eq!(
            extract_division_tier(Some("U11 Boys Premier"), None),
            Some("Premier".to_string())
        );
        assert_eq!(
            extract_division_tier(Some("U11 Girls Gold"), None),
            Some("Gold".to_string())
        );
    }

    #[test]
    fn roman_numeral_tier_suffix() {
        assert_eq!(
            extract_division_tier(Some("U15 Boys Premier II"), None),
            Some("Premier II".to_string())
        );
    }

    #[test]
    fn letter_and_letter_digit_codes() {
        assert_eq!(extract_division_tier(Some("U12 Boys A"), None), Some("A".to_string()));
        assert_eq!(
            extract_division_tier(Some("U12 Boys b1"), None),
            Some("B1".to_string())
        );
    }
}
