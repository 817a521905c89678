//! Pure normalization layer: raw staging fields in, structured candidates out.
//!
//! Every function here is deterministic, does no I/O and never panics on
//! malformed input - a record that cannot be normalized comes back with
//! `normalized = false` and an explanatory error string, so one bad row can
//! never take down a batch.

pub mod division;
pub mod event;
pub mod matches;
pub mod team;

use chrono::NaiveDate;

use crate::config::PipelineConfig;

pub use division::extract_division_tier;
pub use event::{matched_keywords, normalize_event, EventKeywordScores, NormalizedEvent};
pub use matches::{normalize_match, NormalizedMatch};
pub use team::{normalize_team, NormalizedTeam};

/// Run-scoped inputs the normalizers need. Carries the injected season year
/// (never hard-coded), the allowed match-date window, and "today" so that
/// schedule classification is reproducible in tests.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub season_year: i32,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub today: NaiveDate,
    /// Club prefixes previously learned for this source, highest confidence
    /// first. When one matches, it wins over the title-case heuristic.
    pub learned_club_prefixes: Vec<String>,
}

impl NormalizeContext {
    pub fn from_config(config: &PipelineConfig, today: NaiveDate) -> Self {
        Self {
            season_year: config.season_year,
            window_start: config.match_window_start,
            window_end: config.match_window_end,
            today,
            learned_club_prefixes: Vec::new(),
        }
    }

    pub fn birth_year_valid(&self, year: i32) -> bool {
        year >= self.season_year - 19 && year <= self.season_year - 7
    }
}

/// Collapse runs of whitespace to single spaces and trim.
pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
pub(crate) fn test_context() -> NormalizeContext {
    NormalizeContext {
        season_year: 2026,
        window_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        window_end: NaiveDate::from_ymd_opt(2027, 12, 31).unwrap(),
        today: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        learned_club_prefixes: Vec::new(),
    }
}
