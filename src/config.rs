use chrono::NaiveDate;
use serde::Deserialize;
use std::env;
use std::fs;

use crate::common::error::{PipelineError, Result};

/// Runtime configuration for a pipeline run.
///
/// Connection settings come from the environment (loaded via dotenv before
/// this is built); tuning knobs come from an optional `config.toml` next to
/// the binary, falling back to defaults. The season year drives all
/// age-group math and must be supplied at runtime - it is deliberately not
/// a compiled-in constant.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub database_auth_token: Option<String>,
    /// Season year used for U<age> -> birth year derivation.
    pub season_year: i32,
    /// Inclusive window of acceptable match dates.
    pub match_window_start: NaiveDate,
    pub match_window_end: NaiveDate,
    pub batch_size: usize,
    pub thresholds: Thresholds,
    pub retry: RetrySettings,
    pub patterns: PatternSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thresholds {
    /// Similarity at or above which a fuzzy match is merged automatically.
    pub auto_merge: f64,
    /// Similarity at or above which a fuzzy match is flagged for review.
    pub review: f64,
    /// Floor below which candidates are not even reported.
    pub ignore: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_merge: 0.95,
            review: 0.85,
            ignore: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Delay schedule for view refresh and other retryable operations, in seconds.
    pub delays_secs: Vec<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            delays_secs: vec![5, 15, 30],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatternSettings {
    pub starting_confidence: f64,
    pub success_delta: f64,
    pub failure_delta: f64,
    /// Patterns below this confidence are not surfaced on read.
    pub min_confidence: f64,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_secs: u64,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            starting_confidence: 0.6,
            success_delta: 0.05,
            failure_delta: 0.10,
            min_confidence: 0.3,
            breaker_failure_threshold: 5,
            breaker_reset_secs: 60,
        }
    }
}

/// Shape of the optional `config.toml` overrides.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    season_year: Option<i32>,
    batch_size: Option<usize>,
    match_window_start: Option<NaiveDate>,
    match_window_end: Option<NaiveDate>,
    thresholds: Option<Thresholds>,
    retry: Option<RetrySettings>,
    patterns: Option<PatternSettings>,
}

impl PipelineConfig {
    pub fn load() -> Result<Self> {
        let file = Self::read_file_config("config.toml")?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| PipelineError::Config("DATABASE_URL environment variable not set".into()))?;
        let database_auth_token = env::var("DATABASE_AUTH_TOKEN").ok();

        let season_year = match env::var("PITCHDATA_SEASON_YEAR") {
            Ok(v) => v.parse::<i32>().map_err(|_| {
                PipelineError::Config(format!("PITCHDATA_SEASON_YEAR is not a year: {v}"))
            })?,
            Err(_) => file.season_year.ok_or_else(|| {
                PipelineError::Config(
                    "season year not configured (PITCHDATA_SEASON_YEAR or config.toml season_year)"
                        .into(),
                )
            })?,
        };

        Ok(Self::from_parts(
            database_url,
            database_auth_token,
            season_year,
            file,
        ))
    }

    /// Build a config without touching the environment. Used by tests and
    /// by callers that already resolved their settings.
    pub fn for_season(database_url: impl Into<String>, season_year: i32) -> Self {
        Self::from_parts(database_url.into(), None, season_year, FileConfig::default())
    }

    fn from_parts(
        database_url: String,
        database_auth_token: Option<String>,
        season_year: i32,
        file: FileConfig,
    ) -> Self {
        // Default window: the season straddles two calendar years, plus a
        // year of slack either side for late-posted archives.
        let window_start = file
            .match_window_start
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(season_year - 1, 1, 1).expect("valid date"));
        let window_end = file
            .match_window_end
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(season_year + 1, 12, 31).expect("valid date"));

        Self {
            database_url,
            database_auth_token,
            season_year,
            match_window_start: window_start,
            match_window_end: window_end,
            batch_size: file.batch_size.unwrap_or(50),
            thresholds: file.thresholds.unwrap_or_default(),
            retry: file.retry.unwrap_or_default(),
            patterns: file.patterns.unwrap_or_default(),
        }
    }

    fn read_file_config(path: &str) -> Result<FileConfig> {
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .map_err(|e| PipelineError::Config(format!("failed to parse {path}: {e}"))),
            Err(_) => Ok(FileConfig::default()),
        }
    }

    /// Valid birth-year range relative to the season year (ages 7 through 19).
    pub fn birth_year_range(&self) -> std::ops::RangeInclusive<i32> {
        (self.season_year - 19)..=(self.season_year - 7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn birth_year_range_tracks_season_year() {
        let config = PipelineConfig::for_season("file:test.db", 2026);
        assert_eq!(config.birth_year_range(), 2007..=2019);

        let config = PipelineConfig::for_season("file:test.db", 2030);
        assert_eq!(config.birth_year_range(), 2011..=2023);
    }

    #[test]
    fn default_window_covers_adjacent_years() {
        let config = PipelineConfig::for_season("file:test.db", 2026);
        assert_eq!(
            config.match_window_start,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );
        assert_eq!(
            config.match_window_end,
            NaiveDate::from_ymd_opt(2027, 12, 31).unwrap()
        );
    }
}
