//! Learned-pattern store: confidence-scored heuristics persisted across
//! runs, read once per run into a cache, written back incrementally as
//! records resolve. The persistence backend sits behind a circuit breaker
//! so a degraded store can never stall the pipeline.

pub mod breaker;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::common::error::{PipelineError, Result};
use crate::config::PatternSettings;
use crate::domain::LearnedPattern;
use crate::normalize::EventKeywordScores;
use crate::storage::Storage;
use breaker::CircuitBreaker;

pub const PATTERN_CLUB_PREFIX: &str = "club_prefix";
pub const PATTERN_EVENT_KEYWORD_LEAGUE: &str = "event_keyword_league";
pub const PATTERN_EVENT_KEYWORD_TOURNAMENT: &str = "event_keyword_tournament";

/// Source value for patterns that apply across all adapters.
pub const SOURCE_ALL: &str = "all";

pub struct PatternStore {
    storage: Arc<dyn Storage>,
    settings: PatternSettings,
    cache: Mutex<HashMap<(String, String), LearnedPattern>>,
    breaker: CircuitBreaker,
}

impl PatternStore {
    /// Read every persisted pattern once, at pipeline start.
    pub async fn load(storage: Arc<dyn Storage>, settings: PatternSettings) -> Result<Arc<Self>> {
        let patterns = storage.load_patterns().await?;
        let mut cache = HashMap::new();
        for p in patterns {
            cache.insert((p.pattern_type.clone(), p.source.clone()), p);
        }
        debug!(count = cache.len(), "loaded learned patterns");

        let breaker = CircuitBreaker::new(
            settings.breaker_failure_threshold,
            Duration::from_secs(settings.breaker_reset_secs),
        );
        Ok(Arc::new(Self {
            storage,
            settings,
            cache: Mutex::new(cache),
            breaker,
        }))
    }

    /// Read a pattern, applying the confidence floor.
    pub fn get(&self, pattern_type: &str, source: &str) -> Option<LearnedPattern> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(&(pattern_type.to_string(), source.to_string()))
            .filter(|p| p.confidence >= self.settings.min_confidence)
            .cloned()
    }

    /// Club prefixes learned for a source (plus cross-source patterns),
    /// most frequently observed first.
    pub fn learned_club_prefixes(&self, source: &str) -> Vec<String> {
        let mut weighted: Vec<(String, i64)> = Vec::new();
        for src in [source, SOURCE_ALL] {
            if let Some(pattern) = self.get(PATTERN_CLUB_PREFIX, src) {
                for (club, count) in pattern.pattern_data {
                    weighted.push((club, count));
                }
            }
        }
        weighted.sort_by(|a, b| b.1.cmp(&a.1));
        weighted.into_iter().map(|(club, _)| club).collect()
    }

    /// Keyword-confidence tables for event classification.
    pub fn event_keyword_scores(&self, source: &str) -> EventKeywordScores {
        let mut scores = EventKeywordScores::default();
        for src in [source, SOURCE_ALL] {
            if let Some(p) = self.get(PATTERN_EVENT_KEYWORD_LEAGUE, src) {
                for (keyword, count) in p.pattern_data {
                    scores.league.entry(keyword).or_insert((count, p.confidence));
                }
            }
            if let Some(p) = self.get(PATTERN_EVENT_KEYWORD_TOURNAMENT, src) {
                for (keyword, count) in p.pattern_data {
                    scores
                        .tournament
                        .entry(keyword)
                        .or_insert((count, p.confidence));
                }
            }
        }
        scores
    }

    /// Reinforce a heuristic that just worked. Creates the pattern at a
    /// moderate starting confidence when absent, bumps its confidence and
    /// the observed key's count otherwise.
    pub async fn record_success(&self, pattern_type: &str, source: &str, key: &str) -> Result<()> {
        let snapshot = {
            let Ok(mut cache) = self.cache.lock() else {
                return Ok(());
            };
            let entry = cache
                .entry((pattern_type.to_string(), source.to_string()))
                .or_insert_with(|| LearnedPattern {
                    id: Some(Uuid::new_v4()),
                    pattern_type: pattern_type.to_string(),
                    source: source.to_string(),
                    pattern_data: HashMap::new(),
                    confidence: self.settings.starting_confidence,
                    usage_count: 0,
                    failure_count: 0,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                });
            *entry.pattern_data.entry(key.to_string()).or_insert(0) += 1;
            entry.usage_count += 1;
            entry.confidence = (entry.confidence + self.settings.success_delta).min(1.0);
            entry.updated_at = Utc::now();
            entry.clone()
        };
        self.persist(snapshot).await
    }

    /// Penalize a heuristic that just misfired. Failures never create new
    /// patterns; a miss on an unknown pattern is a no-op.
    pub async fn record_failure(&self, pattern_type: &str, source: &str) -> Result<()> {
        let snapshot = {
            let Ok(mut cache) = self.cache.lock() else {
                return Ok(());
            };
            let Some(entry) = cache.get_mut(&(pattern_type.to_string(), source.to_string())) else {
                return Ok(());
            };
            entry.failure_count += 1;
            entry.confidence = (entry.confidence - self.settings.failure_delta).max(0.0);
            entry.updated_at = Utc::now();
            entry.clone()
        };
        self.persist(snapshot).await
    }

    async fn persist(&self, pattern: LearnedPattern) -> Result<()> {
        if !self.breaker.allow() {
            debug!(
                pattern_type = %pattern.pattern_type,
                source = %pattern.source,
                "pattern store breaker open, skipping write"
            );
            return Ok(());
        }
        match self.storage.upsert_pattern(&pattern).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(error = %e, "pattern store write failed");
                Err(PipelineError::Transient {
                    message: format!("pattern store write failed: {e}"),
                })
            }
        }
    }

    #[cfg(test)]
    pub fn cached(&self, pattern_type: &str, source: &str) -> Option<LearnedPattern> {
        self.cache
            .lock()
            .ok()?
            .get(&(pattern_type.to_string(), source.to_string()))
            .cloned()
    }
}
