//! Run state machine: fetch backlog, then per batch normalize / resolve /
//! deduplicate / promote, then flush audit, refresh reporting views with a
//! capped retry, and report.
//!
//! A run ends `complete` even with per-record failures; it only ends `fatal`
//! when the infrastructure itself is gone (no connection, backlog fetch
//! failed, a whole batch errored out).

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::common::error::Result;
use crate::config::PipelineConfig;
use crate::normalize::NormalizeContext;
use crate::patterns::PatternStore;
use crate::promote::audit::AuditLogger;
use crate::promote::Promoter;
use crate::resolve::Resolver;
use crate::storage::Storage;

use super::retry::RetryPolicy;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Cap on how many staging rows to pull this run.
    pub limit: Option<usize>,
    /// Restrict the run to one source platform.
    pub source: Option<String>,
    /// Execute everything except the writes, reporting what would change.
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub fetched: usize,
    pub created: usize,
    pub merged: usize,
    pub duplicates: usize,
    pub reverse_duplicates: usize,
    pub score_updates: usize,
    pub failed: usize,
    pub dry_run: bool,
    /// None when the run had nothing to refresh (dry run or no writes).
    pub views_refreshed: Option<bool>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{}fetched {}, created {}, merged {}, duplicates {}, reverse duplicates {}, \
             score updates {}, failed {}",
            if self.dry_run { "[dry run] " } else { "" },
            self.fetched,
            self.created,
            self.merged,
            self.duplicates,
            self.reverse_duplicates,
            self.score_updates,
            self.failed,
        )
    }
}

pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(storage: Arc<dyn Storage>, config: PipelineConfig) -> Self {
        Self { storage, config }
    }

    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        let started = std::time::Instant::now();
        info!(
            limit = ?options.limit,
            source = ?options.source,
            dry_run = options.dry_run,
            season_year = self.config.season_year,
            "pipeline run starting"
        );

        let patterns =
            PatternStore::load(self.storage.clone(), self.config.patterns.clone()).await?;
        let resolver = Resolver::new(self.storage.clone(), self.config.thresholds.clone());
        let audit = Arc::new(AuditLogger::new(self.storage.clone(), options.dry_run));
        let promoter = Promoter::new(
            self.storage.clone(),
            resolver,
            patterns,
            audit.clone(),
            self.config.batch_size,
            options.dry_run,
        );

        let records = self
            .storage
            .fetch_unprocessed_staging(options.limit, options.source.as_deref())
            .await?;
        let mut report = RunReport {
            fetched: records.len(),
            dry_run: options.dry_run,
            ..Default::default()
        };
        info!(fetched = records.len(), "staging backlog fetched");

        let base_ctx = NormalizeContext::from_config(&self.config, Utc::now().date_naive());

        for batch in records.chunks(self.config.batch_size) {
            let outcome = promoter.promote_batch(batch, &base_ctx).await?;

            if !options.dry_run {
                for id in &outcome.processed {
                    self.storage.mark_staging_processed(*id).await?;
                }
                for (id, reason) in &outcome.failed {
                    self.storage.mark_staging_failed(*id, reason).await?;
                }
            }

            report.created += outcome.created;
            report.merged += outcome.merged;
            report.duplicates += outcome.duplicates;
            report.reverse_duplicates += outcome.reverse_duplicates;
            report.score_updates += outcome.score_updates;
            report.failed += outcome.failed.len();
        }

        audit.flush().await;

        let wrote = report.created + report.merged + report.score_updates > 0;
        if !options.dry_run && wrote {
            let retry = RetryPolicy::from_settings(&self.config.retry);
            match retry
                .run("refresh reporting views", || self.storage.refresh_views())
                .await
            {
                Ok(()) => report.views_refreshed = Some(true),
                Err(e) => {
                    // the production rows are already committed; a stale
                    // summary is reported, not fatal
                    error!(error = %e, "view refresh abandoned after retries");
                    report.views_refreshed = Some(false);
                }
            }
        }

        if report.failed > 0 {
            warn!(failed = report.failed, "run completed with per-record failures");
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            summary = %report.summary(),
            "pipeline run complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StagingRecord;
    use crate::storage::memory::MemoryStorage;
    use uuid::Uuid;

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::for_season("file:test.db", 2026);
        config.retry.delays_secs = vec![0, 0, 0];
        config
    }

    fn staged(source_match_id: &str, home: &str, away: &str) -> StagingRecord {
        StagingRecord {
            id: Some(Uuid::new_v4()),
            source_platform: "heartland".to_string(),
            source_match_id: Some(source_match_id.to_string()),
            source_event_id: Some("evt42".to_string()),
            event_name: Some("Heartland Soccer League 2025".to_string()),
            home_team_name: Some(home.to_string()),
            away_team_name: Some(away.to_string()),
            match_date: Some("2026-04-01".to_string()),
            match_time: None,
            home_score: Some("2".to_string()),
            away_score: Some("1".to_string()),
            division: None,
            subdivision: None,
            state: Some("KS".to_string()),
            processed: false,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn full_run_promotes_and_marks_staging() {
        let storage = Arc::new(MemoryStorage::new());
        storage.seed_staging(vec![
            staged("m1", "KC Fusion 15B Gold", "Rush 2015B Select"),
            staged("m2", "Sporting Blue Valley 2012G", "Tonka United 12G Navy"),
        ]);
        let orchestrator = Orchestrator::new(storage.clone(), config());

        let report = orchestrator.run(RunOptions::default()).await.unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.created, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.views_refreshed, Some(true));
        assert!(storage.staging_records().iter().all(|r| r.processed));
        assert_eq!(storage.matches().len(), 2);
    }

    #[tokio::test]
    async fn failed_record_is_marked_with_its_reason() {
        let storage = Arc::new(MemoryStorage::new());
        storage.seed_staging(vec![
            staged("m1", "KC Fusion 15B Gold", "KC Fusion 15B Gold"),
            staged("m2", "KC Fusion 15B Gold", "Rush 2015B Select"),
        ]);
        let orchestrator = Orchestrator::new(storage.clone(), config());

        let report = orchestrator.run(RunOptions::default()).await.unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 1);
        let failed: Vec<_> = storage
            .staging_records()
            .into_iter()
            .filter(|r| r.error_message.is_some())
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].processed);
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        storage.seed_staging(vec![staged("m1", "KC Fusion 15B Gold", "Rush 2015B Select")]);
        let orchestrator = Orchestrator::new(storage.clone(), config());

        let report = orchestrator
            .run(RunOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.views_refreshed, None);
        assert!(storage.matches().is_empty());
        assert!(storage.staging_records().iter().all(|r| !r.processed));
        assert_eq!(storage.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn view_refresh_retries_through_transient_failures() {
        let storage = Arc::new(MemoryStorage::new());
        storage.seed_staging(vec![staged("m1", "KC Fusion 15B Gold", "Rush 2015B Select")]);
        storage.fail_next_refreshes(2);
        let orchestrator = Orchestrator::new(storage.clone(), config());

        let report = orchestrator.run(RunOptions::default()).await.unwrap();
        assert_eq!(report.views_refreshed, Some(true));
        assert_eq!(storage.refresh_calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_refresh_reports_but_does_not_fail_the_run() {
        let storage = Arc::new(MemoryStorage::new());
        storage.seed_staging(vec![staged("m1", "KC Fusion 15B Gold", "Rush 2015B Select")]);
        storage.fail_next_refreshes(10);
        let orchestrator = Orchestrator::new(storage.clone(), config());

        let report = orchestrator.run(RunOptions::default()).await.unwrap();
        assert_eq!(report.views_refreshed, Some(false));
        assert_eq!(storage.matches().len(), 1);
    }

    #[tokio::test]
    async fn source_filter_limits_the_backlog() {
        let storage = Arc::new(MemoryStorage::new());
        let mut other = staged("m9", "KC Fusion 15B Gold", "Rush 2015B Select");
        other.source_platform = "gotsport".to_string();
        storage.seed_staging(vec![
            staged("m1", "KC Fusion 15B Gold", "Rush 2015B Select"),
            other,
        ]);
        let orchestrator = Orchestrator::new(storage.clone(), config());

        let report = orchestrator
            .run(RunOptions {
                source: Some("heartland".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(report.fetched, 1);
    }
}
