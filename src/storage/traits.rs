use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::common::error::Result;
use crate::domain::{
    AuditEntry, CanonicalAlias, Club, CompetitionEvent, EventType, Gender, LearnedPattern, Match,
    SourceEntityRef, StagingRecord, Team,
};

/// One row of the audit report aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditSummaryRow {
    pub action: String,
    pub table_name: String,
    pub count: i64,
}

/// Storage port for the pipeline. The production implementation talks to
/// libSQL; tests run against the in-memory implementation.
///
/// Lookup methods that take a slice are batched by contract: one query per
/// call, not one per element.
#[async_trait]
pub trait Storage: Send + Sync {
    // --- staging backlog ---
    async fn fetch_unprocessed_staging(
        &self,
        limit: Option<usize>,
        source: Option<&str>,
    ) -> Result<Vec<StagingRecord>>;
    async fn mark_staging_processed(&self, id: Uuid) -> Result<()>;
    async fn mark_staging_failed(&self, id: Uuid, reason: &str) -> Result<()>;

    // --- teams ---
    async fn create_team(&self, team: &mut Team) -> Result<()>;
    async fn get_team(&self, id: Uuid) -> Result<Option<Team>>;
    async fn find_team_by_semantic_key(
        &self,
        canonical_name: &str,
        birth_year: Option<i32>,
        gender: Option<Gender>,
        state: Option<&str>,
    ) -> Result<Option<Team>>;
    /// All teams with the given birth year; `None` selects rows whose birth
    /// year is unknown.
    async fn list_teams_with_birth_year(&self, birth_year: Option<i32>) -> Result<Vec<Team>>;
    async fn set_team_birth_year(&self, id: Uuid, birth_year: i32) -> Result<()>;

    // --- clubs ---
    async fn find_club_by_canonical_name(&self, canonical_name: &str) -> Result<Option<Club>>;
    async fn create_club(&self, club: &mut Club) -> Result<()>;

    // --- leagues / tournaments ---
    async fn create_event(&self, event: &mut CompetitionEvent) -> Result<()>;
    async fn get_event(
        &self,
        event_type: EventType,
        id: Uuid,
    ) -> Result<Option<CompetitionEvent>>;
    async fn find_event_by_source(
        &self,
        platform: &str,
        source_event_id: &str,
    ) -> Result<Option<CompetitionEvent>>;
    async fn find_event_by_name(
        &self,
        event_type: EventType,
        canonical_name: &str,
    ) -> Result<Option<CompetitionEvent>>;
    async fn list_events(&self, event_type: EventType) -> Result<Vec<CompetitionEvent>>;

    // --- matches ---
    async fn find_matches_by_source_keys(&self, keys: &[String]) -> Result<Vec<Match>>;
    async fn find_matches_by_semantic_keys(
        &self,
        keys: &[(NaiveDate, Uuid, Uuid)],
    ) -> Result<Vec<Match>>;
    /// Upsert on the semantic key (match_date, home_team_id, away_team_id)
    /// with the score-merge policy: a non-null incoming score overwrites a
    /// null existing one, a real existing score is never overwritten by a
    /// null incoming one, event links fill only when absent, and the
    /// first writer keeps `source_match_key`. `is_scheduled` survives a
    /// merge only while the merged row remains scoreless. Returns true
    /// when a new row was created.
    async fn upsert_match(&self, m: &mut Match) -> Result<bool>;
    async fn update_match_scores(
        &self,
        id: Uuid,
        home_score: Option<i32>,
        away_score: Option<i32>,
    ) -> Result<()>;

    // --- canonical alias registry ---
    async fn load_alias_registry(&self, entity_type: &str) -> Result<Vec<CanonicalAlias>>;
    async fn upsert_alias(&self, alias: &mut CanonicalAlias) -> Result<()>;

    // --- source entity map ---
    async fn find_source_entity(
        &self,
        entity_type: &str,
        platform: &str,
        source_entity_id: &str,
    ) -> Result<Option<Uuid>>;
    async fn record_source_entity(&self, entry: &SourceEntityRef) -> Result<()>;

    // --- learned patterns ---
    async fn load_patterns(&self) -> Result<Vec<LearnedPattern>>;
    async fn upsert_pattern(&self, pattern: &LearnedPattern) -> Result<()>;

    // --- audit log ---
    async fn append_audit(&self, entries: &[AuditEntry]) -> Result<()>;
    async fn audit_summary(&self, days: i64) -> Result<Vec<AuditSummaryRow>>;

    // --- reporting views ---
    async fn refresh_views(&self) -> Result<()>;
}
