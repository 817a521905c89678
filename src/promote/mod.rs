//! Deduplication and promotion: takes normalized staging records, resolves
//! their teams and events to canonical ids, classifies each match as new,
//! duplicate, or reverse-duplicate, and writes new rows with the score-merge
//! upsert.

pub mod audit;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::error::{PipelineError, Result};
use crate::domain::{AuditEntry, Club, CompetitionEvent, EventType, Match, StagingRecord, Team};
use crate::normalize::{
    matched_keywords, normalize_event, normalize_match, normalize_team, NormalizeContext,
    NormalizedEvent, NormalizedTeam,
};
use crate::observability::tasks::spawn_logged;
use crate::patterns::{
    PatternStore, PATTERN_CLUB_PREFIX, PATTERN_EVENT_KEYWORD_LEAGUE,
    PATTERN_EVENT_KEYWORD_TOURNAMENT,
};
use crate::resolve::{EventCandidate, MatchMethod, Resolution, Resolver, TeamCandidate};
use crate::storage::Storage;
use audit::AuditLogger;

/// Generic soccer vocabulary ignored by the token-based fuzzy fallback.
const TEAM_STOP_WORDS: &[&str] = &[
    "fc", "sc", "cf", "soccer", "club", "academy", "united", "youth", "boys", "girls", "elite",
    "select", "premier", "white", "blue", "red", "black", "navy", "gold",
];

/// What happened to one batch of staging records.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub created: usize,
    /// Upserts that landed on an existing semantic key and merged.
    pub merged: usize,
    /// Records already present under the same source key with nothing new.
    pub duplicates: usize,
    pub reverse_duplicates: usize,
    pub score_updates: usize,
    pub processed: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

struct Prepared {
    staging_id: Uuid,
    row: Match,
}

pub struct Promoter {
    storage: Arc<dyn Storage>,
    resolver: Resolver,
    patterns: Arc<PatternStore>,
    audit: Arc<AuditLogger>,
    batch_size: usize,
    dry_run: bool,
}

impl Promoter {
    pub fn new(
        storage: Arc<dyn Storage>,
        resolver: Resolver,
        patterns: Arc<PatternStore>,
        audit: Arc<AuditLogger>,
        batch_size: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            storage,
            resolver,
            patterns,
            audit,
            batch_size,
            dry_run,
        }
    }

    /// Promote one batch. Per-record failures are isolated: a record that
    /// cannot be normalized or resolved lands in `failed` and the rest of
    /// the batch proceeds.
    pub async fn promote_batch(
        &self,
        records: &[StagingRecord],
        base_ctx: &NormalizeContext,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let mut prepared: Vec<Prepared> = Vec::new();

        for record in records {
            let Some(staging_id) = record.id else {
                warn!("staging record without id skipped");
                continue;
            };
            let mut ctx = base_ctx.clone();
            ctx.learned_club_prefixes = self
                .patterns
                .learned_club_prefixes(&record.source_platform);
            match self.prepare(record, &ctx).await {
                Ok(row) => prepared.push(Prepared { staging_id, row }),
                Err(e) => {
                    debug!(staging_id = %staging_id, error = %e, "record failed preparation");
                    outcome.failed.push((staging_id, e.to_string()));
                }
            }
        }

        // Classification: one query per batch for each lookup.
        let source_keys: Vec<String> = prepared
            .iter()
            .map(|p| p.row.source_match_key.clone())
            .collect();
        let by_source_key: HashMap<String, Match> = self
            .storage
            .find_matches_by_source_keys(&source_keys)
            .await?
            .into_iter()
            .map(|m| (m.source_match_key.clone(), m))
            .collect();

        let reverse_keys: Vec<(NaiveDate, Uuid, Uuid)> = prepared
            .iter()
            .filter(|p| !by_source_key.contains_key(&p.row.source_match_key))
            .map(|p| (p.row.match_date, p.row.away_team_id, p.row.home_team_id))
            .collect();
        let reversed: HashSet<(NaiveDate, Uuid, Uuid)> = self
            .storage
            .find_matches_by_semantic_keys(&reverse_keys)
            .await?
            .into_iter()
            .map(|m| (m.match_date, m.home_team_id, m.away_team_id))
            .collect();

        let mut to_insert: Vec<Prepared> = Vec::new();
        // semantic keys already queued for insert, so a swapped twin later
        // in the same batch is caught before either row lands
        let mut queued: HashSet<(NaiveDate, Uuid, Uuid)> = HashSet::new();
        for p in prepared {
            if let Some(existing) = by_source_key.get(&p.row.source_match_key) {
                if self.queue_score_update(existing, &p.row).await? {
                    outcome.score_updates += 1;
                } else {
                    outcome.duplicates += 1;
                }
                outcome.processed.push(p.staging_id);
                continue;
            }
            let swapped = (p.row.match_date, p.row.away_team_id, p.row.home_team_id);
            if reversed.contains(&swapped) || queued.contains(&swapped) {
                self.audit
                    .record(
                        AuditEntry::new("reverse_duplicate_skipped", "matches", None).with_new_data(
                            json!({
                                "source_match_key": p.row.source_match_key,
                                "match_date": p.row.match_date,
                            }),
                        ),
                    )
                    .await;
                outcome.reverse_duplicates += 1;
                outcome.processed.push(p.staging_id);
                continue;
            }
            queued.insert((p.row.match_date, p.row.home_team_id, p.row.away_team_id));
            to_insert.push(p);
        }

        for chunk in to_insert.chunks_mut(self.batch_size) {
            for p in chunk {
                if self.dry_run {
                    outcome.created += 1;
                    outcome.processed.push(p.staging_id);
                    continue;
                }
                match self.storage.upsert_match(&mut p.row).await {
                    Ok(true) => {
                        outcome.created += 1;
                        self.audit
                            .record(
                                AuditEntry::new("create", "matches", p.row.id).with_new_data(
                                    json!({ "source_match_key": p.row.source_match_key }),
                                ),
                            )
                            .await;
                    }
                    Ok(false) => {
                        outcome.merged += 1;
                        self.audit
                            .record(
                                AuditEntry::new("merge", "matches", p.row.id).with_new_data(
                                    json!({ "source_match_key": p.row.source_match_key }),
                                ),
                            )
                            .await;
                    }
                    Err(e) => {
                        outcome.failed.push((p.staging_id, e.to_string()));
                        continue;
                    }
                }
                outcome.processed.push(p.staging_id);
            }
        }

        info!(
            created = outcome.created,
            merged = outcome.merged,
            duplicates = outcome.duplicates,
            reverse_duplicates = outcome.reverse_duplicates,
            score_updates = outcome.score_updates,
            failed = outcome.failed.len(),
            "batch promoted"
        );
        Ok(outcome)
    }

    /// Duplicate by source key: only worth touching when the incoming row
    /// newly carries real scores and the stored row has none.
    async fn queue_score_update(&self, existing: &Match, incoming: &Match) -> Result<bool> {
        let incoming_real = matches!(
            (incoming.home_score, incoming.away_score),
            (Some(h), Some(a)) if h > 0 || a > 0
        );
        let existing_empty = existing.home_score.is_none() && existing.away_score.is_none();
        if !(incoming_real && existing_empty) {
            return Ok(false);
        }
        let Some(id) = existing.id else {
            return Ok(false);
        };
        if !self.dry_run {
            self.storage
                .update_match_scores(id, incoming.home_score, incoming.away_score)
                .await?;
            self.audit
                .record(
                    AuditEntry::new("score_update", "matches", Some(id))
                        .with_old_data(json!({
                            "home_score": existing.home_score,
                            "away_score": existing.away_score,
                        }))
                        .with_new_data(json!({
                            "home_score": incoming.home_score,
                            "away_score": incoming.away_score,
                        })),
                )
                .await;
        }
        Ok(true)
    }

    async fn prepare(&self, record: &StagingRecord, ctx: &NormalizeContext) -> Result<Match> {
        let nm = normalize_match(record, ctx);
        if !nm.is_valid {
            return Err(PipelineError::Validation(nm.validation_errors.join("; ")));
        }
        let match_date = nm
            .match_date
            .ok_or_else(|| PipelineError::Validation("match date missing".into()))?;

        let home_team_id = self.team_id_for(&nm.home_team_name, record, ctx).await?;
        let away_team_id = self.team_id_for(&nm.away_team_name, record, ctx).await?;
        if home_team_id == away_team_id {
            return Err(PipelineError::Validation(
                "home and away resolved to the same team".into(),
            ));
        }
        let (league_id, tournament_id) = self.event_ids_for(record).await?;

        Ok(Match {
            id: None,
            match_date,
            match_time: nm.match_time,
            home_team_id,
            away_team_id,
            home_score: nm.home_score,
            away_score: nm.away_score,
            league_id,
            tournament_id,
            division: nm.division,
            source_match_key: nm.source_match_key,
            source_platform: record.source_platform.clone(),
            is_scheduled: nm.is_scheduled,
            created_at: Utc::now(),
        })
    }

    async fn team_id_for(
        &self,
        raw_name: &str,
        record: &StagingRecord,
        ctx: &NormalizeContext,
    ) -> Result<Uuid> {
        let nt = normalize_team(raw_name, ctx);
        if !nt.normalized {
            return Err(PipelineError::Validation(
                nt.error
                    .unwrap_or_else(|| format!("team name not normalizable: {raw_name}")),
            ));
        }
        let candidate = TeamCandidate {
            internal_id: None,
            source_platform: record.source_platform.clone(),
            source_entity_id: None,
            display_name: nt.display_name.clone(),
            canonical_name: nt.canonical_name.clone(),
            birth_year: nt.birth_year,
            gender: nt.gender,
            state: record.state.clone(),
        };

        let id = match self.resolver.resolve_team(&candidate).await? {
            Resolution::Existing { id, method } => {
                if let MatchMethod::Fuzzy { similarity } = method {
                    self.audit
                        .record(
                            AuditEntry::new("fuzzy_merge", "teams", Some(id)).with_new_data(
                                json!({
                                    "candidate": nt.canonical_name,
                                    "similarity": similarity,
                                }),
                            ),
                        )
                        .await;
                }
                id
            }
            Resolution::Review {
                id,
                similarity,
                matched_name,
            } => {
                // flagged for human review; create a separate row rather
                // than risk a wrong merge
                self.audit
                    .record(
                        AuditEntry::new("fuzzy_review", "teams", Some(id)).with_new_data(json!({
                            "candidate": nt.canonical_name,
                            "matched": matched_name,
                            "similarity": similarity,
                        })),
                    )
                    .await;
                if !self.dry_run {
                    self.club_prefix_misfire(&nt, record);
                }
                self.fallback_or_create_team(&nt, &candidate).await?
            }
            Resolution::CreateNew => self.fallback_or_create_team(&nt, &candidate).await?,
        };

        if !self.dry_run {
            self.resolver.learn_team(id, &candidate).await?;
        }
        self.club_feedback(&nt, record).await?;
        Ok(id)
    }

    async fn fallback_or_create_team(
        &self,
        nt: &NormalizedTeam,
        candidate: &TeamCandidate,
    ) -> Result<Uuid> {
        if let Some((id, kind, matched_name)) = self.fuzzy_fallback(nt).await? {
            self.audit
                .record(
                    AuditEntry::new(kind, "teams", Some(id)).with_new_data(json!({
                        "candidate": nt.canonical_name,
                        "matched": matched_name,
                    })),
                )
                .await;
            return Ok(id);
        }

        let mut team = Team {
            id: None,
            canonical_name: nt.canonical_name.clone(),
            display_name: nt.display_name.clone(),
            club_name: nt.club_name.clone(),
            birth_year: nt.birth_year,
            gender: nt.gender,
            age_group: nt.age_group.clone(),
            state: candidate.state.clone(),
            created_at: Utc::now(),
        };
        if self.dry_run {
            return Ok(Uuid::new_v4());
        }
        self.storage.create_team(&mut team).await?;
        let id = team.id.ok_or_else(|| PipelineError::Database {
            message: "created team has no id".to_string(),
        })?;
        self.audit
            .record(
                AuditEntry::new("create", "teams", Some(id)).with_new_data(json!({
                    "canonical_name": nt.canonical_name,
                    "birth_year": nt.birth_year,
                })),
            )
            .await;
        Ok(id)
    }

    /// Fuzzy fallback chain beyond the generic resolver, applied only once
    /// nothing deterministic matched. Requires a known birth year; the chain
    /// never crosses cohorts.
    async fn fuzzy_fallback(
        &self,
        nt: &NormalizedTeam,
    ) -> Result<Option<(Uuid, &'static str, String)>> {
        let Some(birth_year) = nt.birth_year else {
            return Ok(None);
        };
        let gender_ok = |t: &Team| {
            t.gender.is_none() || nt.gender.is_none() || t.gender == nt.gender
        };

        let cohort = self.storage.list_teams_with_birth_year(Some(birth_year)).await?;

        // exact canonical name within the cohort (looser than the semantic
        // key: ignores state)
        if let Some(t) = cohort
            .iter()
            .find(|t| t.canonical_name == nt.canonical_name && gender_ok(t))
        {
            if let Some(id) = t.id {
                return Ok(Some((id, "fuzzy_match_exact_name_year", t.canonical_name.clone())));
            }
        }

        // same name filed without a birth year yet: adopt it and fill the gap
        let unknown_year = self.storage.list_teams_with_birth_year(None).await?;
        if let Some(t) = unknown_year
            .iter()
            .find(|t| t.canonical_name == nt.canonical_name && gender_ok(t))
        {
            if let Some(id) = t.id {
                if !self.dry_run {
                    self.storage.set_team_birth_year(id, birth_year).await?;
                }
                return Ok(Some((id, "fuzzy_match_birth_year_backfill", t.canonical_name.clone())));
            }
        }

        // candidate name is a suffix of a longer existing name (club prefix
        // present on one side only)
        if let Some(t) = cohort.iter().find(|t| {
            gender_ok(t)
                && t.canonical_name != nt.canonical_name
                && t.canonical_name
                    .strip_suffix(nt.canonical_name.as_str())
                    .map(|prefix| prefix.ends_with(' '))
                    .unwrap_or(false)
        }) {
            if let Some(id) = t.id {
                return Ok(Some((id, "fuzzy_match_suffix", t.canonical_name.clone())));
            }
        }

        // distinctive-token containment
        let tokens: Vec<&str> = nt
            .canonical_name
            .split_whitespace()
            .filter(|tok| tok.len() > 1 && !TEAM_STOP_WORDS.contains(tok))
            .collect();
        if !tokens.is_empty() {
            if let Some(t) = cohort.iter().find(|t| {
                gender_ok(t) && t.canonical_name != nt.canonical_name && {
                    let theirs: HashSet<&str> = t.canonical_name.split_whitespace().collect();
                    tokens.iter().all(|tok| theirs.contains(tok))
                }
            }) {
                if let Some(id) = t.id {
                    return Ok(Some((id, "fuzzy_match_tokens", t.canonical_name.clone())));
                }
            }
        }

        Ok(None)
    }

    /// A learned club prefix that steered the canonical name into an
    /// ambiguous near-collision gets its confidence nudged down.
    fn club_prefix_misfire(&self, nt: &NormalizedTeam, record: &StagingRecord) {
        if !nt.transformations.iter().any(|t| t == "club_learned") {
            return;
        }
        let patterns = self.patterns.clone();
        let source = record.source_platform.clone();
        spawn_logged("club-prefix-misfire", async move {
            patterns.record_failure(PATTERN_CLUB_PREFIX, &source).await
        });
    }

    async fn club_feedback(&self, nt: &NormalizedTeam, record: &StagingRecord) -> Result<()> {
        let Some(club_name) = &nt.club_name else {
            return Ok(());
        };
        if self.dry_run {
            return Ok(());
        }
        let canonical = club_name.to_lowercase();
        if self
            .storage
            .find_club_by_canonical_name(&canonical)
            .await?
            .is_none()
        {
            let mut club = Club {
                id: None,
                name: club_name.clone(),
                canonical_name: canonical,
                state: record.state.clone(),
                created_at: Utc::now(),
            };
            self.storage.create_club(&mut club).await?;
            self.audit
                .record(
                    AuditEntry::new("create", "clubs", club.id)
                        .with_new_data(json!({ "name": club.name })),
                )
                .await;
        }

        // fire-and-forget: pattern learning must never block promotion
        let patterns = self.patterns.clone();
        let source = record.source_platform.clone();
        let club = club_name.clone();
        spawn_logged("club-prefix-feedback", async move {
            patterns
                .record_success(PATTERN_CLUB_PREFIX, &source, &club)
                .await
        });
        Ok(())
    }

    async fn event_ids_for(&self, record: &StagingRecord) -> Result<(Option<Uuid>, Option<Uuid>)> {
        let Some(event_name) = &record.event_name else {
            return Ok((None, None));
        };
        let learned = self.patterns.event_keyword_scores(&record.source_platform);
        let ne = normalize_event(event_name, None, None, &learned);
        if !ne.normalized {
            warn!(event_name, "event not normalizable, match left unlinked");
            return Ok((None, None));
        }
        let candidate = EventCandidate {
            internal_id: None,
            source_platform: record.source_platform.clone(),
            source_event_id: record.source_event_id.clone(),
            name: ne.display_name.clone(),
            canonical_name: ne.canonical_name.clone(),
            event_type: ne.event_type,
            state: ne.state.clone().or_else(|| record.state.clone()),
        };

        let id = match self.resolver.resolve_event(&candidate).await? {
            Resolution::Existing { id, .. } => id,
            Resolution::Review {
                id,
                similarity,
                matched_name,
            } => {
                self.audit
                    .record(
                        AuditEntry::new("fuzzy_review", "events", Some(id)).with_new_data(json!({
                            "candidate": ne.canonical_name,
                            "matched": matched_name,
                            "similarity": similarity,
                        })),
                    )
                    .await;
                self.create_event(&ne, &candidate, record).await?
            }
            Resolution::CreateNew => self.create_event(&ne, &candidate, record).await?,
        };

        if !self.dry_run && matches!(ne.classification, "keyword" | "learned") {
            let pattern_type = match ne.event_type {
                EventType::League => PATTERN_EVENT_KEYWORD_LEAGUE,
                EventType::Tournament => PATTERN_EVENT_KEYWORD_TOURNAMENT,
            };
            for keyword in matched_keywords(&ne.canonical_name, ne.event_type) {
                let patterns = self.patterns.clone();
                let source = record.source_platform.clone();
                spawn_logged("event-keyword-feedback", async move {
                    patterns.record_success(pattern_type, &source, &keyword).await
                });
            }
        }

        match ne.event_type {
            EventType::League => Ok((Some(id), None)),
            EventType::Tournament => Ok((None, Some(id))),
        }
    }

    async fn create_event(
        &self,
        ne: &NormalizedEvent,
        candidate: &EventCandidate,
        record: &StagingRecord,
    ) -> Result<Uuid> {
        if self.dry_run {
            return Ok(Uuid::new_v4());
        }
        let mut event = CompetitionEvent {
            id: None,
            name: ne.display_name.clone(),
            canonical_name: ne.canonical_name.clone(),
            event_type: ne.event_type,
            year: ne.year,
            season: ne.season.clone(),
            state: candidate.state.clone(),
            region: ne.region.clone(),
            source_event_id: record.source_event_id.clone(),
            source_platform: Some(record.source_platform.clone()),
            start_date: None,
            end_date: None,
            created_at: Utc::now(),
        };
        self.storage.create_event(&mut event).await?;
        let id = event.id.ok_or_else(|| PipelineError::Database {
            message: "created event has no id".to_string(),
        })?;
        self.resolver.learn_event(id, candidate).await?;
        self.audit
            .record(
                AuditEntry::new("create", event_table_name(ne.event_type), Some(id))
                    .with_new_data(json!({ "name": ne.display_name })),
            )
            .await;
        Ok(id)
    }
}

fn event_table_name(event_type: EventType) -> &'static str {
    match event_type {
        EventType::League => "leagues",
        EventType::Tournament => "tournaments",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PatternSettings, Thresholds};
    use crate::normalize::test_context;
    use crate::storage::memory::MemoryStorage;

    async fn promoter(storage: Arc<MemoryStorage>, dry_run: bool) -> Promoter {
        let patterns = PatternStore::load(storage.clone(), PatternSettings::default())
            .await
            .unwrap();
        let resolver = Resolver::new(storage.clone(), Thresholds::default());
        let audit = Arc::new(AuditLogger::new(storage.clone(), dry_run));
        Promoter::new(storage, resolver, patterns, audit, 50, dry_run)
    }

    fn staging(
        source_match_id: &str,
        home: &str,
        away: &str,
        home_score: Option<&str>,
        away_score: Option<&str>,
    ) -> StagingRecord {
        StagingRecord {
            id: Some(Uuid::new_v4()),
            source_platform: "heartland".to_string(),
            source_match_id: Some(source_match_id.to_string()),
            source_event_id: Some("evt42".to_string()),
            event_name: Some("Heartland Soccer League 2025".to_string()),
            home_team_name: Some(home.to_string()),
            away_team_name: Some(away.to_string()),
            match_date: Some("2026-04-01".to_string()),
            match_time: Some("14:30".to_string()),
            home_score: home_score.map(str::to_string),
            away_score: away_score.map(str::to_string),
            division: Some("Division 1".to_string()),
            subdivision: None,
            state: Some("KS".to_string()),
            processed: false,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn promotes_a_full_record_end_to_end() {
        let storage = Arc::new(MemoryStorage::new());
        let p = promoter(storage.clone(), false).await;

        let record = staging("m1", "KC Fusion 15B Gold", "Rush 2015B Select", None, None);
        let outcome = p.promote_batch(&[record], &test_context()).await.unwrap();

        assert_eq!(outcome.created, 1);
        assert!(outcome.failed.is_empty());
        assert_eq!(storage.teams().len(), 2);
        assert_eq!(storage.matches().len(), 1);

        let m = &storage.matches()[0];
        assert!(m.league_id.is_some());
        assert!(m.tournament_id.is_none());
        assert_eq!(m.division.as_deref(), Some("Division 1"));
        assert!(m.is_scheduled);

        // both birth years parsed into the 2015 cohort
        assert!(storage.teams().iter().all(|t| t.birth_year == Some(2015)));
        // the league was created exactly once
        assert_eq!(storage.events().len(), 1);
    }

    #[tokio::test]
    async fn rerun_is_a_duplicate_not_a_second_row() {
        let storage = Arc::new(MemoryStorage::new());
        let p = promoter(storage.clone(), false).await;
        let record = staging("m1", "KC Fusion 15B Gold", "Rush 2015B Select", None, None);

        p.promote_batch(&[record.clone()], &test_context())
            .await
            .unwrap();
        let outcome = p.promote_batch(&[record], &test_context()).await.unwrap();

        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(storage.matches().len(), 1);
        assert_eq!(storage.teams().len(), 2);
    }

    #[tokio::test]
    async fn reverse_orientation_is_skipped() {
        let storage = Arc::new(MemoryStorage::new());
        let p = promoter(storage.clone(), false).await;

        let first = staging("m1", "KC Fusion 15B Gold", "Rush 2015B Select", None, None);
        p.promote_batch(&[first], &test_context()).await.unwrap();

        let swapped = staging("m2", "Rush 2015B Select", "KC Fusion 15B Gold", None, None);
        let outcome = p.promote_batch(&[swapped], &test_context()).await.unwrap();

        assert_eq!(outcome.reverse_duplicates, 1);
        assert_eq!(outcome.created, 0);
        assert_eq!(storage.matches().len(), 1);
    }

    #[tokio::test]
    async fn reverse_orientation_within_one_batch_is_skipped() {
        let storage = Arc::new(MemoryStorage::new());
        let p = promoter(storage.clone(), false).await;

        // the same fixture twice in one batch, home and away swapped
        let first = staging("m1", "KC Fusion 15B Gold", "Rush 2015B Select", None, None);
        let swapped = staging("m2", "Rush 2015B Select", "KC Fusion 15B Gold", None, None);
        let outcome = p
            .promote_batch(&[first, swapped], &test_context())
            .await
            .unwrap();

        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.reverse_duplicates, 1);
        assert_eq!(storage.matches().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_with_fresh_scores_updates_in_place() {
        let storage = Arc::new(MemoryStorage::new());
        let p = promoter(storage.clone(), false).await;

        let scheduled = staging("m1", "KC Fusion 15B Gold", "Rush 2015B Select", None, None);
        p.promote_batch(&[scheduled], &test_context()).await.unwrap();
        assert!(storage.matches()[0].home_score.is_none());

        let played = staging("m1", "KC Fusion 15B Gold", "Rush 2015B Select", Some("3"), Some("1"));
        let outcome = p.promote_batch(&[played], &test_context()).await.unwrap();

        assert_eq!(outcome.score_updates, 1);
        assert_eq!(storage.matches().len(), 1);
        let m = &storage.matches()[0];
        assert_eq!(m.home_score, Some(3));
        assert_eq!(m.away_score, Some(1));
        assert!(!m.is_scheduled);
    }

    #[tokio::test]
    async fn bad_record_fails_alone() {
        let storage = Arc::new(MemoryStorage::new());
        let p = promoter(storage.clone(), false).await;

        let mut bad = staging("m1", "KC Fusion 15B Gold", "KC Fusion 15B Gold", None, None);
        bad.source_match_id = Some("bad".to_string());
        let good = staging("m2", "KC Fusion 15B Gold", "Rush 2015B Select", None, None);

        let outcome = p
            .promote_batch(&[bad, good], &test_context())
            .await
            .unwrap();

        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(storage.matches().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let p = promoter(storage.clone(), true).await;

        let record = staging("m1", "KC Fusion 15B Gold", "Rush 2015B Select", None, None);
        let outcome = p.promote_batch(&[record], &test_context()).await.unwrap();

        assert_eq!(outcome.created, 1);
        assert!(storage.matches().is_empty());
        assert!(storage.teams().is_empty());
        assert!(storage.events().is_empty());
        assert!(storage.audit_entries().is_empty());
    }

    #[tokio::test]
    async fn review_band_collision_penalizes_learned_prefix() {
        let storage = Arc::new(MemoryStorage::new());
        let p = promoter(storage.clone(), false).await;
        p.patterns
            .record_success(PATTERN_CLUB_PREFIX, "heartland", "KC Fusion")
            .await
            .unwrap();

        // cohort-mate whose alias sits in the review band against the
        // prefix-stripped canonical name "15b gold"
        let mut rival = Team {
            id: None,
            canonical_name: "15b golden rush".to_string(),
            display_name: "15b golden rush".to_string(),
            club_name: None,
            birth_year: Some(2015),
            gender: Some(crate::domain::Gender::M),
            age_group: None,
            state: Some("KS".to_string()),
            created_at: Utc::now(),
        };
        storage.create_team(&mut rival).await.unwrap();
        let rival_id = rival.id.unwrap();
        p.resolver
            .learn_team(
                rival_id,
                &TeamCandidate {
                    internal_id: None,
                    source_platform: "heartland".to_string(),
                    source_entity_id: None,
                    display_name: "15b golden rush".to_string(),
                    canonical_name: "15b golden rush".to_string(),
                    birth_year: Some(2015),
                    gender: Some(crate::domain::Gender::M),
                    state: Some("KS".to_string()),
                },
            )
            .await
            .unwrap();

        let record = staging("m1", "KC Fusion 15B Gold", "Rush 2015B Select", None, None);
        let mut ctx = test_context();
        ctx.learned_club_prefixes = vec!["KC Fusion".to_string()];
        p.team_id_for("KC Fusion 15B Gold", &record, &ctx)
            .await
            .unwrap();

        // feedback is detached; give the spawned task a moment to land
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let pattern = p.patterns.cached(PATTERN_CLUB_PREFIX, "heartland").unwrap();
        assert_eq!(pattern.failure_count, 1);
        assert!(pattern.confidence < 0.65);
    }

    #[tokio::test]
    async fn birth_year_backfill_adopts_existing_row() {
        let storage = Arc::new(MemoryStorage::new());
        let mut existing = Team {
            id: None,
            canonical_name: "15b gold".to_string(),
            display_name: "KC Fusion 15B Gold".to_string(),
            club_name: Some("KC Fusion".to_string()),
            birth_year: None,
            gender: Some(crate::domain::Gender::M),
            age_group: None,
            state: Some("KS".to_string()),
            created_at: Utc::now(),
        };
        storage.create_team(&mut existing).await.unwrap();
        let p = promoter(storage.clone(), false).await;

        let record = staging("m1", "KC Fusion 15B Gold", "Rush 2015B Select", None, None);
        p.promote_batch(&[record], &test_context()).await.unwrap();

        // the pre-existing row gained its birth year instead of a twin row
        let teams = storage.teams();
        assert_eq!(teams.len(), 2);
        let adopted = teams
            .iter()
            .find(|t| t.id == existing.id)
            .expect("existing team still present");
        assert_eq!(adopted.birth_year, Some(2015));
    }
}
