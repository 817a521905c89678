//! In-memory storage used by the test suite. Mirrors the merge semantics of
//! the libSQL implementation exactly, including the match upsert policy,
//! and offers failure injection for the non-critical subsystems.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::common::error::{PipelineError, Result};
use crate::domain::{
    AuditEntry, CanonicalAlias, Club, CompetitionEvent, EventType, Gender, LearnedPattern, Match,
    SourceEntityRef, StagingRecord, Team,
};

use super::traits::{AuditSummaryRow, Storage};

#[derive(Default)]
struct Inner {
    staging: Vec<StagingRecord>,
    teams: Vec<Team>,
    clubs: Vec<Club>,
    events: Vec<CompetitionEvent>,
    matches: Vec<Match>,
    aliases: Vec<CanonicalAlias>,
    source_map: Vec<SourceEntityRef>,
    patterns: Vec<LearnedPattern>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
    fail_pattern_writes: AtomicBool,
    fail_audit_writes: AtomicBool,
    /// Number of refresh_views calls that should fail transiently before
    /// one succeeds.
    refresh_failures_remaining: AtomicU32,
    refresh_calls: AtomicU32,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_staging(&self, records: Vec<StagingRecord>) {
        let mut inner = self.inner.lock().expect("storage lock");
        for mut r in records {
            if r.id.is_none() {
                r.id = Some(Uuid::new_v4());
            }
            inner.staging.push(r);
        }
    }

    pub fn fail_pattern_writes(&self, fail: bool) {
        self.fail_pattern_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_refreshes(&self, count: u32) {
        self.refresh_failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn matches(&self) -> Vec<Match> {
        self.inner.lock().expect("storage lock").matches.clone()
    }

    pub fn teams(&self) -> Vec<Team> {
        self.inner.lock().expect("storage lock").teams.clone()
    }

    pub fn events(&self) -> Vec<CompetitionEvent> {
        self.inner.lock().expect("storage lock").events.clone()
    }

    pub fn clubs(&self) -> Vec<Club> {
        self.inner.lock().expect("storage lock").clubs.clone()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().expect("storage lock").audit.clone()
    }

    pub fn staging_records(&self) -> Vec<StagingRecord> {
        self.inner.lock().expect("storage lock").staging.clone()
    }

    pub fn aliases(&self) -> Vec<CanonicalAlias> {
        self.inner.lock().expect("storage lock").aliases.clone()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| PipelineError::Database {
            message: "memory storage lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn fetch_unprocessed_staging(
        &self,
        limit: Option<usize>,
        source: Option<&str>,
    ) -> Result<Vec<StagingRecord>> {
        let inner = self.lock()?;
        let iter = inner
            .staging
            .iter()
            .filter(|r| !r.processed)
            .filter(|r| source.map_or(true, |s| r.source_platform == s))
            .cloned();
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    async fn mark_staging_processed(&self, id: Uuid) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(rec) = inner.staging.iter_mut().find(|r| r.id == Some(id)) {
            rec.processed = true;
            rec.error_message = None;
        }
        Ok(())
    }

    async fn mark_staging_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(rec) = inner.staging.iter_mut().find(|r| r.id == Some(id)) {
            rec.processed = true;
            rec.error_message = Some(reason.to_string());
        }
        Ok(())
    }

    async fn create_team(&self, team: &mut Team) -> Result<()> {
        let mut inner = self.lock()?;
        let id = team.id.unwrap_or_else(Uuid::new_v4);
        team.id = Some(id);
        inner.teams.push(team.clone());
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>> {
        let inner = self.lock()?;
        Ok(inner.teams.iter().find(|t| t.id == Some(id)).cloned())
    }

    async fn find_team_by_semantic_key(
        &self,
        canonical_name: &str,
        birth_year: Option<i32>,
        gender: Option<Gender>,
        state: Option<&str>,
    ) -> Result<Option<Team>> {
        let inner = self.lock()?;
        Ok(inner
            .teams
            .iter()
            .find(|t| {
                t.canonical_name == canonical_name
                    && t.birth_year == birth_year
                    && t.gender == gender
                    && t.state.as_deref() == state
            })
            .cloned())
    }

    async fn list_teams_with_birth_year(&self, birth_year: Option<i32>) -> Result<Vec<Team>> {
        let inner = self.lock()?;
        Ok(inner
            .teams
            .iter()
            .filter(|t| t.birth_year == birth_year)
            .cloned()
            .collect())
    }

    async fn set_team_birth_year(&self, id: Uuid, birth_year: i32) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(team) = inner.teams.iter_mut().find(|t| t.id == Some(id)) {
            team.birth_year = Some(birth_year);
        }
        Ok(())
    }

    async fn find_club_by_canonical_name(&self, canonical_name: &str) -> Result<Option<Club>> {
        let inner = self.lock()?;
        Ok(inner
            .clubs
            .iter()
            .find(|c| c.canonical_name == canonical_name)
            .cloned())
    }

    async fn create_club(&self, club: &mut Club) -> Result<()> {
        let mut inner = self.lock()?;
        let id = club.id.unwrap_or_else(Uuid::new_v4);
        club.id = Some(id);
        inner.clubs.push(club.clone());
        Ok(())
    }

    async fn create_event(&self, event: &mut CompetitionEvent) -> Result<()> {
        let mut inner = self.lock()?;
        let id = event.id.unwrap_or_else(Uuid::new_v4);
        event.id = Some(id);
        inner.events.push(event.clone());
        Ok(())
    }

    async fn get_event(
        &self,
        event_type: EventType,
        id: Uuid,
    ) -> Result<Option<CompetitionEvent>> {
        let inner = self.lock()?;
        Ok(inner
            .events
            .iter()
            .find(|e| e.event_type == event_type && e.id == Some(id))
            .cloned())
    }

    async fn find_event_by_source(
        &self,
        platform: &str,
        source_event_id: &str,
    ) -> Result<Option<CompetitionEvent>> {
        let inner = self.lock()?;
        Ok(inner
            .events
            .iter()
            .find(|e| {
                e.source_platform.as_deref() == Some(platform)
                    && e.source_event_id.as_deref() == Some(source_event_id)
            })
            .cloned())
    }

    async fn find_event_by_name(
        &self,
        event_type: EventType,
        canonical_name: &str,
    ) -> Result<Option<CompetitionEvent>> {
        let inner = self.lock()?;
        Ok(inner
            .events
            .iter()
            .find(|e| e.event_type == event_type && e.canonical_name == canonical_name)
            .cloned())
    }

    async fn list_events(&self, event_type: EventType) -> Result<Vec<CompetitionEvent>> {
        let inner = self.lock()?;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn find_matches_by_source_keys(&self, keys: &[String]) -> Result<Vec<Match>> {
        let inner = self.lock()?;
        Ok(inner
            .matches
            .iter()
            .filter(|m| keys.contains(&m.source_match_key))
            .cloned()
            .collect())
    }

    async fn find_matches_by_semantic_keys(
        &self,
        keys: &[(NaiveDate, Uuid, Uuid)],
    ) -> Result<Vec<Match>> {
        let inner = self.lock()?;
        Ok(inner
            .matches
            .iter()
            .filter(|m| keys.contains(&(m.match_date, m.home_team_id, m.away_team_id)))
            .cloned()
            .collect())
    }

    async fn upsert_match(&self, m: &mut Match) -> Result<bool> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.matches.iter_mut().find(|e| {
            e.match_date == m.match_date
                && e.home_team_id == m.home_team_id
                && e.away_team_id == m.away_team_id
        }) {
            // merge policy: incoming non-null wins, null never clobbers
            existing.home_score = m.home_score.or(existing.home_score);
            existing.away_score = m.away_score.or(existing.away_score);
            existing.league_id = existing.league_id.or(m.league_id);
            existing.tournament_id = existing.tournament_id.or(m.tournament_id);
            existing.division = existing.division.clone().or_else(|| m.division.clone());
            // scheduled only while the merged row is still scoreless
            existing.is_scheduled = m.is_scheduled
                && existing.home_score.unwrap_or(0) == 0
                && existing.away_score.unwrap_or(0) == 0;
            // first writer keeps the audit-trail key
            m.id = existing.id;
            return Ok(false);
        }
        let id = m.id.unwrap_or_else(Uuid::new_v4);
        m.id = Some(id);
        inner.matches.push(m.clone());
        Ok(true)
    }

    async fn update_match_scores(
        &self,
        id: Uuid,
        home_score: Option<i32>,
        away_score: Option<i32>,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.matches.iter_mut().find(|m| m.id == Some(id)) {
            existing.home_score = home_score.or(existing.home_score);
            existing.away_score = away_score.or(existing.away_score);
            existing.is_scheduled = false;
        }
        Ok(())
    }

    async fn load_alias_registry(&self, entity_type: &str) -> Result<Vec<CanonicalAlias>> {
        let inner = self.lock()?;
        Ok(inner
            .aliases
            .iter()
            .filter(|a| a.entity_type == entity_type)
            .cloned()
            .collect())
    }

    async fn upsert_alias(&self, alias: &mut CanonicalAlias) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .aliases
            .iter_mut()
            .find(|a| a.entity_type == alias.entity_type && a.canonical_id == alias.canonical_id)
        {
            let names: Vec<String> = alias.aliases.clone();
            existing.absorb_aliases(names.iter().map(String::as_str));
            existing.updated_at = Utc::now();
            alias.id = existing.id;
            return Ok(());
        }
        let id = alias.id.unwrap_or_else(Uuid::new_v4);
        alias.id = Some(id);
        inner.aliases.push(alias.clone());
        Ok(())
    }

    async fn find_source_entity(
        &self,
        entity_type: &str,
        platform: &str,
        source_entity_id: &str,
    ) -> Result<Option<Uuid>> {
        let inner = self.lock()?;
        Ok(inner
            .source_map
            .iter()
            .find(|s| {
                s.entity_type == entity_type
                    && s.source_platform == platform
                    && s.source_entity_id == source_entity_id
            })
            .map(|s| s.internal_id))
    }

    async fn record_source_entity(&self, entry: &SourceEntityRef) -> Result<()> {
        let mut inner = self.lock()?;
        let exists = inner.source_map.iter().any(|s| {
            s.entity_type == entry.entity_type
                && s.source_platform == entry.source_platform
                && s.source_entity_id == entry.source_entity_id
        });
        if !exists {
            inner.source_map.push(entry.clone());
        }
        Ok(())
    }

    async fn load_patterns(&self) -> Result<Vec<LearnedPattern>> {
        let inner = self.lock()?;
        Ok(inner.patterns.clone())
    }

    async fn upsert_pattern(&self, pattern: &LearnedPattern) -> Result<()> {
        if self.fail_pattern_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::Transient {
                message: "injected pattern write failure".to_string(),
            });
        }
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .patterns
            .iter_mut()
            .find(|p| p.pattern_type == pattern.pattern_type && p.source == pattern.source)
        {
            *existing = pattern.clone();
        } else {
            inner.patterns.push(pattern.clone());
        }
        Ok(())
    }

    async fn append_audit(&self, entries: &[AuditEntry]) -> Result<()> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::Transient {
                message: "injected audit write failure".to_string(),
            });
        }
        let mut inner = self.lock()?;
        for entry in entries {
            let mut entry = entry.clone();
            if entry.id.is_none() {
                entry.id = Some(Uuid::new_v4());
            }
            inner.audit.push(entry);
        }
        Ok(())
    }

    async fn audit_summary(&self, days: i64) -> Result<Vec<AuditSummaryRow>> {
        let inner = self.lock()?;
        let cutoff = Utc::now() - Duration::days(days);
        let mut counts: std::collections::BTreeMap<(String, String), i64> =
            std::collections::BTreeMap::new();
        for entry in inner.audit.iter().filter(|e| e.created_at >= cutoff) {
            *counts
                .entry((entry.action.clone(), entry.table_name.clone()))
                .or_insert(0) += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((action, table_name), count)| AuditSummaryRow {
                action,
                table_name,
                count,
            })
            .collect())
    }

    async fn refresh_views(&self) -> Result<()> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.refresh_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.refresh_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::Transient {
                message: "injected view refresh failure".to_string(),
            });
        }
        Ok(())
    }
}
