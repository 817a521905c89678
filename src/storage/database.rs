//! libSQL-backed storage. One logical database, short-lived connections per
//! operation, idempotent migrations applied at startup.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use libsql::{Builder, Connection, Database, Value};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::error::{PipelineError, Result};
use crate::config::PipelineConfig;
use crate::domain::{
    AuditEntry, CanonicalAlias, Club, CompetitionEvent, EventType, Gender, LearnedPattern, Match,
    SourceEntityRef, StagingRecord, Team,
};

use super::traits::{AuditSummaryRow, Storage};

/// Concurrent connections held at any one time.
const MAX_CONNECTIONS: usize = 8;
/// Busy timeout applied to every local connection, in milliseconds.
const BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct DatabaseManager {
    db: Database,
    remote: bool,
    limiter: Arc<Semaphore>,
}

/// A connection plus the fan-out permit it holds; dropping the connection
/// releases the slot.
pub struct PooledConnection {
    conn: Connection,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DatabaseManager {
    /// Connect using the configured database URL. Remote (`libsql://` /
    /// `https://`) URLs go through the remote builder with the auth token;
    /// anything else is treated as a local file path.
    pub async fn new(config: &PipelineConfig) -> Result<Self> {
        let url = config.database_url.clone();
        let remote =
            url.starts_with("libsql://") || url.starts_with("https://") || url.starts_with("http://");
        let db = if remote {
            let token = config.database_auth_token.clone().ok_or_else(|| {
                PipelineError::Config("DATABASE_AUTH_TOKEN required for remote databases".into())
            })?;
            info!("connecting to remote database at {}", url);
            Builder::new_remote(url, token)
                .build()
                .await
                .map_err(|e| PipelineError::from_libsql("connect remote", e))?
        } else {
            let path = url.strip_prefix("file:").unwrap_or(&url).to_string();
            info!("opening local database at {}", path);
            Builder::new_local(path)
                .build()
                .await
                .map_err(|e| PipelineError::from_libsql("open local", e))?
        };
        Ok(Self {
            db,
            remote,
            limiter: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    /// Take a connection, waiting when all fan-out slots are busy.
    pub async fn connect(&self) -> Result<PooledConnection> {
        let permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Database {
                message: "connection limiter closed".to_string(),
            })?;
        let conn = self
            .db
            .connect()
            .map_err(|e| PipelineError::from_libsql("get connection", e))?;
        if !self.remote {
            conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
                .await
                .map_err(|e| PipelineError::from_libsql("set busy timeout", e))?;
        }
        Ok(PooledConnection {
            conn,
            _permit: permit,
        })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("running database migrations");
        let conn = self.connect().await?;
        conn.execute_batch(include_str!("../../migrations/001_core_schema.sql"))
            .await
            .map_err(|e| PipelineError::from_libsql("core schema migration", e))?;
        conn.execute_batch(include_str!("../../migrations/002_indexes_and_views.sql"))
            .await
            .map_err(|e| PipelineError::from_libsql("index migration", e))?;
        info!("database migrations completed");
        Ok(())
    }
}

pub struct DatabaseStorage {
    db: Arc<DatabaseManager>,
}

impl DatabaseStorage {
    pub async fn new(config: &PipelineConfig) -> Result<Self> {
        let manager = DatabaseManager::new(config).await?;
        manager.run_migrations().await?;
        Ok(Self {
            db: Arc::new(manager),
        })
    }

    async fn conn(&self) -> Result<PooledConnection> {
        self.db.connect().await
    }
}

// --- row helpers -----------------------------------------------------------

fn col_text(row: &libsql::Row, idx: i32, what: &str) -> Result<String> {
    match row.get_value(idx) {
        Ok(Value::Text(s)) => Ok(s),
        Ok(other) => Err(PipelineError::Database {
            message: format!("expected text for {what}, got {other:?}"),
        }),
        Err(e) => Err(PipelineError::from_libsql(what, e)),
    }
}

fn col_opt_text(row: &libsql::Row, idx: i32, what: &str) -> Result<Option<String>> {
    match row.get_value(idx) {
        Ok(Value::Null) => Ok(None),
        Ok(Value::Text(s)) => Ok(Some(s)),
        Ok(other) => Err(PipelineError::Database {
            message: format!("expected text or null for {what}, got {other:?}"),
        }),
        Err(e) => Err(PipelineError::from_libsql(what, e)),
    }
}

fn col_opt_i32(row: &libsql::Row, idx: i32, what: &str) -> Result<Option<i32>> {
    match row.get_value(idx) {
        Ok(Value::Null) => Ok(None),
        Ok(Value::Integer(i)) => Ok(Some(i as i32)),
        Ok(other) => Err(PipelineError::Database {
            message: format!("expected integer or null for {what}, got {other:?}"),
        }),
        Err(e) => Err(PipelineError::from_libsql(what, e)),
    }
}

fn col_i64(row: &libsql::Row, idx: i32, what: &str) -> Result<i64> {
    match row.get_value(idx) {
        Ok(Value::Integer(i)) => Ok(i),
        Ok(other) => Err(PipelineError::Database {
            message: format!("expected integer for {what}, got {other:?}"),
        }),
        Err(e) => Err(PipelineError::from_libsql(what, e)),
    }
}

fn col_f64(row: &libsql::Row, idx: i32, what: &str) -> Result<f64> {
    match row.get_value(idx) {
        Ok(Value::Real(f)) => Ok(f),
        Ok(Value::Integer(i)) => Ok(i as f64),
        Ok(other) => Err(PipelineError::Database {
            message: format!("expected real for {what}, got {other:?}"),
        }),
        Err(e) => Err(PipelineError::from_libsql(what, e)),
    }
}

fn col_bool(row: &libsql::Row, idx: i32, what: &str) -> Result<bool> {
    Ok(col_i64(row, idx, what)? != 0)
}

fn col_uuid(row: &libsql::Row, idx: i32, what: &str) -> Result<Uuid> {
    let text = col_text(row, idx, what)?;
    Uuid::parse_str(&text).map_err(|e| PipelineError::Database {
        message: format!("invalid uuid in {what}: {e}"),
    })
}

fn col_opt_uuid(row: &libsql::Row, idx: i32, what: &str) -> Result<Option<Uuid>> {
    match col_opt_text(row, idx, what)? {
        Some(text) => Uuid::parse_str(&text)
            .map(Some)
            .map_err(|e| PipelineError::Database {
                message: format!("invalid uuid in {what}: {e}"),
            }),
        None => Ok(None),
    }
}

fn col_date(row: &libsql::Row, idx: i32, what: &str) -> Result<NaiveDate> {
    let text = col_text(row, idx, what)?;
    text.parse::<NaiveDate>().map_err(|e| PipelineError::Database {
        message: format!("invalid date in {what}: {e}"),
    })
}

fn col_opt_date(row: &libsql::Row, idx: i32, what: &str) -> Result<Option<NaiveDate>> {
    match col_opt_text(row, idx, what)? {
        Some(text) => text
            .parse::<NaiveDate>()
            .map(Some)
            .map_err(|e| PipelineError::Database {
                message: format!("invalid date in {what}: {e}"),
            }),
        None => Ok(None),
    }
}

fn col_opt_time(row: &libsql::Row, idx: i32, what: &str) -> Result<Option<NaiveTime>> {
    match col_opt_text(row, idx, what)? {
        Some(text) => NaiveTime::parse_from_str(&text, "%H:%M:%S")
            .map(Some)
            .map_err(|e| PipelineError::Database {
                message: format!("invalid time in {what}: {e}"),
            }),
        None => Ok(None),
    }
}

fn col_timestamp(row: &libsql::Row, idx: i32, what: &str) -> Result<DateTime<Utc>> {
    let text = col_text(row, idx, what)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::Database {
            message: format!("invalid timestamp in {what}: {e}"),
        })
}

fn gender_from(text: Option<String>) -> Option<Gender> {
    match text.as_deref() {
        Some("M") => Some(Gender::M),
        Some("F") => Some(Gender::F),
        _ => None,
    }
}

fn opt_value<S: Into<String>>(v: Option<S>) -> Value {
    match v {
        Some(s) => Value::Text(s.into()),
        None => Value::Null,
    }
}

fn opt_i32_value(v: Option<i32>) -> Value {
    match v {
        Some(i) => Value::Integer(i as i64),
        None => Value::Null,
    }
}

fn event_table(event_type: EventType) -> &'static str {
    match event_type {
        EventType::League => "leagues",
        EventType::Tournament => "tournaments",
    }
}

fn row_to_staging(row: &libsql::Row) -> Result<StagingRecord> {
    Ok(StagingRecord {
        id: Some(col_uuid(row, 0, "staging.id")?),
        source_platform: col_text(row, 1, "staging.source_platform")?,
        source_match_id: col_opt_text(row, 2, "staging.source_match_id")?,
        source_event_id: col_opt_text(row, 3, "staging.source_event_id")?,
        event_name: col_opt_text(row, 4, "staging.event_name")?,
        home_team_name: col_opt_text(row, 5, "staging.home_team_name")?,
        away_team_name: col_opt_text(row, 6, "staging.away_team_name")?,
        match_date: col_opt_text(row, 7, "staging.match_date")?,
        match_time: col_opt_text(row, 8, "staging.match_time")?,
        home_score: col_opt_text(row, 9, "staging.home_score")?,
        away_score: col_opt_text(row, 10, "staging.away_score")?,
        division: col_opt_text(row, 11, "staging.division")?,
        subdivision: col_opt_text(row, 12, "staging.subdivision")?,
        state: col_opt_text(row, 13, "staging.state")?,
        processed: col_bool(row, 14, "staging.processed")?,
        error_message: col_opt_text(row, 15, "staging.error_message")?,
        created_at: col_timestamp(row, 16, "staging.created_at")?,
    })
}

const TEAM_COLUMNS: &str =
    "id, canonical_name, display_name, club_name, birth_year, gender, age_group, state, created_at";

fn row_to_team(row: &libsql::Row) -> Result<Team> {
    Ok(Team {
        id: Some(col_uuid(row, 0, "teams.id")?),
        canonical_name: col_text(row, 1, "teams.canonical_name")?,
        display_name: col_text(row, 2, "teams.display_name")?,
        club_name: col_opt_text(row, 3, "teams.club_name")?,
        birth_year: col_opt_i32(row, 4, "teams.birth_year")?,
        gender: gender_from(col_opt_text(row, 5, "teams.gender")?),
        age_group: col_opt_text(row, 6, "teams.age_group")?,
        state: col_opt_text(row, 7, "teams.state")?,
        created_at: col_timestamp(row, 8, "teams.created_at")?,
    })
}

const EVENT_COLUMNS: &str = "id, name, canonical_name, year, season, state, region, source_event_id, source_platform, start_date, end_date, created_at";

fn row_to_event(row: &libsql::Row, event_type: EventType) -> Result<CompetitionEvent> {
    Ok(CompetitionEvent {
        id: Some(col_uuid(row, 0, "events.id")?),
        name: col_text(row, 1, "events.name")?,
        canonical_name: col_text(row, 2, "events.canonical_name")?,
        event_type,
        year: col_opt_i32(row, 3, "events.year")?,
        season: col_opt_text(row, 4, "events.season")?,
        state: col_opt_text(row, 5, "events.state")?,
        region: col_opt_text(row, 6, "events.region")?,
        source_event_id: col_opt_text(row, 7, "events.source_event_id")?,
        source_platform: col_opt_text(row, 8, "events.source_platform")?,
        start_date: col_opt_date(row, 9, "events.start_date")?,
        end_date: col_opt_date(row, 10, "events.end_date")?,
        created_at: col_timestamp(row, 11, "events.created_at")?,
    })
}

const MATCH_COLUMNS: &str = "id, match_date, match_time, home_team_id, away_team_id, home_score, away_score, league_id, tournament_id, division, source_match_key, source_platform, is_scheduled, created_at";

fn row_to_match(row: &libsql::Row) -> Result<Match> {
    Ok(Match {
        id: Some(col_uuid(row, 0, "matches.id")?),
        match_date: col_date(row, 1, "matches.match_date")?,
        match_time: col_opt_time(row, 2, "matches.match_time")?,
        home_team_id: col_uuid(row, 3, "matches.home_team_id")?,
        away_team_id: col_uuid(row, 4, "matches.away_team_id")?,
        home_score: col_opt_i32(row, 5, "matches.home_score")?,
        away_score: col_opt_i32(row, 6, "matches.away_score")?,
        league_id: col_opt_uuid(row, 7, "matches.league_id")?,
        tournament_id: col_opt_uuid(row, 8, "matches.tournament_id")?,
        division: col_opt_text(row, 9, "matches.division")?,
        source_match_key: col_text(row, 10, "matches.source_match_key")?,
        source_platform: col_text(row, 11, "matches.source_platform")?,
        is_scheduled: col_bool(row, 12, "matches.is_scheduled")?,
        created_at: col_timestamp(row, 13, "matches.created_at")?,
    })
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn fetch_unprocessed_staging(
        &self,
        limit: Option<usize>,
        source: Option<&str>,
    ) -> Result<Vec<StagingRecord>> {
        let conn = self.conn().await?;
        let sql = "SELECT id, source_platform, source_match_id, source_event_id, event_name, \
                   home_team_name, away_team_name, match_date, match_time, home_score, away_score, \
                   division, subdivision, state, processed, error_message, created_at \
                   FROM staging_matches \
                   WHERE processed = 0 AND (?1 IS NULL OR source_platform = ?1) \
                   ORDER BY created_at \
                   LIMIT ?2";
        let limit_val = limit.map(|n| n as i64).unwrap_or(-1);
        let mut rows = conn
            .query(sql, vec![opt_value(source), Value::Integer(limit_val)])
            .await
            .map_err(|e| PipelineError::from_libsql("fetch staging backlog", e))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read staging row", e))?
        {
            results.push(row_to_staging(&row)?);
        }
        debug!(count = results.len(), "fetched staging backlog");
        Ok(results)
    }

    async fn mark_staging_processed(&self, id: Uuid) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE staging_matches SET processed = 1, error_message = NULL WHERE id = ?1",
            vec![Value::Text(id.to_string())],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("mark staging processed", e))?;
        Ok(())
    }

    async fn mark_staging_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE staging_matches SET processed = 1, error_message = ?2 WHERE id = ?1",
            vec![Value::Text(id.to_string()), Value::Text(reason.to_string())],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("mark staging failed", e))?;
        Ok(())
    }

    async fn create_team(&self, team: &mut Team) -> Result<()> {
        let id = team.id.unwrap_or_else(Uuid::new_v4);
        team.id = Some(id);
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO teams (id, canonical_name, display_name, club_name, birth_year, gender, age_group, state, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            vec![
                Value::Text(id.to_string()),
                Value::Text(team.canonical_name.clone()),
                Value::Text(team.display_name.clone()),
                opt_value(team.club_name.clone()),
                opt_i32_value(team.birth_year),
                opt_value(team.gender.map(|g| g.as_str().to_string())),
                opt_value(team.age_group.clone()),
                opt_value(team.state.clone()),
                Value::Text(team.created_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("create team", e))?;
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?1"),
                vec![Value::Text(id.to_string())],
            )
            .await
            .map_err(|e| PipelineError::from_libsql("get team", e))?;
        match rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read team row", e))?
        {
            Some(row) => Ok(Some(row_to_team(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_team_by_semantic_key(
        &self,
        canonical_name: &str,
        birth_year: Option<i32>,
        gender: Option<Gender>,
        state: Option<&str>,
    ) -> Result<Option<Team>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TEAM_COLUMNS} FROM teams \
                     WHERE canonical_name = ?1 AND birth_year IS ?2 AND gender IS ?3 AND state IS ?4"
                ),
                vec![
                    Value::Text(canonical_name.to_string()),
                    opt_i32_value(birth_year),
                    opt_value(gender.map(|g| g.as_str().to_string())),
                    opt_value(state),
                ],
            )
            .await
            .map_err(|e| PipelineError::from_libsql("find team by semantic key", e))?;
        match rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read team row", e))?
        {
            Some(row) => Ok(Some(row_to_team(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_teams_with_birth_year(&self, birth_year: Option<i32>) -> Result<Vec<Team>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE birth_year IS ?1"),
                vec![opt_i32_value(birth_year)],
            )
            .await
            .map_err(|e| PipelineError::from_libsql("list teams by birth year", e))?;
        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read team row", e))?
        {
            results.push(row_to_team(&row)?);
        }
        Ok(results)
    }

    async fn set_team_birth_year(&self, id: Uuid, birth_year: i32) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE teams SET birth_year = ?2, age_group = NULL WHERE id = ?1",
            vec![
                Value::Text(id.to_string()),
                Value::Integer(birth_year as i64),
            ],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("set team birth year", e))?;
        Ok(())
    }

    async fn find_club_by_canonical_name(&self, canonical_name: &str) -> Result<Option<Club>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, name, canonical_name, state, created_at FROM clubs WHERE canonical_name = ?1",
                vec![Value::Text(canonical_name.to_string())],
            )
            .await
            .map_err(|e| PipelineError::from_libsql("find club", e))?;
        match rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read club row", e))?
        {
            Some(row) => Ok(Some(Club {
                id: Some(col_uuid(&row, 0, "clubs.id")?),
                name: col_text(&row, 1, "clubs.name")?,
                canonical_name: col_text(&row, 2, "clubs.canonical_name")?,
                state: col_opt_text(&row, 3, "clubs.state")?,
                created_at: col_timestamp(&row, 4, "clubs.created_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn create_club(&self, club: &mut Club) -> Result<()> {
        let id = club.id.unwrap_or_else(Uuid::new_v4);
        club.id = Some(id);
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO clubs (id, name, canonical_name, state, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(canonical_name) DO NOTHING",
            vec![
                Value::Text(id.to_string()),
                Value::Text(club.name.clone()),
                Value::Text(club.canonical_name.clone()),
                opt_value(club.state.clone()),
                Value::Text(club.created_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("create club", e))?;
        Ok(())
    }

    async fn create_event(&self, event: &mut CompetitionEvent) -> Result<()> {
        let id = event.id.unwrap_or_else(Uuid::new_v4);
        event.id = Some(id);
        let conn = self.conn().await?;
        let sql = format!(
            "INSERT INTO {} (id, name, canonical_name, year, season, state, region, source_event_id, source_platform, start_date, end_date, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            event_table(event.event_type)
        );
        conn.execute(
            &sql,
            vec![
                Value::Text(id.to_string()),
                Value::Text(event.name.clone()),
                Value::Text(event.canonical_name.clone()),
                opt_i32_value(event.year),
                opt_value(event.season.clone()),
                opt_value(event.state.clone()),
                opt_value(event.region.clone()),
                opt_value(event.source_event_id.clone()),
                opt_value(event.source_platform.clone()),
                opt_value(event.start_date.map(|d| d.to_string())),
                opt_value(event.end_date.map(|d| d.to_string())),
                Value::Text(event.created_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("create event", e))?;
        Ok(())
    }

    async fn get_event(
        &self,
        event_type: EventType,
        id: Uuid,
    ) -> Result<Option<CompetitionEvent>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM {} WHERE id = ?1",
            event_table(event_type)
        );
        let mut rows = conn
            .query(&sql, vec![Value::Text(id.to_string())])
            .await
            .map_err(|e| PipelineError::from_libsql("get event", e))?;
        match rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read event row", e))?
        {
            Some(row) => Ok(Some(row_to_event(&row, event_type)?)),
            None => Ok(None),
        }
    }

    async fn find_event_by_source(
        &self,
        platform: &str,
        source_event_id: &str,
    ) -> Result<Option<CompetitionEvent>> {
        let conn = self.conn().await?;
        for event_type in [EventType::League, EventType::Tournament] {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM {} WHERE source_platform = ?1 AND source_event_id = ?2",
                event_table(event_type)
            );
            let mut rows = conn
                .query(
                    &sql,
                    vec![
                        Value::Text(platform.to_string()),
                        Value::Text(source_event_id.to_string()),
                    ],
                )
                .await
                .map_err(|e| PipelineError::from_libsql("find event by source", e))?;
            if let Some(row) = rows
                .next()
                .await
                .map_err(|e| PipelineError::from_libsql("read event row", e))?
            {
                return Ok(Some(row_to_event(&row, event_type)?));
            }
        }
        Ok(None)
    }

    async fn find_event_by_name(
        &self,
        event_type: EventType,
        canonical_name: &str,
    ) -> Result<Option<CompetitionEvent>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM {} WHERE canonical_name = ?1",
            event_table(event_type)
        );
        let mut rows = conn
            .query(&sql, vec![Value::Text(canonical_name.to_string())])
            .await
            .map_err(|e| PipelineError::from_libsql("find event by name", e))?;
        match rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read event row", e))?
        {
            Some(row) => Ok(Some(row_to_event(&row, event_type)?)),
            None => Ok(None),
        }
    }

    async fn list_events(&self, event_type: EventType) -> Result<Vec<CompetitionEvent>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM {}",
            event_table(event_type)
        );
        let mut rows = conn
            .query(&sql, ())
            .await
            .map_err(|e| PipelineError::from_libsql("list events", e))?;
        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read event row", e))?
        {
            results.push(row_to_event(&row, event_type)?);
        }
        Ok(results)
    }

    async fn find_matches_by_source_keys(&self, keys: &[String]) -> Result<Vec<Match>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn().await?;
        let placeholders: Vec<String> = (1..=keys.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE source_match_key IN ({})",
            placeholders.join(", ")
        );
        let params: Vec<Value> = keys.iter().map(|k| Value::Text(k.clone())).collect();
        let mut rows = conn
            .query(&sql, params)
            .await
            .map_err(|e| PipelineError::from_libsql("find matches by source keys", e))?;
        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read match row", e))?
        {
            results.push(row_to_match(&row)?);
        }
        Ok(results)
    }

    async fn find_matches_by_semantic_keys(
        &self,
        keys: &[(NaiveDate, Uuid, Uuid)],
    ) -> Result<Vec<Match>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn().await?;
        // one query per batch: row-value IN over the composite key
        let mut placeholders = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        for (i, (date, home, away)) in keys.iter().enumerate() {
            let base = i * 3;
            placeholders.push(format!("(?{}, ?{}, ?{})", base + 1, base + 2, base + 3));
            params.push(Value::Text(date.to_string()));
            params.push(Value::Text(home.to_string()));
            params.push(Value::Text(away.to_string()));
        }
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches \
             WHERE (match_date, home_team_id, away_team_id) IN (VALUES {})",
            placeholders.join(", ")
        );
        let mut rows = conn
            .query(&sql, params)
            .await
            .map_err(|e| PipelineError::from_libsql("find matches by semantic keys", e))?;
        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read match row", e))?
        {
            results.push(row_to_match(&row)?);
        }
        Ok(results)
    }

    async fn upsert_match(&self, m: &mut Match) -> Result<bool> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id FROM matches WHERE match_date = ?1 AND home_team_id = ?2 AND away_team_id = ?3",
                vec![
                    Value::Text(m.match_date.to_string()),
                    Value::Text(m.home_team_id.to_string()),
                    Value::Text(m.away_team_id.to_string()),
                ],
            )
            .await
            .map_err(|e| PipelineError::from_libsql("probe match semantic key", e))?;

        if let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read match id", e))?
        {
            let existing_id = col_uuid(&row, 0, "matches.id")?;
            // merge policy: incoming non-null score wins, null never
            // clobbers; links and division fill only when absent; the first
            // writer keeps source_match_key; the scheduled flag holds only
            // while the merged row is still scoreless
            conn.execute(
                "UPDATE matches SET \
                   home_score = COALESCE(?2, home_score), \
                   away_score = COALESCE(?3, away_score), \
                   league_id = COALESCE(league_id, ?4), \
                   tournament_id = COALESCE(tournament_id, ?5), \
                   division = COALESCE(division, ?6), \
                   is_scheduled = ?7 \
                     AND COALESCE(?2, home_score, 0) = 0 \
                     AND COALESCE(?3, away_score, 0) = 0 \
                 WHERE id = ?1",
                vec![
                    Value::Text(existing_id.to_string()),
                    opt_i32_value(m.home_score),
                    opt_i32_value(m.away_score),
                    opt_value(m.league_id.map(|id| id.to_string())),
                    opt_value(m.tournament_id.map(|id| id.to_string())),
                    opt_value(m.division.clone()),
                    Value::Integer(m.is_scheduled as i64),
                ],
            )
            .await
            .map_err(|e| PipelineError::from_libsql("merge match", e))?;
            m.id = Some(existing_id);
            return Ok(false);
        }

        let id = m.id.unwrap_or_else(Uuid::new_v4);
        m.id = Some(id);
        conn.execute(
            "INSERT INTO matches (id, match_date, match_time, home_team_id, away_team_id, \
             home_score, away_score, league_id, tournament_id, division, source_match_key, \
             source_platform, is_scheduled, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
             ON CONFLICT(match_date, home_team_id, away_team_id) DO UPDATE SET \
               home_score = COALESCE(excluded.home_score, matches.home_score), \
               away_score = COALESCE(excluded.away_score, matches.away_score), \
               league_id = COALESCE(matches.league_id, excluded.league_id), \
               tournament_id = COALESCE(matches.tournament_id, excluded.tournament_id), \
               division = COALESCE(matches.division, excluded.division), \
               is_scheduled = excluded.is_scheduled \
                 AND COALESCE(excluded.home_score, matches.home_score, 0) = 0 \
                 AND COALESCE(excluded.away_score, matches.away_score, 0) = 0",
            vec![
                Value::Text(id.to_string()),
                Value::Text(m.match_date.to_string()),
                opt_value(m.match_time.map(|t| t.format("%H:%M:%S").to_string())),
                Value::Text(m.home_team_id.to_string()),
                Value::Text(m.away_team_id.to_string()),
                opt_i32_value(m.home_score),
                opt_i32_value(m.away_score),
                opt_value(m.league_id.map(|id| id.to_string())),
                opt_value(m.tournament_id.map(|id| id.to_string())),
                opt_value(m.division.clone()),
                Value::Text(m.source_match_key.clone()),
                Value::Text(m.source_platform.clone()),
                Value::Integer(m.is_scheduled as i64),
                Value::Text(m.created_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("insert match", e))?;
        Ok(true)
    }

    async fn update_match_scores(
        &self,
        id: Uuid,
        home_score: Option<i32>,
        away_score: Option<i32>,
    ) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE matches SET \
               home_score = COALESCE(?2, home_score), \
               away_score = COALESCE(?3, away_score), \
               is_scheduled = 0 \
             WHERE id = ?1",
            vec![
                Value::Text(id.to_string()),
                opt_i32_value(home_score),
                opt_i32_value(away_score),
            ],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("update match scores", e))?;
        Ok(())
    }

    async fn load_alias_registry(&self, entity_type: &str) -> Result<Vec<CanonicalAlias>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, entity_type, canonical_id, aliases, birth_year, gender, event_type, state, updated_at \
                 FROM canonical_aliases WHERE entity_type = ?1",
                vec![Value::Text(entity_type.to_string())],
            )
            .await
            .map_err(|e| PipelineError::from_libsql("load alias registry", e))?;
        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read alias row", e))?
        {
            let aliases: Vec<String> =
                serde_json::from_str(&col_text(&row, 3, "canonical_aliases.aliases")?)?;
            let event_type = match col_opt_text(&row, 6, "canonical_aliases.event_type")?.as_deref()
            {
                Some("league") => Some(EventType::League),
                Some("tournament") => Some(EventType::Tournament),
                _ => None,
            };
            results.push(CanonicalAlias {
                id: Some(col_uuid(&row, 0, "canonical_aliases.id")?),
                entity_type: col_text(&row, 1, "canonical_aliases.entity_type")?,
                canonical_id: col_uuid(&row, 2, "canonical_aliases.canonical_id")?,
                aliases,
                birth_year: col_opt_i32(&row, 4, "canonical_aliases.birth_year")?,
                gender: gender_from(col_opt_text(&row, 5, "canonical_aliases.gender")?),
                event_type,
                state: col_opt_text(&row, 7, "canonical_aliases.state")?,
                updated_at: col_timestamp(&row, 8, "canonical_aliases.updated_at")?,
            });
        }
        Ok(results)
    }

    async fn upsert_alias(&self, alias: &mut CanonicalAlias) -> Result<()> {
        let id = alias.id.unwrap_or_else(Uuid::new_v4);
        alias.id = Some(id);
        let aliases_json = serde_json::to_string(&alias.aliases)?;
        let conn = self.conn().await?;
        // alias sets only grow: on conflict the stored set is the union of
        // old and new, computed by the caller who read the registry first
        conn.execute(
            "INSERT INTO canonical_aliases (id, entity_type, canonical_id, aliases, birth_year, gender, event_type, state, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(entity_type, canonical_id) DO UPDATE SET \
               aliases = excluded.aliases, \
               birth_year = COALESCE(canonical_aliases.birth_year, excluded.birth_year), \
               updated_at = excluded.updated_at",
            vec![
                Value::Text(id.to_string()),
                Value::Text(alias.entity_type.clone()),
                Value::Text(alias.canonical_id.to_string()),
                Value::Text(aliases_json),
                opt_i32_value(alias.birth_year),
                opt_value(alias.gender.map(|g| g.as_str().to_string())),
                opt_value(alias.event_type.map(|t| t.as_str().to_string())),
                opt_value(alias.state.clone()),
                Value::Text(alias.updated_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("upsert alias", e))?;
        Ok(())
    }

    async fn find_source_entity(
        &self,
        entity_type: &str,
        platform: &str,
        source_entity_id: &str,
    ) -> Result<Option<Uuid>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT internal_id FROM source_entity_map \
                 WHERE entity_type = ?1 AND source_platform = ?2 AND source_entity_id = ?3",
                vec![
                    Value::Text(entity_type.to_string()),
                    Value::Text(platform.to_string()),
                    Value::Text(source_entity_id.to_string()),
                ],
            )
            .await
            .map_err(|e| PipelineError::from_libsql("find source entity", e))?;
        match rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read source entity row", e))?
        {
            Some(row) => Ok(Some(col_uuid(&row, 0, "source_entity_map.internal_id")?)),
            None => Ok(None),
        }
    }

    async fn record_source_entity(&self, entry: &SourceEntityRef) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO source_entity_map (entity_type, source_platform, source_entity_id, internal_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(entity_type, source_platform, source_entity_id) DO NOTHING",
            vec![
                Value::Text(entry.entity_type.clone()),
                Value::Text(entry.source_platform.clone()),
                Value::Text(entry.source_entity_id.clone()),
                Value::Text(entry.internal_id.to_string()),
                Value::Text(entry.created_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("record source entity", e))?;
        Ok(())
    }

    async fn load_patterns(&self) -> Result<Vec<LearnedPattern>> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, pattern_type, source, pattern_data, confidence, usage_count, failure_count, created_at, updated_at \
                 FROM learned_patterns",
                (),
            )
            .await
            .map_err(|e| PipelineError::from_libsql("load patterns", e))?;
        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read pattern row", e))?
        {
            let pattern_data =
                serde_json::from_str(&col_text(&row, 3, "learned_patterns.pattern_data")?)?;
            results.push(LearnedPattern {
                id: Some(col_uuid(&row, 0, "learned_patterns.id")?),
                pattern_type: col_text(&row, 1, "learned_patterns.pattern_type")?,
                source: col_text(&row, 2, "learned_patterns.source")?,
                pattern_data,
                confidence: col_f64(&row, 4, "learned_patterns.confidence")?,
                usage_count: col_i64(&row, 5, "learned_patterns.usage_count")?,
                failure_count: col_i64(&row, 6, "learned_patterns.failure_count")?,
                created_at: col_timestamp(&row, 7, "learned_patterns.created_at")?,
                updated_at: col_timestamp(&row, 8, "learned_patterns.updated_at")?,
            });
        }
        Ok(results)
    }

    async fn upsert_pattern(&self, pattern: &LearnedPattern) -> Result<()> {
        let id = pattern.id.unwrap_or_else(Uuid::new_v4);
        let data_json = serde_json::to_string(&pattern.pattern_data)?;
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO learned_patterns (id, pattern_type, source, pattern_data, confidence, usage_count, failure_count, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(pattern_type, source) DO UPDATE SET \
               pattern_data = excluded.pattern_data, \
               confidence = excluded.confidence, \
               usage_count = excluded.usage_count, \
               failure_count = excluded.failure_count, \
               updated_at = excluded.updated_at",
            vec![
                Value::Text(id.to_string()),
                Value::Text(pattern.pattern_type.clone()),
                Value::Text(pattern.source.clone()),
                Value::Text(data_json),
                Value::Real(pattern.confidence),
                Value::Integer(pattern.usage_count),
                Value::Integer(pattern.failure_count),
                Value::Text(pattern.created_at.to_rfc3339()),
                Value::Text(pattern.updated_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| PipelineError::from_libsql("upsert pattern", e))?;
        Ok(())
    }

    async fn append_audit(&self, entries: &[AuditEntry]) -> Result<()> {
        let conn = self.conn().await?;
        for entry in entries {
            let id = entry.id.unwrap_or_else(Uuid::new_v4);
            conn.execute(
                "INSERT INTO audit_log (id, action, table_name, record_id, old_data, new_data, actor, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                vec![
                    Value::Text(id.to_string()),
                    Value::Text(entry.action.clone()),
                    Value::Text(entry.table_name.clone()),
                    opt_value(entry.record_id.map(|id| id.to_string())),
                    opt_value(entry.old_data.as_ref().map(|v| v.to_string())),
                    opt_value(entry.new_data.as_ref().map(|v| v.to_string())),
                    Value::Text(entry.actor.clone()),
                    Value::Text(entry.created_at.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| PipelineError::from_libsql("append audit", e))?;
        }
        Ok(())
    }

    async fn audit_summary(&self, days: i64) -> Result<Vec<AuditSummaryRow>> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT action, table_name, COUNT(*) FROM audit_log \
                 WHERE created_at >= ?1 \
                 GROUP BY action, table_name \
                 ORDER BY action, table_name",
                vec![Value::Text(cutoff)],
            )
            .await
            .map_err(|e| PipelineError::from_libsql("audit summary", e))?;
        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PipelineError::from_libsql("read audit summary row", e))?
        {
            results.push(AuditSummaryRow {
                action: col_text(&row, 0, "audit_log.action")?,
                table_name: col_text(&row, 1, "audit_log.table_name")?,
                count: col_i64(&row, 2, "audit summary count")?,
            });
        }
        Ok(results)
    }

    async fn refresh_views(&self) -> Result<()> {
        // fresh connection per attempt so a poisoned one is never reused
        let conn = self.conn().await?;
        conn.execute_batch(REFRESH_VIEWS_SQL)
            .await
            .map_err(|e| PipelineError::from_libsql("refresh views", e))?;
        info!("reporting views refreshed");
        Ok(())
    }
}

/// Rebuild the reporting summary tables from the production rows. libSQL
/// has no native materialized views; these tables stand in for them.
const REFRESH_VIEWS_SQL: &str = "
DELETE FROM team_record_summary;
INSERT INTO team_record_summary (team_id, played, wins, draws, losses, goals_for, goals_against)
SELECT t.id,
       COUNT(m.id),
       SUM(CASE WHEN (m.home_team_id = t.id AND m.home_score > m.away_score)
                 OR (m.away_team_id = t.id AND m.away_score > m.home_score) THEN 1 ELSE 0 END),
       SUM(CASE WHEN m.home_score = m.away_score THEN 1 ELSE 0 END),
       SUM(CASE WHEN (m.home_team_id = t.id AND m.home_score < m.away_score)
                 OR (m.away_team_id = t.id AND m.away_score < m.home_score) THEN 1 ELSE 0 END),
       SUM(CASE WHEN m.home_team_id = t.id THEN m.home_score ELSE m.away_score END),
       SUM(CASE WHEN m.home_team_id = t.id THEN m.away_score ELSE m.home_score END)
FROM teams t
JOIN matches m ON (m.home_team_id = t.id OR m.away_team_id = t.id)
WHERE m.home_score IS NOT NULL AND m.away_score IS NOT NULL
GROUP BY t.id;
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Gender;

    async fn file_backed_storage(dir: &tempfile::TempDir) -> DatabaseStorage {
        let url = dir.path().join("pitchdata.db").to_string_lossy().into_owned();
        let config = PipelineConfig::for_season(url, 2026);
        DatabaseStorage::new(&config).await.unwrap()
    }

    async fn seed_team(storage: &DatabaseStorage, canonical: &str) -> Uuid {
        let mut team = Team {
            id: None,
            canonical_name: canonical.to_string(),
            display_name: canonical.to_string(),
            club_name: None,
            birth_year: Some(2015),
            gender: Some(Gender::M),
            age_group: Some("U11".to_string()),
            state: Some("KS".to_string()),
            created_at: Utc::now(),
        };
        storage.create_team(&mut team).await.unwrap();
        team.id.unwrap()
    }

    #[tokio::test]
    async fn file_backed_merge_keeps_scores_and_clears_scheduled() {
        let dir = tempfile::tempdir().unwrap();
        let storage = file_backed_storage(&dir).await;
        let home = seed_team(&storage, "15b gold").await;
        let away = seed_team(&storage, "2015b select").await;

        let date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let mut played = Match {
            id: None,
            match_date: date,
            match_time: None,
            home_team_id: home,
            away_team_id: away,
            home_score: Some(4),
            away_score: Some(2),
            league_id: None,
            tournament_id: None,
            division: Some("Division 1".to_string()),
            source_match_key: "gotsport:g7".to_string(),
            source_platform: "gotsport".to_string(),
            is_scheduled: false,
            created_at: Utc::now(),
        };
        assert!(storage.upsert_match(&mut played).await.unwrap());

        // a schedule-only row for the same fixture arriving later
        let mut schedule = Match {
            id: None,
            home_score: None,
            away_score: None,
            is_scheduled: true,
            source_match_key: "heartland:m1".to_string(),
            source_platform: "heartland".to_string(),
            created_at: Utc::now(),
            ..played.clone()
        };
        assert!(!storage.upsert_match(&mut schedule).await.unwrap());

        let rows = storage
            .find_matches_by_source_keys(&["gotsport:g7".to_string()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].home_score, Some(4));
        assert_eq!(rows[0].away_score, Some(2));
        assert!(!rows[0].is_scheduled);
        // first writer keeps the source key
        assert_eq!(rows[0].source_match_key, "gotsport:g7");
    }
}
