use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A raw scraped row awaiting normalization and promotion. Owned by the
/// ingestion adapters; the core reads it and only ever writes back the
/// `processed` / `error_message` flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingRecord {
    pub id: Option<Uuid>,
    pub source_platform: String,
    pub source_match_id: Option<String>,
    pub source_event_id: Option<String>,
    pub event_name: Option<String>,
    pub home_team_name: Option<String>,
    pub away_team_name: Option<String>,
    pub match_date: Option<String>,
    pub match_time: Option<String>,
    pub home_score: Option<String>,
    pub away_score: Option<String>,
    pub division: Option<String>,
    /// Structured per-source numeric subdivision; takes priority over any
    /// free-text division parsing when present.
    pub subdivision: Option<String>,
    pub state: Option<String>,
    pub processed: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    M,
    F,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::M => "M",
            Gender::F => "F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    League,
    Tournament,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::League => "league",
            EventType::Tournament => "tournament",
        }
    }
}

/// Production team row. Semantic key: (canonical_name, birth_year, gender, state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Option<Uuid>,
    pub canonical_name: String,
    pub display_name: String,
    pub club_name: Option<String>,
    pub birth_year: Option<i32>,
    pub gender: Option<Gender>,
    pub age_group: Option<String>,
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Production club row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Club {
    pub id: Option<Uuid>,
    pub name: String,
    pub canonical_name: String,
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Production league/tournament row. Which table it lives in is decided by
/// `event_type`. Semantic key: (source_event_id, source_platform), falling
/// back to canonical name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionEvent {
    pub id: Option<Uuid>,
    pub name: String,
    pub canonical_name: String,
    pub event_type: EventType,
    pub year: Option<i32>,
    pub season: Option<String>,
    pub state: Option<String>,
    pub region: Option<String>,
    pub source_event_id: Option<String>,
    pub source_platform: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Production match row. Semantic key: (match_date, home_team_id, away_team_id).
/// Created once per key and only ever score-updated thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Option<Uuid>,
    pub match_date: NaiveDate,
    pub match_time: Option<NaiveTime>,
    pub home_team_id: Uuid,
    pub away_team_id: Uuid,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub league_id: Option<Uuid>,
    pub tournament_id: Option<Uuid>,
    pub division: Option<String>,
    pub source_match_key: String,
    pub source_platform: String,
    pub is_scheduled: bool,
    pub created_at: DateTime<Utc>,
}

/// Canonical-alias registry entry. The alias set only ever grows; entries
/// are merged into, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalAlias {
    pub id: Option<Uuid>,
    pub entity_type: String,
    pub canonical_id: Uuid,
    pub aliases: Vec<String>,
    pub birth_year: Option<i32>,
    pub gender: Option<Gender>,
    pub event_type: Option<EventType>,
    pub state: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalAlias {
    /// Idempotent, duplicate-tolerant set union.
    pub fn absorb_aliases<'a, I: IntoIterator<Item = &'a str>>(&mut self, names: I) -> bool {
        let mut grew = false;
        for name in names {
            let name = name.trim().to_lowercase();
            if name.is_empty() {
                continue;
            }
            if !self.aliases.iter().any(|a| a == &name) {
                self.aliases.push(name);
                grew = true;
            }
        }
        grew
    }
}

/// Deterministic (entity_type, source_platform, source_entity_id) -> internal id
/// index. The fastest and most accurate resolution tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntityRef {
    pub entity_type: String,
    pub source_platform: String,
    pub source_entity_id: String,
    pub internal_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Confidence-scored heuristic learned from observed resolutions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: Option<Uuid>,
    pub pattern_type: String,
    /// Adapter/platform id, or "all" for cross-source patterns.
    pub source: String,
    /// Opaque key -> occurrence count map.
    pub pattern_data: HashMap<String, i64>,
    pub confidence: f64,
    pub usage_count: i64,
    pub failure_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Option<Uuid>,
    pub action: String,
    pub table_name: String,
    pub record_id: Option<Uuid>,
    pub old_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: &str, table_name: &str, record_id: Option<Uuid>) -> Self {
        Self {
            id: None,
            action: action.to_string(),
            table_name: table_name.to_string(),
            record_id,
            old_data: None,
            new_data: None,
            actor: "pipeline".to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_new_data(mut self, data: serde_json::Value) -> Self {
        self.new_data = Some(data);
        self
    }

    pub fn with_old_data(mut self, data: serde_json::Value) -> Self {
        self.old_data = Some(data);
        self
    }
}
