//! Canonical entity resolution: maps a normalized candidate onto an existing
//! production entity or signals that one must be created.
//!
//! Resolution runs a fixed ladder and short-circuits on the first hit:
//! source-id map, internal id, semantic key, alias registry, fuzzy name
//! similarity. Fuzzy matching is only ever attempted with the entity type's
//! exact-match fields present and equal; a missing birth year or gender
//! aborts it outright rather than risking a cross-cohort merge.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use strsim::jaro_winkler;
use tracing::debug;
use uuid::Uuid;

use crate::common::error::Result;
use crate::config::Thresholds;
use crate::domain::{CanonicalAlias, EventType, Gender, SourceEntityRef};
use crate::storage::Storage;

pub const ENTITY_TEAM: &str = "team";
pub const ENTITY_EVENT: &str = "event";
pub const ENTITY_CLUB: &str = "club";

/// How an existing entity was matched. Carried into the audit trail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchMethod {
    SourceId,
    InternalId,
    SemanticKey,
    Alias,
    Fuzzy { similarity: f64 },
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::SourceId => "source_id",
            MatchMethod::InternalId => "internal_id",
            MatchMethod::SemanticKey => "semantic_key",
            MatchMethod::Alias => "alias",
            MatchMethod::Fuzzy { .. } => "fuzzy",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    /// Confidently matched to an existing entity.
    Existing { id: Uuid, method: MatchMethod },
    /// Similarity landed in the review band; the caller must not auto-merge.
    Review {
        id: Uuid,
        similarity: f64,
        matched_name: String,
    },
    /// Nothing matched; the caller creates the entity and then calls
    /// [`Resolver::learn`] with the new id.
    CreateNew,
}

#[derive(Debug, Clone)]
pub struct TeamCandidate {
    pub internal_id: Option<Uuid>,
    pub source_platform: String,
    pub source_entity_id: Option<String>,
    pub display_name: String,
    pub canonical_name: String,
    pub birth_year: Option<i32>,
    pub gender: Option<Gender>,
    pub state: Option<String>,
}

impl TeamCandidate {
    fn names(&self) -> [&str; 2] {
        [self.canonical_name.as_str(), self.display_name.as_str()]
    }
}

#[derive(Debug, Clone)]
pub struct EventCandidate {
    pub internal_id: Option<Uuid>,
    pub source_platform: String,
    pub source_event_id: Option<String>,
    pub name: String,
    pub canonical_name: String,
    pub event_type: EventType,
    pub state: Option<String>,
}

/// Run-scoped resolver. Alias registries are read once per entity type and
/// kept coherent in memory as `learn` writes flow through.
pub struct Resolver {
    storage: Arc<dyn Storage>,
    thresholds: Thresholds,
    registries: Mutex<HashMap<String, Vec<CanonicalAlias>>>,
}

impl Resolver {
    pub fn new(storage: Arc<dyn Storage>, thresholds: Thresholds) -> Self {
        Self {
            storage,
            thresholds,
            registries: Mutex::new(HashMap::new()),
        }
    }

    async fn registry(&self, entity_type: &str) -> Result<Vec<CanonicalAlias>> {
        if let Ok(cache) = self.registries.lock() {
            if let Some(entries) = cache.get(entity_type) {
                return Ok(entries.clone());
            }
        }
        let entries = self.storage.load_alias_registry(entity_type).await?;
        debug!(entity_type, count = entries.len(), "loaded alias registry");
        if let Ok(mut cache) = self.registries.lock() {
            cache.insert(entity_type.to_string(), entries.clone());
        }
        Ok(entries)
    }

    pub async fn resolve_team(&self, candidate: &TeamCandidate) -> Result<Resolution> {
        // 1. source-id map
        if let Some(source_id) = &candidate.source_entity_id {
            if let Some(id) = self
                .storage
                .find_source_entity(ENTITY_TEAM, &candidate.source_platform, source_id)
                .await?
            {
                return Ok(Resolution::Existing {
                    id,
                    method: MatchMethod::SourceId,
                });
            }
        }

        // 2. internal id, confirmed against storage
        if let Some(id) = candidate.internal_id {
            if self.storage.get_team(id).await?.is_some() {
                return Ok(Resolution::Existing {
                    id,
                    method: MatchMethod::InternalId,
                });
            }
        }

        // 3. semantic key, only when every key field is known
        if candidate.birth_year.is_some() && candidate.gender.is_some() {
            if let Some(team) = self
                .storage
                .find_team_by_semantic_key(
                    &candidate.canonical_name,
                    candidate.birth_year,
                    candidate.gender,
                    candidate.state.as_deref(),
                )
                .await?
            {
                if let Some(id) = team.id {
                    return Ok(Resolution::Existing {
                        id,
                        method: MatchMethod::SemanticKey,
                    });
                }
            }
        }

        // 4 and 5 require the exact-match fields. Without birth year and
        // gender neither the alias registry nor fuzzy similarity is safe.
        let (Some(birth_year), Some(gender)) = (candidate.birth_year, candidate.gender) else {
            return Ok(Resolution::CreateNew);
        };

        let registry = self.registry(ENTITY_TEAM).await?;
        let gated: Vec<&CanonicalAlias> = registry
            .iter()
            .filter(|e| e.birth_year == Some(birth_year) && e.gender == Some(gender))
            .collect();

        // 4. alias registry
        for entry in &gated {
            for name in candidate.names() {
                let name = name.to_lowercase();
                if entry.aliases.iter().any(|a| a == &name) {
                    return Ok(Resolution::Existing {
                        id: entry.canonical_id,
                        method: MatchMethod::Alias,
                    });
                }
            }
        }

        // 5. fuzzy similarity against every known alias in the cohort
        if let Some((entry, alias, similarity)) = best_fuzzy(
            &gated,
            &candidate.canonical_name.to_lowercase(),
            self.thresholds.ignore,
        ) {
            if similarity >= self.thresholds.auto_merge {
                return Ok(Resolution::Existing {
                    id: entry.canonical_id,
                    method: MatchMethod::Fuzzy { similarity },
                });
            }
            if similarity >= self.thresholds.review {
                return Ok(Resolution::Review {
                    id: entry.canonical_id,
                    similarity,
                    matched_name: alias,
                });
            }
        }

        Ok(Resolution::CreateNew)
    }

    pub async fn resolve_event(&self, candidate: &EventCandidate) -> Result<Resolution> {
        if let Some(source_id) = &candidate.source_event_id {
            if let Some(event) = self
                .storage
                .find_event_by_source(&candidate.source_platform, source_id)
                .await?
            {
                if let Some(id) = event.id {
                    return Ok(Resolution::Existing {
                        id,
                        method: MatchMethod::SourceId,
                    });
                }
            }
        }

        // internal id, confirmed against storage like the team path
        if let Some(id) = candidate.internal_id {
            if self.storage.get_event(candidate.event_type, id).await?.is_some() {
                return Ok(Resolution::Existing {
                    id,
                    method: MatchMethod::InternalId,
                });
            }
        }

        if let Some(event) = self
            .storage
            .find_event_by_name(candidate.event_type, &candidate.canonical_name)
            .await?
        {
            if let Some(id) = event.id {
                return Ok(Resolution::Existing {
                    id,
                    method: MatchMethod::SemanticKey,
                });
            }
        }

        let registry = self.registry(ENTITY_EVENT).await?;
        let gated: Vec<&CanonicalAlias> = registry
            .iter()
            .filter(|e| {
                e.event_type == Some(candidate.event_type)
                    && (candidate.state.is_none() || e.state == candidate.state)
            })
            .collect();

        for entry in &gated {
            let name = candidate.canonical_name.to_lowercase();
            if entry.aliases.iter().any(|a| a == &name) {
                return Ok(Resolution::Existing {
                    id: entry.canonical_id,
                    method: MatchMethod::Alias,
                });
            }
        }

        // events fuzzy-match only when the candidate carries a state to gate on
        if candidate.state.is_some() {
            if let Some((entry, alias, similarity)) = best_fuzzy(
                &gated,
                &candidate.canonical_name.to_lowercase(),
                self.thresholds.ignore,
            ) {
                if similarity >= self.thresholds.auto_merge {
                    return Ok(Resolution::Existing {
                        id: entry.canonical_id,
                        method: MatchMethod::Fuzzy { similarity },
                    });
                }
                if similarity >= self.thresholds.review {
                    return Ok(Resolution::Review {
                        id: entry.canonical_id,
                        similarity,
                        matched_name: alias,
                    });
                }
            }
        }

        Ok(Resolution::CreateNew)
    }

    /// Self-learning step: after any match or create, fold every name seen
    /// for the canonical id into its alias entry and pin the source-native
    /// id in the source-entity map.
    pub async fn learn_team(&self, id: Uuid, candidate: &TeamCandidate) -> Result<()> {
        self.learn(
            ENTITY_TEAM,
            id,
            &candidate.names(),
            candidate.birth_year,
            candidate.gender,
            None,
            candidate.state.clone(),
        )
        .await?;
        if let Some(source_id) = &candidate.source_entity_id {
            self.storage
                .record_source_entity(&SourceEntityRef {
                    entity_type: ENTITY_TEAM.to_string(),
                    source_platform: candidate.source_platform.clone(),
                    source_entity_id: source_id.clone(),
                    internal_id: id,
                    created_at: Utc::now(),
                })
                .await?;
        }
        Ok(())
    }

    pub async fn learn_event(&self, id: Uuid, candidate: &EventCandidate) -> Result<()> {
        self.learn(
            ENTITY_EVENT,
            id,
            &[candidate.canonical_name.as_str(), candidate.name.as_str()],
            None,
            None,
            Some(candidate.event_type),
            candidate.state.clone(),
        )
        .await?;
        if let Some(source_id) = &candidate.source_event_id {
            self.storage
                .record_source_entity(&SourceEntityRef {
                    entity_type: ENTITY_EVENT.to_string(),
                    source_platform: candidate.source_platform.clone(),
                    source_entity_id: source_id.clone(),
                    internal_id: id,
                    created_at: Utc::now(),
                })
                .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn learn(
        &self,
        entity_type: &str,
        canonical_id: Uuid,
        names: &[&str],
        birth_year: Option<i32>,
        gender: Option<Gender>,
        event_type: Option<EventType>,
        state: Option<String>,
    ) -> Result<()> {
        let mut entry = {
            let existing = self.registry(entity_type).await?;
            existing
                .into_iter()
                .find(|e| e.canonical_id == canonical_id)
                .unwrap_or(CanonicalAlias {
                    id: None,
                    entity_type: entity_type.to_string(),
                    canonical_id,
                    aliases: Vec::new(),
                    birth_year,
                    gender,
                    event_type,
                    state,
                    updated_at: Utc::now(),
                })
        };
        if !entry.absorb_aliases(names.iter().copied()) && entry.id.is_some() {
            return Ok(());
        }
        entry.updated_at = Utc::now();
        self.storage.upsert_alias(&mut entry).await?;

        if let Ok(mut cache) = self.registries.lock() {
            if let Some(entries) = cache.get_mut(entity_type) {
                match entries.iter_mut().find(|e| e.canonical_id == canonical_id) {
                    Some(existing) => *existing = entry,
                    None => entries.push(entry),
                }
            }
        }
        Ok(())
    }
}

/// Best-scoring alias at or above the ignore floor; weaker candidates are
/// not considered at all.
fn best_fuzzy<'a>(
    entries: &[&'a CanonicalAlias],
    name: &str,
    floor: f64,
) -> Option<(&'a CanonicalAlias, String, f64)> {
    let mut best: Option<(&CanonicalAlias, String, f64)> = None;
    for entry in entries {
        for alias in &entry.aliases {
            let similarity = jaro_winkler(name, alias);
            if similarity < floor {
                continue;
            }
            if best.as_ref().map(|(_, _, s)| similarity > *s).unwrap_or(true) {
                best = Some((entry, alias.clone(), similarity));
            }
        }
    }
    best
}
