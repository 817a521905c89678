//! End-to-end pipeline runs against in-memory storage.

use std::sync::Arc;

use chrono::{Datelike, Duration, Utc};
use uuid::Uuid;

use pitchdata::config::PipelineConfig;
use pitchdata::domain::StagingRecord;
use pitchdata::pipeline::{Orchestrator, RunOptions};
use pitchdata::storage::memory::MemoryStorage;
use pitchdata::storage::Storage;

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::for_season("file:test.db", Utc::now().date_naive().year());
    config.retry.delays_secs = vec![0, 0, 0];
    config
}

/// A date safely in the future so schedule classification is stable
/// whenever the suite runs.
fn future_date() -> String {
    (Utc::now().date_naive() + Duration::days(30)).to_string()
}

fn staged(
    source_platform: &str,
    source_match_id: &str,
    home: &str,
    away: &str,
    home_score: Option<&str>,
    away_score: Option<&str>,
) -> StagingRecord {
    StagingRecord {
        id: Some(Uuid::new_v4()),
        source_platform: source_platform.to_string(),
        source_match_id: Some(source_match_id.to_string()),
        source_event_id: Some("evt42".to_string()),
        event_name: Some("Heartland Soccer League 2025".to_string()),
        home_team_name: Some(home.to_string()),
        away_team_name: Some(away.to_string()),
        match_date: Some(future_date()),
        match_time: None,
        home_score: home_score.map(str::to_string),
        away_score: away_score.map(str::to_string),
        division: Some("U-11 Boys Division 1".to_string()),
        subdivision: None,
        state: Some("KS".to_string()),
        processed: false,
        error_message: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn two_sources_merge_into_one_match_scores_win() {
    // the same fixture seen by two platforms: one as a schedule entry with
    // no scores, one as a played result
    let storage = Arc::new(MemoryStorage::new());
    storage.seed_staging(vec![
        staged("heartland", "m1", "KC Fusion 15B Gold", "Rush 2015B Select", None, None),
        staged("gotsport", "g7", "KC Fusion 15B Gold", "Rush 2015B Select", Some("4"), Some("2")),
    ]);
    let orchestrator = Orchestrator::new(storage.clone(), config());

    let report = orchestrator.run(RunOptions::default()).await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.merged, 1);
    let matches = storage.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].home_score, Some(4));
    assert_eq!(matches[0].away_score, Some(2));
}

#[tokio::test]
async fn null_scores_never_clobber_real_ones() {
    // same two records, scores arriving first
    let storage = Arc::new(MemoryStorage::new());
    storage.seed_staging(vec![
        staged("gotsport", "g7", "KC Fusion 15B Gold", "Rush 2015B Select", Some("4"), Some("2")),
        staged("heartland", "m1", "KC Fusion 15B Gold", "Rush 2015B Select", None, None),
    ]);
    let orchestrator = Orchestrator::new(storage.clone(), config());

    orchestrator.run(RunOptions::default()).await.unwrap();

    let matches = storage.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].home_score, Some(4));
    assert_eq!(matches[0].away_score, Some(2));
    // the first writer's key survives the merge
    assert_eq!(matches[0].source_match_key, "gotsport:g7");
}

#[tokio::test]
async fn late_schedule_row_does_not_reflag_a_played_match() {
    let storage = Arc::new(MemoryStorage::new());
    storage.seed_staging(vec![staged(
        "gotsport",
        "g7",
        "KC Fusion 15B Gold",
        "Rush 2015B Select",
        Some("4"),
        Some("2"),
    )]);
    let orchestrator = Orchestrator::new(storage.clone(), config());
    orchestrator.run(RunOptions::default()).await.unwrap();
    assert!(!storage.matches()[0].is_scheduled);

    // the other platform still lists the fixture as an upcoming game
    storage.seed_staging(vec![staged(
        "heartland",
        "m1",
        "KC Fusion 15B Gold",
        "Rush 2015B Select",
        None,
        None,
    )]);
    orchestrator.run(RunOptions::default()).await.unwrap();

    let matches = storage.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].home_score, Some(4));
    assert_eq!(matches[0].away_score, Some(2));
    assert!(!matches[0].is_scheduled);
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let storage = Arc::new(MemoryStorage::new());
    storage.seed_staging(vec![staged(
        "heartland",
        "m1",
        "KC Fusion 15B Gold",
        "Rush 2015B Select",
        Some("1"),
        Some("1"),
    )]);
    let orchestrator = Orchestrator::new(storage.clone(), config());

    let first = orchestrator.run(RunOptions::default()).await.unwrap();
    assert_eq!(first.created, 1);

    let second = orchestrator.run(RunOptions::default()).await.unwrap();
    assert_eq!(second.fetched, 0);
    assert_eq!(second.created, 0);
    assert_eq!(storage.matches().len(), 1);
    assert_eq!(storage.teams().len(), 2);
}

#[tokio::test]
async fn scheduled_match_gains_scores_on_a_later_run() {
    let storage = Arc::new(MemoryStorage::new());
    storage.seed_staging(vec![staged(
        "heartland",
        "m1",
        "KC Fusion 15B Gold",
        "Rush 2015B Select",
        None,
        None,
    )]);
    let orchestrator = Orchestrator::new(storage.clone(), config());
    orchestrator.run(RunOptions::default()).await.unwrap();
    assert!(storage.matches()[0].is_scheduled);

    // the same source row reappears with a final score
    storage.seed_staging(vec![staged(
        "heartland",
        "m1",
        "KC Fusion 15B Gold",
        "Rush 2015B Select",
        Some("3"),
        Some("0"),
    )]);
    let report = orchestrator.run(RunOptions::default()).await.unwrap();

    assert_eq!(report.score_updates, 1);
    let matches = storage.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].home_score, Some(3));
    assert!(!matches[0].is_scheduled);
}

#[tokio::test]
async fn audit_failures_do_not_abort_the_run() {
    let storage = Arc::new(MemoryStorage::new());
    storage.fail_audit_writes(true);
    storage.seed_staging(vec![staged(
        "heartland",
        "m1",
        "KC Fusion 15B Gold",
        "Rush 2015B Select",
        Some("2"),
        Some("1"),
    )]);
    let orchestrator = Orchestrator::new(storage.clone(), config());

    let report = orchestrator.run(RunOptions::default()).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(storage.matches().len(), 1);
    assert!(storage.audit_entries().is_empty());
}

#[tokio::test]
async fn division_is_extracted_onto_the_match() {
    let storage = Arc::new(MemoryStorage::new());
    storage.seed_staging(vec![staged(
        "heartland",
        "m1",
        "KC Fusion 15B Gold",
        "Rush 2015B Select",
        None,
        None,
    )]);
    let orchestrator = Orchestrator::new(storage.clone(), config());
    orchestrator.run(RunOptions::default()).await.unwrap();

    // age/gender noise stripped, the tier kept
    assert_eq!(storage.matches()[0].division.as_deref(), Some("Division 1"));
}

#[tokio::test]
async fn audit_trail_covers_creates() {
    let storage = Arc::new(MemoryStorage::new());
    storage.seed_staging(vec![staged(
        "heartland",
        "m1",
        "KC Fusion 15B Gold",
        "Rush 2015B Select",
        Some("2"),
        Some("1"),
    )]);
    let orchestrator = Orchestrator::new(storage.clone(), config());
    orchestrator.run(RunOptions::default()).await.unwrap();

    let entries = storage.audit_entries();
    let creates: Vec<_> = entries.iter().filter(|e| e.action == "create").collect();
    // two teams, one league, one match, one club at minimum
    assert!(creates.iter().any(|e| e.table_name == "teams"));
    assert!(creates.iter().any(|e| e.table_name == "leagues"));
    assert!(creates.iter().any(|e| e.table_name == "matches"));

    let summary = storage.audit_summary(1).await.unwrap();
    assert!(!summary.is_empty());
}
