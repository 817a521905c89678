use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use pitchdata::config::PipelineConfig;
use pitchdata::observability::logging::init_logging;
use pitchdata::pipeline::{Orchestrator, RunOptions};
use pitchdata::storage::{DatabaseStorage, Storage};

#[derive(Parser)]
#[command(name = "pitchdata")]
#[command(about = "Data-quality and entity-resolution pipeline for scraped youth soccer records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the unprocessed staging backlog into the production tables
    Process {
        /// Maximum number of staging rows to pull this run
        #[arg(long)]
        limit: Option<usize>,
        /// Restrict the run to one source platform
        #[arg(long)]
        source: Option<String>,
        /// Run everything except the writes and report what would change
        #[arg(long)]
        dry_run: bool,
    },
    /// Summarize recent audit-log activity
    AuditReport {
        /// How many days back to aggregate
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = PipelineConfig::load()?;
    let storage: Arc<dyn Storage> = Arc::new(DatabaseStorage::new(&config).await?);

    match cli.command {
        Commands::Process {
            limit,
            source,
            dry_run,
        } => {
            let orchestrator = Orchestrator::new(storage, config);
            let report = orchestrator
                .run(RunOptions {
                    limit,
                    source,
                    dry_run,
                })
                .await?;
            println!("{}", report.summary());
            if report.views_refreshed == Some(false) {
                println!("warning: reporting views were not refreshed; summaries are stale");
            }
        }
        Commands::AuditReport { days } => {
            let rows = storage.audit_summary(days).await?;
            info!(days, rows = rows.len(), "audit report generated");
            if rows.is_empty() {
                println!("no audit activity in the last {days} days");
            } else {
                println!("{:<28} {:<16} {:>8}", "action", "table", "count");
                for row in &rows {
                    println!("{:<28} {:<16} {:>8}", row.action, row.table_name, row.count);
                }
            }
        }
    }

    Ok(())
}
