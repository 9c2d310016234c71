use anyhow::Context;
use clap::{Parser, Subcommand};

use chainboard::config::{self, get_config_clone};
use chainboard::kv::open_store;
use chainboard::logger::{self, LogTag};
use chainboard::metrics::{ProjectContext, TimeRange};
use chainboard::observability::counters;
use chainboard::providers::service::ProviderService;
use chainboard::snapshots::{
    refresh_snapshots_for_project, AssemblerCollector, RefreshOptions, SnapshotStore,
};

#[derive(Parser)]
#[command(name = "chainboard", about = "Metric snapshot sweeps for token analytics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh all metric snapshots for one project.
    Sweep {
        #[arg(long)]
        project_id: String,
        /// Token contract address (0x-hex).
        #[arg(long)]
        contract: String,
        #[arg(long, default_value = "ethereum")]
        chain: String,
        /// Refresh even metrics that are still fresh.
        #[arg(long)]
        force: bool,
        /// Comma-separated time ranges (24h,7d,30d,90d,all).
        #[arg(long)]
        ranges: Option<String>,
        /// Snapshot database path, overriding SNAPSHOT_DB_PATH.
        #[arg(long)]
        db: Option<String>,
    },
    /// Print the operational counter snapshot.
    Counters,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();
    config::load_config();

    let cli = Cli::parse();
    match cli.command {
        Command::Sweep { project_id, contract, chain, force, ranges, db } => {
            let app_config = get_config_clone();
            let store = open_store(&app_config.shared_store)
                .context("failed to open shared key-value store")?;
            counters().attach_store(store.clone());
            let svc = ProviderService::new(store);

            let db_path = db.unwrap_or(app_config.snapshot_db_path);
            let snapshots =
                SnapshotStore::open(&db_path).context("failed to open snapshot store")?;

            let ranges = match ranges {
                Some(raw) => Some(parse_ranges(&raw)?),
                None => None,
            };

            let project = ProjectContext { id: project_id, contract_address: contract, chain };
            logger::info(
                LogTag::Sweep,
                &format!("sweeping snapshots for project {}", project.id),
            );
            let result = refresh_snapshots_for_project(
                &snapshots,
                &AssemblerCollector { svc: &svc },
                &project,
                RefreshOptions { force, ranges, ..Default::default() },
            )
            .await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            let failures = result.outcomes.iter().filter(|o| o.error.is_some()).count();
            if failures > 0 {
                logger::warning(
                    LogTag::Sweep,
                    &format!("{} of {} metrics failed", failures, result.outcomes.len()),
                );
            }
        }
        Command::Counters => {
            let app_config = get_config_clone();
            let store = open_store(&app_config.shared_store)
                .context("failed to open shared key-value store")?;
            counters().attach_store(store);
            let snap = counters().snapshot().await;
            println!("{}", serde_json::to_string_pretty(&snap)?);
        }
    }
    Ok(())
}

fn parse_ranges(raw: &str) -> anyhow::Result<Vec<TimeRange>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<TimeRange>().map_err(anyhow::Error::msg))
        .collect()
}
