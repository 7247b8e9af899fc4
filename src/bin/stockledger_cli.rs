use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use stockledger_api::{
    config::{self, AppConfig},
    db,
    events::{Event, EventSender},
    services::{
        backfill::{BackfillOutcome, BackfillScanner, BackfillStatus},
        reindex::{ReindexReport, Reindexer},
    },
};
use tokio::sync::mpsc;
use tracing::debug;

/// Run stock ledger jobs directly against the database
#[derive(Parser)]
#[command(name = "stockledger-cli", version, about)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing zero rows at every published location
    Backfill(BackfillArgs),
    /// Rebuild aggregates and snapshots
    Reindex(ReindexArgs),
    /// Show the backfill lock state
    Status,
    /// Ask a running backfill to stop after its current batch
    Cancel,
}

#[derive(Args)]
struct BackfillArgs {
    /// Rows per batch; defaults to `backfill.batch_size`
    #[arg(long)]
    batch_size: Option<u64>,
}

#[derive(Args)]
struct ReindexArgs {
    /// Items to rebuild; omit to rebuild every known item
    #[arg(long = "item", value_name = "ITEM_ID")]
    items: Vec<i64>,
}

struct CliContext {
    config: AppConfig,
    backfill: BackfillScanner,
    reindexer: Reindexer,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        let db = Arc::new(db_pool);

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(32);
        let event_sender = EventSender::new(event_tx);

        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!(target: "stockledger_cli", event = ?event, "received event");
            }
        });

        Ok(Self {
            backfill: BackfillScanner::new(
                db.clone(),
                event_sender,
                config.backfill.lock_ttl_secs,
            ),
            reindexer: Reindexer::new(db),
            config,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Backfill(args) => {
            let batch_size = args
                .batch_size
                .unwrap_or(context.config.backfill.batch_size);
            let outcome = context
                .backfill
                .run(batch_size)
                .await
                .context("backfill failed")?;
            render(&outcome, cli.json, render_backfill)?;
        }
        Commands::Reindex(args) => {
            let items = if args.items.is_empty() {
                context
                    .reindexer
                    .all_item_ids()
                    .await
                    .context("failed to list items")?
            } else {
                args.items
            };
            let report = context.reindexer.reindex_many(&items).await;
            render(&report, cli.json, render_reindex)?;
            if !report.failed.is_empty() {
                anyhow::bail!("{} item(s) failed to reindex", report.failed.len());
            }
        }
        Commands::Status => {
            let status = context
                .backfill
                .status()
                .await
                .context("failed to read backfill status")?;
            render(&status, cli.json, render_status)?;
        }
        Commands::Cancel => {
            let signalled = context
                .backfill
                .cancel()
                .await
                .context("failed to request cancellation")?;
            if signalled {
                println!("Cancellation requested; the scan stops after its current batch.");
            } else {
                println!("No backfill is running.");
            }
        }
    }

    Ok(())
}

fn render<T: Serialize>(value: &T, json: bool, plain: fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        plain(value);
    }
    Ok(())
}

fn render_backfill(outcome: &BackfillOutcome) {
    match outcome {
        BackfillOutcome::Completed { inserted, batches } => {
            println!("Backfill complete: {inserted} row(s) in {batches} batch(es)")
        }
        BackfillOutcome::Cancelled { inserted, batches } => println!(
            "Backfill cancelled after {batches} batch(es), {inserted} row(s); run again to resume"
        ),
        BackfillOutcome::AlreadyRunning => println!("Another backfill holds the lock; skipped"),
    }
}

fn render_reindex(report: &ReindexReport) {
    println!("Reindexed {} item(s)", report.reindexed);
    for item_id in &report.failed {
        println!("- failed: item {item_id}");
    }
}

fn render_status(status: &BackfillStatus) {
    match status {
        BackfillStatus::Idle => println!("Backfill idle"),
        BackfillStatus::Running {
            owner,
            started_at,
            expires_at,
        } => println!(
            "Backfill running • owner {owner} • started {started_at} • lock expires {expires_at}"
        ),
        BackfillStatus::Cancelling { owner, started_at } => {
            println!("Backfill cancelling • owner {owner} • started {started_at}")
        }
    }
}
