use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pfsync_adapters::{load_fixture_feed, FixtureFeed, HttpListingFeed, ListingFeed};
use pfsync_sync::postgres::{self, PgListingStore};
use pfsync_sync::store::ListingStore;
use pfsync_sync::{SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pfsync-cli")]
#[command(about = "Property feed sync command-line interface")]
struct Cli {
    /// Read the feed from a JSON snapshot instead of the live API.
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation pass and append it to the report file.
    Sync,
    /// List media references whose files are missing.
    Check,
    /// Re-download missing media and repoint the affected rows.
    Repair,
    /// Apply database migrations.
    Migrate,
    /// Run passes on the configured cron schedule until Ctrl-C.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let pipeline = build_pipeline(config, cli.fixture.as_ref()).await?;
            let stats = pipeline.run_and_report().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "sync complete: run_id={} created={} updated={} images={} users_created={} users_updated={} errors={} skipped={}",
                    stats.run_id,
                    stats.properties_created,
                    stats.properties_updated,
                    stats.images_downloaded,
                    stats.users_created,
                    stats.users_updated,
                    stats.errors,
                    stats.skipped
                );
            }
        }
        Commands::Check => {
            // The scan never touches the feed.
            let store = connect_store(&config).await?;
            let pipeline = SyncPipeline::new(config, store, Arc::new(FixtureFeed::default()))?;
            let grouped = pipeline.check().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&grouped)?);
            } else if grouped.is_empty() {
                println!("no missing media");
            } else {
                let total: usize = grouped.values().map(Vec::len).sum();
                println!("{total} missing media file(s) across {} listing(s):", grouped.len());
                for (remote_id, records) in &grouped {
                    println!("  {remote_id}: {}", records.len());
                }
                println!("run `pfsync-cli repair` to re-download them");
            }
        }
        Commands::Repair => {
            let pipeline = build_pipeline(config, cli.fixture.as_ref()).await?;
            let summary = pipeline.repair().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "repair complete: missing={} repaired={} failed={}",
                    summary.missing, summary.repaired, summary.failed
                );
            }
        }
        Commands::Migrate => {
            let pool = postgres::connect(&config.database_url).await?;
            postgres::migrate(&pool).await?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            let pipeline = Arc::new(build_pipeline(config, cli.fixture.as_ref()).await?);
            pfsync_sync::run_scheduler(pipeline).await?;
        }
    }

    Ok(())
}

async fn connect_store(config: &SyncConfig) -> Result<Arc<dyn ListingStore>> {
    let pool = postgres::connect(&config.database_url).await?;
    Ok(Arc::new(PgListingStore::new(pool)))
}

async fn build_pipeline(config: SyncConfig, fixture: Option<&PathBuf>) -> Result<SyncPipeline> {
    let store = connect_store(&config).await?;
    let feed: Arc<dyn ListingFeed> = match fixture {
        Some(path) => {
            info!(path = %path.display(), "using fixture feed");
            Arc::new(load_fixture_feed(path).with_context(|| format!("loading {}", path.display()))?)
        }
        None => Arc::new(HttpListingFeed::new(config.feed.clone())?),
    };
    SyncPipeline::new(config, store, feed)
}
