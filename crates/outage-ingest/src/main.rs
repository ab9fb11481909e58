//! `outage-ingest`: drive the outage ingestion pipeline.
//!
//! # Usage
//!
//! ```text
//! outage-ingest --config ingest.toml seed-time --start 2024-01-01 --end 2024-12-31
//! outage-ingest backfill --start 2024-01-01 --end 2024-03-31
//! outage-ingest watch
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use outage_core::{content_id::IdGenerator, normalize::Normalizer};
use outage_ingest::{
  backfill::Backfill,
  checkpoint::CheckpointDir,
  config::IngestConfig,
  pipeline::Pipeline,
  source::HttpSource,
  watch::Watcher,
};
use outage_store_sqlite::SqliteStore;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Outage ingestion pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "ingest.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Poll the upstream on a fixed interval until Ctrl-C.
  Watch,
  /// Ingest a historical date range, resuming from checkpoints.
  Backfill {
    #[arg(long, value_name = "YYYY-MM-DD")]
    start: NaiveDate,
    #[arg(long, value_name = "YYYY-MM-DD")]
    end:   NaiveDate,
  },
  /// Populate the time dimension for a date range.
  SeedTime {
    #[arg(long, value_name = "YYYY-MM-DD")]
    start: NaiveDate,
    #[arg(long, value_name = "YYYY-MM-DD")]
    end:   NaiveDate,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let cfg = IngestConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::SeedTime { start, end } => {
      let added = store
        .seed_time_dimension(start, end)
        .await
        .context("failed to seed time dimension")?;
      tracing::info!(added, "time dimension ready");
    }
    Command::Watch => {
      let pipeline = build_pipeline(&cfg, store)?;
      let breaker = Arc::new(cfg.breaker.breaker());
      let watcher = Watcher::new(pipeline, breaker, cfg.watch_interval());
      let log = watcher.run(shutdown_signal()).await;
      if let Some(rate) = log.success_rate() {
        tracing::info!(success_rate = rate, cycles = log.len(), "final success rate");
      }
    }
    Command::Backfill { start, end } => {
      let pipeline = build_pipeline(&cfg, store)?;
      let checkpoints = CheckpointDir::new(expand_tilde(&cfg.backfill.checkpoint_dir));
      let backfill = Backfill::new(pipeline, cfg.backfill.max_concurrent, checkpoints);
      let report = backfill
        .run(start, end, &cfg.backfill.hours, shutdown_signal())
        .await
        .context("backfill failed")?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
  }

  Ok(())
}

fn build_pipeline(
  cfg: &IngestConfig,
  store: SqliteStore,
) -> anyhow::Result<Pipeline<SqliteStore, HttpSource>> {
  let source = HttpSource::new(&cfg.source.base_url, cfg.source_timeout())
    .context("failed to build upstream client")?;
  Ok(Pipeline::new(
    Arc::new(store),
    Arc::new(source),
    Normalizer::new(IdGenerator::new(cfg.id_policy)),
    cfg.retry.policy(),
  ))
}

/// Flips to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
  let (tx, rx) = watch::channel(false);
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::info!("shutdown requested, finishing in-flight work");
      tx.send_replace(true);
    }
  });
  rx
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
