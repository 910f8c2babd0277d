//! mdsd — the mds auto-tagging daemon.
//!
//! Opens the single-table store and runs every committed change through the
//! tagger:
//! - `run` polls the store's change log until Ctrl-C
//! - `apply` dispatches one captured change batch (`{"Records": [...]}`)
//! - `init-config` prints or writes a scaffolded `mds.toml`
//!
//! # Usage
//!
//! ```text
//! mdsd run --config /etc/mds/mds.toml
//! mdsd apply batch.json --data-dir /var/lib/mds
//! mdsd init-config --data-dir /var/lib/mds --output mds.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use mds_core::MdsConfig;
use mds_state::{StateStore, StreamBatch};
use mds_tagger::{ChangeDispatcher, ChangeFeed};

#[derive(Parser)]
#[command(name = "mdsd", about = "mds auto-tagging daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the change log and tag services until interrupted.
    Run {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Dispatch a captured change batch once and report the outcome.
    Apply {
        /// JSON file holding `{"Records": [...]}`.
        batch: PathBuf,

        #[command(flatten)]
        store: StoreArgs,
    },
    /// Print (or write) a default mds.toml.
    InitConfig {
        /// Data directory the scaffolded store path points into.
        #[arg(long, default_value = "/var/lib/mds")]
        data_dir: PathBuf,

        /// Write here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct StoreArgs {
    /// Path to mds.toml. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory; overrides `store.path` with `<dir>/mds.redb`.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,mdsd=debug,mds=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { store } => run(&store).await,
        Command::Apply { batch, store } => apply(&batch, &store).await,
        Command::InitConfig { data_dir, output } => init_config(&data_dir, output.as_deref()),
    }
}

async fn run(args: &StoreArgs) -> anyhow::Result<()> {
    info!("mds daemon starting");
    let config = load_config(args)?;
    let store = open_store(&config)?;
    let feed = ChangeFeed::from_config(Arc::clone(&store), &config)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    feed.run(shutdown_rx).await;

    info!("mds daemon stopped");
    Ok(())
}

async fn apply(batch_path: &Path, args: &StoreArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let content = std::fs::read_to_string(batch_path)?;
    let batch: StreamBatch = serde_json::from_str(&content)?;
    info!(path = ?batch_path, records = batch.records.len(), "batch loaded");

    let store = open_store(&config)?;
    let dispatcher = ChangeDispatcher::from_config(store, &config)?;
    let report = dispatcher.dispatch(&batch.records).await;

    println!(
        "records: {}  processed: {}  ignored: {}  tags applied: {}  failures: {}",
        report.records,
        report.processed,
        report.ignored,
        report.tags_applied,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  #{} {}: {}", failure.index, failure.event_id, failure.reason);
    }
    if !report.is_success() {
        anyhow::bail!("{} record(s) failed", report.failures.len());
    }
    Ok(())
}

fn init_config(data_dir: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let rendered = MdsConfig::scaffold(data_dir).to_toml_string()?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            info!(path = ?path, "config written");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn load_config(args: &StoreArgs) -> anyhow::Result<MdsConfig> {
    let mut config = match &args.config {
        Some(path) => MdsConfig::from_file(path)?,
        None => MdsConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.store.path = dir.join("mds.redb");
    }
    config.validate()?;
    Ok(config)
}

fn open_store(config: &MdsConfig) -> anyhow::Result<Arc<StateStore>> {
    if let Some(parent) = config.store.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = StateStore::open(&config.store.path)?;
    info!(path = ?config.store.path, "state store opened");
    Ok(Arc::new(store))
}
