use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use cinder_crypto::RecipientKeyPair;
use cinder_engine::paths::default_key_path;
use cinder_engine::{spawn_sweepers, DestructionScheduler, EngineConfig};
use cinder_store::models::now;
use cinder_store::SqliteStore;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Cinder message lifecycle engine", long_about = None)]
struct Cli {
    /// Config file (JSON). Defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the destruction sweepers until interrupted
    Run,
    /// Generate a recipient RSA-4096 keypair
    Keygen {
        /// Where to write the private key (base64 PEM)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },
    /// Print pending destructions, soonest first
    Queue,
    /// Run every sweep once and print the report
    Sweep,
    /// Print cleanup statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Run => run_command(&config).await,
        Commands::Keygen { out, force } => keygen_command(out, force).await,
        Commands::Queue => queue_command(&config).await,
        Commands::Sweep => sweep_command(&config).await,
        Commands::Stats => stats_command(&config).await,
    }
}

async fn open_scheduler(config: &EngineConfig) -> Result<(SqliteStore, Arc<DestructionScheduler>)> {
    let db_path = config.db_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SqliteStore::open(&db_path).await?;
    let scheduler = Arc::new(DestructionScheduler::with_config(
        Arc::new(store.clone()),
        &config.sweep,
    ));
    Ok((store, scheduler))
}

async fn run_command(config: &EngineConfig) -> Result<()> {
    let (store, scheduler) = open_scheduler(config).await?;
    let pending = scheduler.warm_cache(now()).await?;
    info!(pending, db = %config.db_path()?.display(), "destruction schedule loaded");

    let sweepers = spawn_sweepers(scheduler, &config.sweep);
    info!("engine started");
    signal::ctrl_c().await?;
    info!("engine stopping");
    sweepers.shutdown().await;
    store.close().await;
    Ok(())
}

async fn keygen_command(out: Option<PathBuf>, force: bool) -> Result<()> {
    let out = match out {
        Some(path) => path,
        None => default_key_path()?,
    };
    if out.exists() && !force {
        return Err(anyhow!("{} exists; pass --force to overwrite", out.display()));
    }
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!("generating RSA-4096 keypair");
    let pair = tokio::task::spawn_blocking(RecipientKeyPair::generate).await??;
    write_private_key(&out, pair.to_b64()?.as_bytes())?;

    println!("Private key: {}", out.display());
    println!("Fingerprint: {}", pair.public_key().fingerprint()?);
    println!("Public key:  {}", pair.public_key().to_b64()?);
    Ok(())
}

fn write_private_key(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

async fn queue_command(config: &EngineConfig) -> Result<()> {
    let (store, scheduler) = open_scheduler(config).await?;
    let queue = scheduler.destruction_queue(now()).await?;
    if queue.is_empty() {
        println!("No pending destructions");
    }
    for entry in queue {
        println!(
            "{}  {}  in {}s{}",
            entry.message_id,
            entry.deadline.to_rfc3339(),
            entry.time_remaining.num_seconds(),
            if entry.read_once { "  (read-once)" } else { "" }
        );
    }
    store.close().await;
    Ok(())
}

async fn sweep_command(config: &EngineConfig) -> Result<()> {
    let (store, scheduler) = open_scheduler(config).await?;
    let report = scheduler.force_cleanup(now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    store.close().await;
    Ok(())
}

async fn stats_command(config: &EngineConfig) -> Result<()> {
    let (store, scheduler) = open_scheduler(config).await?;
    let stats = scheduler.statistics(now()).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    store.close().await;
    Ok(())
}
