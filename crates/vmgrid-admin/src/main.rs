//! vmgrid-admin — operator maintenance for a vmgrid cluster database.
//!
//! Recovery and visibility tools that nothing in the normal control path
//! depends on: locks expire on their own and queues are drained by node
//! agents, but after a crash an operator may want to look or to nudge.
//!
//! # Usage
//!
//! ```text
//! vmgrid-admin --db /var/lib/vmgrid/vmgrid.redb locks
//! vmgrid-admin --config /etc/vmgrid/node.toml gc --watch --interval 60
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vmgrid_core::ClusterConfig;
use vmgrid_state::{ClusterDb, Reaper};
use vmgrid_store::RedbStore;

#[derive(Parser)]
#[command(name = "vmgrid-admin", about = "vmgrid cluster maintenance", version)]
struct Cli {
    /// Node config file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cluster database file.
    #[arg(long, global = true, default_value = "/var/lib/vmgrid/vmgrid.redb")]
    db: PathBuf,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List locks that are currently held.
    Locks,
    /// Remove lock records whose lease has run out.
    ClearStaleLocks,
    /// Physically remove expired records and locks from the database file.
    PurgeExpired,
    /// Return every claimed but unresolved queue item to its queue.
    RestartQueues,
    /// Count unresolved items in one queue.
    QueueLength {
        /// Queue name, usually a node name.
        queue: String,
    },
    /// Hard-delete objects that have been deleted or errored for long enough.
    Gc {
        /// Seconds an object must sit in a terminal state before removal.
        /// Defaults to `cleaner_delay` from the config.
        #[arg(long)]
        delay: Option<u64>,

        /// Keep sweeping until interrupted.
        #[arg(long)]
        watch: bool,

        /// Seconds between sweeps with --watch.
        #[arg(long, default_value = "60")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    let config = match &cli.config {
        Some(path) => ClusterConfig::from_file(path)?,
        None => ClusterConfig::default(),
    };
    let store = Arc::new(RedbStore::open(&cli.db).with_context(|| format!("opening {}", cli.db.display()))?);
    info!(path = ?cli.db, node = %config.node_name, "cluster database opened");
    let db = ClusterDb::new(store.clone(), config);

    match cli.command {
        Command::Locks => {
            for lock in db.get_existing_locks()? {
                println!("{}", serde_json::to_string(&lock)?);
            }
        }
        Command::ClearStaleLocks => {
            let cleared = db.clear_stale_locks()?;
            println!("cleared {cleared} stale locks");
        }
        Command::PurgeExpired => {
            let purged = store.purge_expired()?;
            println!("purged {purged} expired records");
        }
        Command::RestartQueues => {
            let restarted = db.restart_queues()?;
            println!("restarted {restarted} queue items");
        }
        Command::QueueLength { queue } => {
            println!("{}", db.get_queue_length(&queue)?);
        }
        Command::Gc {
            delay,
            watch,
            interval,
        } => run_gc(db, delay, watch, interval).await?,
    }
    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new("info,vmgrid=debug")?,
    };
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn run_gc(db: ClusterDb, delay: Option<u64>, forever: bool, interval: u64) -> anyhow::Result<()> {
    let mut reaper = Reaper::new(db).with_interval(Duration::from_secs(interval));
    if let Some(delay) = delay {
        reaper = reaper.with_delay(Duration::from_secs(delay));
    }

    if !forever {
        let sweeper = reaper.clone();
        let report = tokio::task::spawn_blocking(move || sweeper.sweep_once()).await??;
        println!(
            "removed {} instances, {} interfaces, {} networks",
            report.instances, report.interfaces, report.networks
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        reaper.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await.context("installing Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = handle.await;
    Ok(())
}
