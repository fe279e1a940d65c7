use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use dlmgr_core::catalog::StaticCatalog;
use dlmgr_core::config::{self, EngineConfig};
use dlmgr_core::events::{ChannelEventSink, EngineEvent};
use dlmgr_core::manager::DownloadManager;
use dlmgr_core::manager::SubmitParams;
use dlmgr_core::store::types::{DownloadId, DownloadRow};
use dlmgr_core::store::PersistentStore;
use dlmgr_core::url_model::derive_filename;

/// Top-level CLI for the dlmgr download engine.
#[derive(Debug, Parser)]
#[command(name = "dlmgr")]
#[command(about = "dlmgr: persistent, resumable, bandwidth-shaped HTTPS downloads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a new download.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,

        /// Display title; derived from the URL when omitted.
        #[arg(long)]
        title: Option<String>,

        /// Directory to save into (engine default if omitted).
        #[arg(long)]
        path: Option<String>,

        /// Mirror the catalog's ancestor directories under `path`.
        #[arg(long)]
        preserve_structure: bool,

        /// Overwrite an existing file at the destination without asking.
        #[arg(long)]
        force_overwrite: bool,

        /// Dispatch priority; higher runs first.
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },

    /// Run the dispatch loop until the queue drains or Ctrl-C is pressed.
    Run,

    /// List all downloads and their current state.
    Status,

    /// Pause a queued or in-flight download.
    Pause { id: DownloadId },

    /// Requeue a paused download.
    Resume { id: DownloadId },

    /// Cancel a queued or in-flight download.
    Cancel { id: DownloadId },

    /// Requeue a failed, cancelled, paused, or awaiting-confirmation download from scratch.
    Retry { id: DownloadId },

    /// Approve overwriting the existing file for a download awaiting confirmation.
    ConfirmOverwrite { id: DownloadId },

    /// Delete a download and its on-disk artifacts.
    Remove { id: DownloadId },

    /// Print aggregate engine statistics.
    Stats,

    /// Estimate the wait before a queued download starts (or for the whole queue).
    QueueTime { id: Option<DownloadId> },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        let store = PersistentStore::initialize_default()
            .await
            .context("failed to open download store")?;

        match cli.command {
            CliCommand::Add {
                url,
                title,
                path,
                preserve_structure,
                force_overwrite,
                priority,
            } => add(store, cfg, url, title, path, preserve_structure, force_overwrite, priority).await,
            CliCommand::Run => run(store, cfg).await,
            CliCommand::Status => status(store).await,
            CliCommand::Pause { id } => with_manager(store, cfg, |m| async move { m.pause(id).await }).await,
            CliCommand::Resume { id } => with_manager(store, cfg, |m| async move { m.resume(id).await }).await,
            CliCommand::Cancel { id } => with_manager(store, cfg, |m| async move { m.cancel(id).await }).await,
            CliCommand::Retry { id } => with_manager(store, cfg, |m| async move { m.retry(id).await }).await,
            CliCommand::ConfirmOverwrite { id } => {
                with_manager(store, cfg, |m| async move { m.confirm_overwrite(id).await }).await
            }
            CliCommand::Remove { id } => with_manager(store, cfg, |m| async move { m.delete(id).await }).await,
            CliCommand::Stats => stats(store, cfg).await,
            CliCommand::QueueTime { id } => queue_time(store, cfg, id).await,
        }
    }
}

/// Builds a catalog entry for every row already in the store, so that a
/// freshly spawned manager can resolve URLs for recovered or resumed
/// downloads the same way it would have at submission time.
fn catalog_from_rows(rows: &[DownloadRow]) -> StaticCatalog {
    let mut catalog = StaticCatalog::new();
    for row in rows {
        catalog.insert(row.id, row.url.clone(), row.title.clone(), Vec::new());
    }
    catalog
}

async fn spawn_manager(
    store: PersistentStore,
    cfg: EngineConfig,
    catalog: StaticCatalog,
) -> Result<(Arc<DownloadManager<ChannelEventSink>>, tokio::sync::mpsc::UnboundedReceiver<EngineEvent>)> {
    let (sink, rx) = ChannelEventSink::new();
    let manager = DownloadManager::spawn(cfg, store, Arc::new(catalog), sink)
        .await
        .context("failed to start download manager")?;
    Ok((manager, rx))
}

/// Runs a single control-plane operation against a freshly spawned manager,
/// then lets the process exit; the operation's own `kick_dispatch` call
/// queues work for the next `run` invocation to pick up.
async fn with_manager<F, Fut>(store: PersistentStore, cfg: EngineConfig, op: F) -> Result<()>
where
    F: FnOnce(Arc<DownloadManager<ChannelEventSink>>) -> Fut,
    Fut: std::future::Future<Output = Result<(), dlmgr_core::error::EngineError>>,
{
    let rows = store.get_all().await?;
    let catalog = catalog_from_rows(&rows);
    let (manager, _rx) = spawn_manager(store, cfg, catalog).await?;
    op(manager).await.context("operation failed")?;
    Ok(())
}

async fn add(
    store: PersistentStore,
    cfg: EngineConfig,
    url: String,
    title: Option<String>,
    path: Option<String>,
    preserve_structure: bool,
    force_overwrite: bool,
    priority: i32,
) -> Result<()> {
    let rows = store.get_all().await?;
    let next_id = rows.iter().map(|r| r.id).max().unwrap_or(0) + 1;
    let title = title.unwrap_or_else(|| derive_filename(&url, None));

    let mut catalog = catalog_from_rows(&rows);
    catalog.insert(next_id, Some(url), title.clone(), Vec::new());

    let (manager, _rx) = spawn_manager(store, cfg, catalog).await?;
    manager
        .submit(SubmitParams {
            id: next_id,
            title: title.clone(),
            download_path: path,
            preserve_structure,
            force_overwrite,
            priority,
        })
        .await
        .context("submit failed")?;

    println!("queued #{next_id} {title}");
    Ok(())
}

async fn run(store: PersistentStore, cfg: EngineConfig) -> Result<()> {
    let rows = store.get_all().await?;
    let catalog = catalog_from_rows(&rows);
    let (manager, mut rx) = spawn_manager(store, cfg, catalog).await?;

    loop {
        let stats = manager.get_stats().await?;
        if stats.queued == 0 && stats.downloading == 0 {
            println!("queue drained");
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("interrupted, exiting");
                break;
            }
            event = rx.recv() => {
                match event {
                    Some(event) => print_event(&event),
                    None => break,
                }
            }
        }
    }
    Ok(())
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::Queued { id, title, position } => {
            println!("[{id}] queued: {title} (position {position})");
        }
        EngineEvent::Starting { id, title, resuming, chunked, num_chunks, .. } => {
            println!(
                "[{id}] starting: {title} (resuming={resuming} chunked={chunked} chunks={})",
                num_chunks.map(|n| n.to_string()).unwrap_or_else(|| "-".into())
            );
        }
        EngineEvent::Progressing { id, percent, speed_mbps, remaining_seconds, .. } => {
            println!(
                "[{id}] {:>5.1}% at {:.2} MB/s (eta {})",
                percent * 100.0,
                speed_mbps,
                remaining_seconds.map(|s| format!("{s:.0}s")).unwrap_or_else(|| "?".into())
            );
        }
        EngineEvent::AwaitingConfirmation { id, title, save_path, file_check } => {
            println!(
                "[{id}] {title}: a file already exists at {save_path} ({} bytes, expected {}); run `confirm-overwrite {id}` to replace it",
                file_check.existing_size, file_check.expected_size
            );
        }
        EngineEvent::Paused { id, percent } => {
            println!("[{id}] paused at {}%", percent.map(|p| format!("{:.1}", p * 100.0)).unwrap_or_else(|| "?".into()));
        }
        EngineEvent::Completed { id, save_path, .. } => {
            println!("[{id}] completed -> {save_path}");
        }
        EngineEvent::Interrupted { id, error, .. } => {
            println!("[{id}] interrupted: {error}");
        }
        EngineEvent::Cancelled { id } => {
            println!("[{id}] cancelled");
        }
        EngineEvent::DownloadsRestored { ids } => {
            println!("restored {} download(s) from a previous run: {:?}", ids.len(), ids);
        }
    }
}

async fn status(store: PersistentStore) -> Result<()> {
    let rows = store.get_all().await?;
    if rows.is_empty() {
        println!("no downloads");
        return Ok(());
    }
    println!("{:>5} {:<11} {:>6} {:<40}", "id", "state", "%", "title");
    for row in rows {
        println!(
            "{:>5} {:<11} {:>5.1}% {:<40}",
            row.id,
            row.state.as_str(),
            row.progress * 100.0,
            row.title
        );
    }
    Ok(())
}

async fn stats(store: PersistentStore, cfg: EngineConfig) -> Result<()> {
    let rows = store.get_all().await?;
    let catalog = catalog_from_rows(&rows);
    let (manager, _rx) = spawn_manager(store, cfg, catalog).await?;
    let stats = manager.get_stats().await?;
    println!(
        "queued={} downloading={} paused={} awaiting={} completed={} failed={} cancelled={} slots={}/{} bytes_downloaded={}",
        stats.queued,
        stats.downloading,
        stats.paused,
        stats.awaiting,
        stats.completed,
        stats.failed,
        stats.cancelled,
        stats.active_slots_in_use,
        stats.active_slots_total,
        stats.total_bytes_downloaded,
    );
    Ok(())
}

async fn queue_time(store: PersistentStore, cfg: EngineConfig, id: Option<DownloadId>) -> Result<()> {
    let rows = store.get_all().await?;
    let catalog = catalog_from_rows(&rows);
    let (manager, _rx) = spawn_manager(store, cfg, catalog).await?;
    let estimate = manager.get_queue_time_estimate(id).await?;
    match (estimate.position, estimate.estimated_seconds) {
        (Some(pos), Some(secs)) => println!("position {pos}, estimated wait {secs:.0}s"),
        (None, Some(secs)) => println!("estimated total queue drain time {secs:.0}s"),
        _ => println!("no estimate available"),
    }
    Ok(())
}
