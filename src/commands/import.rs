use super::{open_store, save_store};
use anyhow::{Context, Result};
use modmigrate::{
    config::Config,
    import::{
        import_archive, EventLevel, EventSink, ImportEvent, ImportService, ImportStats,
        ProgressReporter, SseWriterSink,
    },
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::info;
use uuid::Uuid;

fn print_stats(stats: &ImportStats) {
    println!("\nImport Complete!");
    println!("================");
    println!("Records processed:  {}", stats.records_processed);
    println!("Records failed:     {}", stats.records_failed);
    println!(
        "Posts created:      {} ({} attachments)",
        stats.posts_created, stats.attachments_created
    );
    println!("Posts existing:     {}", stats.posts_existing);
    println!(
        "Comments:           {} created, {} existing",
        stats.comments_created, stats.comments_existing
    );
    println!(
        "Terms:              {} created, {} existing",
        stats.terms_created, stats.terms_existing
    );
    println!(
        "Users:              {} created, {} existing",
        stats.users_created, stats.users_existing
    );
    println!(
        "Fixups:             {} resolved, {} unresolved",
        stats.fixups_resolved, stats.fixups_unresolved
    );
    println!("Elapsed time:       {:.1}s", stats.elapsed_seconds);
}

/// Unpack and import an archive in one go
pub async fn import_module(config: Config, path: PathBuf, quiet: bool) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Archive not found: {}", path.display());
    }
    let mut store = open_store(&config)?;
    let run_dir = config.import.work_dir.join(Uuid::new_v4().to_string());
    info!("Importing {} (work dir {})", path.display(), run_dir.display());

    let import_config = config.import.clone();
    let (store, result) = tokio::task::spawn_blocking(move || {
        let reporter = if quiet {
            ProgressReporter::silent()
        } else {
            ProgressReporter::silent().with_progress_bar()
        };
        let result = import_archive(&mut store, &path, &run_dir, &import_config, &reporter);
        (store, result)
    })
    .await
    .context("Import task panicked")?;

    // Whatever was created before a failure stays; a rerun skips it
    save_store(&config, &store)?;
    let stats = result.context("Import failed")?;
    if !quiet {
        print_stats(&stats);
    }
    Ok(())
}

fn service(config: &Config) -> Result<ImportService<modmigrate::store::MemoryStore>> {
    let store = open_store(config)?;
    Ok(ImportService::new(
        Arc::new(Mutex::new(store)),
        config.import.clone(),
    ))
}

/// Unpack an archive into a new run and print its id
pub async fn prepare_import(config: Config, path: PathBuf) -> Result<()> {
    let service = service(&config)?;
    let id = service
        .prepare(&path)
        .await
        .with_context(|| format!("Failed to prepare {}", path.display()))?;
    println!("{}", id);
    Ok(())
}

/// Run a prepared import, streaming its events
pub async fn run_import(config: Config, id: Uuid, events: bool) -> Result<()> {
    let service = service(&config)?;
    let mut stream = service.run(id).context("Failed to start import run")?;
    let mut sse = SseWriterSink::new(std::io::stdout());
    let mut outcome: Option<(bool, Option<String>)> = None;

    while let Some(event) = stream.next().await {
        if events {
            sse.send(&event)?;
        }
        match &event {
            ImportEvent::Log { level, message } if !events && *level >= EventLevel::Warning => {
                eprintln!("{:?}: {}", level, message);
            }
            ImportEvent::Complete {
                success,
                error,
                stats,
            } => {
                if !events {
                    if let Some(stats) = stats {
                        print_stats(stats);
                    }
                }
                outcome = Some((*success, error.clone()));
            }
            _ => {}
        }
    }

    {
        let store = service.store().lock();
        save_store(&config, &store)?;
    }

    match outcome {
        Some((true, _)) => Ok(()),
        Some((false, error)) => {
            anyhow::bail!("Import run {} failed: {}", id, error.unwrap_or_default())
        }
        None => anyhow::bail!("Import run {} ended without a result", id),
    }
}

pub async fn show_import_status(config: Config, id: Uuid) -> Result<()> {
    let service = service(&config)?;
    let record = service
        .status(id)
        .with_context(|| format!("No import run {}", id))?;

    println!("\nImport Run Status");
    println!("=================");
    println!("Run:         {}", record.id);
    println!("Upload:      {}", record.upload_name);
    println!("Status:      {:?}", record.status);
    println!(
        "Created:     {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(finished) = record.finished_at {
        println!("Finished:    {}", finished.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = &record.error {
        println!("Error:       {}", error);
    }
    if let Some(stats) = &record.stats {
        print_stats(stats);
    }
    Ok(())
}
