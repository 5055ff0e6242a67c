use super::open_store;
use anyhow::{Context, Result};
use modmigrate::{
    config::Config,
    export::{ExportOptions, Exporter},
    types::PostId,
};
use tracing::info;

pub async fn export_module(
    config: Config,
    module: u64,
    notes: Option<String>,
    acknowledgement: Option<String>,
) -> Result<()> {
    let mut store = open_store(&config)?;
    let options = ExportOptions {
        notes,
        acknowledgement,
    };

    // The snapshot is not saved: the exporter reverts its acknowledgement edit
    let export_config = config.export.clone();
    let path = tokio::task::spawn_blocking(move || {
        Exporter::new(&mut store, export_config).export(PostId(module), options)
    })
    .await
    .context("Export task panicked")?
    .with_context(|| format!("Failed to export module {}", module))?;

    info!("Export finished: {}", path.display());
    println!("Exported module {} to {}", module, path.display());
    Ok(())
}
