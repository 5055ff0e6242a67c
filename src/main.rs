//! modmigrate: portable export and import of learning modules

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use modmigrate::config::{Config, LogFormat, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use commands::{
    export::export_module,
    import::{import_module, prepare_import, run_import, show_import_status},
    init::init_config,
};

#[derive(Parser)]
#[command(name = "modmigrate")]
#[command(about = "Export learning modules to portable archives and import them elsewhere")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Store snapshot file (overrides config)
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Working directory for exports and import runs (overrides config)
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a module to an archive
    Export {
        /// Module post id
        module: u64,

        /// Notes added to the archive readme
        #[arg(short, long)]
        notes: Option<String>,

        /// Acknowledgement shown in the exported module
        #[arg(short, long)]
        acknowledgement: Option<String>,
    },

    /// Unpack and import an archive
    Import {
        /// Path to the archive
        path: PathBuf,

        /// Maximum items to import in this run
        #[arg(long)]
        max_records: Option<usize>,

        /// Skip attachments that are not bundled in the archive
        #[arg(long)]
        no_fetch: bool,

        /// Quiet mode (no progress output)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Unpack an archive into a new import run and print the run id
    ImportPrepare {
        /// Path to the archive
        path: PathBuf,
    },

    /// Run a prepared import
    ImportRun {
        /// Run id printed by import-prepare
        id: Uuid,

        /// Write events to stdout as server-sent events
        #[arg(long)]
        events: bool,
    },

    /// Show the status of an import run
    ImportStatus {
        /// Run id
        id: Uuid,
    },

    /// Initialize a new modmigrate configuration
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };
    init_logging(&config, cli.verbose);

    if let Some(store) = cli.store {
        config.store.path = store;
    }
    if let Some(work_dir) = cli.work_dir {
        config.export.work_dir = work_dir.join("exports");
        config.import.work_dir = work_dir.join("imports");
    }

    match cli.command {
        Commands::Export {
            module,
            notes,
            acknowledgement,
        } => export_module(config, module, notes, acknowledgement).await,
        Commands::Import {
            path,
            max_records,
            no_fetch,
            quiet,
        } => {
            if max_records.is_some() {
                config.import.max_records = max_records;
            }
            if no_fetch {
                config.import.fetch_remote_media = false;
            }
            import_module(config, path, quiet).await
        }
        Commands::ImportPrepare { path } => prepare_import(config, path).await,
        Commands::ImportRun { id, events } => run_import(config, id, events).await,
        Commands::ImportStatus { id } => show_import_status(config, id).await,
        Commands::Init { path } => init_config(path).await,
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays free for
/// command output and event streams.
fn init_logging(config: &Config, verbose: u8) {
    let level = config.logging.effective_level(verbose);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("modmigrate={}", level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
