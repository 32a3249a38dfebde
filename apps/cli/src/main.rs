//! chunkdav - resumable chunked uploads into a WebDAV-style store.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{CliConfig, Overrides};

#[derive(Parser)]
#[command(name = "chunkdav")]
#[command(author, version, about = "Resumable chunked uploads", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/chunkdav/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory backing the store
    #[arg(long, global = true)]
    store_root: Option<PathBuf>,

    /// Account to upload as
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Chunk size in bytes
    #[arg(long, global = true)]
    chunk_size: Option<u64>,

    /// Retries per chunk after the first attempt
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Upload even when the destination already has the same size
    #[arg(long, global = true)]
    no_skip: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a single file
    Upload {
        /// Local file
        file: PathBuf,

        /// Destination, relative to the user's files
        remote: String,

        /// Where to keep the resume checkpoint
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Continue an interrupted upload from its checkpoint
    Resume {
        #[arg(long)]
        checkpoint: PathBuf,
    },

    /// Upload a directory tree
    UploadDir {
        /// Local directory
        dir: PathBuf,

        /// Destination directory
        remote: String,
    },

    /// Upload several files concurrently into one directory
    Batch {
        /// Local files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Destination directory
        #[arg(short, long)]
        dest: String,
    },

    /// Show a saved checkpoint
    Inspect {
        checkpoint: PathBuf,

        /// Print the raw JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            store_root: self.store_root.clone(),
            user: self.user.clone(),
            chunk_size: self.chunk_size,
            max_retries: self.max_retries,
            no_skip: self.no_skip,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "chunkdav starting");

    let config = CliConfig::load(cli.config.as_deref())?.apply(&cli.overrides());

    match cli.command {
        Commands::Upload {
            file,
            remote,
            checkpoint,
        } => commands::upload(&config, file, remote, checkpoint).await,
        Commands::Resume { checkpoint } => commands::resume(&config, checkpoint).await,
        Commands::UploadDir { dir, remote } => commands::upload_dir(&config, dir, remote).await,
        Commands::Batch { files, dest } => commands::batch(&config, files, dest).await,
        Commands::Inspect { checkpoint, json } => commands::inspect(&checkpoint, json),
    }
}
