//! tusup CLI - resumable tus uploads from the command line
//!
//! Thin host bridge over the upload engine: every subcommand maps onto one
//! engine operation, and `add`/`retry`/`resume-all` follow the transfer
//! with live progress bars fed from the engine's event stream.

mod commands;
mod output;
mod progress;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tusup - resumable uploads over the tus protocol
#[derive(Parser)]
#[command(name = "tusup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Upload server endpoint (the tus creation URL)
    #[arg(long, env = "TUSUP_ENDPOINT")]
    endpoint: Option<String>,

    /// Data directory for upload records
    #[arg(long, env = "TUSUP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Bytes per chunk append
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file, resuming if it was uploaded partially before
    Add {
        /// File to upload
        file: PathBuf,

        /// Upload id (defaults to the file name without extension)
        #[arg(long)]
        id: Option<String>,

        /// Request header, KEY=VALUE (repeatable)
        #[arg(short = 'H', long = "header", value_parser = parse_key_val)]
        headers: Vec<(String, String)>,

        /// Resource metadata, KEY=VALUE (repeatable)
        #[arg(short, long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Retry a paused or failed upload
    Retry {
        /// Upload id
        id: String,

        /// Refreshed request header, KEY=VALUE (repeatable)
        #[arg(short = 'H', long = "header", value_parser = parse_key_val)]
        headers: Vec<(String, String)>,
    },

    /// Pause an upload at the next chunk boundary
    Pause {
        /// Upload id
        id: String,
    },

    /// Cancel an upload and delete its record
    Cancel {
        /// Upload id
        id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List tracked uploads
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,

        /// Show all details
        #[arg(short, long)]
        all: bool,
    },

    /// Show one upload
    Info {
        /// Upload id
        id: String,
    },

    /// Reconcile uploads left mid-flight and resume them
    ResumeAll,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("tusup=debug,tusup_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = &cli.command {
        use clap::CommandFactory;
        clap_complete::generate(*shell, &mut Cli::command(), "tusup", &mut std::io::stdout());
        return Ok(());
    }

    let endpoint = cli
        .endpoint
        .ok_or_else(|| anyhow!("no endpoint configured (use --endpoint or TUSUP_ENDPOINT)"))?;

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("tusup"))
            .unwrap_or_else(|| PathBuf::from(".tusup"))
    });

    let mut settings = tusup_types::TusSettings::default();
    if let Some(chunk_size) = cli.chunk_size {
        settings.chunk_size = chunk_size.max(1);
    }

    let core = tusup_core::TusCore::new(
        &data_dir,
        &endpoint,
        tusup_types::UploadOptions::default(),
        settings,
    )
    .await?;

    match cli.command {
        Commands::Add {
            file,
            id,
            headers,
            meta,
        } => commands::add_upload(&core, file, id, headers, meta, cli.output).await?,

        Commands::Retry { id, headers } => {
            commands::retry_upload(&core, &id, headers, cli.output).await?
        }

        Commands::Pause { id } => commands::pause_upload(&core, &id, cli.output).await?,

        Commands::Cancel { id, yes } => commands::cancel_upload(&core, &id, yes, cli.output).await?,

        Commands::List { status, all } => {
            commands::list_uploads(&core, status, all, cli.output).await?
        }

        Commands::Info { id } => commands::show_info(&core, &id, cli.output).await?,

        Commands::ResumeAll => commands::resume_all(&core, cli.output).await?,

        Commands::Completions { .. } => unreachable!("handled before engine startup"),
    }

    Ok(())
}
