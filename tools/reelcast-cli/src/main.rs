//! Reelcast CLI: live highlight detection and branded rendering.
//!
//! Usage:
//!   reelcast watch <MATCH> --source <URI>   Detect highlights on a live stream
//!   reelcast worker                         Render queued clips
//!   reelcast submit <CLIP> --match <MATCH>  Queue a clip for branding
//!   reelcast status [JOB_ID]                Show queue depth or one job
//!   reelcast recover                        Reconcile queue and registry
//!   reelcast leases                         List or reset hardware leases
//!   reelcast check                          Check external tools and directories

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use reelcast_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "reelcast",
    about = "Live sports highlight detection with branded rendering",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $REELCAST_CONFIG or the XDG config path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a live stream and extract highlight clips
    Watch {
        /// Match name; clips land in <matches>/<MATCH>/
        #[arg(value_name = "MATCH")]
        match_name: String,

        /// Stream source: file path, URL, or host:port (SRT caller)
        #[arg(short, long)]
        source: String,

        /// The stream is already 9:16
        #[arg(long)]
        vertical: bool,
    },

    /// Run render workers until interrupted
    Worker {
        /// Number of encoder slots (and workers); defaults to config
        #[arg(long)]
        slots: Option<u32>,
    },

    /// Queue a clip for branding
    Submit {
        /// Clip file
        clip: PathBuf,

        /// Match name used as the output group
        #[arg(short, long = "match", value_name = "MATCH")]
        match_name: String,

        /// Watermark file name inside the logos directory
        #[arg(long)]
        logo: Option<String>,

        /// Prepend the intro
        #[arg(long)]
        intro: bool,

        /// Append the outro
        #[arg(long)]
        outro: bool,

        /// Render with the vertical profile regardless of the file name
        #[arg(long)]
        vertical: bool,
    },

    /// Show queue depth, or one job's record
    Status {
        job_id: Option<String>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Return orphaned jobs to pending and clear dead leases
    Recover,

    /// List hardware leases and stream sessions
    Leases {
        /// Kill live owners and clear every entry
        #[arg(long)]
        reset: bool,
    },

    /// Check external tools and directories
    Check,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display())),
        None => Ok(AppConfig::load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config)?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    reelcast_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Watch {
            match_name,
            source,
            vertical,
        } => commands::watch::run(config, match_name, source, vertical).await,
        Commands::Worker { slots } => commands::worker::run(config, slots).await,
        Commands::Submit {
            clip,
            match_name,
            logo,
            intro,
            outro,
            vertical,
        } => commands::submit::run(&config, clip, match_name, logo, intro, outro, vertical),
        Commands::Status { job_id, json } => commands::status::run(&config, job_id, json),
        Commands::Recover => commands::recover::run(&config),
        Commands::Leases { reset } => commands::leases::run(&config, reset),
        Commands::Check => commands::check::run(&config),
    }
}
