//! squarecut CLI: trim a video and crop it to a square.
//!
//! Usage:
//!   squarecut trim <INPUT> -o <OUTPUT> --start S --end E   Trim and crop
//!   squarecut probe <INPUT>                                 Show tracks
//!   squarecut check                                         Check GStreamer

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use squarecut_common::EditConfig;
use squarecut_media_model::CropRect;

mod commands;

#[derive(Parser)]
#[command(
    name = "squarecut",
    about = "Trim videos and re-encode them as square clips",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/squarecut/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trim a video and crop it to a square
    Trim {
        /// Source video
        input: PathBuf,

        /// Output MP4 path
        #[arg(short, long)]
        output: PathBuf,

        /// Trim start (seconds)
        #[arg(long, default_value = "0.0")]
        start: f64,

        /// Trim end (seconds)
        #[arg(long)]
        end: f64,

        /// Crop rectangle in display pixels as x,y,width,height
        #[arg(long)]
        crop: Option<CropRect>,

        /// Print the edit summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the tracks and geometry of a video
    Probe {
        /// Source video
        input: PathBuf,
    },

    /// Check that GStreamer and the required elements are available
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EditConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => EditConfig::load(),
    };

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    squarecut_common::logging::init_logging(&logging);
    tracing::debug!(
        encoder = %config.encoder.element,
        max_side = config.encoder.max_side,
        fps = config.encoder.fps,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Trim {
            input,
            output,
            start,
            end,
            crop,
            json,
        } => commands::trim::run(config, input, output, start, end, crop, json).await,
        Commands::Probe { input } => commands::probe::run(&config, input),
        Commands::Check => commands::check::run(&config),
    }
}
