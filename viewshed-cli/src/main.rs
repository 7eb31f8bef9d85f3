use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::EngineOptions;

/// DSM viewshed CLI tool
#[derive(Parser)]
#[command(name = "viewshed")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the DSM raster
    #[arg(short, long, env = "VIEWSHED_DSM_PATH", global = true)]
    dsm: Option<PathBuf>,

    /// Viewshed engine program
    #[arg(
        short,
        long,
        env = "VIEWSHED_ENGINE",
        default_value = "python3",
        global = true
    )]
    engine: String,

    /// Leading engine arguments, placed before the positional job arguments
    #[arg(
        long = "engine-arg",
        env = "VIEWSHED_ENGINE_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true,
        global = true
    )]
    engine_args: Vec<String>,

    /// Engine deadline in seconds (0 disables it)
    #[arg(
        short,
        long,
        env = "VIEWSHED_ENGINE_TIMEOUT_SECS",
        default_value = "300",
        global = true
    )]
    timeout: u64,

    /// Radius used when a site has no max distance
    #[arg(
        long,
        env = "VIEWSHED_DEFAULT_MAX_DISTANCE",
        default_value = "500",
        global = true
    )]
    default_max_distance: f64,

    /// Log engine diagnostics to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the viewshed for a single observer
    Run {
        /// Observer longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Observer latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Equipment height above the DSM surface, in DSM units
        #[arg(long)]
        mount_height: f64,

        /// Analysis radius in DSM units
        #[arg(long)]
        max_distance: Option<f64>,

        /// Write the GeoJSON to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print coverage statistics instead of GeoJSON
        #[arg(short, long)]
        stats: bool,
    },

    /// Compute viewsheds for multiple sites from a CSV file
    Batch {
        /// Input CSV file
        input: PathBuf,

        /// Output CSV file (defaults to <input>_viewshed.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Column name for longitude
        #[arg(long, default_value = "lng")]
        lng_col: String,

        /// Column name for latitude
        #[arg(long, default_value = "lat")]
        lat_col: String,

        /// Column name for mount height
        #[arg(long, default_value = "mount_height")]
        height_col: String,

        /// Column name for max distance (optional column)
        #[arg(long, default_value = "max_distance")]
        distance_col: String,
    },

    /// Show DSM and engine configuration
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "viewshed=debug".into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let options = EngineOptions {
        dsm: cli.dsm,
        engine: cli.engine,
        engine_args: cli.engine_args,
        timeout_secs: cli.timeout,
        default_max_distance: cli.default_max_distance,
    };

    match cli.command {
        Commands::Run {
            lng,
            lat,
            mount_height,
            max_distance,
            output,
            stats,
        } => {
            commands::run::run(&options, lng, lat, mount_height, max_distance, output, stats)
                .await
        }
        Commands::Batch {
            input,
            output,
            lng_col,
            lat_col,
            height_col,
            distance_col,
        } => {
            let columns = commands::batch::Columns {
                lng: lng_col,
                lat: lat_col,
                height: height_col,
                distance: distance_col,
            };
            commands::batch::run(&options, input, output, &columns).await
        }
        Commands::Check => commands::check::run(&options).await,
    }
}
