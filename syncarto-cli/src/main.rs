//! Syncarto CLI - headless host for the syncarto library
//!
//! Inspects Cloud-Optimized GeoTIFFs and renders scene tiles to PNG files
//! without a map widget.

mod commands;
mod error;
mod headless;
mod logging;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::info::InfoArgs;
use commands::render::RenderArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "syncarto")]
#[command(version = syncarto::VERSION)]
#[command(about = "Render map tiles from Cloud-Optimized GeoTIFFs", long_about = None)]
struct Cli {
    /// Configuration file (defaults to <config dir>/syncarto/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the pyramid, tile grid and CRS of a COG
    Info {
        /// COG URL
        url: String,

        /// Read overview levels from <url>.ovr
        #[arg(long)]
        overviews: bool,
    },

    /// Render one tile of a scene to a PNG file
    Render {
        /// Scene JSON file or COG URL
        scene: String,

        /// Tile coordinate as z/x/y
        #[arg(long)]
        tile: String,

        /// Output PNG path
        #[arg(long, short)]
        out: PathBuf,

        /// Processing pipeline in compact form, e.g. "sigmoidal(rgb,10,0.35)"
        #[arg(long)]
        pipeline: Option<String>,
    },

    /// Print a compact pipeline string as JSON operations
    Pipeline {
        /// Compact pipeline, e.g. "sigmoidal(rgb,10,0.35);gamma(b,0.95)"
        compact: String,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Commands::Pipeline { compact } = &cli.command {
        return commands::pipeline::run(compact);
    }

    let runner = CliRunner::new(cli.config.as_deref())?;
    match cli.command {
        Commands::Info { url, overviews } => {
            commands::info::run(&runner, InfoArgs { url, overviews })
        }
        Commands::Render {
            scene,
            tile,
            out,
            pipeline,
        } => commands::render::run(
            &runner,
            RenderArgs {
                scene,
                tile,
                out,
                pipeline,
            },
        ),
        Commands::Config { command } => commands::config::run(&runner, command),
        Commands::Pipeline { .. } => Ok(()),
    }
}
