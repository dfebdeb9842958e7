//! Config command - show the effective configuration.

use clap::Subcommand;
use syncarto::config::AdapterConfig;

use super::common::format_size;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// List the effective settings
    List,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(runner: &CliRunner, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::List => {
            print_settings(runner.config());
            Ok(())
        }
        ConfigCommands::Path => {
            match runner.config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("(no config directory on this platform)"),
            }
            Ok(())
        }
    }
}

fn print_settings(config: &AdapterConfig) {
    println!("[decode]");
    println!("  workers = {}", config.decode_workers);
    println!("  fill_value = {}", config.fill_value);
    println!("  block_size = {}", format_size(config.block_size));
    println!("  block_cache = {}", format_size(config.block_cache_bytes));
    println!();
    println!("[scale]");
    println!("  min = {}", config.scale_range.min);
    println!("  max = {}", config.scale_range.max);
    println!();
    println!("[crs]");
    println!("  registry_url = {}", config.crs_registry_url);
    println!();
    println!("[http]");
    println!("  timeout_secs = {}", config.http_timeout.as_secs());
    println!();
    println!("[view]");
    println!("  projection = {}", config.view.projection);
    println!("  center = {}, {}", config.view.center.0, config.view.center.1);
    println!("  zoom = {}", config.view.zoom);
    println!("  fit_duration_ms = {}", config.view.fit_duration.as_millis());
}
