//! Shared setup for commands that talk to the library.

use std::future::Future;
use std::path::{Path, PathBuf};

use syncarto::config::AdapterConfig;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::error::CliError;

/// Loaded configuration plus the runtime commands execute on.
pub struct CliRunner {
    config: AdapterConfig,
    config_path: Option<PathBuf>,
    runtime: Runtime,
}

impl CliRunner {
    /// Load configuration from `config_path`, or from the default location
    /// when none is given, and start a multi-threaded runtime.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let (config, config_path) = match config_path {
            Some(path) => (AdapterConfig::load(path)?, Some(path.to_path_buf())),
            None => match AdapterConfig::default_path() {
                Some(path) => (AdapterConfig::load_or_default(&path)?, Some(path)),
                None => (AdapterConfig::default(), None),
            },
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("syncarto-worker")
            .build()
            .map_err(|e| CliError::Runtime(e.to_string()))?;

        Ok(Self {
            config,
            config_path,
            runtime,
        })
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            command,
            version = syncarto::VERSION,
            config = ?self.config_path,
            "syncarto starting"
        );
        debug!(config = ?self.config, "Effective configuration");
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Drive `future` to completion on the runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
