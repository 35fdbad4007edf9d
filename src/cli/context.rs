use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use trace_link::{GraphApi, TraceSession};

use crate::config::Config;

pub struct CliContext {
    config: Arc<Config>,
    config_path: PathBuf,
}

impl CliContext {
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn graph_api(&self) -> Result<GraphApi> {
        GraphApi::new(&self.config.link).context("building graph api client")
    }

    /// New streaming session; the connection opens on the first run.
    pub fn session(&self) -> Result<TraceSession> {
        TraceSession::connect(self.config.link.clone()).context("creating trace session")
    }
}
