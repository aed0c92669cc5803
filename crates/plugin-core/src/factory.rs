use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use matrix_sdk::Client;

use crate::{Plugin, PluginSpec};

/// Process-wide handles a factory may need while building its plugin.
#[derive(Clone)]
pub struct PluginEnv {
    pub client: Client,
    /// Directory for plugin state files (alongside the Matrix store).
    pub state_dir: PathBuf,
}

/// Builds one kind of plugin.
#[async_trait]
pub trait PluginFactory: Send + Sync {
    /// Spec used when the config file does not mention this plugin.
    ///
    /// Configured specs with the same id are merged over it.
    fn default_spec(&self) -> PluginSpec;

    /// Builds the plugin instance from its merged spec.
    ///
    /// Errors abort startup, so factories should only fail on invalid
    /// configuration.
    async fn build(&self, env: &PluginEnv, spec: &PluginSpec) -> Result<Arc<dyn Plugin>>;
}
