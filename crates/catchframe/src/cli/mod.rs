//! Command implementations and the store/config wiring they share.

pub mod inspect;
pub mod submit;
pub mod worker;

use anyhow::{Context, Result};
use catchframe_pipeline::{PipelineConfig, PipelineContext};
use catchframe_protocol::defaults::{DEFAULT_ARTIFACT_ROOT, DEFAULT_STATE_STORE_URL};
use catchframe_store::{StoreUrl, Stores};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Flags accepted by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Pipeline config file (default: $CATCHFRAME_HOME/config.toml)
    #[arg(long, global = true, env = "CATCHFRAME_CONFIG")]
    pub config: Option<PathBuf>,

    /// State store URL (`sqlite:<path>` or `memory:`)
    #[arg(long, global = true, env = "CATCHFRAME_STATE_STORE", default_value = DEFAULT_STATE_STORE_URL)]
    pub state_store: String,

    /// Root directory of the artifact buckets
    #[arg(long, global = true, env = "CATCHFRAME_ARTIFACT_ROOT", default_value = DEFAULT_ARTIFACT_ROOT)]
    pub artifact_root: PathBuf,

    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(catchframe_logging::catchframe_home()?.join("config.toml")),
        }
    }

    pub fn load_config(&self) -> Result<PipelineConfig> {
        let path = self.config_path()?;
        if self.config.is_some() && !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config = PipelineConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        debug!(path = %path.display(), mode = ?config.mode, "Loaded pipeline config");
        Ok(config)
    }

    /// Open the stores and build the shared pipeline context.
    pub async fn open_context(&self) -> Result<Arc<PipelineContext>> {
        let config = self.load_config()?;
        let url = StoreUrl::parse(&self.state_store)
            .with_context(|| format!("Invalid --state-store '{}'", self.state_store))?;
        let stores = Stores::open(&url, &self.artifact_root)
            .await
            .with_context(|| format!("Failed to open state store {}", self.state_store))?;
        let ctx = PipelineContext::with_command_transform(stores, config)
            .context("Invalid pipeline configuration")?;
        Ok(Arc::new(ctx))
    }
}
