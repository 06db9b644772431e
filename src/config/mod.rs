pub mod toml_config;

use crate::domain::model::ClusterTopology;
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;

pub use toml_config::{ClusterConfig, TomlConfig};

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "activesync-router")]
#[command(about = "Routes ActiveSync traffic to sharded backend clusters")]
pub struct CliConfig {
    #[arg(long, default_value = "config.toml")]
    pub config: String,

    #[arg(long, help = "Override the listening port from the config file")]
    pub port: Option<u16>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    pub fn load_settings(&self) -> Result<RouterSettings> {
        let mut file = TomlConfig::from_file(&self.config)?;
        if let Some(port) = self.port {
            file.port = port;
        }
        file.into_settings()
    }
}

/// Immutable runtime configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub port: u16,
    pub profile_api_url: String,
    pub registration_api_url: String,
    pub profile_timeout: Duration,
    pub registration_timeout: Duration,
    /// How long an unused pooled backend connection is kept.
    pub idle_timeout: Duration,
    pub topology: Arc<ClusterTopology>,
}
