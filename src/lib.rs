pub mod admin;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::{RouterSettings, TomlConfig};
pub use core::engine::{ProvisionRequest, RouteOutcome, RoutingEngine};
pub use core::profile::HttpProfileResolver;
pub use core::proxy::{build_http_client, build_router, ProxyState};
pub use core::registration::HttpRegistrationNotifier;
pub use core::shard::ThreadRandom;
pub use utils::error::{Result, RouterError};
