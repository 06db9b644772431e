use crate::domain::model::{PendingProvisionEvent, ProfileOutcome};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Per-user activation state and dedicated-host lookup.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn resolve(&self, username: &str) -> ProfileOutcome;
}

/// Side channel reporting device bindings after a provisioning command.
#[async_trait]
pub trait DeviceRegistrar: Send + Sync {
    async fn notify(&self, event: &PendingProvisionEvent) -> Result<()>;
}

/// Index source for random cluster and member picks.
pub trait RandomSource: Send + Sync {
    /// Returns an index in `0..len`. `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}
