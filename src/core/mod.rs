pub mod engine;
pub mod profile;
pub mod proxy;
pub mod registration;
pub mod shard;

pub use crate::domain::model::{
    Cluster, ClusterTopology, PendingProvisionEvent, ProfileLookupResult, ProfileOutcome,
    RouteReason, RoutingDecision, Scheme,
};
pub use crate::domain::ports::{DeviceRegistrar, ProfileDirectory, RandomSource};
pub use crate::utils::error::Result;
