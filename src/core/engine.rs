use crate::core::shard;
use crate::domain::model::{
    strip_port, ClusterTopology, PendingProvisionEvent, RouteReason, RoutingDecision, Scheme,
};
use crate::domain::ports::{DeviceRegistrar, ProfileDirectory, RandomSource};
use crate::utils::error::RouterError;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Result of routing one request.
#[derive(Debug)]
pub enum RouteOutcome {
    Forward(RoutingDecision),
    /// Fail closed: the request goes to the error responder, never a backend.
    Reject(RouterError),
}

/// Device metadata taken from a provisioning request, before a host is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub device_type: String,
    pub device_id: String,
    pub device_name: String,
}

/// Per-request routing decisions over a fixed topology.
pub struct RoutingEngine {
    topology: Arc<ClusterTopology>,
    profiles: Arc<dyn ProfileDirectory>,
    registrar: Arc<dyn DeviceRegistrar>,
    random: Arc<dyn RandomSource>,
}

impl RoutingEngine {
    pub fn new(
        topology: Arc<ClusterTopology>,
        profiles: Arc<dyn ProfileDirectory>,
        registrar: Arc<dyn DeviceRegistrar>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            topology,
            profiles,
            registrar,
            random,
        }
    }

    /// Routes a request by its basic-auth username, if any.
    pub async fn route(&self, username: Option<&str>) -> RouteOutcome {
        match username {
            None => RouteOutcome::Forward(self.route_unauthenticated()),
            Some(username) => self.route_user(username).await,
        }
    }

    /// Discovery traffic carries no identity, so any member of any cluster will do.
    pub fn route_unauthenticated(&self) -> RoutingDecision {
        let cluster = shard::random_cluster(&self.topology, self.random.as_ref());
        let target_host = shard::random_member(cluster, self.random.as_ref()).to_string();

        tracing::info!(backend = %target_host, "[unauthenticated] routing");

        RoutingDecision {
            target_host,
            scheme: cluster.scheme,
            reason: RouteReason::Unauthenticated,
        }
    }

    pub async fn route_user(&self, username: &str) -> RouteOutcome {
        let dedicated_host = match self.profiles.resolve(username).await.into_result(username) {
            Ok(dedicated_host) => dedicated_host,
            Err(e) => {
                tracing::warn!(
                    username,
                    reason = e.reason_code(),
                    error = %e,
                    "error selecting target for user"
                );
                return RouteOutcome::Reject(e);
            }
        };

        let decision = match dedicated_host {
            Some(host) => RoutingDecision {
                target_host: host,
                scheme: Scheme::Http,
                reason: RouteReason::Dedicated,
            },
            None => {
                let cluster = shard::select_cluster(username, &self.topology);
                RoutingDecision {
                    target_host: shard::random_member(cluster, self.random.as_ref()).to_string(),
                    scheme: cluster.scheme,
                    reason: RouteReason::Sharded {
                        cluster: cluster.name.clone(),
                    },
                }
            }
        };

        tracing::info!(
            username,
            backend = %decision.target_host,
            reason = %decision.reason,
            "routing"
        );
        RouteOutcome::Forward(decision)
    }

    /// Fires the device-registration side effect in the background.
    ///
    /// Failures are logged and swallowed; the handle is only useful for
    /// callers that want to wait for completion.
    pub fn notify_provisioning(
        &self,
        username: &str,
        request: ProvisionRequest,
        decision: &RoutingDecision,
    ) -> JoinHandle<()> {
        let event = PendingProvisionEvent {
            username: username.to_string(),
            device_type: request.device_type,
            device_id: request.device_id,
            device_name: request.device_name,
            resolved_host: strip_port(&decision.target_host).to_string(),
        };
        let registrar = Arc::clone(&self.registrar);

        tokio::spawn(async move {
            if let Err(e) = registrar.notify(&event).await {
                tracing::warn!(
                    username = %event.username,
                    device_id = %event.device_id,
                    error = %e,
                    "device registration notify failed"
                );
            }
        })
    }
}
