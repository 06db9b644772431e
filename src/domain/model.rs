use crate::utils::error::{Result, RouterError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named pool of interchangeable backend members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub name: String,
    pub members: Vec<String>,
    pub scheme: Scheme,
}

/// Ordered, non-empty set of clusters. Index order is what usernames hash
/// against, so it must match the configuration file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    clusters: Vec<Cluster>,
}

impl ClusterTopology {
    pub fn new(clusters: Vec<Cluster>) -> Result<Self> {
        if clusters.is_empty() {
            return Err(RouterError::MissingConfigError {
                field: "clusters".to_string(),
            });
        }
        if let Some(empty) = clusters.iter().find(|c| c.members.is_empty()) {
            return Err(RouterError::InvalidConfigValueError {
                field: format!("clusters.{}.members", empty.name),
                value: "[]".to_string(),
                reason: "Every cluster needs at least one member".to_string(),
            });
        }
        Ok(Self { clusters })
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Cluster> {
        self.clusters.get(index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteReason {
    /// No credentials, the target was drawn from the whole topology.
    Unauthenticated,
    /// The profile pinned the user to a host.
    Dedicated,
    /// Hash-sharded into the named cluster.
    Sharded { cluster: String },
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteReason::Unauthenticated => f.write_str("unauthenticated"),
            RouteReason::Dedicated => f.write_str("dedicated"),
            RouteReason::Sharded { cluster } => write!(f, "sharded:{}", cluster),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub target_host: String,
    pub scheme: Scheme,
    pub reason: RouteReason,
}

/// What the profile directory reported for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLookupResult {
    pub enabled: bool,
    pub dedicated_host: Option<String>,
}

/// Classified result of one profile lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileOutcome {
    Resolved { dedicated_host: Option<String> },
    Disabled,
    Unavailable(String),
    Malformed(String),
}

impl From<ProfileLookupResult> for ProfileOutcome {
    fn from(result: ProfileLookupResult) -> Self {
        if !result.enabled {
            return ProfileOutcome::Disabled;
        }
        let dedicated_host = result.dedicated_host.filter(|h| !h.trim().is_empty());
        ProfileOutcome::Resolved { dedicated_host }
    }
}

impl ProfileOutcome {
    pub fn into_result(self, username: &str) -> Result<Option<String>> {
        match self {
            ProfileOutcome::Resolved { dedicated_host } => Ok(dedicated_host),
            ProfileOutcome::Disabled => Err(RouterError::ActiveSyncDisabled {
                username: username.to_string(),
            }),
            ProfileOutcome::Unavailable(reason) => Err(RouterError::ProfileUnavailable {
                username: username.to_string(),
                reason,
            }),
            ProfileOutcome::Malformed(reason) => Err(RouterError::ProfileMalformed {
                username: username.to_string(),
                reason,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingProvisionEvent {
    pub username: String,
    pub device_type: String,
    pub device_id: String,
    pub device_name: String,
    /// Hostname of the resolved backend, without port.
    pub resolved_host: String,
}

/// Strips the port from `host:port` / `[v6]:port`. Bare hosts pass through.
pub fn strip_port(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => address,
    }
}
