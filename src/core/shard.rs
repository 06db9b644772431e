use crate::domain::model::{Cluster, ClusterTopology};
use crate::domain::ports::RandomSource;
use rand::Rng;

/// Sum of the Unicode scalar values of every character in `username`.
pub fn codepoint_sum(username: &str) -> u64 {
    username.chars().map(|c| u64::from(u32::from(c))).sum()
}

/// Index of the cluster a username hashes to: codepoint sum modulo cluster count.
///
/// Existing users are homed by this exact function; changing it moves them
/// to other shards.
pub fn cluster_index(username: &str, cluster_count: usize) -> usize {
    (codepoint_sum(username) % cluster_count as u64) as usize
}

pub fn select_cluster<'a>(username: &str, topology: &'a ClusterTopology) -> &'a Cluster {
    &topology.clusters()[cluster_index(username, topology.len())]
}

/// Uniform pick from the whole topology, for requests without a username.
pub fn random_cluster<'a>(topology: &'a ClusterTopology, random: &dyn RandomSource) -> &'a Cluster {
    let clusters = topology.clusters();
    &clusters[random.pick(clusters.len()) % clusters.len()]
}

/// Uniform member pick. No liveness check is made.
pub fn random_member<'a>(cluster: &'a Cluster, random: &dyn RandomSource) -> &'a str {
    let members = &cluster.members;
    &members[random.pick(members.len()) % members.len()]
}

/// Default source backed by the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}
