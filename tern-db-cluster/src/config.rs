//! Cluster-side configuration

use crate::syncer::SyncerConfig;

/// Settings for the replication side of a node
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub cluster_id: i32,
    pub server_id: i32,
    /// Peer DSNs indexed by node id
    pub nodes: Vec<String>,
    pub syncer: SyncerConfig,
    /// Readers block on initial sync when enabled
    pub sync_enabled: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_id: 0,
            server_id: 0,
            nodes: Vec::new(),
            syncer: SyncerConfig::default(),
            sync_enabled: true,
        }
    }
}

impl ClusterConfig {
    /// Propagate shared identifiers into the syncer block
    pub fn normalized(mut self) -> Self {
        self.syncer.cluster_id = self.cluster_id;
        self.syncer.server_id = self.server_id;
        self
    }
}
