//! Shared cluster view: the node tree, the volume layouts and the volume id sequence.

use std::sync::atomic::{AtomicU32, Ordering};

use keel_core::{ClusterConfig, VolumeId, VolumeInfo};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::TopologyError;
use crate::layout::{LayoutKey, VolumeLayoutRegistry};
use crate::node::{DataNodeInfo, NodeIndex, NodeTier, NodeTree};
use crate::Result;

#[derive(Debug, Default)]
struct TopologyState {
    tree: NodeTree,
    layouts: VolumeLayoutRegistry,
}

/// The master's view of the cluster.
///
/// The tree and the layout registry share one read-write lock. Locks are taken
/// per call and never handed out, so no guard can live across an `.await`.
#[derive(Debug, Default)]
pub struct Topology {
    state: RwLock<TopologyState>,
    max_volume_id: AtomicU32,
}

impl Topology {
    /// Creates an empty topology.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a topology from the static cluster layout.
    ///
    /// # Errors
    ///
    /// Returns an error if a data node appears under two different racks.
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        let topology = Self::new();
        for node in &config.data_nodes {
            let dc = topology.add_data_center(&node.data_center)?;
            let rack = topology.add_rack(dc, &node.rack)?;
            let max = i64::try_from(node.max_volumes).unwrap_or(i64::MAX);
            let public_url = node.public_url.as_deref().unwrap_or("");
            topology.add_data_node(rack, &node.url, public_url, max)?;
        }
        let free_space = topology.free_space(topology.root())?;
        info!(
            data_nodes = config.data_nodes.len(),
            free_space,
            "Topology seeded from configuration"
        );
        Ok(topology)
    }

    /// Handle of the root node.
    #[must_use]
    pub fn root(&self) -> NodeIndex {
        self.state.read().tree.root()
    }

    /// Runs `f` against the node tree under the read lock.
    pub fn with_tree<R>(&self, f: impl FnOnce(&NodeTree) -> R) -> R {
        f(&self.state.read().tree)
    }

    /// Returns the data center with this id, creating it if missing.
    ///
    /// # Errors
    ///
    /// Never fails on a well-formed tree; the error is kept for symmetry with the other tiers.
    pub fn add_data_center(&self, id: &str) -> Result<NodeIndex> {
        let mut state = self.state.write();
        let root = state.tree.root();
        state.tree.get_or_create_child(root, id)
    }

    /// Returns the rack with this id under a data center, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if `data_center` is not a live data center.
    pub fn add_rack(&self, data_center: NodeIndex, id: &str) -> Result<NodeIndex> {
        let mut state = self.state.write();
        let node = state.tree.node(data_center).ok_or(TopologyError::NodeNotFound(data_center))?;
        if node.tier() != NodeTier::DataCenter {
            return Err(TopologyError::WrongTier {
                node: node.id().to_string(),
                expected: NodeTier::DataCenter,
                actual: node.tier(),
            });
        }
        state.tree.get_or_create_child(data_center, id)
    }

    /// Returns the data node with this url under a rack, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if `rack` is not a live rack or the url is registered under
    /// another rack.
    pub fn add_data_node(
        &self,
        rack: NodeIndex,
        url: &str,
        public_url: &str,
        max_volume_count: i64,
    ) -> Result<NodeIndex> {
        let mut state = self.state.write();
        let known = state.tree.data_node_by_url(url).is_some();
        let index = state.tree.get_or_create_data_node(rack, url, public_url, max_volume_count)?;
        if known {
            debug!(node = %url, max_volume_count, "Data node re-registered");
        } else {
            info!(node = %url, max_volume_count, "Data node joined");
        }
        Ok(index)
    }

    /// Updates the number of volume slots a data node reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a live data node.
    pub fn set_max_volume_count(&self, node: NodeIndex, max_volume_count: i64) -> Result<()> {
        self.state.write().tree.set_max_volume_count(node, max_volume_count)
    }

    /// Records a volume on a data node. Returns true if the volume is new to the node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a live data node.
    pub fn add_or_update_volume(&self, node: NodeIndex, info: VolumeInfo) -> Result<bool> {
        self.state.write().tree.add_or_update_volume(node, info)
    }

    /// Removes a volume from a data node and from the layout registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a live data node.
    pub fn delete_volume(&self, node: NodeIndex, id: VolumeId) -> Result<Option<VolumeInfo>> {
        let mut state = self.state.write();
        let removed = state.tree.remove_volume(node, id)?;
        if let Some(info) = &removed {
            if let Some(dn) = state.tree.data_node_info(node) {
                state.layouts.unregister(info, &dn);
            }
            debug!(volume_id = %id, node = %node, "Deleted volume");
        }
        Ok(removed)
    }

    /// Reconciles a data node's volumes with a full report from its heartbeat.
    ///
    /// Reported volumes are added and registered; known volumes missing from the
    /// report are deleted and unregistered. Returns the number of volumes added
    /// and removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a live data node.
    pub fn sync_data_node_volumes(
        &self,
        node: NodeIndex,
        reported: Vec<VolumeInfo>,
    ) -> Result<(usize, usize)> {
        let mut state = self.state.write();
        let dn = state.tree.data_node_info(node).ok_or(TopologyError::NodeNotFound(node))?;
        let stale: Vec<VolumeInfo> = state
            .tree
            .node(node)
            .map(|n| {
                n.volumes().filter(|v| !reported.iter().any(|r| r.id == v.id)).cloned().collect()
            })
            .unwrap_or_default();

        let mut added = 0;
        for info in reported {
            state.layouts.register(&info, &dn);
            if state.tree.add_or_update_volume(node, info)? {
                added += 1;
            }
        }
        for info in &stale {
            state.tree.remove_volume(node, info.id)?;
            state.layouts.unregister(info, &dn);
        }
        if added > 0 || !stale.is_empty() {
            debug!(node = %dn, added, removed = stale.len(), "Synced data node volumes");
        }
        Ok((added, stale.len()))
    }

    /// Removes a data node and everything it hosted.
    ///
    /// Returns the volumes the node hosted; each is unregistered from the layouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a live data node.
    pub fn unlink_data_node(&self, node: NodeIndex) -> Result<Vec<VolumeInfo>> {
        let mut state = self.state.write();
        let dn = state.tree.data_node_info(node).ok_or(TopologyError::NodeNotFound(node))?;
        let volumes = state.tree.unlink_data_node(node)?;
        for info in &volumes {
            state.layouts.unregister(info, &dn);
        }
        warn!(node = %dn, volumes = volumes.len(), "Data node left the topology");
        Ok(volumes)
    }

    /// Records `node` as a location of a volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a live data node.
    pub fn register_volume_layout(&self, info: &VolumeInfo, node: NodeIndex) -> Result<bool> {
        let mut state = self.state.write();
        let dn = state.tree.data_node_info(node).ok_or(TopologyError::NodeNotFound(node))?;
        Ok(state.layouts.register(info, &dn))
    }

    /// Removes `node` from a volume's locations.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a live data node.
    pub fn unregister_volume_layout(&self, info: &VolumeInfo, node: NodeIndex) -> Result<bool> {
        let mut state = self.state.write();
        let dn = state.tree.data_node_info(node).ok_or(TopologyError::NodeNotFound(node))?;
        Ok(state.layouts.unregister(info, &dn))
    }

    /// Data nodes hosting a volume.
    #[must_use]
    pub fn lookup(&self, id: VolumeId) -> Vec<DataNodeInfo> {
        self.state.read().layouts.lookup(id)
    }

    /// Fully replicated, writable volumes for a layout.
    #[must_use]
    pub fn writable_volumes(&self, key: &LayoutKey) -> Vec<VolumeId> {
        self.state.read().layouts.writable_volumes(key)
    }

    /// Number of writable volumes for a layout.
    #[must_use]
    pub fn active_volume_count(&self, key: &LayoutKey) -> usize {
        self.state.read().layouts.active_volume_count(key)
    }

    /// Allocates the next volume id. Concurrent callers never receive the same id.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::VolumeIdExhausted`] once `u32::MAX` has been
    /// handed out or observed; the sequence never wraps.
    pub fn next_volume_id(&self) -> Result<VolumeId> {
        self.max_volume_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map(|previous| VolumeId::new(previous + 1))
            .map_err(|max| TopologyError::VolumeIdExhausted(VolumeId::new(max)))
    }

    /// Raises the volume id sequence to at least `id`.
    pub fn up_adjust_max_volume_id(&self, id: VolumeId) {
        let previous = self.max_volume_id.fetch_max(id.get(), Ordering::SeqCst);
        if previous < id.get() {
            debug!(from = previous, to = %id, "Adjusted max volume id");
        }
    }

    /// The highest volume id handed out or observed.
    #[must_use]
    pub fn max_volume_id(&self) -> VolumeId {
        VolumeId::new(self.max_volume_id.load(Ordering::SeqCst))
    }

    /// Free volume slots under a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    pub fn free_space(&self, node: NodeIndex) -> Result<i64> {
        self.state.read().tree.free_space(node)
    }

    /// Snapshot of the data node with this id (its url).
    #[must_use]
    pub fn data_node(&self, id: &str) -> Option<DataNodeInfo> {
        let state = self.state.read();
        state.tree.data_node_by_url(id).and_then(|index| state.tree.data_node_info(index))
    }

    /// Snapshots of every data node.
    #[must_use]
    pub fn data_nodes(&self) -> Vec<DataNodeInfo> {
        self.state.read().tree.data_nodes()
    }
}
