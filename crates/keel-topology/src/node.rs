//! The capacity tree: data centers, racks and data nodes under one root.
//!
//! Nodes live in an arena owned by [`NodeTree`] and refer to each other by
//! [`NodeIndex`]. A child's parent link is a plain index, so the tree has no
//! ownership cycles.
//!
//! Every node tracks two counters. A data node stores its own volume slots and
//! hosted volume count; data centers, racks and the root store the sums over
//! their subtree. Every mutation applies its delta to the node and then walks
//! the parent links to the root, so for any node
//!
//! ```text
//! free_space(node) == sum(free_space(leaf) for leaf in subtree(node))
//! ```
//!
//! # Selection
//!
//! Two read-only operations drive replica placement:
//!
//! - [`NodeTree::pick_nodes`] chooses a random "main" child that passes a
//!   caller-supplied filter, plus a random sample of other children that still
//!   have capacity.
//! - [`NodeTree::reserve_one_volume`] descends a subtree weighted by free space
//!   and lands on one data node.

use std::collections::{BTreeMap, HashMap};

use keel_core::{VolumeId, VolumeInfo};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{PlacementError, RejectCause, Rejection, TopologyError, Unsatisfied};

/// Id of the root node.
pub const ROOT_ID: &str = "topo";

/// Handle of a node inside a [`NodeTree`].
///
/// The slot of an unlinked node is reused by the next node created, under a
/// new generation. A handle to the unlinked node keeps the old generation and
/// stays dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIndex {
    slot: usize,
    generation: u32,
}

impl std::fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

/// Failure-domain tier of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeTier {
    /// The root of the cluster.
    Topology,
    /// A data center.
    DataCenter,
    /// A rack inside a data center.
    Rack,
    /// A storage server inside a rack.
    DataNode,
}

impl NodeTier {
    /// Tier of this tier's children, `None` for data nodes.
    #[must_use]
    pub fn child_tier(self) -> Option<Self> {
        match self {
            Self::Topology => Some(Self::DataCenter),
            Self::DataCenter => Some(Self::Rack),
            Self::Rack => Some(Self::DataNode),
            Self::DataNode => None,
        }
    }

    /// Human-readable tier name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Topology => "topology",
            Self::DataCenter => "data center",
            Self::Rack => "rack",
            Self::DataNode => "data node",
        }
    }
}

impl std::fmt::Display for NodeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Leaf-only state of a data node.
#[derive(Debug, Clone)]
struct DataNodeState {
    url: String,
    public_url: String,
    volumes: BTreeMap<VolumeId, VolumeInfo>,
}

/// Tier-specific part of a node.
#[derive(Debug, Clone)]
enum NodeKind {
    Root,
    DataCenter,
    Rack,
    DataNode(DataNodeState),
}

impl NodeKind {
    fn tier(&self) -> NodeTier {
        match self {
            Self::Root => NodeTier::Topology,
            Self::DataCenter => NodeTier::DataCenter,
            Self::Rack => NodeTier::Rack,
            Self::DataNode(_) => NodeTier::DataNode,
        }
    }
}

#[derive(Debug, Clone)]
struct NodeEntry {
    id: String,
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
    kind: NodeKind,
    max_volume_count: i64,
    volume_count: i64,
}

impl NodeEntry {
    fn new(id: impl Into<String>, parent: Option<NodeIndex>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            parent,
            children: Vec::new(),
            kind,
            max_volume_count: 0,
            volume_count: 0,
        }
    }

    fn free_space(&self) -> i64 {
        self.max_volume_count - self.volume_count
    }
}

/// Snapshot of a data node, detached from the tree lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataNodeInfo {
    /// Handle of the node in the tree.
    pub index: NodeIndex,
    /// Node id, equal to its url.
    pub id: String,
    /// `host:port` the master uses to reach the node.
    pub url: String,
    /// `host:port` clients use to reach the node.
    pub public_url: String,
    /// Enclosing data center id.
    pub data_center: String,
    /// Enclosing rack id.
    pub rack: String,
}

impl std::fmt::Display for DataNodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Borrowed view of one node.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a NodeTree,
    index: NodeIndex,
    entry: &'a NodeEntry,
}

impl<'a> NodeRef<'a> {
    /// Handle of this node.
    #[must_use]
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Node id.
    #[must_use]
    pub fn id(&self) -> &'a str {
        &self.entry.id
    }

    /// Tier of this node.
    #[must_use]
    pub fn tier(&self) -> NodeTier {
        self.entry.kind.tier()
    }

    /// Free volume slots in this node's subtree.
    #[must_use]
    pub fn free_space(&self) -> i64 {
        self.entry.free_space()
    }

    /// Volume slots in this node's subtree.
    #[must_use]
    pub fn max_volume_count(&self) -> i64 {
        self.entry.max_volume_count
    }

    /// Volumes hosted in this node's subtree.
    #[must_use]
    pub fn volume_count(&self) -> i64 {
        self.entry.volume_count
    }

    /// Parent node, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.entry.parent.and_then(|p| self.tree.node(p))
    }

    /// Direct children in insertion order.
    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let tree = self.tree;
        self.entry.children.iter().filter_map(move |&c| tree.node(c))
    }

    /// Volumes hosted by this node. Empty for anything but a data node.
    pub fn volumes(&self) -> impl Iterator<Item = &'a VolumeInfo> + 'a {
        let volumes = match &self.entry.kind {
            NodeKind::DataNode(state) => Some(state.volumes.values()),
            _ => None,
        };
        volumes.into_iter().flatten()
    }

    /// Url of a data node.
    #[must_use]
    pub fn url(&self) -> Option<&'a str> {
        match &self.entry.kind {
            NodeKind::DataNode(state) => Some(&state.url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry: Option<NodeEntry>,
}

/// Arena-backed capacity tree.
///
/// Slots freed by unlinked data nodes are recycled, so the arena stays as
/// large as the most nodes ever linked at once.
#[derive(Debug, Clone)]
pub struct NodeTree {
    slots: Vec<Slot>,
    free_slots: Vec<usize>,
    data_nodes_by_url: HashMap<String, NodeIndex>,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    /// Creates a tree holding only the root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                entry: Some(NodeEntry::new(ROOT_ID, None, NodeKind::Root)),
            }],
            free_slots: Vec::new(),
            data_nodes_by_url: HashMap::new(),
        }
    }

    /// Handle of the root node.
    #[must_use]
    pub fn root(&self) -> NodeIndex {
        NodeIndex { slot: 0, generation: 0 }
    }

    /// Returns a view of a live node.
    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<NodeRef<'_>> {
        self.entry(index).ok().map(|entry| NodeRef { tree: self, index, entry })
    }

    fn entry(&self, index: NodeIndex) -> Result<&NodeEntry, TopologyError> {
        self.slots
            .get(index.slot)
            .filter(|slot| slot.generation == index.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(TopologyError::NodeNotFound(index))
    }

    fn entry_mut(&mut self, index: NodeIndex) -> Result<&mut NodeEntry, TopologyError> {
        self.slots
            .get_mut(index.slot)
            .filter(|slot| slot.generation == index.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(TopologyError::NodeNotFound(index))
    }

    fn data_node_state_mut(
        &mut self,
        index: NodeIndex,
    ) -> Result<&mut DataNodeState, TopologyError> {
        let entry = self.entry_mut(index)?;
        let actual = entry.kind.tier();
        match &mut entry.kind {
            NodeKind::DataNode(state) => Ok(state),
            _ => Err(TopologyError::WrongTier {
                node: entry.id.clone(),
                expected: NodeTier::DataNode,
                actual,
            }),
        }
    }

    /// Free volume slots under a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    pub fn free_space(&self, index: NodeIndex) -> Result<i64, TopologyError> {
        Ok(self.entry(index)?.free_space())
    }

    /// Finds a direct child by id.
    #[must_use]
    pub fn child_by_id(&self, parent: NodeIndex, id: &str) -> Option<NodeIndex> {
        let entry = self.entry(parent).ok()?;
        entry.children.iter().copied().find(|&c| self.entry(c).is_ok_and(|e| e.id == id))
    }

    /// Finds a data node by url.
    #[must_use]
    pub fn data_node_by_url(&self, url: &str) -> Option<NodeIndex> {
        self.data_nodes_by_url.get(url).copied()
    }

    /// Returns the child with the given id, creating it if missing.
    ///
    /// Only data centers (under the root) and racks (under a data center) can be
    /// created this way; data nodes go through [`NodeTree::get_or_create_data_node`].
    ///
    /// # Errors
    ///
    /// Returns an error if the parent does not exist or is not a root or data center.
    pub fn get_or_create_child(
        &mut self,
        parent: NodeIndex,
        id: &str,
    ) -> Result<NodeIndex, TopologyError> {
        if let Some(existing) = self.child_by_id(parent, id) {
            return Ok(existing);
        }
        let parent_entry = self.entry(parent)?;
        let kind = match parent_entry.kind {
            NodeKind::Root => NodeKind::DataCenter,
            NodeKind::DataCenter => NodeKind::Rack,
            _ => {
                return Err(TopologyError::WrongTier {
                    node: parent_entry.id.clone(),
                    expected: NodeTier::DataCenter,
                    actual: parent_entry.kind.tier(),
                })
            }
        };
        Ok(self.link_child(parent, NodeEntry::new(id, Some(parent), kind)))
    }

    /// Returns the data node with the given url under a rack, creating it if missing.
    ///
    /// An existing node keeps its volumes; its slot count is updated to `max_volume_count`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rack is missing or not a rack, or if the url is
    /// already registered under a different rack.
    pub fn get_or_create_data_node(
        &mut self,
        rack: NodeIndex,
        url: &str,
        public_url: &str,
        max_volume_count: i64,
    ) -> Result<NodeIndex, TopologyError> {
        let rack_entry = self.entry(rack)?;
        if rack_entry.kind.tier() != NodeTier::Rack {
            return Err(TopologyError::WrongTier {
                node: rack_entry.id.clone(),
                expected: NodeTier::Rack,
                actual: rack_entry.kind.tier(),
            });
        }
        if let Some(existing) = self.data_node_by_url(url) {
            let current_rack = self.entry(existing)?.parent;
            if current_rack != Some(rack) {
                let rack_id = current_rack
                    .and_then(|r| self.entry(r).ok())
                    .map(|e| e.id.clone())
                    .unwrap_or_default();
                return Err(TopologyError::DataNodeMoved { url: url.to_string(), rack: rack_id });
            }
            self.set_max_volume_count(existing, max_volume_count)?;
            return Ok(existing);
        }

        let state = DataNodeState {
            url: url.to_string(),
            public_url: if public_url.is_empty() {
                url.to_string()
            } else {
                public_url.to_string()
            },
            volumes: BTreeMap::new(),
        };
        let entry = NodeEntry::new(url, Some(rack), NodeKind::DataNode(state));
        let index = self.link_child(rack, entry);
        self.data_nodes_by_url.insert(url.to_string(), index);
        self.adjust_max_volume_count(index, max_volume_count)?;
        debug!(node = %url, max_volume_count, "Registered data node");
        Ok(index)
    }

    fn link_child(&mut self, parent: NodeIndex, entry: NodeEntry) -> NodeIndex {
        let index = match self.free_slots.pop() {
            Some(slot) => {
                let generation = self.slots[slot].generation;
                self.slots[slot].entry = Some(entry);
                NodeIndex { slot, generation }
            }
            None => {
                self.slots.push(Slot { generation: 0, entry: Some(entry) });
                NodeIndex { slot: self.slots.len() - 1, generation: 0 }
            }
        };
        if let Ok(parent_entry) = self.entry_mut(parent) {
            parent_entry.children.push(index);
        }
        index
    }

    fn release(&mut self, index: NodeIndex) -> Result<NodeEntry, TopologyError> {
        let slot = self
            .slots
            .get_mut(index.slot)
            .filter(|slot| slot.generation == index.generation)
            .ok_or(TopologyError::NodeNotFound(index))?;
        let entry = slot.entry.take().ok_or(TopologyError::NodeNotFound(index))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(index.slot);
        Ok(entry)
    }

    /// Applies a slot-count delta to a node and all its ancestors.
    fn adjust_max_volume_count(
        &mut self,
        index: NodeIndex,
        delta: i64,
    ) -> Result<(), TopologyError> {
        let mut current = Some(index);
        while let Some(i) = current {
            let entry = self.entry_mut(i)?;
            entry.max_volume_count += delta;
            current = entry.parent;
        }
        Ok(())
    }

    /// Applies a volume-count delta to a node and all its ancestors.
    fn adjust_volume_count(&mut self, index: NodeIndex, delta: i64) -> Result<(), TopologyError> {
        let mut current = Some(index);
        while let Some(i) = current {
            let entry = self.entry_mut(i)?;
            entry.volume_count += delta;
            current = entry.parent;
        }
        Ok(())
    }

    /// Sets the number of volume slots on a data node, as reported by its heartbeat.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is missing or not a data node.
    pub fn set_max_volume_count(
        &mut self,
        data_node: NodeIndex,
        max_volume_count: i64,
    ) -> Result<(), TopologyError> {
        self.data_node_state_mut(data_node)?;
        let delta = max_volume_count - self.entry(data_node)?.max_volume_count;
        if delta != 0 {
            self.adjust_max_volume_count(data_node, delta)?;
        }
        Ok(())
    }

    /// Records a volume on a data node. Returns true if the volume was not known before.
    ///
    /// A newly added volume takes one slot from the node and every ancestor.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is missing or not a data node.
    pub fn add_or_update_volume(
        &mut self,
        data_node: NodeIndex,
        info: VolumeInfo,
    ) -> Result<bool, TopologyError> {
        let state = self.data_node_state_mut(data_node)?;
        let is_new = state.volumes.insert(info.id, info).is_none();
        if is_new {
            self.adjust_volume_count(data_node, 1)?;
        }
        Ok(is_new)
    }

    /// Forgets a volume on a data node, freeing its slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is missing or not a data node.
    pub fn remove_volume(
        &mut self,
        data_node: NodeIndex,
        id: VolumeId,
    ) -> Result<Option<VolumeInfo>, TopologyError> {
        let state = self.data_node_state_mut(data_node)?;
        let removed = state.volumes.remove(&id);
        if removed.is_some() {
            self.adjust_volume_count(data_node, -1)?;
        }
        Ok(removed)
    }

    /// Detaches a data node from the tree and returns the volumes it hosted.
    ///
    /// Its slots and volumes are subtracted from every ancestor.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is missing or not a data node.
    pub fn unlink_data_node(
        &mut self,
        data_node: NodeIndex,
    ) -> Result<Vec<VolumeInfo>, TopologyError> {
        self.data_node_state_mut(data_node)?;
        let (max, count, parent) = {
            let entry = self.entry(data_node)?;
            (entry.max_volume_count, entry.volume_count, entry.parent)
        };
        if let Some(parent) = parent {
            self.adjust_max_volume_count(parent, -max)?;
            self.adjust_volume_count(parent, -count)?;
            self.entry_mut(parent)?.children.retain(|&c| c != data_node);
        }

        let entry = self.release(data_node)?;
        let NodeKind::DataNode(state) = entry.kind else {
            return Ok(Vec::new());
        };
        self.data_nodes_by_url.remove(&state.url);
        debug!(node = %state.url, volumes = state.volumes.len(), "Unlinked data node");
        Ok(state.volumes.into_values().collect())
    }

    /// Snapshot of a data node with its enclosing rack and data center.
    #[must_use]
    pub fn data_node_info(&self, index: NodeIndex) -> Option<DataNodeInfo> {
        let node = self.node(index)?;
        let NodeKind::DataNode(state) = &node.entry.kind else {
            return None;
        };
        let rack = node.parent();
        let data_center = rack.and_then(|r| r.parent());
        Some(DataNodeInfo {
            index,
            id: node.entry.id.clone(),
            url: state.url.clone(),
            public_url: state.public_url.clone(),
            data_center: data_center.map(|n| n.id().to_string()).unwrap_or_default(),
            rack: rack.map(|n| n.id().to_string()).unwrap_or_default(),
        })
    }

    /// Snapshots of every live data node, in tree order.
    #[must_use]
    pub fn data_nodes(&self) -> Vec<DataNodeInfo> {
        let mut out = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(index) = stack.pop() {
            let Ok(entry) = self.entry(index) else { continue };
            if let Some(info) = self.data_node_info(index) {
                out.push(info);
            }
            stack.extend(entry.children.iter().rev().copied());
        }
        out
    }

    /// Picks `count` distinct children of `parent`.
    ///
    /// The first returned node ("main") is drawn uniformly from the children that
    /// pass `filter`. The remaining `count - 1` nodes are a uniform reservoir sample
    /// of the other children that still have at least one free slot.
    ///
    /// # Errors
    ///
    /// Returns [`PlacementError::ConstraintUnsatisfiable`] at the children's tier if
    /// no child passes the filter or too few other children have capacity.
    pub fn pick_nodes<R, F>(
        &self,
        parent: NodeIndex,
        count: usize,
        rng: &mut R,
        mut filter: F,
    ) -> Result<(NodeIndex, Vec<NodeIndex>), PlacementError>
    where
        R: Rng + ?Sized,
        F: FnMut(NodeRef<'_>) -> Result<(), RejectCause>,
    {
        let parent_entry = self.entry(parent)?;
        let tier = parent_entry.kind.tier().child_tier().unwrap_or(NodeTier::DataNode);
        let required = count.max(1);

        let mut candidates = Vec::with_capacity(parent_entry.children.len());
        let mut rejections = Vec::new();
        for node in self.children_of(parent_entry) {
            match filter(node) {
                Ok(()) => candidates.push(node.index),
                Err(cause) => {
                    trace!(node = node.id(), %cause, "Rejected main candidate");
                    rejections.push(Rejection { node: node.id().to_string(), cause });
                }
            }
        }
        if candidates.is_empty() {
            return Err(PlacementError::ConstraintUnsatisfiable {
                tier,
                reason: Unsatisfied::TooFewCandidates { required, qualified: 0, rejections },
            });
        }
        let main = candidates[rng.gen_range(0..candidates.len())];
        let main_id = &self.entry(main)?.id;
        debug!(parent = %parent_entry.id, main = %main_id, "Picked main node");

        let wanted = required - 1;
        let mut rest = Vec::with_capacity(wanted);
        let mut rejections = Vec::new();
        if wanted > 0 {
            let mut seen = 0usize;
            for node in self.children_of(parent_entry) {
                if node.index == main {
                    continue;
                }
                let free = node.free_space();
                if free <= 0 {
                    rejections.push(Rejection {
                        node: node.id().to_string(),
                        cause: RejectCause::InsufficientCapacity { free, required: 1 },
                    });
                    continue;
                }
                if rest.len() < wanted {
                    rest.push(node.index);
                } else {
                    let slot = rng.gen_range(0..=seen);
                    if slot < wanted {
                        rest[slot] = node.index;
                    }
                }
                seen += 1;
            }
        }
        if rest.len() < wanted {
            return Err(PlacementError::ConstraintUnsatisfiable {
                tier,
                reason: Unsatisfied::TooFewCandidates {
                    required,
                    qualified: rest.len() + 1,
                    rejections,
                },
            });
        }
        Ok((main, rest))
    }

    fn children_of<'a>(&'a self, entry: &'a NodeEntry) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        entry.children.iter().filter_map(move |&c| self.node(c))
    }

    /// Picks one data node under `index`, weighted by free space.
    ///
    /// `r` is an offset into the subtree's free slots, normally drawn uniformly
    /// from `0..free_space(index)`. Children without free slots are skipped; the
    /// search descends into the child whose cumulative range contains `r`.
    ///
    /// # Errors
    ///
    /// Returns [`Unsatisfied::NoFreeSlot`] at the subtree's tier if no data node
    /// with a free slot covers `r`.
    pub fn reserve_one_volume(
        &self,
        index: NodeIndex,
        mut r: i64,
    ) -> Result<NodeIndex, PlacementError> {
        let entry = self.entry(index)?;
        if let NodeKind::DataNode(_) = entry.kind {
            if entry.free_space() > 0 && (0..entry.free_space()).contains(&r) {
                return Ok(index);
            }
        }
        for child in self.children_of(entry) {
            let free = child.free_space();
            if free <= 0 {
                continue;
            }
            if r >= free {
                r -= free;
                continue;
            }
            if child.tier() == NodeTier::DataNode {
                trace!(subtree = %entry.id, node = child.id(), "Reserved volume slot");
                return Ok(child.index);
            }
            if let Ok(found) = self.reserve_one_volume(child.index, r) {
                return Ok(found);
            }
        }
        Err(PlacementError::ConstraintUnsatisfiable {
            tier: entry.kind.tier(),
            reason: Unsatisfied::NoFreeSlot { subtree: entry.id.clone() },
        })
    }
}
