//! Volume layout registry.
//!
//! Tracks which data nodes host each volume, grouped by the
//! `(collection, replica placement, ttl)` triple the volume was created with.
//! A volume is writable only while every replica its placement asks for is
//! registered.

use std::collections::{BTreeMap, HashMap, HashSet};

use keel_core::{ReplicaPlacement, Ttl, VolumeId, VolumeInfo};
use serde::{Deserialize, Serialize};

use crate::node::DataNodeInfo;

/// Key grouping volumes with the same creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayoutKey {
    /// Collection name, empty for the default collection.
    pub collection: String,
    /// Replica placement policy.
    pub replica_placement: ReplicaPlacement,
    /// Volume TTL.
    pub ttl: Ttl,
}

impl LayoutKey {
    /// Creates a key.
    #[must_use]
    pub fn new(
        collection: impl Into<String>,
        replica_placement: ReplicaPlacement,
        ttl: Ttl,
    ) -> Self {
        Self { collection: collection.into(), replica_placement, ttl }
    }

    fn of(info: &VolumeInfo) -> Self {
        Self::new(info.collection.clone(), info.replica_placement, info.ttl)
    }
}

/// Locations of every volume sharing one [`LayoutKey`].
#[derive(Debug, Clone, Default)]
pub struct VolumeLayout {
    locations: BTreeMap<VolumeId, Vec<DataNodeInfo>>,
    read_only: HashSet<VolumeId>,
}

impl VolumeLayout {
    /// Data nodes hosting a volume.
    #[must_use]
    pub fn locations(&self, id: VolumeId) -> &[DataNodeInfo] {
        self.locations.get(&id).map_or(&[][..], Vec::as_slice)
    }

    /// Number of volumes in this layout.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Returns true if the layout holds no volume.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    fn register(&mut self, info: &VolumeInfo, node: &DataNodeInfo) -> bool {
        let nodes = self.locations.entry(info.id).or_default();
        if info.read_only {
            self.read_only.insert(info.id);
        } else {
            self.read_only.remove(&info.id);
        }
        if nodes.iter().any(|n| n.index == node.index) {
            return false;
        }
        nodes.push(node.clone());
        true
    }

    fn unregister(&mut self, id: VolumeId, node: &DataNodeInfo) -> bool {
        let Some(nodes) = self.locations.get_mut(&id) else {
            return false;
        };
        let before = nodes.len();
        nodes.retain(|n| n.index != node.index);
        let removed = nodes.len() != before;
        if nodes.is_empty() {
            self.locations.remove(&id);
            self.read_only.remove(&id);
        }
        removed
    }

    fn writable(&self, copy_count: usize) -> impl Iterator<Item = VolumeId> + '_ {
        self.locations
            .iter()
            .filter(move |(id, nodes)| nodes.len() == copy_count && !self.read_only.contains(*id))
            .map(|(id, _)| *id)
    }
}

/// Registry of all volume layouts, indexed by volume id.
#[derive(Debug, Clone, Default)]
pub struct VolumeLayoutRegistry {
    layouts: HashMap<LayoutKey, VolumeLayout>,
    by_volume: HashMap<VolumeId, LayoutKey>,
}

impl VolumeLayoutRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `node` as a location of the volume. Returns false if it was already recorded.
    ///
    /// A volume reported under new creation parameters moves to the matching
    /// layout; `node` is dropped from the layout it was filed under before.
    pub fn register(&mut self, info: &VolumeInfo, node: &DataNodeInfo) -> bool {
        let key = LayoutKey::of(info);
        let stale: Vec<LayoutKey> = self
            .layouts
            .iter()
            .filter(|(k, layout)| {
                **k != key && layout.locations(info.id).iter().any(|n| n.index == node.index)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for previous in &stale {
            self.remove_location(previous, info.id, node);
        }
        let added = self.layouts.entry(key.clone()).or_default().register(info, node);
        self.by_volume.insert(info.id, key);
        added
    }

    /// Removes `node` from the volume's locations. Returns false if it was not recorded.
    ///
    /// A volume left without locations is forgotten.
    pub fn unregister(&mut self, info: &VolumeInfo, node: &DataNodeInfo) -> bool {
        let key = LayoutKey::of(info);
        if self.remove_location(&key, info.id, node) {
            return true;
        }
        match self.by_volume.get(&info.id).filter(|k| **k != key).cloned() {
            Some(current) => self.remove_location(&current, info.id, node),
            None => false,
        }
    }

    fn remove_location(&mut self, key: &LayoutKey, id: VolumeId, node: &DataNodeInfo) -> bool {
        let Some(layout) = self.layouts.get_mut(key) else {
            return false;
        };
        let removed = layout.unregister(id, node);
        let forgotten = layout.locations(id).is_empty();
        if layout.is_empty() {
            self.layouts.remove(key);
        }
        if forgotten && self.by_volume.get(&id) == Some(key) {
            self.by_volume.remove(&id);
        }
        removed
    }

    /// Data nodes hosting a volume, empty if unknown.
    #[must_use]
    pub fn lookup(&self, id: VolumeId) -> Vec<DataNodeInfo> {
        self.by_volume
            .get(&id)
            .and_then(|key| self.layouts.get(key))
            .map(|layout| layout.locations(id).to_vec())
            .unwrap_or_default()
    }

    /// The layout for a key, if any volume was registered under it.
    #[must_use]
    pub fn layout(&self, key: &LayoutKey) -> Option<&VolumeLayout> {
        self.layouts.get(key)
    }

    /// Volumes under `key` that are fully replicated and not read-only, in id order.
    #[must_use]
    pub fn writable_volumes(&self, key: &LayoutKey) -> Vec<VolumeId> {
        let copy_count = key.replica_placement.copy_count();
        self.layouts
            .get(key)
            .map(|layout| layout.writable(copy_count).collect())
            .unwrap_or_default()
    }

    /// Number of writable volumes under `key`.
    #[must_use]
    pub fn active_volume_count(&self, key: &LayoutKey) -> usize {
        let copy_count = key.replica_placement.copy_count();
        self.layouts.get(key).map_or(0, |layout| layout.writable(copy_count).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeTree;

    fn nodes(n: usize) -> Vec<DataNodeInfo> {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let dc = tree.get_or_create_child(root, "dc1").unwrap();
        let rack = tree.get_or_create_child(dc, "r1").unwrap();
        (0..n)
            .map(|i| {
                let url = format!("10.0.0.{i}:8080");
                let idx = tree.get_or_create_data_node(rack, &url, "", 5).unwrap();
                tree.data_node_info(idx).unwrap()
            })
            .collect()
    }

    fn info(id: u32, rp: &str) -> VolumeInfo {
        VolumeInfo::new(VolumeId::new(id), "pics", rp.parse().unwrap(), Ttl::EMPTY)
    }

    #[test]
    fn test_register_is_idempotent_per_node() {
        let dn = nodes(2);
        let mut registry = VolumeLayoutRegistry::new();
        let v = info(1, "001");

        assert!(registry.register(&v, &dn[0]));
        assert!(!registry.register(&v, &dn[0]));
        assert!(registry.register(&v, &dn[1]));

        let urls: Vec<_> = registry.lookup(v.id).into_iter().map(|n| n.url).collect();
        assert_eq!(urls, vec!["10.0.0.0:8080", "10.0.0.1:8080"]);
    }

    #[test]
    fn test_writable_requires_full_replication() {
        let dn = nodes(3);
        let mut registry = VolumeLayoutRegistry::new();
        let key = LayoutKey::new("pics", "002".parse().unwrap(), Ttl::EMPTY);

        let full = info(1, "002");
        for node in &dn {
            registry.register(&full, node);
        }
        let partial = info(2, "002");
        registry.register(&partial, &dn[0]);
        registry.register(&partial, &dn[1]);

        assert_eq!(registry.writable_volumes(&key), vec![VolumeId::new(1)]);
        assert_eq!(registry.active_volume_count(&key), 1);

        registry.register(&partial, &dn[2]);
        assert_eq!(registry.active_volume_count(&key), 2);
    }

    #[test]
    fn test_read_only_not_writable() {
        let dn = nodes(1);
        let mut registry = VolumeLayoutRegistry::new();
        let mut v = info(4, "000");
        v.read_only = true;
        registry.register(&v, &dn[0]);

        let key = LayoutKey::of(&v);
        assert!(registry.writable_volumes(&key).is_empty());
        assert_eq!(registry.lookup(v.id).len(), 1);
    }

    #[test]
    fn test_unregister_forgets_empty_volume() {
        let dn = nodes(2);
        let mut registry = VolumeLayoutRegistry::new();
        let v = info(7, "001");
        registry.register(&v, &dn[0]);
        registry.register(&v, &dn[1]);

        assert!(registry.unregister(&v, &dn[0]));
        assert!(!registry.unregister(&v, &dn[0]));
        assert_eq!(registry.lookup(v.id).len(), 1);

        assert!(registry.unregister(&v, &dn[1]));
        assert!(registry.lookup(v.id).is_empty());
        assert!(registry.layout(&LayoutKey::of(&v)).is_none());
    }

    #[test]
    fn test_reregister_under_new_key_moves_location() {
        let dn = nodes(2);
        let mut registry = VolumeLayoutRegistry::new();
        let old = info(3, "001");
        registry.register(&old, &dn[0]);
        registry.register(&old, &dn[1]);

        let mut moved = old.clone();
        moved.collection = "docs".to_string();
        registry.register(&moved, &dn[0]);

        let old_layout = registry.layout(&LayoutKey::of(&old)).unwrap();
        let urls: Vec<_> = old_layout.locations(old.id).iter().map(|n| n.url.as_str()).collect();
        assert_eq!(urls, vec!["10.0.0.1:8080"]);
        assert_eq!(registry.lookup(old.id)[0].url, "10.0.0.0:8080");

        // The second replica follows on its next report.
        registry.register(&moved, &dn[1]);
        assert!(registry.layout(&LayoutKey::of(&old)).is_none());
        assert_eq!(registry.lookup(old.id).len(), 2);

        // Unregistering with the stale parameters still finds the location.
        assert!(registry.unregister(&old, &dn[0]));
        assert!(registry.unregister(&moved, &dn[1]));
        assert!(registry.lookup(old.id).is_empty());
        assert!(registry.layout(&LayoutKey::of(&moved)).is_none());
    }

    #[test]
    fn test_layouts_are_separated_by_key() {
        let dn = nodes(1);
        let mut registry = VolumeLayoutRegistry::new();
        registry.register(&info(1, "000"), &dn[0]);
        let mut other = info(2, "000");
        other.collection = "docs".to_string();
        registry.register(&other, &dn[0]);

        let pics = LayoutKey::new("pics", ReplicaPlacement::default(), Ttl::EMPTY);
        let docs = LayoutKey::new("docs", ReplicaPlacement::default(), Ttl::EMPTY);
        assert_eq!(registry.writable_volumes(&pics), vec![VolumeId::new(1)]);
        assert_eq!(registry.writable_volumes(&docs), vec![VolumeId::new(2)]);
    }
}
