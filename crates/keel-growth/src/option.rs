//! Parameters of a volume growth request.

use keel_core::{GrowthConfig, ReplicaPlacement, Ttl};
use keel_topology::LayoutKey;
use serde::{Deserialize, Serialize};

/// What to grow and where to prefer putting it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGrowOption {
    /// Collection the new volumes belong to.
    pub collection: String,
    /// Replica placement of the new volumes.
    pub replica_placement: ReplicaPlacement,
    /// TTL of the new volumes.
    pub ttl: Ttl,
    /// Bytes each storage node should preallocate per volume.
    pub preallocate: u64,
    /// Preferred data center for the main replica.
    pub data_center: Option<String>,
    /// Preferred rack for the main replica.
    pub rack: Option<String>,
    /// Preferred data node for the main replica.
    pub data_node: Option<String>,
}

impl VolumeGrowOption {
    /// Creates an option with no location preference.
    #[must_use]
    pub fn new(replica_placement: ReplicaPlacement) -> Self {
        Self { replica_placement, ..Self::default() }
    }

    /// Creates an option from the configured defaults.
    #[must_use]
    pub fn from_config(config: &GrowthConfig) -> Self {
        Self {
            replica_placement: config.default_replication,
            ttl: config.default_ttl,
            preallocate: config.preallocate_bytes,
            ..Self::default()
        }
    }

    /// Sets the collection.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Sets the TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the preallocation size.
    #[must_use]
    pub fn with_preallocate(mut self, bytes: u64) -> Self {
        self.preallocate = bytes;
        self
    }

    /// Prefers a data center for the main replica.
    #[must_use]
    pub fn with_data_center(mut self, id: impl Into<String>) -> Self {
        self.data_center = Some(id.into());
        self
    }

    /// Prefers a rack for the main replica.
    #[must_use]
    pub fn with_rack(mut self, id: impl Into<String>) -> Self {
        self.rack = Some(id.into());
        self
    }

    /// Prefers a data node for the main replica.
    #[must_use]
    pub fn with_data_node(mut self, id: impl Into<String>) -> Self {
        self.data_node = Some(id.into());
        self
    }

    /// Layout the grown volumes are registered under.
    #[must_use]
    pub fn layout_key(&self) -> LayoutKey {
        LayoutKey::new(self.collection.clone(), self.replica_placement, self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let option = VolumeGrowOption::new("011".parse().unwrap())
            .with_collection("pics")
            .with_ttl("7d".parse().unwrap())
            .with_data_center("dc1")
            .with_rack("r2");

        assert_eq!(option.replica_placement.copy_count(), 3);
        assert_eq!(option.collection, "pics");
        assert_eq!(option.data_center.as_deref(), Some("dc1"));
        assert_eq!(option.rack.as_deref(), Some("r2"));
        assert!(option.data_node.is_none());
        assert_eq!(option.layout_key().ttl.to_string(), "7d");
    }

    #[test]
    fn test_from_config() {
        let config = GrowthConfig {
            default_replication: "100".parse().unwrap(),
            preallocate_bytes: 4096,
            ..GrowthConfig::default()
        };
        let option = VolumeGrowOption::from_config(&config);
        assert_eq!(option.replica_placement.to_string(), "100");
        assert_eq!(option.preallocate, 4096);
        assert!(option.ttl.is_empty());
    }
}
