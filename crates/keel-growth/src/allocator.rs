//! Provisioning seam: asks a storage node to create a volume.

use async_trait::async_trait;
use keel_core::{VolumeId, VolumeInfo};
use keel_topology::DataNodeInfo;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parameters sent to a storage node to create one volume replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateVolumeRequest {
    /// Id of the new volume.
    pub volume: VolumeId,
    /// Collection name.
    pub collection: String,
    /// Replica placement in its string form.
    pub replication: String,
    /// TTL in its string form, empty for none.
    pub ttl: String,
    /// Bytes to preallocate.
    pub preallocate: u64,
}

impl AllocateVolumeRequest {
    /// Builds the request for the replica described by `info`.
    #[must_use]
    pub fn new(info: &VolumeInfo, preallocate: u64) -> Self {
        Self {
            volume: info.id,
            collection: info.collection.clone(),
            replication: info.replica_placement.to_string(),
            ttl: info.ttl.to_string(),
            preallocate,
        }
    }
}

/// A storage node failed to create a volume.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocateError {
    /// The node answered and refused.
    #[error("{node} rejected allocation: {reason}")]
    Rejected {
        /// Url of the node.
        node: String,
        /// Error reported by the node.
        reason: String,
    },

    /// The node could not be reached or its answer could not be read.
    #[error("failed to reach {node}: {reason}")]
    Transport {
        /// Url of the node.
        node: String,
        /// Transport error.
        reason: String,
    },

    /// The node answered with a non-success status.
    #[error("{node} answered with status {status}")]
    Status {
        /// Url of the node.
        node: String,
        /// HTTP status code.
        status: u16,
    },
}

/// Creates volumes on storage nodes.
#[async_trait]
pub trait VolumeAllocator: Send + Sync {
    /// Asks `node` to create the volume described by `request`.
    async fn allocate_volume(
        &self,
        node: &DataNodeInfo,
        request: &AllocateVolumeRequest,
    ) -> Result<(), AllocateError>;
}

/// An allocator that accepts every request without contacting anyone.
pub struct NoOpVolumeAllocator;

#[async_trait]
impl VolumeAllocator for NoOpVolumeAllocator {
    async fn allocate_volume(
        &self,
        _node: &DataNodeInfo,
        _request: &AllocateVolumeRequest,
    ) -> Result<(), AllocateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keel_core::Ttl;
    use keel_topology::Topology;

    use super::*;

    #[test]
    fn test_request_from_info() {
        let info = VolumeInfo::new(
            VolumeId::new(42),
            "pics",
            "010".parse().unwrap(),
            "3d".parse::<Ttl>().unwrap(),
        );
        let request = AllocateVolumeRequest::new(&info, 1024);
        assert_eq!(request.volume, VolumeId::new(42));
        assert_eq!(request.collection, "pics");
        assert_eq!(request.replication, "010");
        assert_eq!(request.ttl, "3d");
        assert_eq!(request.preallocate, 1024);
    }

    #[tokio::test]
    async fn test_no_op_allocator() {
        let topology = Topology::new();
        let dc = topology.add_data_center("dc1").unwrap();
        let rack = topology.add_rack(dc, "r1").unwrap();
        topology.add_data_node(rack, "a:8080", "", 1).unwrap();
        let node = topology.data_node("a:8080").unwrap();

        let info = VolumeInfo::new(VolumeId::new(1), "", Default::default(), Ttl::EMPTY);
        let result = NoOpVolumeAllocator
            .allocate_volume(&node, &AllocateVolumeRequest::new(&info, 0))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = AllocateError::Status { node: "a:8080".to_string(), status: 503 };
        assert_eq!(err.to_string(), "a:8080 answered with status 503");
    }
}
