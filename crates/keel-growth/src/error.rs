//! Error types for volume growth.

use keel_core::VolumeId;
use keel_topology::{PlacementError, TopologyError};
use thiserror::Error;

use crate::allocator::AllocateError;

/// Result type for growth operations.
pub type Result<T> = std::result::Result<T, GrowthError>;

/// Why growing one volume failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrowthError {
    /// No node set satisfies the placement policy. Nothing was provisioned.
    #[error("placement failed: {0}")]
    Placement(#[from] PlacementError),

    /// A storage node refused or could not be reached.
    ///
    /// Replicas committed before the failure stay in place.
    #[error("failed to provision volume {volume_id} on {node}: {source}")]
    Provisioning {
        /// Id of the volume being created.
        volume_id: VolumeId,
        /// Url of the failing node.
        node: String,
        /// The allocator error.
        #[source]
        source: AllocateError,
    },

    /// The topology rejected commit bookkeeping, e.g. because a node left mid-grow.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl GrowthError {
    /// Returns true if the failure happened before anything was provisioned.
    #[must_use]
    pub fn is_placement(&self) -> bool {
        matches!(self, Self::Placement(_))
    }
}
