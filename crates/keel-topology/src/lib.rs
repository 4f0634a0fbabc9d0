//! Cluster topology for the keel master.
//!
//! This crate models the storage cluster as a three-tier failure-domain tree:
//!
//! ```text
//! topo
//! ├── dc1
//! │   ├── rack1
//! │   │   ├── 10.0.0.1:8080
//! │   │   └── 10.0.0.2:8080
//! │   └── rack2
//! │       └── 10.0.0.3:8080
//! └── dc2
//!     └── rack1
//!         └── 10.1.0.1:8080
//! ```
//!
//! Every node tracks its free volume slots, aggregated bottom-up. The tree offers
//! the two selection primitives replica placement is built from
//! ([`NodeTree::pick_nodes`] and [`NodeTree::reserve_one_volume`]), and
//! [`Topology`] wraps it with the volume layout registry and the volume id
//! sequence behind a shared lock.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod layout;
pub mod node;
pub mod topology;

pub use error::{PlacementError, RejectCause, Rejection, TopologyError, Unsatisfied};
pub use layout::{LayoutKey, VolumeLayout, VolumeLayoutRegistry};
pub use node::{DataNodeInfo, NodeIndex, NodeRef, NodeTier, NodeTree, ROOT_ID};
pub use topology::Topology;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;
