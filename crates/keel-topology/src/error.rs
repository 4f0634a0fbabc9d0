//! Error types for topology mutation and replica placement.

use keel_core::VolumeId;
use thiserror::Error;

use crate::node::{NodeIndex, NodeTier};

/// Errors raised when mutating or querying the node tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// The node index does not refer to a live node.
    #[error("node {0} not found")]
    NodeNotFound(NodeIndex),

    /// The node exists but sits at a different tier than the operation needs.
    #[error("'{node}' is a {actual}, expected a {expected}")]
    WrongTier {
        /// Id of the offending node.
        node: String,
        /// Tier the operation needs.
        expected: NodeTier,
        /// Tier the node actually has.
        actual: NodeTier,
    },

    /// A data node with this url is already registered under another rack.
    #[error("data node '{url}' already registered under rack '{rack}'")]
    DataNodeMoved {
        /// Url of the data node.
        url: String,
        /// Rack it is currently registered under.
        rack: String,
    },

    /// Every volume id has been handed out.
    #[error("volume id sequence exhausted at {0}")]
    VolumeIdExhausted(VolumeId),
}

/// Why a child node was not accepted as a placement candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RejectCause {
    /// A preferred node is set at this tier and this is not it.
    #[error("does not match preferred '{preferred}'")]
    PreferenceMismatch {
        /// The preferred node id.
        preferred: String,
    },

    /// The subtree does not have enough free volume slots.
    #[error("free {free} < expected {required}")]
    InsufficientCapacity {
        /// Free slots in the subtree.
        free: i64,
        /// Slots the subtree must provide.
        required: i64,
    },
}

/// A rejected candidate and the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Id of the rejected node.
    pub node: String,
    /// Why it was rejected.
    pub cause: RejectCause,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.node, self.cause)
    }
}

/// The predicate that could not be met at some tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsatisfied {
    /// Fewer distinct children qualified than the policy needs.
    TooFewCandidates {
        /// Distinct children needed.
        required: usize,
        /// Distinct children that qualified.
        qualified: usize,
        /// Every child that was turned down.
        rejections: Vec<Rejection>,
    },

    /// A weighted reservation found no data node with a free slot.
    NoFreeSlot {
        /// Id of the subtree that was searched.
        subtree: String,
    },
}

impl std::fmt::Display for Unsatisfied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewCandidates { required, qualified, rejections } => {
                write!(f, "need {required} distinct nodes, found {qualified}")?;
                if !rejections.is_empty() {
                    write!(f, " (")?;
                    for (i, rejection) in rejections.iter().enumerate() {
                        if i > 0 {
                            write!(f, "; ")?;
                        }
                        write!(f, "{rejection}")?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            Self::NoFreeSlot { subtree } => write!(f, "no free volume slot under '{subtree}'"),
        }
    }
}

/// Errors raised while selecting nodes for a new volume.
///
/// Selection never mutates the tree, so any of these leaves the topology untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlacementError {
    /// The placement policy cannot be met at the given tier.
    #[error("cannot place replicas at {tier} tier: {reason}")]
    ConstraintUnsatisfiable {
        /// Tier at which the search failed.
        tier: NodeTier,
        /// The unmet predicate.
        reason: Unsatisfied,
    },

    /// The tree changed shape under the search.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl PlacementError {
    /// Returns the tier at which placement failed, if it was a constraint failure.
    #[must_use]
    pub fn tier(&self) -> Option<NodeTier> {
        match self {
            Self::ConstraintUnsatisfiable { tier, .. } => Some(*tier),
            Self::Topology(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsatisfied_display() {
        let err = PlacementError::ConstraintUnsatisfiable {
            tier: NodeTier::DataNode,
            reason: Unsatisfied::TooFewCandidates {
                required: 3,
                qualified: 2,
                rejections: vec![Rejection {
                    node: "10.0.0.4:8080".to_string(),
                    cause: RejectCause::InsufficientCapacity { free: 0, required: 1 },
                }],
            },
        };
        assert_eq!(
            err.to_string(),
            "cannot place replicas at data node tier: need 3 distinct nodes, found 2 \
             (10.0.0.4:8080: free 0 < expected 1)"
        );
        assert_eq!(err.tier(), Some(NodeTier::DataNode));
    }

    #[test]
    fn test_no_free_slot_display() {
        let err = PlacementError::ConstraintUnsatisfiable {
            tier: NodeTier::Rack,
            reason: Unsatisfied::NoFreeSlot { subtree: "rack2".to_string() },
        };
        assert_eq!(
            err.to_string(),
            "cannot place replicas at rack tier: no free volume slot under 'rack2'"
        );
    }

    #[test]
    fn test_preference_mismatch_display() {
        let cause = RejectCause::PreferenceMismatch { preferred: "dc1".to_string() };
        assert_eq!(cause.to_string(), "does not match preferred 'dc1'");
    }
}
