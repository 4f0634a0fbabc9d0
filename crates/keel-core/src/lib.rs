//! Core types and utilities for the keel volume placement engine.
//!
//! This crate provides the building blocks shared by the topology and growth crates:
//! - Replica placement policies and volume TTLs
//! - Volume identifiers and the per-volume record registered on commit
//! - Configuration management
//! - Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AllocatorConfig, ClusterConfig, Config, DataNodeConfig, GrowthConfig, LogFormat,
    LoggingConfig,
};
pub use error::{Error, Result};
pub use types::{
    ParseReplicaPlacementError, ParseTtlError, ReplicaPlacement, Ttl, TtlUnit, VolumeId,
    VolumeInfo, CURRENT_VERSION,
};
