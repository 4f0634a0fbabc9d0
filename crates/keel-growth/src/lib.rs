//! Volume growth for the keel master.
//!
//! When a collection runs out of writable volumes the master grows new ones:
//! it picks a set of data nodes that satisfies the replica placement, asks each
//! of them to create the volume through a [`VolumeAllocator`], and records the
//! replicas in the [`keel_topology::Topology`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use keel_growth::{NoOpVolumeAllocator, VolumeGrowOption, VolumeGrowth};
//!
//! let growth = VolumeGrowth::with_seed(Arc::new(NoOpVolumeAllocator), 42);
//! let option = VolumeGrowOption::new("001".parse()?);
//! let report = growth.automatic_grow(&topology, &option).await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocator;
pub mod error;
pub mod growth;
pub mod http_allocator;
pub mod option;

pub use allocator::{AllocateError, AllocateVolumeRequest, NoOpVolumeAllocator, VolumeAllocator};
pub use error::{GrowthError, Result};
pub use growth::{desired_volume_count, GrowReport, SelectionFailure, VolumeGrowth};
pub use http_allocator::{HttpVolumeAllocator, ASSIGN_VOLUME_PATH};
pub use option::VolumeGrowOption;
