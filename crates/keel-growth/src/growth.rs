//! The volume growth engine.
//!
//! Growing a volume is select-then-commit:
//!
//! 1. **Select**: walk the topology top-down and pick one data node per replica,
//!    honoring the replica placement and any preferred location. Selection only
//!    reads the tree.
//! 2. **Commit**: for each selected node in turn, ask it to create the volume,
//!    then record the replica in the tree and the layout registry.
//!
//! A commit that fails part way leaves the replicas created so far in place.
//! The volume stays under-replicated and is never offered for writes (the
//! layout registry requires every replica), so a reconciliation pass can finish
//! or reclaim it later. Nothing is retried within a growth call.

use std::sync::Arc;
use std::time::Instant;

use keel_core::{GrowthConfig, VolumeId, VolumeInfo};
use keel_topology::{
    DataNodeInfo, NodeIndex, NodeRef, NodeTier, NodeTree, PlacementError, RejectCause, Topology,
    TopologyError, Unsatisfied,
};
use metrics::{counter, histogram};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::allocator::{AllocateVolumeRequest, VolumeAllocator};
use crate::error::{GrowthError, Result};
use crate::option::VolumeGrowOption;

/// Number of volumes to grow at once for a given copy count.
///
/// Low replication grows in larger batches, since each volume costs few slots.
#[must_use]
pub fn desired_volume_count(copy_count: usize) -> usize {
    match copy_count {
        1 => 7,
        2 => 6,
        3 => 3,
        _ => 1,
    }
}

/// Outcome of a growth call.
///
/// Growth stops at the first failure, so a report can carry both progress and an error.
#[derive(Debug, Default)]
pub struct GrowReport {
    /// Volumes fully created.
    pub volumes: usize,
    /// Replicas created across those volumes.
    pub replicas: usize,
    /// The failure that stopped growth, if any.
    pub error: Option<GrowthError>,
}

impl GrowReport {
    /// Returns true if growth ran to completion.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Converts the report into the number of replicas created, or the error.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped growth, discarding the partial progress.
    pub fn into_result(self) -> Result<usize> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.replicas),
        }
    }
}

/// Selection could not find a node for every replica.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{error} ({} node(s) chosen before failing)", .chosen.len())]
pub struct SelectionFailure {
    /// Nodes picked before the failure. Nothing has been provisioned on them.
    pub chosen: Vec<DataNodeInfo>,
    /// Why selection failed.
    #[source]
    pub error: PlacementError,
}

impl SelectionFailure {
    fn new(error: impl Into<PlacementError>) -> Self {
        Self { chosen: Vec::new(), error: error.into() }
    }
}

/// Grows volumes on a topology.
///
/// Every growth call holds the engine lock from the first selection to the
/// last commit, including remote allocator calls, so growth on one engine is
/// serialized. The lock also guards the engine's random source.
pub struct VolumeGrowth {
    rng: Mutex<StdRng>,
    allocator: Arc<dyn VolumeAllocator>,
}

impl VolumeGrowth {
    /// Creates an engine with an entropy-seeded random source.
    pub fn new(allocator: Arc<dyn VolumeAllocator>) -> Self {
        Self { rng: Mutex::new(StdRng::from_entropy()), allocator }
    }

    /// Creates an engine with a fixed seed, for reproducible placement.
    pub fn with_seed(allocator: Arc<dyn VolumeAllocator>, seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)), allocator }
    }

    /// Creates an engine seeded from configuration.
    pub fn from_config(config: &GrowthConfig, allocator: Arc<dyn VolumeAllocator>) -> Self {
        match config.rng_seed {
            Some(seed) => Self::with_seed(allocator, seed),
            None => Self::new(allocator),
        }
    }

    /// Grows the default batch of volumes for the option's copy count.
    ///
    /// If the replicas created are a positive multiple of the copy count, the
    /// call counts as successful: the error, if any, is logged and dropped.
    pub async fn automatic_grow(
        &self,
        topology: &Topology,
        option: &VolumeGrowOption,
    ) -> GrowReport {
        let copy_count = option.replica_placement.copy_count();
        let target = desired_volume_count(copy_count);
        let mut report = self.grow_by_count_and_type(target, topology, option).await;

        if report.replicas > 0 && report.replicas % copy_count == 0 {
            if let Some(error) = report.error.take() {
                warn!(
                    replication = %option.replica_placement,
                    volumes = report.volumes,
                    target,
                    error = %error,
                    "Automatic growth stopped early"
                );
            }
        }
        report
    }

    /// Grows up to `target` volumes, one after another, stopping at the first failure.
    pub async fn grow_by_count_and_type(
        &self,
        target: usize,
        topology: &Topology,
        option: &VolumeGrowOption,
    ) -> GrowReport {
        let mut rng = self.rng.lock().await;
        let start = Instant::now();
        let mut report = GrowReport::default();

        for _ in 0..target {
            let servers = match Self::find_empty_slots_for_one_volume(topology, option, &mut *rng) {
                Ok(servers) => servers,
                Err(failure) => {
                    counter!("keel_volume_grow_failures_total", "reason" => "placement")
                        .increment(1);
                    report.error = Some(GrowthError::Placement(failure.error));
                    break;
                }
            };

            let committed = match topology.next_volume_id() {
                Ok(volume_id) => self.grow(topology, volume_id, option, &servers).await,
                Err(error) => Err(error.into()),
            };
            match committed {
                Ok(()) => {
                    report.volumes += 1;
                    report.replicas += servers.len();
                }
                Err(error) => {
                    let reason = match error {
                        GrowthError::Placement(_) => "placement",
                        GrowthError::Provisioning { .. } => "provisioning",
                        GrowthError::Topology(_) => "topology",
                    };
                    counter!("keel_volume_grow_failures_total", "reason" => reason).increment(1);
                    report.error = Some(error);
                    break;
                }
            }
        }

        histogram!("keel_volume_grow_duration_seconds").record(start.elapsed().as_secs_f64());
        match &report.error {
            None => debug!(
                volumes = report.volumes,
                replicas = report.replicas,
                "Volume growth finished"
            ),
            Some(error) => warn!(
                volumes = report.volumes,
                target,
                error = %error,
                "Volume growth stopped"
            ),
        }
        report
    }

    /// Picks one data node per replica for a new volume.
    ///
    /// Data centers, racks and data nodes are chosen top-down. At each tier the
    /// main child must match the preferred location, if any, and hold enough free
    /// slots for every replica placed beneath it; the other children need one
    /// free slot. The main rack contributes its main node and siblings; every
    /// other rack and data center contributes one node picked by a draw weighted
    /// on free space.
    ///
    /// # Errors
    ///
    /// Returns the nodes chosen so far together with the placement error.
    pub fn find_empty_slots_for_one_volume<R>(
        topology: &Topology,
        option: &VolumeGrowOption,
        rng: &mut R,
    ) -> std::result::Result<Vec<DataNodeInfo>, SelectionFailure>
    where
        R: Rng + ?Sized,
    {
        topology.with_tree(|tree| select_nodes(tree, option, rng))
    }

    /// Creates `volume_id` on every server in order and records each replica.
    ///
    /// # Errors
    ///
    /// Returns the first failure. Replicas committed before it are kept.
    pub async fn grow(
        &self,
        topology: &Topology,
        volume_id: VolumeId,
        option: &VolumeGrowOption,
        servers: &[DataNodeInfo],
    ) -> Result<()> {
        let info = VolumeInfo::new(
            volume_id,
            option.collection.clone(),
            option.replica_placement,
            option.ttl,
        );
        let request = AllocateVolumeRequest::new(&info, option.preallocate);

        for server in servers {
            if let Err(source) = self.allocator.allocate_volume(server, &request).await {
                warn!(
                    volume_id = %volume_id,
                    node = %server,
                    error = %source,
                    "Failed to allocate volume"
                );
                return Err(GrowthError::Provisioning {
                    volume_id,
                    node: server.url.clone(),
                    source,
                });
            }
            counter!("keel_replica_allocations_total").increment(1);

            topology.add_or_update_volume(server.index, info.clone())?;
            topology.register_volume_layout(&info, server.index)?;
            info!(
                volume_id = %volume_id,
                node = %server,
                collection = %info.collection,
                replication = %info.replica_placement,
                "Created volume"
            );
        }
        counter!("keel_volumes_grown_total").increment(1);
        Ok(())
    }
}

fn select_nodes<R>(
    tree: &NodeTree,
    option: &VolumeGrowOption,
    rng: &mut R,
) -> std::result::Result<Vec<DataNodeInfo>, SelectionFailure>
where
    R: Rng + ?Sized,
{
    let rp = option.replica_placement;

    let dc_slots = rp.diff_rack_count() + rp.same_rack_count() + 1;
    let (main_dc, other_dcs) = tree
        .pick_nodes(tree.root(), rp.diff_data_center_count() + 1, rng, |node| {
            qualify(node, option.data_center.as_deref(), dc_slots)
        })
        .map_err(SelectionFailure::new)?;

    let rack_slots = rp.same_rack_count() + 1;
    let (main_rack, other_racks) = tree
        .pick_nodes(main_dc, rp.diff_rack_count() + 1, rng, |node| {
            qualify(node, option.rack.as_deref(), rack_slots)
        })
        .map_err(SelectionFailure::new)?;

    let (main_node, other_nodes) = tree
        .pick_nodes(main_rack, rp.same_rack_count() + 1, rng, |node| {
            qualify(node, option.data_node.as_deref(), 1)
        })
        .map_err(SelectionFailure::new)?;

    let mut chosen = Vec::with_capacity(rp.copy_count());
    for index in std::iter::once(main_node).chain(other_nodes) {
        chosen.push(snapshot(tree, index).map_err(SelectionFailure::new)?);
    }

    for subtree in other_racks.into_iter().chain(other_dcs) {
        match reserve_in(tree, subtree, rng) {
            Ok(info) => chosen.push(info),
            Err(error) => return Err(SelectionFailure { chosen, error }),
        }
    }
    debug!(
        replication = %rp,
        nodes = ?chosen.iter().map(|n| n.url.as_str()).collect::<Vec<_>>(),
        "Selected nodes for new volume"
    );
    Ok(chosen)
}

fn qualify(
    node: NodeRef<'_>,
    preferred: Option<&str>,
    slots: usize,
) -> std::result::Result<(), RejectCause> {
    if let Some(preferred) = preferred {
        if node.id() != preferred {
            return Err(RejectCause::PreferenceMismatch { preferred: preferred.to_string() });
        }
    }
    let required = i64::try_from(slots).unwrap_or(i64::MAX);
    if node.free_space() < required {
        return Err(RejectCause::InsufficientCapacity { free: node.free_space(), required });
    }
    Ok(())
}

fn reserve_in<R>(
    tree: &NodeTree,
    subtree: NodeIndex,
    rng: &mut R,
) -> std::result::Result<DataNodeInfo, PlacementError>
where
    R: Rng + ?Sized,
{
    let free = tree.free_space(subtree)?;
    if free <= 0 {
        let node = tree.node(subtree).ok_or(TopologyError::NodeNotFound(subtree))?;
        return Err(PlacementError::ConstraintUnsatisfiable {
            tier: node.tier(),
            reason: Unsatisfied::NoFreeSlot { subtree: node.id().to_string() },
        });
    }
    let index = tree.reserve_one_volume(subtree, rng.gen_range(0..free))?;
    Ok(snapshot(tree, index)?)
}

fn snapshot(tree: &NodeTree, index: NodeIndex) -> std::result::Result<DataNodeInfo, TopologyError> {
    tree.data_node_info(index).ok_or_else(|| match tree.node(index) {
        Some(node) => TopologyError::WrongTier {
            node: node.id().to_string(),
            expected: NodeTier::DataNode,
            actual: node.tier(),
        },
        None => TopologyError::NodeNotFound(index),
    })
}
