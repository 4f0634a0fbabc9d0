//! Command handlers.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use keel_core::{Config, ReplicaPlacement, Ttl};
use keel_growth::{
    GrowReport, HttpVolumeAllocator, NoOpVolumeAllocator, VolumeAllocator, VolumeGrowOption,
    VolumeGrowth,
};
use keel_topology::{NodeIndex, NodeTier, NodeTree, Topology};
use serde::Serialize;
use tracing::info;

use crate::cli::{GrowArgs, OutputFormat, TopologyArgs};

/// Result of a grow command.
#[derive(Debug, Serialize)]
pub struct GrowOutput {
    /// Replica placement used.
    pub replication: String,
    /// Volumes fully created.
    pub volumes: usize,
    /// Replicas created.
    pub replicas: usize,
    /// Volume ids created, with the urls hosting them.
    pub placements: Vec<Placement>,
    /// Error that stopped growth, if any.
    pub error: Option<String>,
}

/// Where one volume landed.
#[derive(Debug, Serialize)]
pub struct Placement {
    /// Volume id.
    pub volume_id: u32,
    /// Urls of the data nodes hosting a replica.
    pub nodes: Vec<String>,
}

/// One node of the printed topology.
#[derive(Debug, Serialize)]
pub struct NodeView {
    /// Node id.
    pub id: String,
    /// Tier name.
    pub tier: String,
    /// Volume slots.
    pub max_volume_count: i64,
    /// Volumes hosted.
    pub volume_count: i64,
    /// Free volume slots.
    pub free_space: i64,
    /// Child nodes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeView>,
}

/// Builds the grow option from configured defaults and command line overrides.
pub fn grow_option(config: &Config, args: &GrowArgs) -> Result<VolumeGrowOption> {
    let mut option =
        VolumeGrowOption::from_config(&config.growth).with_collection(args.collection.clone());
    if let Some(replication) = &args.replication {
        let rp: ReplicaPlacement = replication.parse().context("Invalid --replication")?;
        option.replica_placement = rp;
    }
    if let Some(ttl) = &args.ttl {
        let ttl: Ttl = ttl.parse().context("Invalid --ttl")?;
        option = option.with_ttl(ttl);
    }
    if let Some(dc) = &args.data_center {
        option = option.with_data_center(dc.clone());
    }
    if let Some(rack) = &args.rack {
        option = option.with_rack(rack.clone());
    }
    if let Some(node) = &args.data_node {
        option = option.with_data_node(node.clone());
    }
    Ok(option)
}

/// Handle the grow command.
pub async fn handle_grow(config: &Config, args: GrowArgs) -> Result<()> {
    let option = grow_option(config, &args)?;
    let topology = Topology::from_config(&config.cluster).context("Failed to build topology")?;
    if topology.data_nodes().is_empty() {
        bail!("No data nodes configured; add [[cluster.data_nodes]] entries");
    }

    let allocator: Arc<dyn VolumeAllocator> = if args.dry_run {
        Arc::new(NoOpVolumeAllocator)
    } else {
        let allocator = HttpVolumeAllocator::from_config(&config.allocator)
            .context("Failed to create allocator")?;
        Arc::new(allocator)
    };
    let growth = VolumeGrowth::from_config(&config.growth, allocator);

    info!(
        replication = %option.replica_placement,
        collection = %option.collection,
        dry_run = args.dry_run,
        "Growing volumes"
    );
    let previous_max = topology.max_volume_id().get();
    let report = match args.count {
        Some(count) => growth.grow_by_count_and_type(count, &topology, &option).await,
        None => growth.automatic_grow(&topology, &option).await,
    };

    let output = grow_output(&topology, &option, previous_max, &report);
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => print_grow_text(&output),
    }

    if let Some(error) = report.error {
        return Err(error).context("Volume growth did not complete");
    }
    Ok(())
}

fn grow_output(
    topology: &Topology,
    option: &VolumeGrowOption,
    previous_max: u32,
    report: &GrowReport,
) -> GrowOutput {
    let placements = (previous_max..topology.max_volume_id().get())
        .map(|id| id + 1)
        .map(|id| Placement {
            volume_id: id,
            nodes: topology.lookup(id.into()).into_iter().map(|n| n.url).collect(),
        })
        .collect();
    GrowOutput {
        replication: option.replica_placement.to_string(),
        volumes: report.volumes,
        replicas: report.replicas,
        placements,
        error: report.error.as_ref().map(ToString::to_string),
    }
}

fn print_grow_text(output: &GrowOutput) {
    println!(
        "Grew {} volume(s), {} replica(s), replication {}",
        output.volumes, output.replicas, output.replication
    );
    for placement in &output.placements {
        println!("  volume {:<6} {}", placement.volume_id, placement.nodes.join(", "));
    }
    if let Some(error) = &output.error {
        println!("Stopped: {error}");
    }
}

/// Handle the topology command.
pub fn handle_topology(config: &Config, args: &TopologyArgs) -> Result<()> {
    let topology = Topology::from_config(&config.cluster).context("Failed to build topology")?;
    let view = topology
        .with_tree(|tree| node_view(tree, tree.root()))
        .context("Topology changed while rendering")?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Text => print_node_text(&view, 0),
    }
    Ok(())
}

/// Renders the subtree under `index`.
pub fn node_view(tree: &NodeTree, index: NodeIndex) -> Option<NodeView> {
    let node = tree.node(index)?;
    let children = node.children().filter_map(|c| node_view(tree, c.index())).collect();
    Some(NodeView {
        id: node.id().to_string(),
        tier: node.tier().to_string(),
        max_volume_count: node.max_volume_count(),
        volume_count: node.volume_count(),
        free_space: node.free_space(),
        children,
    })
}

fn print_node_text(view: &NodeView, depth: usize) {
    let label = if view.tier == NodeTier::Topology.to_string() { "" } else { view.tier.as_str() };
    println!(
        "{:indent$}{} {} free {}/{}",
        "",
        label,
        view.id,
        view.free_space,
        view.max_volume_count,
        indent = depth * 2
    );
    for child in &view.children {
        print_node_text(child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use keel_core::DataNodeConfig;

    use super::*;

    fn args() -> GrowArgs {
        GrowArgs {
            config: None,
            replication: None,
            collection: String::new(),
            ttl: None,
            count: None,
            data_center: None,
            rack: None,
            data_node: None,
            dry_run: true,
            format: OutputFormat::Text,
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.growth.default_replication = "001".parse().unwrap();
        config.cluster.data_nodes = (0..3)
            .map(|i| DataNodeConfig {
                data_center: "dc1".to_string(),
                rack: "r1".to_string(),
                url: format!("10.0.0.{i}:8080"),
                public_url: None,
                max_volumes: 4,
            })
            .collect();
        config
    }

    #[test]
    fn test_grow_option_defaults() {
        let option = grow_option(&config(), &args()).unwrap();
        assert_eq!(option.replica_placement.to_string(), "001");
        assert!(option.ttl.is_empty());
    }

    #[test]
    fn test_grow_option_overrides() {
        let mut args = args();
        args.replication = Some("010".to_string());
        args.ttl = Some("2w".to_string());
        args.rack = Some("r1".to_string());
        let option = grow_option(&config(), &args).unwrap();
        assert_eq!(option.replica_placement.to_string(), "010");
        assert_eq!(option.ttl.to_string(), "2w");
        assert_eq!(option.rack.as_deref(), Some("r1"));
    }

    #[test]
    fn test_grow_option_rejects_bad_replication() {
        let mut args = args();
        args.replication = Some("abc".to_string());
        assert!(grow_option(&config(), &args).is_err());
    }

    #[test]
    fn test_node_view() {
        let topology = Topology::from_config(&config().cluster).unwrap();
        let view = topology.with_tree(|tree| node_view(tree, tree.root())).unwrap();
        assert_eq!(view.free_space, 12);
        assert_eq!(view.children.len(), 1);
        assert_eq!(view.children[0].tier, "data center");
        assert_eq!(view.children[0].children[0].children.len(), 3);
    }

    #[tokio::test]
    async fn test_dry_run_grow_output() {
        let config = config();
        let topology = Topology::from_config(&config.cluster).unwrap();
        let option = grow_option(&config, &args()).unwrap();
        let growth = VolumeGrowth::with_seed(Arc::new(NoOpVolumeAllocator), 1);

        let report = growth.grow_by_count_and_type(2, &topology, &option).await;
        let output = grow_output(&topology, &option, 0, &report);
        assert_eq!(output.volumes, 2);
        assert_eq!(output.placements.len(), 2);
        assert!(output.placements.iter().all(|p| p.nodes.len() == 2));
        assert!(output.error.is_none());
    }
}
