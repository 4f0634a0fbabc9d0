//! Integration tests for the shared topology under concurrent heartbeats.

use std::sync::Arc;

use keel_core::{ReplicaPlacement, Ttl, VolumeId, VolumeInfo};
use keel_topology::{LayoutKey, NodeIndex, NodeTier, NodeTree, Topology};

fn build_topology(dcs: usize, racks: usize, nodes: usize, slots: i64) -> Topology {
    let topology = Topology::new();
    for d in 0..dcs {
        let dc = topology.add_data_center(&format!("dc{d}")).unwrap();
        for r in 0..racks {
            let rack = topology.add_rack(dc, &format!("rack{r}")).unwrap();
            for n in 0..nodes {
                topology
                    .add_data_node(rack, &format!("10.{d}.{r}.{n}:8080"), "", slots)
                    .unwrap();
            }
        }
    }
    topology
}

fn subtree_leaf_free(tree: &NodeTree, index: NodeIndex) -> i64 {
    let node = tree.node(index).unwrap();
    if node.tier() == NodeTier::DataNode {
        return node.free_space();
    }
    node.children().map(|c| subtree_leaf_free(tree, c.index())).sum()
}

fn assert_aggregates_consistent(topology: &Topology) {
    topology.with_tree(|tree| {
        let mut stack = vec![tree.root()];
        while let Some(index) = stack.pop() {
            let node = tree.node(index).unwrap();
            assert_eq!(node.free_space(), subtree_leaf_free(tree, index), "at {}", node.id());
            stack.extend(node.children().map(|c| c.index()));
        }
    });
}

#[tokio::test]
async fn test_concurrent_heartbeats_keep_aggregates() {
    let topology = Arc::new(build_topology(2, 2, 3, 10));
    let nodes = topology.data_nodes();
    assert_eq!(nodes.len(), 12);

    let mut handles = Vec::new();
    for (i, node) in nodes.into_iter().enumerate() {
        let topology = Arc::clone(&topology);
        handles.push(tokio::spawn(async move {
            for v in 0..5u32 {
                let id = VolumeId::new(i as u32 * 100 + v);
                let info = VolumeInfo::new(id, "", ReplicaPlacement::default(), Ttl::EMPTY);
                topology.add_or_update_volume(node.index, info.clone()).unwrap();
                topology.register_volume_layout(&info, node.index).unwrap();
                tokio::task::yield_now().await;
            }
            topology.delete_volume(node.index, VolumeId::new(i as u32 * 100)).unwrap();
            topology.set_max_volume_count(node.index, 8).unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 12 nodes * (8 slots - 4 volumes)
    assert_eq!(topology.free_space(topology.root()).unwrap(), 48);
    assert_aggregates_consistent(&topology);

    let key = LayoutKey::new("", ReplicaPlacement::default(), Ttl::EMPTY);
    assert_eq!(topology.active_volume_count(&key), 48);
}

#[tokio::test]
async fn test_node_loss_releases_layouts() {
    let topology = build_topology(1, 2, 2, 4);
    let nodes = topology.data_nodes();
    let rp: ReplicaPlacement = "010".parse().unwrap();
    let info = VolumeInfo::new(VolumeId::new(1), "", rp, Ttl::EMPTY);

    // One replica in each rack.
    for node in [&nodes[0], &nodes[2]] {
        topology.add_or_update_volume(node.index, info.clone()).unwrap();
        topology.register_volume_layout(&info, node.index).unwrap();
    }
    let key = LayoutKey::new("", rp, Ttl::EMPTY);
    assert_eq!(topology.writable_volumes(&key), vec![VolumeId::new(1)]);

    topology.unlink_data_node(nodes[2].index).unwrap();
    assert!(topology.writable_volumes(&key).is_empty());
    assert_eq!(topology.lookup(VolumeId::new(1)).len(), 1);
    assert_eq!(topology.free_space(topology.root()).unwrap(), 11);
    assert_aggregates_consistent(&topology);
}
