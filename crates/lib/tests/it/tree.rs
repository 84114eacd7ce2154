//! Convergence properties of the replicated tree.
//!
//! Any two trees that have applied the same set of operations, in any
//! delivery order and with any amount of redelivery, hold the same nodes
//! and the same log, and no node is ever its own ancestor.

use std::collections::HashSet;

use arbor::{NodeId, Operation, OperationId, ReplicatedTree, TreeNode};
use proptest::prelude::*;

use crate::helpers::op;

const POOL: usize = 6;
const NAMES: [&str; 4] = ["a", "b", "c", "d"];

fn pool(i: usize) -> NodeId {
    NodeId::from_uuid(uuid::Uuid::from_u128(100 + i as u128))
}

/// Moves among a small pool of nodes from three replicas. Timestamps
/// advance every second operation so ties between replicas are common.
fn ops_strategy() -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec((0..3usize, 0..POOL, 0..POOL + 2, 0..NAMES.len()), 1..40).prop_map(
        |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (replica, node, parent, name))| {
                    let parent = match parent {
                        p if p == POOL => NodeId::VIRTUAL_ROOT,
                        p if p == POOL + 1 => NodeId::TRASH_ROOT,
                        p => pool(p),
                    };
                    op(
                        &format!("r{replica}"),
                        1_000 + (i / 2) as u64,
                        pool(node),
                        parent,
                        Some(NodeId::VIRTUAL_ROOT),
                        NAMES[name],
                    )
                })
                .collect()
        },
    )
}

fn ops_and_permutation() -> impl Strategy<Value = (Vec<Operation>, Vec<Operation>)> {
    ops_strategy().prop_flat_map(|ops| {
        let shuffled = Just(ops.clone()).prop_shuffle();
        (Just(ops), shuffled)
    })
}

fn sorted_nodes(tree: &ReplicatedTree) -> Vec<TreeNode> {
    let mut nodes: Vec<TreeNode> = tree.nodes().map(|n| TreeNode::clone(n)).collect();
    nodes.sort_by_key(|n| n.id);
    nodes
}

fn log_ids(tree: &ReplicatedTree) -> Vec<OperationId> {
    tree.log().map(|entry| entry.op.id).collect()
}

fn assert_acyclic(tree: &ReplicatedTree) {
    for node in tree.nodes() {
        let mut seen = HashSet::new();
        let mut current = node.id;
        loop {
            assert!(seen.insert(current), "cycle through {current}");
            match tree.get(&current).and_then(|n| n.parent_id) {
                Some(parent) if !parent.is_sentinel() => current = parent,
                _ => break,
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_delivery_order_does_not_matter((ops, shuffled) in ops_and_permutation()) {
        let in_order = ReplicatedTree::from_operations("a", ops);
        let reordered = ReplicatedTree::from_operations("b", shuffled);

        prop_assert_eq!(sorted_nodes(&in_order), sorted_nodes(&reordered));
        prop_assert_eq!(log_ids(&in_order), log_ids(&reordered));
        prop_assert_eq!(in_order.vector_clock(), reordered.vector_clock());
    }

    #[test]
    fn prop_tree_never_has_cycles((ops, shuffled) in ops_and_permutation()) {
        let mut tree = ReplicatedTree::new("a");
        for op in shuffled {
            tree.apply(op);
            assert_acyclic(&tree);
        }
        let in_order = ReplicatedTree::from_operations("b", ops);
        assert_acyclic(&in_order);
    }

    #[test]
    fn prop_redelivery_is_idempotent(ops in ops_strategy()) {
        let mut tree = ReplicatedTree::from_operations("a", ops.clone());
        let before = sorted_nodes(&tree);

        for op in ops.iter().rev().cloned() {
            prop_assert!(tree.apply(op).is_duplicate());
        }
        prop_assert_eq!(sorted_nodes(&tree), before);
        prop_assert_eq!(tree.log_len(), ops.len());
    }
}

#[test]
fn test_interleaved_histories_converge() {
    let (a, b) = (pool(0), pool(1));
    let ops = vec![
        op("r1", 10, a, NodeId::VIRTUAL_ROOT, None, "A"),
        op("r2", 11, b, NodeId::VIRTUAL_ROOT, None, "B"),
        // r1 puts A under B, r2 concurrently puts B under A.
        op("r1", 20, a, b, Some(NodeId::VIRTUAL_ROOT), "A"),
        op("r2", 21, b, a, Some(NodeId::VIRTUAL_ROOT), "B"),
    ];

    let mut forward = ReplicatedTree::new("x");
    let mut backward = ReplicatedTree::new("y");
    for op in ops.iter().cloned() {
        forward.apply(op);
    }
    for op in ops.iter().rev().cloned() {
        backward.apply(op);
    }

    assert_eq!(sorted_nodes(&forward), sorted_nodes(&backward));
    // The earlier move wins; the later one would close a loop.
    assert_eq!(forward.get(&a).unwrap().parent_id, Some(b));
    assert_eq!(forward.get(&b).unwrap().parent_id, Some(NodeId::VIRTUAL_ROOT));
    assert_eq!(forward.snapshot().paths(), vec!["/B", "/B/A"]);
}
