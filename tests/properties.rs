use std::collections::HashSet;
use std::sync::Arc;

use arbor::models::*;
use arbor::persist::{MemoryStorage, TreeRepository};
use arbor::service::{TreeService, DEFAULT_SESSION};
use arbor::store::Tree;
use proptest::prelude::*;
use serde_json::json;

#[derive(Debug, Clone)]
enum Op {
    Add { parent: usize, name: String },
    Rename { node: usize, name: String },
    Delete { node: usize },
    Clone { source: usize, parent: usize },
    Reverse { parent: usize },
    Append { node: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<usize>(), "[a-z]{1,6}").prop_map(|(parent, name)| Op::Add { parent, name }),
        1 => (any::<usize>(), "[a-z]{1,6}").prop_map(|(node, name)| Op::Rename { node, name }),
        2 => any::<usize>().prop_map(|node| Op::Delete { node }),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(source, parent)| Op::Clone { source, parent }),
        1 => any::<usize>().prop_map(|parent| Op::Reverse { parent }),
        1 => any::<usize>().prop_map(|node| Op::Append { node }),
    ]
}

fn pick(tree: &Tree, index: usize) -> NodeId {
    let ids: Vec<&NodeId> = tree.ids().collect();
    ids[index % ids.len()].clone()
}

/// Apply `op` to `tree`, ignoring rejected operations.
fn apply(tree: &mut Tree, op: &Op) -> bool {
    let result = match op {
        Op::Add { parent, name } => {
            let parent = pick(tree, *parent);
            tree.add_child(&parent, name).map(|_| ())
        }
        Op::Rename { node, name } => {
            let node = pick(tree, *node);
            tree.rename(&node, name)
        }
        Op::Delete { node } => {
            let node = pick(tree, *node);
            tree.delete_subtree(&node).map(|_| ())
        }
        Op::Clone { source, parent } => {
            let source = pick(tree, *source);
            let parent = pick(tree, *parent);
            tree.clone_subtree(&source, &parent).map(|_| ())
        }
        Op::Reverse { parent } => {
            let parent = pick(tree, *parent);
            let mut order = tree.get(&parent).map(|n| n.children.clone()).unwrap_or_default();
            order.reverse();
            tree.reorder_children(&parent, &order)
        }
        Op::Append { node } => {
            let node = pick(tree, *node);
            tree.append_contents(&node, vec![json!({"type": "text"}).into()])
        }
    };
    result.is_ok()
}

/// Run `op` through the service against `tree`, its current state.
fn mutate(service: &TreeService, tree: &Tree, op: &Op) -> bool {
    const S: &str = DEFAULT_SESSION;
    let result = match op {
        Op::Add { parent, name } => service.create_node(S, &pick(tree, *parent), name).map(|_| ()),
        Op::Rename { node, name } => service.rename_node(S, &pick(tree, *node), name).map(|_| ()),
        Op::Delete { node } => service.delete_subtree(S, &pick(tree, *node)).map(|_| ()),
        Op::Clone { source, parent } => service
            .clone_subtree(S, &pick(tree, *source), &pick(tree, *parent))
            .map(|_| ()),
        Op::Reverse { parent } => {
            let parent = pick(tree, *parent);
            let mut order = tree.get(&parent).map(|n| n.children.clone()).unwrap_or_default();
            order.reverse();
            service.reorder_children(S, &parent, &order).map(|_| ())
        }
        Op::Append { node } => service
            .append_contents(S, &pick(tree, *node), vec![json!({"type": "text"}).into()])
            .map(|_| ()),
    };
    result.is_ok()
}

fn seeded_service(seed: &Tree) -> TreeService {
    let service = TreeService::new(
        TreeRepository::new(Arc::new(MemoryStorage::new()), "Home"),
        20,
    );
    service.import_backup(&serde_json::to_vec(seed).unwrap()).unwrap();
    service
}

fn build(ops: &[Op]) -> Tree {
    let mut tree = Tree::new("Home");
    for op in ops {
        apply(&mut tree, op);
    }
    tree
}

proptest! {
    #[test]
    fn invariants_hold_after_any_sequence(ops in prop::collection::vec(op(), 0..40)) {
        let mut tree = Tree::new("Home");
        for op in &ops {
            let before = tree.clone();
            if !apply(&mut tree, op) {
                prop_assert_eq!(&tree, &before);
            }
            prop_assert!(tree.check_invariants().is_ok());
        }
    }

    #[test]
    fn delete_removes_exactly_the_subtree(
        ops in prop::collection::vec(op(), 0..30),
        target in any::<usize>(),
    ) {
        let mut tree = build(&ops);
        let node = pick(&tree, target);
        prop_assume!(node != tree.root_id());

        let expected: HashSet<NodeId> = tree.descendants(&node).unwrap().into_iter().collect();
        let before: HashSet<NodeId> = tree.ids().cloned().collect();

        let removed: HashSet<NodeId> = tree.delete_subtree(&node).unwrap().into_iter().collect();
        let after: HashSet<NodeId> = tree.ids().cloned().collect();

        prop_assert_eq!(&removed, &expected);
        prop_assert_eq!(after, before.difference(&expected).cloned().collect::<HashSet<_>>());
    }

    #[test]
    fn clone_is_isomorphic_with_fresh_ids(
        ops in prop::collection::vec(op(), 0..30),
        source in any::<usize>(),
        parent in any::<usize>(),
    ) {
        let mut tree = build(&ops);
        let source = pick(&tree, source);
        let parent = pick(&tree, parent);
        prop_assume!(parent != source && !tree.is_descendant(&parent, &source));

        let copy = tree.clone_subtree(&source, &parent).unwrap();

        let originals = tree.descendants(&source).unwrap();
        let copies = tree.descendants(&copy).unwrap();
        prop_assert_eq!(originals.len(), copies.len());
        for (old, new) in originals.iter().zip(&copies) {
            prop_assert_ne!(old, new);
            let (old, new) = (tree.get(old).unwrap(), tree.get(new).unwrap());
            prop_assert_eq!(&old.name, &new.name);
            prop_assert_eq!(&old.contents, &new.contents);
            prop_assert_eq!(old.children.len(), new.children.len());
        }
        let original_set: HashSet<_> = originals.iter().collect();
        prop_assert!(copies.iter().all(|id| !original_set.contains(id)));
    }

    #[test]
    fn undo_reverts_any_mutation(
        ops in prop::collection::vec(op(), 0..20),
        change in op(),
    ) {
        let seed = build(&ops);
        let service = seeded_service(&seed);

        if mutate(&service, &seed, &change) {
            service.undo(DEFAULT_SESSION).unwrap();
            prop_assert_eq!(service.tree().unwrap(), seed);
        } else {
            prop_assert_eq!(service.tree().unwrap(), seed);
            prop_assert_eq!(service.history_status(DEFAULT_SESSION).undo, 0);
        }
    }

    #[test]
    fn redo_after_undo_restores_the_mutation(
        ops in prop::collection::vec(op(), 0..20),
        change in op(),
    ) {
        let seed = build(&ops);
        let service = seeded_service(&seed);
        prop_assume!(mutate(&service, &seed, &change));
        let mutated = service.tree().unwrap();

        service.undo(DEFAULT_SESSION).unwrap();
        let step = service.redo(DEFAULT_SESSION).unwrap();

        prop_assert_eq!(service.tree().unwrap(), mutated.clone());
        prop_assert_eq!(step.nodes, mutated.len());
        prop_assert_eq!(step.history, HistoryStatus { undo: 1, redo: 0 });
    }
}
