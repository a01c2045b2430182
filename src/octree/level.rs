use std::{
    collections::BTreeMap,
    sync::{ Arc, Mutex, MutexGuard, PoisonError },
};
use crate::Index;
use super::Node;

/// Every populated cell at one depth, keyed by its index.
///
/// The lock covers the map's shape only (lookups and inserts). Nodes are
/// handed out behind an `Arc` so callers set child bits after the lock is
/// released.
#[derive(Debug, Default)]
pub struct Level {
    nodes: Mutex<BTreeMap<Index, Arc<Node>>>,
}

impl Level {
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section leaves the map consistent.
    fn nodes(&self) -> MutexGuard<'_, BTreeMap<Index, Arc<Node>>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, index: Index) -> Option<Arc<Node>> {
        self.nodes().get(&index).cloned()
    }

    pub fn contains(&self, index: Index) -> bool {
        self.nodes().contains_key(&index)
    }

    /// Returns the node at `index`, creating an empty one if absent. The flag
    /// is true when this call created it.
    pub fn get_or_insert(&self, index: Index) -> (Arc<Node>, bool) {
        let mut nodes = self.nodes();
        if let Some(node) = nodes.get(&index) {
            return (node.clone(), false);
        }
        let node = Arc::new(Node::default());
        nodes.insert(index, node.clone());
        (node, true)
    }

    /// Inserts `node` unless `index` is taken. Returns false if it was.
    pub fn insert_new(&self, index: Index, node: Node) -> bool {
        let mut nodes = self.nodes();
        if nodes.contains_key(&index) {
            return false;
        }
        nodes.insert(index, Arc::new(node));
        true
    }

    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes().is_empty()
    }

    /// Populated indices in ascending order.
    pub fn indices(&self) -> Vec<Index> {
        self.nodes().keys().copied().collect()
    }

    /// (index, mask) pairs in ascending index order.
    pub fn snapshot(&self) -> Vec<(Index, u8)> {
        self.nodes().iter().map(|(index, node)| (*index, node.mask())).collect()
    }
}

#[test]
fn get_or_insert_creates_once() {
    let level = Level::new();
    let (first, created) = level.get_or_insert(Index::new(1, 2, 3));
    assert!(created);
    first.add_child(5);

    let (second, created) = level.get_or_insert(Index::new(1, 2, 3));
    assert!(!created);
    assert_eq!(second.mask(), 1 << 5);
    assert_eq!(level.len(), 1);
}

#[test]
fn insert_new_refuses_duplicates() {
    let level = Level::new();
    assert!(level.insert_new(Index::ORIGIN, Node::new(0b11)));
    assert!(!level.insert_new(Index::ORIGIN, Node::new(0b100)));
    assert_eq!(level.get(Index::ORIGIN).map(|node| node.mask()), Some(0b11));
}

#[test]
fn snapshot_is_sorted() {
    let level = Level::new();
    for index in [Index::new(2, 0, 0), Index::new(0, 1, 0), Index::new(0, 0, 7)] {
        level.get_or_insert(index).0.add_child(1);
    }
    let indices: Vec<Index> = level.snapshot().into_iter().map(|(index, _)| index).collect();
    assert_eq!(indices, vec![Index::new(0, 0, 7), Index::new(0, 1, 0), Index::new(2, 0, 0)]);
}
