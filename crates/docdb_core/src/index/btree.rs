//! Hand-rolled order-4 B+ tree used to back secondary indexes.
//!
//! Nodes live in an arena (`Vec<Node>`) addressed by integer handle rather
//! than `Rc<RefCell<_>>`, so leaf-to-leaf `next` links and parent-to-child
//! edges don't need a cyclic ownership scheme (§4.4/§9).

use serde_json::Value;
use std::cmp::Ordering;

type NodeId = usize;

/// Compares two index key values.
///
/// Numbers compare numerically, strings lexicographically; a number and a
/// string (or any other mismatched pair) fall back to comparing their
/// canonical JSON text, which at least gives a total, stable order.
fn key_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

fn key_eq(a: &Value, b: &Value) -> bool {
    key_cmp(a, b) == Ordering::Equal
}

enum Node {
    Leaf {
        keys: Vec<Value>,
        values: Vec<Vec<String>>,
        next: Option<NodeId>,
    },
    Internal {
        keys: Vec<Value>,
        children: Vec<NodeId>,
    },
}

impl Node {
    fn keys(&self) -> &[Value] {
        match self {
            Self::Leaf { keys, .. } | Self::Internal { keys, .. } => keys,
        }
    }

    fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }
}

/// An order-4 B+ tree mapping index key values to the set of document ids
/// holding that value.
///
/// Grounded key-for-key on the split-at-mid algorithm in the source's
/// `BPlusTree`: a leaf keeps its split key in both halves (so lookups by
/// that exact key still work through the left half), an internal node
/// promotes its split key upward without keeping a copy, and `remove` never
/// rebalances — it only ever drops an entry when its value list empties.
pub struct BPlusTree {
    arena: Vec<Node>,
    root: NodeId,
    order: usize,
}

impl BPlusTree {
    /// Creates an empty tree with the given order (max keys per node is
    /// `order - 1`).
    #[must_use]
    pub fn new(order: usize) -> Self {
        let root = Node::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
            next: None,
        };
        Self {
            arena: vec![root],
            root: 0,
            order,
        }
    }

    fn is_full(&self, node: NodeId) -> bool {
        self.arena[node].keys().len() >= self.order - 1
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.arena.push(node);
        self.arena.len() - 1
    }

    /// First index in `keys` with `keys[idx] >= key`, i.e. the count of
    /// keys strictly less than `key`. Used consistently to choose which
    /// child to descend into and where a key belongs within a leaf.
    fn lower_bound(keys: &[Value], key: &Value) -> usize {
        keys.partition_point(|k| key_cmp(k, key) == Ordering::Less)
    }

    /// Inserts `doc_id` under `key`, appending to the existing id list if
    /// `key` is already present.
    pub fn insert(&mut self, key: Value, doc_id: String) {
        if let Node::Leaf { keys, values, .. } = &mut self.arena[self.root] {
            if let Some(pos) = keys.iter().position(|k| key_eq(k, &key)) {
                if !values[pos].contains(&doc_id) {
                    values[pos].push(doc_id);
                }
                return;
            }
        }

        if self.is_full(self.root) {
            let new_root = self.alloc(Node::Internal {
                keys: Vec::new(),
                children: vec![self.root],
            });
            self.split_child(new_root, 0);
            self.root = new_root;
        }
        self.insert_non_full(self.root, key, doc_id);
    }

    fn insert_non_full(&mut self, node: NodeId, key: Value, doc_id: String) {
        if self.arena[node].is_leaf() {
            if let Node::Leaf { keys, values, .. } = &mut self.arena[node] {
                let pos = Self::lower_bound(keys, &key);
                if pos < keys.len() && key_eq(&keys[pos], &key) {
                    if !values[pos].contains(&doc_id) {
                        values[pos].push(doc_id);
                    }
                } else {
                    keys.insert(pos, key);
                    values.insert(pos, vec![doc_id]);
                }
            }
            return;
        }

        let mut child_idx = match &self.arena[node] {
            Node::Internal { keys, .. } => Self::lower_bound(keys, &key),
            Node::Leaf { .. } => unreachable!(),
        };
        let mut child = match &self.arena[node] {
            Node::Internal { children, .. } => children[child_idx],
            Node::Leaf { .. } => unreachable!(),
        };

        if self.is_full(child) {
            self.split_child(node, child_idx);
            let promoted = match &self.arena[node] {
                Node::Internal { keys, .. } => keys[child_idx].clone(),
                Node::Leaf { .. } => unreachable!(),
            };
            if key_cmp(&key, &promoted) == Ordering::Greater {
                child_idx += 1;
            }
            child = match &self.arena[node] {
                Node::Internal { children, .. } => children[child_idx],
                Node::Leaf { .. } => unreachable!(),
            };
        }

        self.insert_non_full(child, key, doc_id);
    }

    fn split_child(&mut self, parent: NodeId, i: usize) {
        let order = self.order;
        let mid = (order - 1) / 2;

        let child = match &self.arena[parent] {
            Node::Internal { children, .. } => children[i],
            Node::Leaf { .. } => unreachable!("parent of a split is always internal"),
        };

        let (new_node, promoted) = match &mut self.arena[child] {
            Node::Leaf { keys, values, next } => {
                let new_keys = keys.split_off(mid);
                let new_values = values.split_off(mid);
                let promoted = new_keys[0].clone();
                let new_node = Node::Leaf {
                    keys: new_keys,
                    values: new_values,
                    next: *next,
                };
                (new_node, promoted)
            }
            Node::Internal { keys, children } => {
                let promoted = keys[mid].clone();
                let new_keys = keys.split_off(mid + 1);
                keys.pop(); // drop the promoted key from the left half
                let new_children = children.split_off(mid + 1);
                let new_node = Node::Internal {
                    keys: new_keys,
                    children: new_children,
                };
                (new_node, promoted)
            }
        };

        let was_leaf = new_node.is_leaf();
        let new_id = self.alloc(new_node);
        if was_leaf {
            if let Node::Leaf { next, .. } = &mut self.arena[child] {
                *next = Some(new_id);
            }
        }

        if let Node::Internal { keys, children } = &mut self.arena[parent] {
            keys.insert(i, promoted);
            children.insert(i + 1, new_id);
        }
    }

    /// Returns the document ids recorded under `key`, if any.
    #[must_use]
    pub fn find(&self, key: &Value) -> Vec<String> {
        let mut node = self.root;
        loop {
            match &self.arena[node] {
                Node::Internal { keys, children } => {
                    let idx = Self::lower_bound(keys, key);
                    node = children[idx];
                }
                Node::Leaf { keys, values, .. } => {
                    let idx = Self::lower_bound(keys, key);
                    return if idx < keys.len() && key_eq(&keys[idx], key) {
                        values[idx].clone()
                    } else {
                        Vec::new()
                    };
                }
            }
        }
    }

    /// Removes `doc_id` from `key`'s id list. Drops the key entirely once
    /// its id list is empty. Never rebalances underfull nodes.
    pub fn remove(&mut self, key: &Value, doc_id: &str) {
        let mut node = self.root;
        loop {
            let next = match &self.arena[node] {
                Node::Internal { keys, children } => children[Self::lower_bound(keys, key)],
                Node::Leaf { .. } => break,
            };
            node = next;
        }

        if let Node::Leaf { keys, values, .. } = &mut self.arena[node] {
            let idx = Self::lower_bound(keys, key);
            if idx < keys.len() && key_eq(&keys[idx], key) {
                values[idx].retain(|id| id != doc_id);
                if values[idx].is_empty() {
                    keys.remove(idx);
                    values.remove(idx);
                }
            }
        }
    }

    /// Dumps every `(key, doc_ids)` pair in ascending key order, by walking
    /// down to the leftmost leaf and following `next` links.
    #[must_use]
    pub fn entries(&self) -> Vec<(Value, Vec<String>)> {
        let mut node = self.root;
        while let Node::Internal { children, .. } = &self.arena[node] {
            node = children[0];
        }

        let mut out = Vec::new();
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            let Node::Leaf { keys, values, next } = &self.arena[id] else {
                break;
            };
            for (key, ids) in keys.iter().zip(values.iter()) {
                out.push((key.clone(), ids.clone()));
            }
            cursor = *next;
        }
        out
    }

    /// Rebuilds a tree from a dumped entry list (inverse of
    /// [`entries`](Self::entries)).
    #[must_use]
    pub fn from_entries(order: usize, entries: Vec<(Value, Vec<String>)>) -> Self {
        let mut tree = Self::new(order);
        for (key, doc_ids) in entries {
            for doc_id in doc_ids {
                tree.insert(key.clone(), doc_id);
            }
        }
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn find_after_many_inserts_forces_splits() {
        let mut tree = BPlusTree::new(4);
        for i in 0..50 {
            tree.insert(json!(i), format!("doc{i}"));
        }
        for i in 0..50 {
            assert_eq!(tree.find(&json!(i)), vec![format!("doc{i}")]);
        }
        assert!(tree.find(&json!(999)).is_empty());
    }

    #[test]
    fn duplicate_key_accumulates_doc_ids() {
        let mut tree = BPlusTree::new(4);
        tree.insert(json!("red"), "doc1".to_string());
        tree.insert(json!("red"), "doc2".to_string());
        let mut found = tree.find(&json!("red"));
        found.sort();
        assert_eq!(found, vec!["doc1".to_string(), "doc2".to_string()]);
    }

    #[test]
    fn remove_drops_key_when_empty() {
        let mut tree = BPlusTree::new(4);
        tree.insert(json!("red"), "doc1".to_string());
        tree.remove(&json!("red"), "doc1");
        assert!(tree.find(&json!("red")).is_empty());
    }

    #[test]
    fn remove_keeps_key_with_remaining_ids() {
        let mut tree = BPlusTree::new(4);
        tree.insert(json!("red"), "doc1".to_string());
        tree.insert(json!("red"), "doc2".to_string());
        tree.remove(&json!("red"), "doc1");
        assert_eq!(tree.find(&json!("red")), vec!["doc2".to_string()]);
    }

    #[test]
    fn entries_are_sorted_and_round_trip() {
        let mut tree = BPlusTree::new(4);
        for i in [5, 1, 9, 3, 7, 2, 8, 4, 6, 0] {
            tree.insert(json!(i), format!("doc{i}"));
        }
        let entries = tree.entries();
        let keys: Vec<i64> = entries.iter().map(|(k, _)| k.as_i64().unwrap()).collect();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());

        let rebuilt = BPlusTree::from_entries(4, entries);
        assert_eq!(rebuilt.find(&json!(7)), vec!["doc7".to_string()]);
    }

    proptest::proptest! {
        #[test]
        fn insert_then_find_round_trips(ids in proptest::collection::vec(0i64..500, 1..80)) {
            let mut tree = BPlusTree::new(4);
            for (i, id) in ids.iter().enumerate() {
                tree.insert(json!(id), format!("doc{i}"));
            }
            for (i, id) in ids.iter().enumerate() {
                proptest::prop_assert!(tree.find(&json!(id)).contains(&format!("doc{i}")));
            }
        }

        #[test]
        fn remove_after_insert_leaves_no_trace(keys in proptest::collection::vec(0i64..200, 1..60)) {
            let mut tree = BPlusTree::new(4);
            for key in &keys {
                tree.insert(json!(key), "doc".to_string());
            }
            for key in &keys {
                tree.remove(&json!(key), "doc");
            }
            for key in &keys {
                proptest::prop_assert!(tree.find(&json!(key)).is_empty());
            }
        }

        #[test]
        fn entries_round_trip_through_from_entries(keys in proptest::collection::vec(0i64..300, 1..80)) {
            let mut tree = BPlusTree::new(4);
            for (i, key) in keys.iter().enumerate() {
                tree.insert(json!(key), format!("doc{i}"));
            }
            let rebuilt = BPlusTree::from_entries(4, tree.entries());
            for (i, key) in keys.iter().enumerate() {
                proptest::prop_assert!(rebuilt.find(&json!(key)).contains(&format!("doc{i}")));
            }
        }
    }
}
