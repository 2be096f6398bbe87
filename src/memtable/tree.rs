//! Ordered search tree memtable variant: a multiway B-tree-style node
//! holding up to `order - 1` records and up to `order` children, arena
//! indexed so the parent back-pointer used for split propagation is a
//! plain index rather than an ownership edge.

use super::{insert_sorted_dedup, transition_delta, MemtableOps};
use crate::error::{Result, StoreError};
use crate::record::Record;
use crate::witness::WitnessSet;

struct Node {
    entries: Vec<Record>,
    children: Vec<usize>,
    parent: Option<usize>,
}

impl Node {
    fn leaf() -> Self {
        Self {
            entries: Vec::new(),
            children: Vec::new(),
            parent: None,
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

pub struct OrderedTreeMemtable {
    arena: Vec<Node>,
    root: usize,
    order: usize,
    capacity: usize,
    total: usize,
    active: usize,
}

impl OrderedTreeMemtable {
    pub fn new(order: usize, capacity: usize) -> Self {
        assert!(order >= 3, "tree order must be at least 3");
        Self {
            arena: vec![Node::leaf()],
            root: 0,
            order,
            capacity,
            total: 0,
            active: 0,
        }
    }

    /// Descends from the root, returning the node holding `key` and the
    /// index within it (`Ok`), or the leaf and insertion point (`Err`).
    fn locate(&self, key: &str) -> (usize, std::result::Result<usize, usize>) {
        let mut node = self.root;
        loop {
            let n = &self.arena[node];
            match n.entries.binary_search_by(|r| r.key.as_str().cmp(key)) {
                Ok(pos) => return (node, Ok(pos)),
                Err(pos) => {
                    if n.is_leaf() {
                        return (node, Err(pos));
                    }
                    node = n.children[pos];
                }
            }
        }
    }

    fn split_up(&mut self, mut node_idx: usize) {
        loop {
            if self.arena[node_idx].entries.len() < self.order {
                return;
            }
            let mid = self.arena[node_idx].entries.len() / 2;
            let promoted = self.arena[node_idx].entries.remove(mid);
            let right_entries = self.arena[node_idx].entries.split_off(mid);
            let right_children = if self.arena[node_idx].is_leaf() {
                Vec::new()
            } else {
                self.arena[node_idx].children.split_off(mid + 1)
            };
            let right_idx = self.arena.len();
            self.arena.push(Node {
                entries: right_entries,
                children: right_children.clone(),
                parent: self.arena[node_idx].parent,
            });
            for &child in &right_children {
                self.arena[child].parent = Some(right_idx);
            }

            match self.arena[node_idx].parent {
                None => {
                    let new_root = self.arena.len();
                    self.arena.push(Node {
                        entries: vec![promoted],
                        children: vec![node_idx, right_idx],
                        parent: None,
                    });
                    self.arena[node_idx].parent = Some(new_root);
                    self.arena[right_idx].parent = Some(new_root);
                    self.root = new_root;
                    return;
                }
                Some(parent_idx) => {
                    let pos = self.arena[parent_idx]
                        .entries
                        .binary_search_by(|r| r.key.as_str().cmp(&promoted.key))
                        .unwrap_err();
                    self.arena[parent_idx].entries.insert(pos, promoted);
                    self.arena[parent_idx].children.insert(pos + 1, right_idx);
                    self.arena[right_idx].parent = Some(parent_idx);
                    node_idx = parent_idx;
                }
            }
        }
    }

    /// In-order walk, stopping early if `visit` returns `false`.
    fn in_order(&self, node_idx: usize, visit: &mut impl FnMut(&Record) -> bool) -> bool {
        let n = &self.arena[node_idx];
        for i in 0..n.entries.len() {
            if !n.is_leaf() && !self.in_order(n.children[i], visit) {
                return false;
            }
            if !visit(&n.entries[i]) {
                return false;
            }
        }
        if !n.is_leaf() {
            if !self.in_order(*n.children.last().unwrap(), visit) {
                return false;
            }
        }
        true
    }

    fn ascending(&self) -> Vec<Record> {
        let mut out = Vec::with_capacity(self.total);
        self.in_order(self.root, &mut |r| {
            out.push(r.clone());
            true
        });
        out
    }
}

impl MemtableOps for OrderedTreeMemtable {
    fn put(&mut self, record: Record) -> Result<()> {
        if record.is_empty_key() {
            return Err(StoreError::InvalidArgument("empty key".into()));
        }
        let (node_idx, res) = self.locate(&record.key);
        match res {
            Ok(pos) => {
                let old_tombstone = self.arena[node_idx].entries[pos].tombstone;
                let delta = transition_delta(old_tombstone, record.tombstone);
                self.active = (self.active as i64 + delta) as usize;
                self.arena[node_idx].entries[pos] = record;
                Ok(())
            }
            Err(pos) => {
                if self.total >= self.capacity {
                    return Err(StoreError::CapacityExceeded);
                }
                let tombstone = record.tombstone;
                self.arena[node_idx].entries.insert(pos, record);
                self.total += 1;
                if !tombstone {
                    self.active += 1;
                }
                self.split_up(node_idx);
                Ok(())
            }
        }
    }

    fn delete(&mut self, mut record: Record) -> bool {
        record.mark_deleted();
        let (node_idx, res) = self.locate(&record.key);
        match res {
            Ok(pos) => {
                let old_tombstone = self.arena[node_idx].entries[pos].tombstone;
                self.active = (self.active as i64 + transition_delta(old_tombstone, true)) as usize;
                self.arena[node_idx].entries[pos] = record;
                true
            }
            Err(_) => {
                let _ = self.put(record);
                false
            }
        }
    }

    fn get(&self, key: &str) -> Option<Record> {
        match self.locate(key) {
            (node, Ok(pos)) => {
                let r = &self.arena[node].entries[pos];
                if r.tombstone {
                    None
                } else {
                    Some(r.clone())
                }
            }
            _ => None,
        }
    }

    fn get_including_tombstone(&self, key: &str) -> Option<Record> {
        match self.locate(key) {
            (node, Ok(pos)) => Some(self.arena[node].entries[pos].clone()),
            _ => None,
        }
    }

    fn next_for_prefix(
        &self,
        prefix: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record> {
        let mut found = None;
        self.in_order(self.root, &mut |r| {
            if after_key.is_some_and(|a| r.key.as_str() <= a) {
                return true;
            }
            if !r.key.starts_with(prefix) {
                return true;
            }
            if r.tombstone {
                witness.witness(&r.key);
                return true;
            }
            if witness.contains(&r.key) {
                return true;
            }
            found = Some(r.clone());
            false
        });
        found
    }

    fn next_for_range(
        &self,
        start: &str,
        end: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record> {
        let mut found = None;
        self.in_order(self.root, &mut |r| {
            if r.key.as_str() > end {
                return false;
            }
            if after_key.is_some_and(|a| r.key.as_str() <= a) || r.key.as_str() < start {
                return true;
            }
            if r.tombstone {
                witness.witness(&r.key);
                return true;
            }
            if witness.contains(&r.key) {
                return true;
            }
            found = Some(r.clone());
            false
        });
        found
    }

    fn scan_for_prefix(&self, prefix: &str, witness: &mut WitnessSet, best_keys: &mut Vec<String>) {
        self.in_order(self.root, &mut |r| {
            if r.key.starts_with(prefix) {
                if r.tombstone {
                    witness.witness(&r.key);
                } else if !witness.contains(&r.key) {
                    insert_sorted_dedup(best_keys, &r.key);
                }
            }
            true
        });
    }

    fn drain_sorted(&self) -> Vec<Record> {
        self.ascending()
    }

    fn active_records(&self) -> usize {
        self.active
    }

    fn total_records(&self) -> usize {
        self.total
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_preserve_sorted_order() {
        let mut t = OrderedTreeMemtable::new(3, 1000);
        for i in 0..50 {
            let key = format!("k{i:03}");
            t.put(Record::new(key, b"v".to_vec(), i as u64)).unwrap();
        }
        let drained = t.drain_sorted();
        assert_eq!(drained.len(), 50);
        for w in drained.windows(2) {
            assert!(w[0].key < w[1].key);
        }
    }

    #[test]
    fn get_never_returns_tombstone() {
        let mut t = OrderedTreeMemtable::new(4, 100);
        t.put(Record::new("a", b"v".to_vec(), 1)).unwrap();
        t.delete(Record::tombstone("a", 2));
        assert!(t.get("a").is_none());
    }
}
