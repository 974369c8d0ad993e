//! Transposition Table — a fixed-capacity, open-addressed, best-effort
//! cache shared across tree branches that reach the same position.
//!
//! Fixed-size, keyed by a raw hash with silent overwrite on collision
//! rather than chaining, storing aggregate visit/eval statistics rather
//! than a node identity — a flat `Vec` indexed by `hash % capacity` behind
//! a small `new`/`sync`/`update` surface.

use std::sync::Mutex;

use crate::config::TT_SIZE;
use crate::node::Node;

#[derive(Clone, Copy, Default)]
struct TTEntry {
    hash: u64,
    visits: u32,
    eval_sum: f64,
}

pub struct TranspositionTable {
    slots: Mutex<Box<[TTEntry]>>,
    capacity: usize,
}

impl TranspositionTable {
    pub fn new() -> Self {
        Self::with_capacity(TT_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        TranspositionTable {
            slots: Mutex::new(vec![TTEntry::default(); capacity].into_boxed_slice()),
            capacity,
        }
    }

    fn index(&self, hash: u64) -> usize {
        (hash % self.capacity as u64) as usize
    }

    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            *slot = TTEntry::default();
        }
    }

    pub fn clear_entry(&self, hash: u64) {
        let idx = self.index(hash);
        let mut slots = self.slots.lock().unwrap();
        slots[idx] = TTEntry::default();
    }

    /// Overwrites the slot at `hash % capacity` with `node`'s current
    /// statistics. Collisions silently clobber the prior entry; that is
    /// acceptable because `sync` only ever adopts *more-visited* data,
    /// which raises quality monotonically regardless of what got
    /// overwritten.
    pub fn update(&self, hash: u64, node: &Node) {
        let idx = self.index(hash);
        let mut slots = self.slots.lock().unwrap();
        slots[idx] = TTEntry {
            hash,
            visits: node.visits(),
            eval_sum: node.white_eval_sum(),
        };
    }

    /// If the slot's hash matches `hash` and its visit count exceeds
    /// `node`'s, seeds `node` with the slot's statistics. A hand-rolled
    /// replacement of `Node::update` is used here (rather than calling
    /// `update` in a loop) since we are overwriting the accumulated state,
    /// not adding to it.
    pub fn sync(&self, hash: u64, node: &Node) {
        let idx = self.index(hash);
        let entry = {
            let slots = self.slots.lock().unwrap();
            slots[idx]
        };
        if entry.hash != hash {
            return;
        }
        if entry.visits <= node.visits() {
            return;
        }
        node.seed_from_tt(entry.visits, entry.eval_sum);
    }
}

impl Default for TranspositionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn sync_adopts_more_visited_entry() {
        let tt = TranspositionTable::with_capacity(16);
        let seeded = Node::new_root(0.5);
        for _ in 0..10 {
            seeded.update(0.6);
        }
        tt.update(42, &seeded);

        let fresh = Node::new_root(0.5);
        tt.sync(42, &fresh);
        assert_eq!(fresh.visits(), 10);
    }

    #[test]
    fn sync_ignores_collision_with_different_hash() {
        let tt = TranspositionTable::with_capacity(16);
        let seeded = Node::new_root(0.5);
        seeded.update(1.0);
        tt.update(16, &seeded); // collides with hash 32 at capacity 16

        let fresh = Node::new_root(0.5);
        tt.sync(32, &fresh);
        assert_eq!(fresh.visits(), 0);
    }
}
