//! Fixed-capacity cache of the best layouts seen during a run.

use ap_types::CutterState;
use serde::{Deserialize, Serialize};

/// Default number of cached layouts.
pub const DEFAULT_TOP_K: usize = 10;

/// One cached layout and its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopKEntry {
    pub cutters: Vec<CutterState>,
    /// Objective the entry is ranked by.
    pub cost: f64,
    pub loss: f64,
    pub penalty: f64,
    /// Sum of raw sampler values.
    pub measured: f64,
}

/// Layouts sorted ascending by cost, at most `capacity` of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopKCache {
    capacity: usize,
    entries: Vec<TopKEntry>,
}

impl Default for TopKCache {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}

impl TopKCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TopKEntry] {
        &self.entries
    }

    pub fn get(&self, k: usize) -> Option<&TopKEntry> {
        self.entries.get(k)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Insert in front of the first strictly worse entry. Returns the rank the
    /// entry landed at, or `None` when it did not make the cut.
    pub fn insert(&mut self, entry: TopKEntry) -> Option<usize> {
        if self.capacity == 0 {
            return None;
        }
        let rank = self
            .entries
            .iter()
            .position(|e| entry.cost < e.cost)
            .unwrap_or(self.entries.len());
        if rank >= self.capacity {
            return None;
        }
        self.entries.insert(rank, entry);
        self.entries.truncate(self.capacity);
        Some(rank)
    }
}
