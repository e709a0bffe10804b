//! Ordered, de-duplicated queue of work items.
//!
//! Unlike a fee-prioritized transaction pool, this mempool has no fee market
//! and no replace-by-fee: insertion order is the only ordering, and an id
//! collision is a silent no-op rather than a replacement.

use std::collections::{HashSet, VecDeque};

/// The four kinds of observable work a node can commit to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    TransactionIndexed,
    ContentServed,
    RelayForwarded,
    Heartbeat,
}

/// The smallest unit of observable work. `payload` is an opaque
/// blob: the core never interprets it, only producers and consumers outside
/// the core decode it per `kind`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub kind: WorkKind,
    pub payload: Vec<u8>,
    pub timestamp_ms: u64,
}

impl WorkItem {
    pub fn heartbeat(now_ms: u64) -> Self {
        WorkItem {
            id: format!("ping-{now_ms}"),
            kind: WorkKind::Heartbeat,
            payload: Vec::new(),
            timestamp_ms: now_ms,
        }
    }
}

/// FIFO queue with O(1) dedup by `id`.
#[derive(Debug, Default)]
pub struct Mempool {
    order: VecDeque<WorkItem>,
    ids: HashSet<String>,
}

impl Mempool {
    pub fn new() -> Self {
        Mempool {
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    /// No-op if `item.id` is already present; else appended to the tail.
    pub fn add(&mut self, item: WorkItem) {
        if self.ids.contains(&item.id) {
            return;
        }
        self.ids.insert(item.id.clone());
        self.order.push_back(item);
    }

    /// Removes and returns the first `min(n, size)` items, preserving order.
    pub fn take(&mut self, n: usize) -> Vec<WorkItem> {
        let n = n.min(self.order.len());
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            if let Some(item) = self.order.pop_front() {
                self.ids.remove(&item.id);
                out.push(item);
            }
        }
        out
    }

    /// Removes by id; idempotent (absent ids are ignored).
    pub fn remove_ids(&mut self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let to_remove: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.order.retain(|item| {
            let keep = !to_remove.contains(item.id.as_str());
            if !keep {
                self.ids.remove(&item.id);
            }
            keep
        });
    }

    pub fn size(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}
