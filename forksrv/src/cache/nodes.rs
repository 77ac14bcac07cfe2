use std::collections::HashMap;

use parking_lot::Mutex;

/// Process-wide table of program counters reported through global requests.
///
/// Global requests carry no translation work, only bookkeeping, so the table
/// is a plain counter per pc.
#[derive(Debug, Default)]
pub struct GlobalNodeTable {
    nodes: Mutex<HashMap<u64, u64>>,
}

impl GlobalNodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a visit to `pc`. Returns `true` the first time `pc` is seen.
    pub fn update(&self, pc: u64) -> bool {
        let mut nodes = self.nodes.lock();
        let count = nodes.entry(pc).or_insert(0);
        *count += 1;
        *count == 1
    }

    pub fn contains(&self, pc: u64) -> bool {
        self.nodes.lock().contains_key(&pc)
    }

    /// Number of updates recorded for `pc`.
    pub fn visits(&self, pc: u64) -> u64 {
        self.nodes.lock().get(&pc).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
