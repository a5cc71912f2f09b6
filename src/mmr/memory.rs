use super::{expected_node_count, NodeStore};
use crate::core::errors::{WitnessError, WitnessResult};

/// In-memory MMR node storage, useful for tests and for callers who persist
/// the chain by some other means.
#[derive(Debug, Default)]
pub struct MemoryMmr {
    nodes: Vec<[u8; 32]>,
    leaf_count: u64,
}

impl MemoryMmr {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStore for MemoryMmr {
    fn append_node(&mut self, hash: [u8; 32]) -> WitnessResult<u64> {
        let pos = self.nodes.len() as u64;
        self.nodes.push(hash);
        if expected_node_count(self.leaf_count + 1) == self.nodes.len() as u64 {
            self.leaf_count += 1;
        }
        Ok(pos)
    }

    fn get_node(&self, position: u64) -> WitnessResult<[u8; 32]> {
        self.nodes
            .get(position as usize)
            .copied()
            .ok_or(WitnessError::OutOfRange {
                position,
                size: self.nodes.len() as u64,
            })
    }

    fn node_count(&self) -> u64 {
        self.nodes.len() as u64
    }

    fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    fn sync(&mut self) -> WitnessResult<()> {
        Ok(())
    }
}
