//! Append-only Merkle Mountain Range store with inclusion and range proofs.
//!
//! Node addressing follows the leaf-count binary decomposition: the set bits
//! of the current leaf count (high to low) are exactly the heights of the
//! current peaks, in decreasing order. Appending a leaf is equivalent to
//! incrementing that binary counter - merges happen while the two highest
//! peaks share a height, exactly mirroring carry propagation.

pub mod file;
pub mod memory;

pub use file::FileMmr;
pub use memory::MemoryMmr;

use crate::core::codec::sha256;
use crate::core::errors::{WitnessError, WitnessResult};
use crate::core::logging::{log_categorized_operation, PerformanceCategory, PerformanceTimer};

fn leaf_hash(data: &[u8]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(1 + data.len());
    buf.push(0x00);
    buf.extend_from_slice(data);
    sha256(&buf)
}

fn internal_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(1 + 32 + 32);
    buf.push(0x01);
    buf.extend_from_slice(left);
    buf.extend_from_slice(right);
    sha256(&buf)
}

/// One step of an inclusion path: the sibling hash and which side it sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct Proof {
    pub leaf_index: u64,
    pub leaf_hash: [u8; 32],
    pub path: Vec<([u8; 32], Side)>,
    pub peak_index: usize,
    pub root: [u8; 32],
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct RangeProof {
    pub leaves: Vec<(u64, [u8; 32])>,
    pub path: Vec<([u8; 32], Side)>,
    pub peak_index: usize,
    pub root: [u8; 32],
    pub size: u64,
}

/// Backing storage contract for MMR nodes: a flat, append-only array of
/// 32-byte hashes addressed by absolute node position.
pub trait NodeStore {
    fn append_node(&mut self, hash: [u8; 32]) -> WitnessResult<u64>;
    fn get_node(&self, position: u64) -> WitnessResult<[u8; 32]>;
    fn node_count(&self) -> u64;
    fn leaf_count(&self) -> u64;
    fn sync(&mut self) -> WitnessResult<()>;
}

/// Heights of the current peaks, decreasing order, derived from the leaf
/// count's binary representation (bit `k` set => a peak of height `k`).
fn peak_heights(leaf_count: u64) -> Vec<u32> {
    let mut heights = Vec::new();
    for bit in (0..64).rev() {
        if leaf_count & (1 << bit) != 0 {
            heights.push(bit as u32);
        }
    }
    heights
}

/// Absolute node positions of the current peaks, highest first.
fn peak_positions(leaf_count: u64) -> Vec<u64> {
    let mut positions = Vec::new();
    let mut next_start = 0u64;
    for h in peak_heights(leaf_count) {
        let tree_nodes = (1u64 << (h + 1)) - 1;
        positions.push(next_start + tree_nodes - 1);
        next_start += tree_nodes;
    }
    positions
}

/// Total node count (leaves + internal) for a given leaf count.
fn expected_node_count(leaf_count: u64) -> u64 {
    2 * leaf_count - (leaf_count.count_ones() as u64)
}

/// Bags peaks right-to-left per the spec's fold rule: a lone peak is the
/// root as-is; otherwise `H(peak[0] ‖ bag(peak[1..]))`.
fn bag_peaks(peaks: &[[u8; 32]]) -> [u8; 32] {
    match peaks.split_first() {
        None => sha256(&[]),
        Some((first, rest)) => {
            if rest.is_empty() {
                *first
            } else {
                internal_hash(first, &bag_peaks(rest))
            }
        }
    }
}

pub struct Mmr<S: NodeStore> {
    store: S,
}

impl<S: NodeStore> Mmr<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn size(&self) -> u64 {
        self.store.node_count()
    }

    pub fn leaf_count(&self) -> u64 {
        self.store.leaf_count()
    }

    pub fn peaks(&self) -> WitnessResult<Vec<[u8; 32]>> {
        peak_positions(self.store.leaf_count())
            .into_iter()
            .map(|p| self.store.get_node(p))
            .collect()
    }

    pub fn root(&self) -> WitnessResult<[u8; 32]> {
        let peaks = self.peaks()?;
        Ok(bag_peaks(&peaks))
    }

    pub fn get_node(&self, position: u64) -> WitnessResult<[u8; 32]> {
        self.store.get_node(position)
    }

    pub fn sync(&mut self) -> WitnessResult<()> {
        self.store.sync()
    }

    /// Appends a leaf, performing whatever merge cascade the binary-counter
    /// increment requires. Returns the new leaf's index (0-based).
    pub fn append(&mut self, leaf_bytes: &[u8]) -> WitnessResult<u64> {
        let timer = PerformanceTimer::new("mmr.append");
        let leaf_index = self.store.leaf_count();
        self.store.append_node(leaf_hash(leaf_bytes))?;

        // Merging while the two highest peaks share a height mirrors carry
        // propagation when incrementing a binary counter: the number of
        // merges equals leaf_index's count of trailing one-bits.
        let before_peaks = peak_positions(leaf_index);
        let merges = leaf_index.trailing_ones() as usize;
        let mut carry = self.store.get_node(self.store.node_count() - 1)?;
        for merge_step in 0..merges {
            let sibling_pos = *before_peaks
                .get(before_peaks.len() - 1 - merge_step)
                .ok_or_else(|| WitnessError::Malformed("MMR peak underflow".into()))?;
            let sibling_hash = self.store.get_node(sibling_pos)?;
            let merged = internal_hash(&sibling_hash, &carry);
            self.store.append_node(merged)?;
            carry = merged;
        }

        log_categorized_operation(PerformanceCategory::MmrAppend, "mmr.append", timer.elapsed_ms());
        Ok(leaf_index)
    }

    /// Builds an inclusion proof for `leaf_index`.
    pub fn generate_proof(&self, leaf_index: u64) -> WitnessResult<Proof> {
        let leaf_count = self.store.leaf_count();
        if leaf_index >= leaf_count {
            return Err(WitnessError::OutOfRange {
                position: leaf_index,
                size: leaf_count,
            });
        }
        let peaks = peak_positions(leaf_count);
        let (peak_idx, peak_start_leaf, height) = locate_peak(leaf_index, leaf_count)?;
        let base = peaks[peak_idx] - subtree_node_count(height).saturating_sub(1);
        let leaf_offset = leaf_index - peak_start_leaf;

        let (leaf_pos, path_positions) = descend(base, height, leaf_offset);
        let leaf_h = self.store.get_node(leaf_pos)?;

        let mut path = Vec::with_capacity(path_positions.len());
        for (pos, side) in path_positions {
            path.push((self.store.get_node(pos)?, side));
        }

        Ok(Proof {
            leaf_index,
            leaf_hash: leaf_h,
            path,
            peak_index: peak_idx,
            root: self.root()?,
            size: self.store.node_count(),
        })
    }

    /// Verifies a proof against the store's own peak layout at the proof's
    /// recorded leaf/size context (substitutes the recomputed peak into the
    /// proof's own peak list before bagging, per the spec's verification
    /// algorithm).
    pub fn verify_proof(&self, proof: &Proof) -> WitnessResult<bool> {
        let computed_peak = fold_path(proof.leaf_hash, &proof.path);
        let mut peaks = self.peaks()?;
        if proof.peak_index >= peaks.len() {
            return Ok(false);
        }
        peaks[proof.peak_index] = computed_peak;
        Ok(bag_peaks(&peaks) == proof.root)
    }

    /// Builds a range proof for `count` consecutive leaves starting at
    /// `start`. The range must exactly cover one mountain's leaf span (a
    /// single peak's full subtree) — a range proof for an arbitrary,
    /// unaligned slice would need a per-leaf audit path per member and is
    /// not implemented.
    pub fn generate_range_proof(&self, start: u64, count: u64) -> WitnessResult<RangeProof> {
        let leaf_count = self.store.leaf_count();
        let end = start
            .checked_add(count)
            .ok_or_else(|| WitnessError::Malformed("range proof overflow".into()))?;
        if count == 0 || end > leaf_count {
            return Err(WitnessError::OutOfRange {
                position: end,
                size: leaf_count,
            });
        }

        let peaks = peak_positions(leaf_count);
        let (peak_idx, peak_start_leaf, height) = locate_peak(start, leaf_count)?;
        let peak_leaf_span = 1u64 << height;
        if peak_start_leaf != start || count != peak_leaf_span {
            return Err(WitnessError::Malformed(
                "range proof must exactly cover one peak's leaf span".into(),
            ));
        }
        let base = peaks[peak_idx] - subtree_node_count(height).saturating_sub(1);

        let mut leaves = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let (leaf_pos, _) = descend(base, height, offset);
            leaves.push((start + offset, self.store.get_node(leaf_pos)?));
        }

        Ok(RangeProof {
            leaves,
            path: Vec::new(),
            peak_index: peak_idx,
            root: self.root()?,
            size: self.store.node_count(),
        })
    }

    /// Verifies a range proof by rebuilding its peak's root from the
    /// supplied leaves and re-bagging against the store's current peaks.
    pub fn verify_range_proof(&self, proof: &RangeProof) -> WitnessResult<bool> {
        if proof.leaves.is_empty() || !proof.leaves.windows(2).all(|w| w[0].0 + 1 == w[1].0) {
            return Ok(false);
        }
        let leaf_hashes: Vec<[u8; 32]> = proof.leaves.iter().map(|(_, h)| *h).collect();
        if !leaf_hashes.len().is_power_of_two() {
            return Ok(false);
        }
        let computed_peak = fold_leaves(&leaf_hashes);

        let mut peaks = self.peaks()?;
        if proof.peak_index >= peaks.len() {
            return Ok(false);
        }
        peaks[proof.peak_index] = computed_peak;
        Ok(bag_peaks(&peaks) == proof.root)
    }
}

/// Reduces a power-of-two list of leaf hashes to a single subtree root by
/// pairwise merging bottom-up, mirroring the append-time merge cascade.
fn fold_leaves(leaves: &[[u8; 32]]) -> [u8; 32] {
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks_exact(2)
            .map(|pair| internal_hash(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

fn fold_path(leaf_hash: [u8; 32], path: &[([u8; 32], Side)]) -> [u8; 32] {
    let mut acc = leaf_hash;
    for (sibling, side) in path {
        acc = match side {
            Side::Left => internal_hash(sibling, &acc),
            Side::Right => internal_hash(&acc, sibling),
        };
    }
    acc
}

/// Total node count of a perfect binary subtree of the given height
/// (leaves at height 0): `2^(height+1) - 1`.
fn subtree_node_count(height: u32) -> u64 {
    (1u64 << (height + 1)) - 1
}

/// Finds which peak (by index into the decreasing-height peak list) owns
/// `leaf_index`, along with the index of that peak's first leaf and its
/// height.
fn locate_peak(leaf_index: u64, leaf_count: u64) -> WitnessResult<(usize, u64, u32)> {
    let heights = peak_heights(leaf_count);
    let mut leaf_cursor = 0u64;
    for (idx, h) in heights.iter().enumerate() {
        let tree_leaves = 1u64 << h;
        if leaf_index < leaf_cursor + tree_leaves {
            return Ok((idx, leaf_cursor, *h));
        }
        leaf_cursor += tree_leaves;
    }
    Err(WitnessError::OutOfRange {
        position: leaf_index,
        size: leaf_count,
    })
}

/// Post-order node layout within a perfect binary subtree of `height`
/// rooted logically at absolute position `base` (i.e. `base` is where the
/// subtree's own post-order numbering begins, not the root's position):
/// the left half occupies `[base, base + N(height-1) - 1]`, the right half
/// the next `N(height-1)` positions, and the subtree's own root sits right
/// after both. Descends to `leaf_offset` (0-indexed within the subtree),
/// returning its absolute node position and the leaf-to-root sibling path.
fn descend(base: u64, height: u32, leaf_offset: u64) -> (u64, Vec<(u64, Side)>) {
    if height == 0 {
        return (base, Vec::new());
    }
    let half = 1u64 << (height - 1);
    let child_size = subtree_node_count(height - 1);
    let left_base = base;
    let right_base = base + child_size;

    if leaf_offset < half {
        let (leaf_pos, mut path) = descend(left_base, height - 1, leaf_offset);
        let sibling_root = right_base + child_size - 1;
        path.push((sibling_root, Side::Right));
        (leaf_pos, path)
    } else {
        let (leaf_pos, mut path) = descend(right_base, height - 1, leaf_offset - half);
        let sibling_root = left_base + child_size - 1;
        path.push((sibling_root, Side::Left));
        (leaf_pos, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmr::memory::MemoryMmr;

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let mut mmr = Mmr::new(MemoryMmr::new());
        mmr.append(b"a").unwrap();
        assert_eq!(mmr.root().unwrap(), leaf_hash(b"a"));
    }

    #[test]
    fn two_leaves_root_is_internal_hash() {
        let mut mmr = Mmr::new(MemoryMmr::new());
        mmr.append(b"a").unwrap();
        mmr.append(b"b").unwrap();
        let expected = internal_hash(&leaf_hash(b"a"), &leaf_hash(b"b"));
        assert_eq!(mmr.root().unwrap(), expected);
    }

    #[test]
    fn three_leaves_has_two_peaks() {
        let mut mmr = Mmr::new(MemoryMmr::new());
        for leaf in [b"a".as_slice(), b"b", b"c"] {
            mmr.append(leaf).unwrap();
        }
        assert_eq!(mmr.peaks().unwrap().len(), 2);
    }

    #[test]
    fn append_is_deterministic_across_runs() {
        let mut a = Mmr::new(MemoryMmr::new());
        let mut b = Mmr::new(MemoryMmr::new());
        for i in 0u8..20 {
            a.append(&[i]).unwrap();
            b.append(&[i]).unwrap();
        }
        assert_eq!(a.root().unwrap(), b.root().unwrap());
    }

    #[test]
    fn proof_round_trips_for_every_leaf_up_to_sixteen() {
        let mut mmr = Mmr::new(MemoryMmr::new());
        for i in 0u8..16 {
            mmr.append(&[i]).unwrap();
            for j in 0..=i {
                let proof = mmr.generate_proof(j as u64).unwrap();
                assert!(
                    mmr.verify_proof(&proof).unwrap(),
                    "proof for leaf {} failed at size {}",
                    j,
                    i + 1
                );
            }
        }
    }

    #[test]
    fn falsified_proof_is_rejected() {
        let mut mmr = Mmr::new(MemoryMmr::new());
        for i in 0u8..5 {
            mmr.append(&[i]).unwrap();
        }
        let mut proof = mmr.generate_proof(2).unwrap();
        proof.leaf_hash[0] ^= 0xFF;
        assert!(!mmr.verify_proof(&proof).unwrap());
    }

    #[test]
    fn out_of_range_leaf_index_errors() {
        let mut mmr = Mmr::new(MemoryMmr::new());
        mmr.append(b"a").unwrap();
        assert!(mmr.generate_proof(5).is_err());
    }

    #[test]
    fn range_proof_for_full_peak_span_verifies() {
        let mut mmr = Mmr::new(MemoryMmr::new());
        for i in 0u8..4 {
            mmr.append(&[i]).unwrap();
        }
        // leaf count 4 is a single peak of height 2, spanning leaves 0..4
        let proof = mmr.generate_range_proof(0, 4).unwrap();
        assert!(mmr.verify_range_proof(&proof).unwrap());
    }

    #[test]
    fn range_proof_rejects_misaligned_span() {
        let mut mmr = Mmr::new(MemoryMmr::new());
        for i in 0u8..5 {
            mmr.append(&[i]).unwrap();
        }
        // leaf count 5 => peaks of height 2 (leaves 0..4) and height 0 (leaf 4)
        assert!(mmr.generate_range_proof(1, 3).is_err());
        let proof = mmr.generate_range_proof(0, 4).unwrap();
        assert!(mmr.verify_range_proof(&proof).unwrap());
    }

    #[test]
    fn falsified_range_proof_is_rejected() {
        let mut mmr = Mmr::new(MemoryMmr::new());
        for i in 0u8..4 {
            mmr.append(&[i]).unwrap();
        }
        let mut proof = mmr.generate_range_proof(0, 4).unwrap();
        proof.leaves[1].1[0] ^= 0xFF;
        assert!(!mmr.verify_range_proof(&proof).unwrap());
    }
}
