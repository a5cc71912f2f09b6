use super::{expected_node_count, NodeStore};
use crate::core::errors::{WitnessError, WitnessResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"WMMR";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 16; // magic(4) + version(u32) + leaf_count(u64)
const NODE_LEN: u64 = 32;

/// File-backed MMR node storage: a fixed header followed by contiguous
/// 32-byte node records. A partial write from a crashed append is detected
/// at open and truncated away.
pub struct FileMmr {
    file: File,
    leaf_count: u64,
    node_count: u64,
}

impl FileMmr {
    pub fn open<P: AsRef<Path>>(path: P) -> WitnessResult<Self> {
        let exists = path.as_ref().exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if !exists || file.metadata()?.len() == 0 {
            file.write_all(MAGIC)?;
            file.write_all(&VERSION.to_be_bytes())?;
            file.write_all(&0u64.to_be_bytes())?;
            file.sync_all()?;
            return Ok(Self {
                file,
                leaf_count: 0,
                node_count: 0,
            });
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(WitnessError::InvalidMagic);
        }
        let version = u32::from_be_bytes(header[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(WitnessError::InvalidVersion(version));
        }
        let leaf_count = u64::from_be_bytes(header[8..16].try_into().unwrap());

        let body_len = file.metadata()?.len().saturating_sub(HEADER_LEN);
        let stored_nodes = body_len / NODE_LEN;
        let expected = expected_node_count(leaf_count);
        let node_count = stored_nodes.min(expected);

        let truncated_len = HEADER_LEN + node_count * NODE_LEN;
        if truncated_len != HEADER_LEN + stored_nodes * NODE_LEN {
            file.set_len(truncated_len)?;
        }

        Ok(Self {
            file,
            leaf_count,
            node_count,
        })
    }

    fn write_header_leaf_count(&mut self) -> WitnessResult<()> {
        self.file.seek(SeekFrom::Start(8))?;
        self.file.write_all(&self.leaf_count.to_be_bytes())?;
        Ok(())
    }

    pub fn close(mut self) -> WitnessResult<()> {
        self.sync()
    }
}

impl NodeStore for FileMmr {
    fn append_node(&mut self, hash: [u8; 32]) -> WitnessResult<u64> {
        let pos = self.node_count;
        self.file
            .seek(SeekFrom::Start(HEADER_LEN + pos * NODE_LEN))?;
        self.file.write_all(&hash)?;
        self.node_count += 1;
        if expected_node_count(self.leaf_count + 1) == self.node_count {
            self.leaf_count += 1;
            self.write_header_leaf_count()?;
        }
        self.file.sync_data()?;
        Ok(pos)
    }

    fn get_node(&self, position: u64) -> WitnessResult<[u8; 32]> {
        if position >= self.node_count {
            return Err(WitnessError::OutOfRange {
                position,
                size: self.node_count,
            });
        }
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(HEADER_LEN + position * NODE_LEN))?;
        let mut buf = [0u8; 32];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn node_count(&self) -> u64 {
        self.node_count
    }

    fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    fn sync(&mut self) -> WitnessResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
