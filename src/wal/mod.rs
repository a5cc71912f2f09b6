//! Crash-durable write-ahead log: a framed, HMAC+CRC-protected, hash-chained
//! append log used to buffer high-frequency activity (keystroke batches,
//! jitter samples, heartbeats) between checkpoint commits.

pub mod recovery;

pub use recovery::{RecoveredData, RecoveryPolicy};

use crate::core::codec::{
    crc32_ieee, get_i64, get_u32, get_u64, get_u8, hmac_sha256, put_i64, put_u32, put_u64, put_u8,
    sha256,
};
use crate::core::errors::{WitnessError, WitnessResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

const MAGIC: &[u8; 4] = b"WWAL";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    KeystrokeBatch = 1,
    DocumentHash = 2,
    JitterSample = 3,
    Heartbeat = 4,
    SessionStart = 5,
    SessionEnd = 6,
    Checkpoint = 7,
}

impl EntryType {
    fn from_u8(v: u8) -> WitnessResult<Self> {
        Ok(match v {
            1 => EntryType::KeystrokeBatch,
            2 => EntryType::DocumentHash,
            3 => EntryType::JitterSample,
            4 => EntryType::Heartbeat,
            5 => EntryType::SessionStart,
            6 => EntryType::SessionEnd,
            7 => EntryType::Checkpoint,
            other => return Err(WitnessError::Malformed(format!("unknown entry type {}", other))),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub sequence: u64,
    pub timestamp_ns: i64,
    pub entry_type: EntryType,
    pub payload: Vec<u8>,
    pub prev_hash: [u8; 32],
}

impl Entry {
    fn body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u64(&mut buf, self.sequence);
        put_i64(&mut buf, self.timestamp_ns);
        put_u8(&mut buf, self.entry_type as u8);
        put_u32(&mut buf, self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.prev_hash);
        buf
    }

    fn hash(&self) -> [u8; 32] {
        let mut buf = Vec::new();
        put_u64(&mut buf, self.sequence);
        put_i64(&mut buf, self.timestamp_ns);
        put_u8(&mut buf, self.entry_type as u8);
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.prev_hash);
        sha256(&buf)
    }

    fn encode(&self, hmac_key: &[u8]) -> Vec<u8> {
        let body = self.body();
        let hmac = hmac_sha256(hmac_key, &body);
        let mut framed = body;
        framed.extend_from_slice(&hmac);
        let crc = crc32_ieee(&framed);

        let mut out = Vec::with_capacity(4 + framed.len() + 4);
        put_u32(&mut out, framed.len() as u32);
        out.extend_from_slice(&framed);
        put_u32(&mut out, crc);
        out
    }

    fn decode(data: &[u8], offset: &mut usize, hmac_key: &[u8]) -> WitnessResult<Self> {
        let start = *offset;
        let length = get_u32(data, offset)? as usize;
        let framed_start = *offset;
        let framed = data
            .get(framed_start..framed_start + length)
            .ok_or_else(|| WitnessError::Malformed("truncated entry frame".into()))?;
        *offset = framed_start + length;
        let crc_expected = get_u32(data, offset)?;

        let crc_actual = crc32_ieee(framed);
        if crc_actual != crc_expected {
            return Err(WitnessError::Corrupted {
                sequence: 0,
                reason: format!("CRC mismatch at byte offset {}", start),
            });
        }

        let body = &framed[..framed.len() - 32];
        let stored_hmac = &framed[framed.len() - 32..];

        let mut body_offset = 0usize;
        let sequence = get_u64(body, &mut body_offset)?;
        let timestamp_ns = get_i64(body, &mut body_offset)?;
        let entry_type = EntryType::from_u8(get_u8(body, &mut body_offset)?)?;
        let payload_len = get_u32(body, &mut body_offset)? as usize;
        let payload = body
            .get(body_offset..body_offset + payload_len)
            .ok_or_else(|| WitnessError::Malformed("truncated payload".into()))?
            .to_vec();
        body_offset += payload_len;
        let prev_hash: [u8; 32] = body[body_offset..body_offset + 32]
            .try_into()
            .map_err(|_| WitnessError::Malformed("truncated prev_hash".into()))?;

        let expected_hmac = hmac_sha256(hmac_key, body);
        if !crate::core::codec::ct_eq(&expected_hmac, stored_hmac) {
            return Err(WitnessError::InvalidHmac { sequence });
        }

        Ok(Entry {
            sequence,
            timestamp_ns,
            entry_type,
            payload,
            prev_hash,
        })
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64
}

/// Append-only WAL file: header + contiguous framed entries.
pub struct Wal {
    path: PathBuf,
    file: File,
    hmac_key: [u8; 32],
    next_sequence: u64,
    last_hash: [u8; 32],
}

impl Wal {
    pub fn open<P: Into<PathBuf>>(path: P, hmac_key: [u8; 32], session_id: [u8; 32]) -> WitnessResult<Self> {
        let path = path.into();
        let exists = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !exists || file.metadata()?.len() == 0 {
            write_header(&mut file, &session_id, now_ns(), 0)?;
            return Ok(Self {
                path,
                file,
                hmac_key,
                next_sequence: 0,
                last_hash: [0u8; 32],
            });
        }

        let mut header = [0u8; HEADER_LEN];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(WitnessError::InvalidMagic);
        }
        let version = u32::from_be_bytes(header[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(WitnessError::InvalidVersion(version));
        }

        let mut body = Vec::new();
        file.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        file.read_to_end(&mut body)?;

        let (next_sequence, last_hash, valid_len) = scan(&body, &hmac_key);
        let truncated_len = HEADER_LEN as u64 + valid_len as u64;
        if truncated_len != file.metadata()?.len() {
            file.set_len(truncated_len)?;
        }

        Ok(Self {
            path,
            file,
            hmac_key,
            next_sequence,
            last_hash,
        })
    }

    pub fn append(&mut self, entry_type: EntryType, payload: Vec<u8>) -> WitnessResult<Entry> {
        let timer = crate::core::logging::PerformanceTimer::new("wal.append");
        let entry = Entry {
            sequence: self.next_sequence,
            timestamp_ns: now_ns(),
            entry_type,
            payload,
            prev_hash: self.last_hash,
        };
        let encoded = entry.encode(&self.hmac_key);
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&encoded)?;
        self.file.sync_data()?;

        self.next_sequence += 1;
        self.last_hash = entry.hash();
        let elapsed_ms = timer.elapsed_ms();
        crate::core::logging::log_categorized_operation(
            crate::core::logging::PerformanceCategory::WalFsync,
            "wal.append",
            elapsed_ms,
        );
        timer.check_target(50);
        Ok(entry)
    }

    pub fn read_all(&self) -> WitnessResult<Vec<Entry>> {
        self.read_after(0)
    }

    pub fn read_after(&self, seq: u64) -> WitnessResult<Vec<Entry>> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        let mut body = Vec::new();
        file.read_to_end(&mut body)?;

        let mut entries = Vec::new();
        let mut offset = 0usize;
        let mut expected_prev = [0u8; 32];
        while offset < body.len() {
            let entry = Entry::decode(&body, &mut offset, &self.hmac_key)?;
            if entry.prev_hash != expected_prev {
                return Err(WitnessError::BrokenChain {
                    sequence: entry.sequence,
                });
            }
            expected_prev = entry.hash();
            if entry.sequence >= seq {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Rewrites the WAL keeping only entries with `sequence >= before_seq`,
    /// rebuilding the hash chain and HMAC/CRC framing from scratch.
    pub fn truncate(&mut self, before_seq: u64) -> WitnessResult<()> {
        let surviving: Vec<Entry> = self
            .read_all()?
            .into_iter()
            .filter(|e| e.sequence >= before_seq)
            .collect();

        let tmp_path = self.path.with_extension("wal.tmp");
        let mut last_hash = [0u8; 32];
        {
            let mut tmp = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            write_header(&mut tmp, &[0u8; 32], now_ns(), before_seq)?;

            for old_entry in &surviving {
                let rebuilt = Entry {
                    sequence: old_entry.sequence,
                    timestamp_ns: old_entry.timestamp_ns,
                    entry_type: old_entry.entry_type,
                    payload: old_entry.payload.clone(),
                    prev_hash: last_hash,
                };
                let encoded = rebuilt.encode(&self.hmac_key);
                tmp.write_all(&encoded)?;
                last_hash = rebuilt.hash();
            }
            tmp.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.last_hash = last_hash;
        Ok(())
    }

    /// Reads every entry like [`Wal::read_all`], but tolerates individual
    /// CRC (corrupted) or HMAC (tampered) failures instead of aborting at
    /// the first one: each bad frame is skipped (its length is always known
    /// before the integrity check runs, so the scan can resume right after
    /// it) and counted separately. Hash-chain continuity is only checked
    /// between two entries that both decoded cleanly, since a skipped
    /// entry's hash is unrecoverable.
    pub fn read_lenient(&self) -> WitnessResult<LenientRead> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        let mut body = Vec::new();
        file.read_to_end(&mut body)?;

        let mut entries = Vec::new();
        let mut offset = 0usize;
        let mut expected_prev = [0u8; 32];
        let mut last_was_bad = false;
        let mut corrupted = 0usize;
        let mut tampered = 0usize;

        while offset < body.len() {
            match Entry::decode(&body, &mut offset, &self.hmac_key) {
                Ok(entry) => {
                    if !last_was_bad && entry.prev_hash != expected_prev {
                        return Err(WitnessError::BrokenChain {
                            sequence: entry.sequence,
                        });
                    }
                    expected_prev = entry.hash();
                    entries.push(entry);
                    last_was_bad = false;
                }
                Err(WitnessError::Corrupted { .. }) => {
                    corrupted += 1;
                    last_was_bad = true;
                }
                Err(WitnessError::InvalidHmac { .. }) => {
                    tampered += 1;
                    last_was_bad = true;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(LenientRead {
            entries,
            corrupted,
            tampered,
        })
    }
}

/// Result of [`Wal::read_lenient`]: the entries that decoded cleanly plus
/// counts of the bad frames skipped along the way.
#[derive(Debug, Clone, Default)]
pub struct LenientRead {
    pub entries: Vec<Entry>,
    pub corrupted: usize,
    pub tampered: usize,
}

fn write_header(file: &mut File, session_id: &[u8; 32], created_at_ns: i64, last_checkpoint_seq: u64) -> WitnessResult<()> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&VERSION.to_be_bytes());
    header.extend_from_slice(session_id);
    header.extend_from_slice(&created_at_ns.to_be_bytes());
    header.extend_from_slice(&last_checkpoint_seq.to_be_bytes());
    header.resize(HEADER_LEN, 0);
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    file.sync_all()?;
    Ok(())
}

/// Scans entry bytes from the start and returns `(next_sequence, last_hash,
/// valid_byte_len)`. Only a frame whose boundary can't even be determined
/// (a torn write: the in-progress tail of a crash) stops the scan and gets
/// truncated away — a structurally complete frame that fails its CRC or
/// HMAC check is skipped over and left on disk, since deciding whether that
/// many bad entries are tolerable is [`recovery::RecoveryPolicy`]'s job, not
/// open-time scanning's.
fn scan(body: &[u8], hmac_key: &[u8]) -> (u64, [u8; 32], usize) {
    let mut offset = 0usize;
    let mut next_sequence = 0u64;
    let mut last_hash = [0u8; 32];
    let mut valid_len = 0usize;
    let mut last_was_bad = false;

    loop {
        if offset >= body.len() {
            break;
        }
        let start = offset;
        match Entry::decode(body, &mut offset, hmac_key) {
            Ok(entry) => {
                if !last_was_bad && entry.prev_hash != last_hash {
                    let _ = start;
                    break;
                }
                last_hash = entry.hash();
                next_sequence = entry.sequence + 1;
                valid_len = offset;
                last_was_bad = false;
            }
            Err(WitnessError::Corrupted { .. }) | Err(WitnessError::InvalidHmac { .. }) => {
                valid_len = offset;
                last_was_bad = true;
            }
            Err(_) => {
                let _ = start;
                break;
            }
        }
    }

    (next_sequence, last_hash, valid_len)
}
