//! OpenTimestamps-style anchor: calendar submission, bit-exact file format,
//! upgrade polling, parse, and verify.

use crate::core::codec::{get_varint, put_varint};
use crate::core::errors::{WitnessError, WitnessResult};
use crate::core::logging::log_anchor_submission;
use std::io::Read;
use std::time::Duration;

pub const MAGIC: [u8; 31] = [
    0x00, b'O', b'p', b'e', b'n', b'T', b'i', b'm', b'e', b's', b't', b'a', b'm', b'p', b's',
    0x00, 0x00, b'P', b'r', b'o', b'o', b'f', 0x00, 0xBF, 0x89, 0xE2, 0xE8, 0x84, 0xE8, 0x92,
    0x94,
];
pub const VERSION: u8 = 0x01;

pub const OP_SHA256: u8 = 0x08;
pub const OP_RIPEMD160: u8 = 0x07;
pub const OP_SHA1: u8 = 0x02;
pub const OP_KECCAK256: u8 = 0x67;
pub const OP_APPEND: u8 = 0xf0;
pub const OP_PREPEND: u8 = 0xf1;
pub const OP_REVERSE: u8 = 0xf2;
pub const OP_HEXLIFY: u8 = 0xf3;

pub const ATTESTATION_BITCOIN: u8 = 0x05;
pub const ATTESTATION_LITECOIN: u8 = 0x06;
pub const ATTESTATION_ETHEREUM: u8 = 0x30;
pub const ATTESTATION_PENDING: u8 = 0x83;
pub const ATTESTATION_UNKNOWN: u8 = 0x84;

pub const BRANCH_MARKER: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    Sha1,
    Sha256,
    Ripemd160,
    Keccak256,
}

impl HashType {
    fn tag(self) -> u8 {
        match self {
            HashType::Sha1 => OP_SHA1,
            HashType::Sha256 => OP_SHA256,
            HashType::Ripemd160 => OP_RIPEMD160,
            HashType::Keccak256 => OP_KECCAK256,
        }
    }

    fn from_tag(tag: u8) -> WitnessResult<Self> {
        match tag {
            OP_SHA1 => Ok(HashType::Sha1),
            OP_SHA256 => Ok(HashType::Sha256),
            OP_RIPEMD160 => Ok(HashType::Ripemd160),
            OP_KECCAK256 => Ok(HashType::Keccak256),
            other => Err(WitnessError::Malformed(format!("unknown OTS hash-type tag {other:#x}"))),
        }
    }

    fn digest_len(self) -> usize {
        match self {
            HashType::Sha1 => 20,
            HashType::Sha256 => 32,
            HashType::Ripemd160 => 20,
            HashType::Keccak256 => 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Append(Vec<u8>),
    Prepend(Vec<u8>),
    Reverse,
    Hexlify,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attestation {
    Bitcoin { block_height: u64 },
    Litecoin { block_height: u64 },
    Ethereum { block_height: u64 },
    Pending { calendar_url: String },
    Unknown { blob: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct OtsInfo {
    pub hash_type: HashType,
    pub hash: Vec<u8>,
    pub operations: Vec<Operation>,
    pub attestations: Vec<Attestation>,
}

impl OtsInfo {
    pub fn pending_urls(&self) -> Vec<&str> {
        self.attestations
            .iter()
            .filter_map(|a| match a {
                Attestation::Pending { calendar_url } => Some(calendar_url.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_confirmed(&self) -> bool {
        self.attestations
            .iter()
            .any(|a| matches!(a, Attestation::Bitcoin { .. }))
    }
}

/// Encodes an `OtsInfo` to the bit-exact wire/file format.
pub fn encode(info: &OtsInfo) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.push(info.hash_type.tag());
    out.extend_from_slice(&info.hash);

    for op in &info.operations {
        match op {
            Operation::Append(data) => {
                out.push(OP_APPEND);
                put_varint(&mut out, data.len() as u64);
                out.extend_from_slice(data);
            }
            Operation::Prepend(data) => {
                out.push(OP_PREPEND);
                put_varint(&mut out, data.len() as u64);
                out.extend_from_slice(data);
            }
            Operation::Reverse => out.push(OP_REVERSE),
            Operation::Hexlify => out.push(OP_HEXLIFY),
        }
    }

    for (i, attestation) in info.attestations.iter().enumerate() {
        if i > 0 {
            out.push(BRANCH_MARKER);
        }
        match attestation {
            Attestation::Bitcoin { block_height } => {
                out.push(ATTESTATION_BITCOIN);
                put_varint(&mut out, *block_height);
            }
            Attestation::Litecoin { block_height } => {
                out.push(ATTESTATION_LITECOIN);
                put_varint(&mut out, *block_height);
            }
            Attestation::Ethereum { block_height } => {
                out.push(ATTESTATION_ETHEREUM);
                put_varint(&mut out, *block_height);
            }
            Attestation::Pending { calendar_url } => {
                out.push(ATTESTATION_PENDING);
                let bytes = calendar_url.as_bytes();
                put_varint(&mut out, bytes.len() as u64);
                out.extend_from_slice(bytes);
            }
            Attestation::Unknown { blob } => {
                out.push(ATTESTATION_UNKNOWN);
                put_varint(&mut out, blob.len() as u64);
                out.extend_from_slice(blob);
            }
        }
    }

    out
}

/// Parses the bit-exact wire/file format back into an `OtsInfo`.
pub fn parse(data: &[u8]) -> WitnessResult<OtsInfo> {
    if data.len() < MAGIC.len() + 1 + 1 {
        return Err(WitnessError::Malformed("OTS proof too short".into()));
    }
    if data[0..MAGIC.len()] != MAGIC[..] {
        return Err(WitnessError::InvalidMagic);
    }
    let mut offset = MAGIC.len();
    let version = data[offset];
    if version != VERSION {
        return Err(WitnessError::InvalidVersion(version as u32));
    }
    offset += 1;

    let hash_type = HashType::from_tag(data[offset])?;
    offset += 1;
    let digest_len = hash_type.digest_len();
    if offset + digest_len > data.len() {
        return Err(WitnessError::Malformed("OTS proof truncated digest".into()));
    }
    let hash = data[offset..offset + digest_len].to_vec();
    offset += digest_len;

    let mut operations = Vec::new();
    let mut attestations = Vec::new();

    while offset < data.len() {
        let tag = data[offset];
        offset += 1;

        if tag == BRANCH_MARKER {
            continue;
        }

        match tag {
            OP_APPEND | OP_PREPEND => {
                let len = get_varint(data, &mut offset)? as usize;
                if offset + len > data.len() {
                    return Err(WitnessError::Malformed("OTS operation data truncated".into()));
                }
                let bytes = data[offset..offset + len].to_vec();
                offset += len;
                operations.push(if tag == OP_APPEND {
                    Operation::Append(bytes)
                } else {
                    Operation::Prepend(bytes)
                });
            }
            OP_REVERSE => operations.push(Operation::Reverse),
            OP_HEXLIFY => operations.push(Operation::Hexlify),
            ATTESTATION_BITCOIN | ATTESTATION_LITECOIN | ATTESTATION_ETHEREUM => {
                let block_height = get_varint(data, &mut offset)?;
                attestations.push(match tag {
                    ATTESTATION_BITCOIN => Attestation::Bitcoin { block_height },
                    ATTESTATION_LITECOIN => Attestation::Litecoin { block_height },
                    _ => Attestation::Ethereum { block_height },
                });
            }
            ATTESTATION_PENDING => {
                let len = get_varint(data, &mut offset)? as usize;
                if offset + len > data.len() {
                    return Err(WitnessError::Malformed("OTS pending URL truncated".into()));
                }
                let url = String::from_utf8_lossy(&data[offset..offset + len]).into_owned();
                offset += len;
                attestations.push(Attestation::Pending { calendar_url: url });
            }
            ATTESTATION_UNKNOWN => {
                let len = get_varint(data, &mut offset)? as usize;
                if offset + len > data.len() {
                    return Err(WitnessError::Malformed("OTS unknown attestation truncated".into()));
                }
                let blob = data[offset..offset + len].to_vec();
                offset += len;
                attestations.push(Attestation::Unknown { blob });
            }
            other => {
                return Err(WitnessError::Malformed(format!("unknown OTS tag {other:#x}")));
            }
        }
    }

    Ok(OtsInfo {
        hash_type,
        hash,
        operations,
        attestations,
    })
}

fn apply_operation(input: &[u8], op: &Operation) -> Vec<u8> {
    match op {
        Operation::Append(data) => {
            let mut out = input.to_vec();
            out.extend_from_slice(data);
            out
        }
        Operation::Prepend(data) => {
            let mut out = data.clone();
            out.extend_from_slice(input);
            out
        }
        Operation::Reverse => input.iter().rev().copied().collect(),
        Operation::Hexlify => hex::encode(input).into_bytes(),
    }
}

/// Replays the recorded operation sequence starting from `info.hash`,
/// returning the resulting merkle root.
pub fn replay(info: &OtsInfo) -> Vec<u8> {
    let mut current = info.hash.clone();
    for op in &info.operations {
        current = apply_operation(&current, op);
    }
    current
}

/// Full bitcoin-header verification hook. A missing provider means the
/// result is format-valid but not cryptographically anchored.
pub trait BlockHeaderProvider {
    fn get_header(&self, height: u64) -> Option<BlockHeader>;
}

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: [u8; 32],
    pub time: i64,
    pub merkle_root: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Parsed and internally consistent, but not checked against a real
    /// block header (no `BlockHeaderProvider` supplied).
    FormatValid { merkle_root: Vec<u8> },
    /// Checked against a bitcoin block header and confirmed anchored.
    Anchored { block_height: u64, merkle_root: Vec<u8> },
}

pub fn verify(
    data: &[u8],
    expected_hash: Option<&[u8]>,
    provider: Option<&dyn BlockHeaderProvider>,
) -> WitnessResult<VerifyOutcome> {
    let info = parse(data)?;
    if let Some(expected) = expected_hash {
        if expected != info.hash.as_slice() {
            return Err(WitnessError::HashMismatch);
        }
    }
    let merkle_root = replay(&info);

    if let Some(provider) = provider {
        for attestation in &info.attestations {
            if let Attestation::Bitcoin { block_height } = attestation {
                if let Some(header) = provider.get_header(*block_height) {
                    if header.merkle_root.as_slice() == merkle_root.as_slice() {
                        return Ok(VerifyOutcome::Anchored {
                            block_height: *block_height,
                            merkle_root,
                        });
                    }
                }
            }
        }
    }

    Ok(VerifyOutcome::FormatValid { merkle_root })
}

#[derive(Debug, Clone)]
pub struct CalendarConfig {
    pub calendar_urls: Vec<String>,
    pub min_calendars: usize,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            calendar_urls: Vec::new(),
            min_calendars: 1,
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

const MAX_COMMIT_BODY: usize = 1024 * 1024;

/// Submits a 32-byte digest to each configured calendar and combines
/// responses into the multi-calendar layout.
pub fn commit(digest: &[u8; 32], config: &CalendarConfig) -> WitnessResult<OtsInfo> {
    let client = reqwest::blocking::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| WitnessError::Malformed(e.to_string()))?;

    let mut attestations = Vec::new();
    let mut successes = 0usize;

    for url in &config.calendar_urls {
        let mut last_err = None;
        for attempt in 0..config.retry_attempts {
            let result = client
                .post(format!("{url}/digest"))
                .header("content-type", "application/x-www-form-urlencoded")
                .header("accept", "application/vnd.opentimestamps.v1")
                .body(digest.to_vec())
                .send();

            match result {
                Ok(response) if response.status().is_success() => {
                    let mut body = Vec::new();
                    if response
                        .take(MAX_COMMIT_BODY as u64)
                        .read_to_end(&mut body)
                        .is_ok()
                    {
                        attestations.push(Attestation::Pending {
                            calendar_url: url.clone(),
                        });
                        successes += 1;
                        log_anchor_submission("ots", true, url);
                        last_err = None;
                        break;
                    }
                }
                Ok(response) => {
                    last_err = Some(format!("calendar {url} returned {}", response.status()));
                }
                Err(e) => last_err = Some(e.to_string()),
            }
            std::thread::sleep(config.retry_base_delay * (attempt + 1));
        }
        if let Some(err) = last_err {
            log_anchor_submission("ots", false, &err);
        }
    }

    if successes < config.min_calendars {
        return Err(WitnessError::Rejected {
            status: 0,
            fail_info: format!("only {successes}/{} calendars responded", config.min_calendars),
        });
    }

    Ok(OtsInfo {
        hash_type: HashType::Sha256,
        hash: digest.to_vec(),
        operations: Vec::new(),
        attestations,
    })
}

/// Polls each pending attestation's calendar for an upgrade.
pub fn upgrade(info: &mut OtsInfo, config: &CalendarConfig) -> WitnessResult<bool> {
    let client = reqwest::blocking::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| WitnessError::Malformed(e.to_string()))?;

    let mut changed = false;
    let pending_urls: Vec<String> = info
        .pending_urls()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    for url in pending_urls {
        let target = format!("{url}/timestamp/{}", hex::encode(&info.hash));
        let response = match client.get(&target).send() {
            Ok(r) => r,
            Err(_) => continue,
        };
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            continue;
        }
        if !response.status().is_success() {
            continue;
        }
        let mut body = Vec::new();
        if response.take(MAX_COMMIT_BODY as u64).read_to_end(&mut body).is_err() {
            continue;
        }
        if let Ok(upgraded) = parse(&body) {
            if upgraded.is_confirmed() {
                info.attestations.retain(|a| !matches!(a, Attestation::Pending { calendar_url } if *calendar_url == url));
                info.attestations.extend(upgraded.attestations);
                changed = true;
            }
        }
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> OtsInfo {
        OtsInfo {
            hash_type: HashType::Sha256,
            hash: vec![0x11; 32],
            operations: vec![Operation::Append(vec![0xAA, 0xBB]), Operation::Reverse],
            attestations: vec![
                Attestation::Pending {
                    calendar_url: "https://calendar.example".into(),
                },
                Attestation::Bitcoin { block_height: 700_000 },
            ],
        }
    }

    #[test]
    fn encode_then_parse_round_trips() {
        let info = sample_info();
        let encoded = encode(&info);
        assert_eq!(&encoded[0..MAGIC.len()], &MAGIC[..]);
        let parsed = parse(&encoded).unwrap();
        assert_eq!(parsed.hash, info.hash);
        assert_eq!(parsed.operations, info.operations);
        assert_eq!(parsed.attestations, info.attestations);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut encoded = encode(&sample_info());
        encoded[0] ^= 0xFF;
        assert!(matches!(parse(&encoded), Err(WitnessError::InvalidMagic)));
    }

    #[test]
    fn replay_applies_operations_in_order() {
        let info = sample_info();
        let result = replay(&info);
        let mut expected = info.hash.clone();
        expected.extend_from_slice(&[0xAA, 0xBB]);
        expected.reverse();
        assert_eq!(result, expected);
    }

    #[test]
    fn is_confirmed_detects_bitcoin_attestation() {
        assert!(sample_info().is_confirmed());
        let mut unconfirmed = sample_info();
        unconfirmed.attestations.retain(|a| !matches!(a, Attestation::Bitcoin { .. }));
        assert!(!unconfirmed.is_confirmed());
    }

    #[test]
    fn verify_without_provider_is_format_valid() {
        let info = sample_info();
        let encoded = encode(&info);
        let outcome = verify(&encoded, Some(&info.hash), None).unwrap();
        assert!(matches!(outcome, VerifyOutcome::FormatValid { .. }));
    }

    #[test]
    fn verify_rejects_mismatched_expected_hash() {
        let info = sample_info();
        let encoded = encode(&info);
        let outcome = verify(&encoded, Some(&[0u8; 32]), None);
        assert!(matches!(outcome, Err(WitnessError::HashMismatch)));
    }
}
