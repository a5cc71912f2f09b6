//! External anchoring: OTS and RFC 3161 providers behind a common `Anchor`
//! trait, plus a registry that fans a checkpoint hash out to every
//! registered anchor and persists receipts.

pub mod der;
pub mod ots;
pub mod rfc3161;

use crate::core::errors::WitnessResult;
use crate::core::logging::{log_categorized_operation, PerformanceCategory, PerformanceTimer};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Pending,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Receipt {
    pub anchor_name: String,
    pub hash: [u8; 32],
    pub status: ReceiptStatus,
    pub proof: Option<Vec<u8>>,
    pub created_at_ns: i64,
}

/// Implemented by each concrete anchor (OTS, RFC 3161). `commit` returns
/// the raw proof bytes to persist as a receipt.
pub trait Anchor {
    fn name(&self) -> &str;
    fn commit(&self, hash: &[u8; 32]) -> WitnessResult<Vec<u8>>;
}

pub struct OtsAnchor {
    pub config: ots::CalendarConfig,
}

impl Anchor for OtsAnchor {
    fn name(&self) -> &str {
        "ots"
    }

    fn commit(&self, hash: &[u8; 32]) -> WitnessResult<Vec<u8>> {
        let info = ots::commit(hash, &self.config)?;
        Ok(ots::encode(&info))
    }
}

pub struct Rfc3161Anchor {
    pub config: rfc3161::TsaConfig,
}

impl Anchor for Rfc3161Anchor {
    fn name(&self) -> &str {
        "rfc3161"
    }

    fn commit(&self, hash: &[u8; 32]) -> WitnessResult<Vec<u8>> {
        let request = rfc3161::build_request(rfc3161::DigestAlgorithm::Sha256, hash, true, None)?;
        let response = rfc3161::submit(&request, &self.config)?;
        Ok(response.raw)
    }
}

pub struct AnchorRegistry {
    anchors: BTreeMap<String, Box<dyn Anchor + Send + Sync>>,
    storage_dir: PathBuf,
}

impl AnchorRegistry {
    pub fn new<P: Into<PathBuf>>(storage_dir: P) -> Self {
        Self {
            anchors: BTreeMap::new(),
            storage_dir: storage_dir.into(),
        }
    }

    /// Last registration for a given name wins.
    pub fn register(&mut self, anchor: Box<dyn Anchor + Send + Sync>) {
        self.anchors.insert(anchor.name().to_string(), anchor);
    }

    pub fn get(&self, name: &str) -> Option<&(dyn Anchor + Send + Sync)> {
        self.anchors.get(name).map(|b| b.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.anchors.keys().map(|s| s.as_str()).collect()
    }

    /// Commits to every registered anchor. A per-anchor failure never
    /// aborts the others; it produces a `failed` receipt instead. Receipts
    /// come back in registration-name order for deterministic tests.
    pub fn commit_all(&self, hash: &[u8; 32], now_ns: i64) -> Vec<Receipt> {
        let mut receipts = Vec::new();
        for (name, anchor) in &self.anchors {
            let timer = PerformanceTimer::new("anchor.commit");
            let commit_result = anchor.commit(hash);
            log_categorized_operation(PerformanceCategory::AnchorSubmission, name, timer.elapsed_ms());
            let receipt = match commit_result {
                Ok(proof) => Receipt {
                    anchor_name: name.clone(),
                    hash: *hash,
                    status: ReceiptStatus::Pending,
                    proof: Some(proof),
                    created_at_ns: now_ns,
                },
                Err(e) => {
                    log::warn!("anchor {name} commit failed: {e}");
                    Receipt {
                        anchor_name: name.clone(),
                        hash: *hash,
                        status: ReceiptStatus::Failed,
                        proof: None,
                        created_at_ns: now_ns,
                    }
                }
            };
            if let Err(e) = self.persist_receipt(&receipt) {
                log::warn!("failed to persist receipt for {name}: {e}");
            }
            receipts.push(receipt);
        }
        receipts
    }

    fn receipt_filename(receipt: &Receipt) -> String {
        let dt = chrono::DateTime::from_timestamp(receipt.created_at_ns / 1_000_000_000, 0)
            .unwrap_or_default();
        let timestamp = dt.format("%Y%m%d_%H%M%S");
        let prefix = hex::encode(&receipt.hash[..8]);
        format!("{timestamp}_{prefix}.{}", receipt.anchor_name)
    }

    fn persist_receipt(&self, receipt: &Receipt) -> WitnessResult<()> {
        if receipt.status == ReceiptStatus::Failed {
            return Ok(());
        }
        fs::create_dir_all(&self.storage_dir)?;
        let filename = Self::receipt_filename(receipt);
        let path = self.storage_dir.join(filename);
        fs::write(path, receipt.proof.as_deref().unwrap_or_default())?;
        Ok(())
    }

    /// Reads every regular file under the storage directory back into a
    /// `Receipt`, inferring `anchor_name` from the filename extension.
    pub fn load_receipts(&self) -> WitnessResult<Vec<Receipt>> {
        let mut receipts = Vec::new();
        if !self.storage_dir.exists() {
            return Ok(receipts);
        }
        for entry in fs::read_dir(&self.storage_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(receipt) = Self::parse_receipt_file(&path)? {
                receipts.push(receipt);
            }
        }
        Ok(receipts)
    }

    fn parse_receipt_file(path: &Path) -> WitnessResult<Option<Receipt>> {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return Ok(None),
        };
        let anchor_name = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_string(),
            None => return Ok(None),
        };
        let stem = &file_name[..file_name.len() - anchor_name.len() - 1];
        let mut parts = stem.splitn(2, '_');
        let date_part = parts.next().unwrap_or_default();
        let time_part_and_hash = parts.next().unwrap_or_default();
        let mut rest = time_part_and_hash.splitn(2, '_');
        let time_part = rest.next().unwrap_or_default();

        let created_at_ns = chrono::NaiveDateTime::parse_from_str(
            &format!("{date_part}_{time_part}"),
            "%Y%m%d_%H%M%S",
        )
        .map(|dt| dt.and_utc().timestamp_nanos_opt().unwrap_or(0))
        .unwrap_or(0);

        let proof = fs::read(path)?;
        Ok(Some(Receipt {
            anchor_name,
            hash: [0u8; 32],
            status: ReceiptStatus::Pending,
            proof: Some(proof),
            created_at_ns,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;
    impl Anchor for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }
        fn commit(&self, hash: &[u8; 32]) -> WitnessResult<Vec<u8>> {
            Ok(hash.to_vec())
        }
    }

    struct AlwaysFails;
    impl Anchor for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }
        fn commit(&self, _hash: &[u8; 32]) -> WitnessResult<Vec<u8>> {
            Err(crate::core::errors::WitnessError::NotYetAvailable)
        }
    }

    #[test]
    fn commit_all_isolates_per_anchor_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = AnchorRegistry::new(dir.path());
        registry.register(Box::new(AlwaysOk));
        registry.register(Box::new(AlwaysFails));

        let receipts = registry.commit_all(&[3u8; 32], 1_700_000_000_000_000_000);
        assert_eq!(receipts.len(), 2);
        assert!(receipts.iter().any(|r| r.anchor_name == "always-ok" && r.status == ReceiptStatus::Pending));
        assert!(receipts.iter().any(|r| r.anchor_name == "always-fails" && r.status == ReceiptStatus::Failed));
    }

    #[test]
    fn successful_receipts_are_persisted_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = AnchorRegistry::new(dir.path());
        registry.register(Box::new(AlwaysOk));
        registry.commit_all(&[9u8; 32], 1_700_000_000_000_000_000);

        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn last_registration_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = AnchorRegistry::new(dir.path());
        registry.register(Box::new(AlwaysOk));
        registry.register(Box::new(AlwaysFails));
        // both use distinct names, so list() should show both regardless
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn load_receipts_round_trips_persisted_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = AnchorRegistry::new(dir.path());
        registry.register(Box::new(AlwaysOk));
        registry.commit_all(&[5u8; 32], 1_700_000_000_000_000_000);

        let loaded = registry.load_receipts().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].anchor_name, "always-ok");
    }
}
