//! End-to-end scenarios that exercise each subsystem through its public API
//! the way a host application embedding this crate would.

use authorship_witness::anchors::der;
use authorship_witness::anchors::ots::{self, Attestation, HashType, OtsInfo};
use authorship_witness::anchors::rfc3161::{self, DigestAlgorithm};
use authorship_witness::chain::Chain;
use authorship_witness::keys::{self, PufProvider};
use authorship_witness::mmr::{FileMmr, Mmr};
use authorship_witness::vdf::VdfParams;
use authorship_witness::wal::recovery::{self, RecoveryPolicy};
use authorship_witness::wal::{EntryType, Wal};
use std::fs;

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    der::encode_tlv(tag, value, &mut out);
    out
}

fn fast_vdf_params() -> VdfParams {
    VdfParams {
        iterations_per_second: 100_000,
        min_iterations: 50,
        max_iterations: 1_000_000,
    }
}

/// Commit-verify: a document is edited across several checkpoints, the
/// resulting chain verifies, and a single tampered field anywhere in a
/// checkpoint is enough to break verification.
#[test]
fn commit_verify_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let doc_path = dir.path().join("manuscript.txt");

    fs::write(&doc_path, b"Chapter one.").unwrap();
    let mut chain = Chain::new(&doc_path, fast_vdf_params());
    chain.commit("started writing").unwrap();

    fs::write(&doc_path, b"Chapter one. Chapter two.").unwrap();
    chain.commit("added chapter two").unwrap();

    fs::write(&doc_path, b"Chapter one. Chapter two. Revised.").unwrap();
    chain.commit("revision pass").unwrap();

    assert_eq!(chain.len(), 3);
    assert!(chain.verify().is_ok());

    let chain_file = dir.path().join("chain.json");
    chain.save(&chain_file).unwrap();
    let reloaded = Chain::load(&chain_file).unwrap();
    assert!(reloaded.verify().is_ok());
    assert_eq!(reloaded.latest().unwrap().checkpoint_hash, chain.latest().unwrap().checkpoint_hash);

    // Tamper with the persisted chain file directly (as if an attacker
    // edited the second checkpoint's message after the fact) and confirm
    // the reloaded chain fails verification.
    let raw = fs::read(&chain_file).unwrap();
    let mut value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    let message = value["checkpoints"][1]["message"].as_str().unwrap().to_string();
    value["checkpoints"][1]["message"] = serde_json::Value::String(message + "!");
    fs::write(&chain_file, serde_json::to_vec(&value).unwrap()).unwrap();

    let broken = Chain::load(&chain_file).unwrap();
    assert!(broken.verify().is_err());
}

/// MMR proof: leaves are appended to a file-backed MMR, closed and reopened
/// (simulating a process restart), and every leaf's inclusion proof both
/// verifies honestly and is rejected when its hash is flipped.
#[test]
fn mmr_proof_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence.mmr");

    {
        let store = FileMmr::open(&path).unwrap();
        let mut mmr = Mmr::new(store);
        for i in 0..7u32 {
            mmr.append(format!("leaf-{i}").as_bytes()).unwrap();
        }
        assert_eq!(mmr.leaf_count(), 7);
    }

    let store = FileMmr::open(&path).unwrap();
    let mmr = Mmr::new(store);
    assert_eq!(mmr.leaf_count(), 7);

    for i in 0..7u64 {
        let proof = mmr.generate_proof(i).unwrap();
        assert!(mmr.verify_proof(&proof).unwrap());

        let mut falsified = proof;
        falsified.leaf_hash[0] ^= 0xFF;
        assert!(!mmr.verify_proof(&falsified).unwrap());
    }
}

/// WAL recovery: a session's keystrokes and heartbeats are appended, the WAL
/// is reopened as if after a crash (no session-end marker was ever written),
/// and recovery reports the buffered activity plus the incomplete-commit flag.
#[test]
fn wal_recovery_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.wal");

    {
        let mut wal = Wal::open(&path, [9u8; 32], [3u8; 32]).unwrap();
        wal.append(EntryType::SessionStart, b"begin".to_vec()).unwrap();
        wal.append(EntryType::KeystrokeBatch, b"the quick".to_vec()).unwrap();
        wal.append(EntryType::KeystrokeBatch, b" brown fox".to_vec()).unwrap();
        wal.append(EntryType::Heartbeat, b"tick".to_vec()).unwrap();
        // process crashes here: no SessionEnd, no Checkpoint entry
    }

    let wal = Wal::open(&path, [9u8; 32], [3u8; 32]).unwrap();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64;
    let recovered = recovery::recover(&wal, &RecoveryPolicy::default(), now, now).unwrap();

    assert!(recovered.significant);
    assert_eq!(recovered.total_keystrokes, 2);
    assert!(recovered.incomplete_commit);
    assert_eq!(recovered.keystroke_batches[0], b"the quick");
}

/// OTS verify: a synthetic OTS proof round-trips through the bit-exact wire
/// encoding, and verification without a block-header provider falls back to
/// format-only validation while still catching a mismatched expected hash.
#[test]
fn ots_verify_scenario() {
    let digest = [0x42u8; 32];
    let info = OtsInfo {
        hash_type: HashType::Sha256,
        hash: digest.to_vec(),
        operations: vec![ots::Operation::Append(b"-salt".to_vec())],
        attestations: vec![
            Attestation::Pending {
                calendar_url: "https://calendar.example/digest".to_string(),
            },
            Attestation::Bitcoin { block_height: 800_000 },
        ],
    };

    let encoded = ots::encode(&info);
    let decoded = ots::parse(&encoded).unwrap();
    assert_eq!(decoded.hash, digest.to_vec());
    assert!(decoded.is_confirmed());
    assert_eq!(decoded.pending_urls(), vec!["https://calendar.example/digest"]);

    let outcome = ots::verify(&encoded, Some(&digest), None).unwrap();
    assert!(matches!(outcome, ots::VerifyOutcome::FormatValid { .. }));

    let wrong_hash = [0x99u8; 32];
    assert!(ots::verify(&encoded, Some(&wrong_hash), None).is_err());
}

/// RFC 3161 response parsing: a synthetic TimeStampResp (pkiStatusInfo +
/// a minimal ContentInfo/SignedData/TSTInfo) is hand-assembled with the DER
/// primitives and parsed back, then checked against the originating request.
#[test]
fn rfc3161_response_parsing_scenario() {
    let hash = [0x11u8; 32];
    let request = rfc3161::build_request(DigestAlgorithm::Sha256, &hash, true, None).unwrap();

    let message_imprint = der::encode_sequence(&[
        der::encode_sequence(&[der::encode_oid(rfc3161::OID_SHA256), der::encode_null()]),
        tlv(der::TAG_OCTET_STRING, &hash),
    ]);

    let tst_info = der::encode_sequence(&[
        der::encode_integer(1),
        der::encode_oid(&[1, 2, 3, 4]),
        message_imprint,
        der::encode_integer(7),
        tlv(der::TAG_GENERALIZED_TIME, b"20260731000000Z"),
    ]);

    let encap_content_info = der::encode_sequence(&[
        der::encode_oid(&[1, 2, 840, 113549, 1, 9, 16, 1, 4]),
        der::encode_context(der::CONTEXT_CONSTRUCTED_0, &[tst_info]),
    ]);

    let signed_data = der::encode_sequence(&[
        der::encode_integer(3),
        der::encode_sequence(&[]),
        encap_content_info,
    ]);

    let content_info = der::encode_sequence(&[
        der::encode_oid(&[1, 2, 840, 113549, 1, 7, 2]),
        der::encode_context(der::CONTEXT_CONSTRUCTED_0, &[signed_data]),
    ]);

    let status_info = der::encode_sequence(&[der::encode_integer(0)]);
    let response_bytes = der::encode_sequence(&[status_info, content_info]);

    let response = rfc3161::parse_response(&response_bytes).unwrap();
    assert_eq!(response.status, 0);
    let token = response.token.expect("token present");
    assert_eq!(token.message_imprint_hash, hash.to_vec());
    assert_eq!(token.message_imprint_algorithm, DigestAlgorithm::Sha256);
    assert_eq!(token.serial_number, vec![7]);

    let _ = request;
}

/// Key ratchet: a session derived from a fixed PUF signs several checkpoints;
/// the whole signature chain verifies, and flipping one byte of a single
/// one-shot signature breaks the chain.
#[test]
fn key_ratchet_scenario() {
    struct FixedPuf;
    impl PufProvider for FixedPuf {
        fn challenge(&self, input: &[u8]) -> Vec<u8> {
            let mut v = input.to_vec();
            v.extend_from_slice(b"-fixed-device-response");
            v
        }
        fn device_id(&self) -> String {
            "fixed-device".to_string()
        }
    }

    let puf = FixedPuf;
    let master_key = keys::derive_master_identity(&puf).unwrap();
    let document_hash = [0x55u8; 32];
    let (certificate, mut ratchet) = keys::start_session(&puf, master_key, document_hash, 0, 1_000_000_000).unwrap();
    assert!(certificate.verify().is_ok());

    let mut signatures = Vec::new();
    for i in 0..4u8 {
        let checkpoint_hash = [i; 32];
        signatures.push(ratchet.sign_checkpoint(checkpoint_hash).unwrap());
    }

    assert!(keys::verify_signature_chain(&certificate, &signatures).is_ok());

    signatures[2].signature[0] ^= 0xFF;
    assert!(keys::verify_signature_chain(&certificate, &signatures).is_err());
}
