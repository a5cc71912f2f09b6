//! Ratcheting Ed25519 key hierarchy: a hardware-bound master identity signs a
//! short-lived session certificate, and each checkpoint is signed by a
//! one-shot key derived from the previous one via HKDF-SHA256. Past keys are
//! zeroed as soon as the next one is derived, so compromising state captured
//! at checkpoint i cannot forge a signature for any other ordinal.

use crate::core::codec::sha256;
use crate::core::errors::{WitnessError, WitnessResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize_signing_key::ZeroizingSigningKey;

mod zeroize_signing_key {
    use ed25519_dalek::SigningKey;

    /// Wraps a signing key so it can be explicitly dropped-and-zeroed once a
    /// ratchet step or certificate signature no longer needs it.
    pub struct ZeroizingSigningKey(Option<SigningKey>);

    impl ZeroizingSigningKey {
        pub fn new(key: SigningKey) -> Self {
            Self(Some(key))
        }

        pub fn get(&self) -> &SigningKey {
            self.0.as_ref().expect("signing key already zeroed")
        }

        pub fn zero(&mut self) {
            // Dropping the key zeroizes its secret bytes: ed25519-dalek's
            // "zeroize" feature gives SigningKey a Drop impl that wipes
            // secret_key before the memory is freed.
            self.0 = None;
        }
    }
}

/// Trait for the external hardware-uniqueness source ("PUF provider"). Pure
/// and deterministic per device; the crate never persists anything from it
/// beyond the identity it derives.
pub trait PufProvider {
    fn challenge(&self, input: &[u8]) -> Vec<u8>;
    fn device_id(&self) -> String;
}

/// Serde's built-in array support tops out at 32 elements, short of a
/// 64-byte Ed25519 signature, so signatures round-trip through a byte vec.
mod sig64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        value.to_vec().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected a 64-byte signature"))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<[u8; 64]>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            value.map(|v| v.to_vec()).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<[u8; 64]>, D::Error> {
            let bytes = Option::<Vec<u8>>::deserialize(deserializer)?;
            match bytes {
                None => Ok(None),
                Some(b) => b
                    .try_into()
                    .map(Some)
                    .map_err(|_| serde::de::Error::custom("expected a 64-byte signature")),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCertificate {
    pub session_id: [u8; 32],
    pub document_hash: [u8; 32],
    pub session_pubkey: [u8; 32],
    pub valid_from_ns: i64,
    pub valid_until_ns: i64,
    pub master_pubkey: [u8; 32],
    #[serde(with = "sig64")]
    pub master_signature: [u8; 64],
}

impl SessionCertificate {
    fn signed_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.session_id);
        buf.extend_from_slice(&self.document_hash);
        buf.extend_from_slice(&self.session_pubkey);
        buf.extend_from_slice(&self.valid_from_ns.to_be_bytes());
        buf.extend_from_slice(&self.valid_until_ns.to_be_bytes());
        buf
    }

    pub fn verify(&self) -> WitnessResult<()> {
        let verifying_key = VerifyingKey::from_bytes(&self.master_pubkey)
            .map_err(|e| WitnessError::CertificateInvalid(e.to_string()))?;
        let signature = Signature::from_bytes(&self.master_signature);
        verifying_key
            .verify(&self.signed_bytes(), &signature)
            .map_err(|_| WitnessError::SignatureInvalid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSignature {
    pub ordinal: u64,
    pub checkpoint_hash: [u8; 32],
    pub one_shot_pubkey: [u8; 32],
    #[serde(with = "sig64")]
    pub signature: [u8; 64],
    #[serde(with = "sig64::option")]
    pub link_signature: Option<[u8; 64]>,
}

const CHECKPOINT_DOMAIN: &[u8] = b"witness-ckpt";
const RATCHET_DOMAIN: &[u8] = b"witness-ratchet";

/// Derives the master identity's keypair from a fixed sequence of PUF
/// challenges: `SHA-512(challenge_0 ‖ .. ‖ challenge_3)` splits into a 32-byte
/// seed and a 32-byte nonce (the nonce is presently unused beyond binding
/// the derivation to all four challenges).
pub fn derive_master_identity(puf: &dyn PufProvider) -> WitnessResult<SigningKey> {
    use sha2::Digest;
    let mut hasher = Sha512::new();
    for (i, tag) in ["witness-master-0", "witness-master-1", "witness-master-2", "witness-master-3"]
        .iter()
        .enumerate()
    {
        let response = puf.challenge(tag.as_bytes());
        hasher.update((i as u32).to_be_bytes());
        hasher.update(&response);
    }
    let digest = hasher.finalize();
    let seed: [u8; 32] = digest[0..32]
        .try_into()
        .map_err(|_| WitnessError::Malformed("master identity digest too short".into()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Starts a session: derives a session keypair from the PUF and the document
/// hash, signs a certificate under the master key, then zeroes the master
/// key so only the session key pair survives.
pub fn start_session(
    puf: &dyn PufProvider,
    master_key: SigningKey,
    document_hash: [u8; 32],
    valid_from_ns: i64,
    valid_until_ns: i64,
) -> WitnessResult<(SessionCertificate, Ratchet)> {
    let session_seed_material = puf.challenge(b"witness-session-seed");
    let mut session_input = Vec::new();
    session_input.extend_from_slice(&session_seed_material);
    session_input.extend_from_slice(&document_hash);
    let session_id = sha256(&session_input);

    let hk = Hkdf::<sha2::Sha256>::new(Some(&session_id), &session_seed_material);
    let mut session_seed = [0u8; 32];
    hk.expand(b"witness-session-key", &mut session_seed)
        .map_err(|_| WitnessError::Malformed("HKDF expand failed".into()))?;
    let session_signing_key = SigningKey::from_bytes(&session_seed);
    let session_pubkey = session_signing_key.verifying_key().to_bytes();

    let mut certificate = SessionCertificate {
        session_id,
        document_hash,
        session_pubkey,
        valid_from_ns,
        valid_until_ns,
        master_pubkey: master_key.verifying_key().to_bytes(),
        master_signature: [0u8; 64],
    };
    let signed_bytes = certificate.signed_bytes();
    let signature = master_key.sign(&signed_bytes);
    certificate.master_signature = signature.to_bytes();

    // Dropping the master key zeroizes its secret bytes (ed25519-dalek's
    // "zeroize" feature).
    drop(master_key);

    let ratchet = Ratchet::new(session_signing_key);
    Ok((certificate, ratchet))
}

/// Forward-secure ratchet of one-shot signing keys, one per checkpoint
/// ordinal. Signing ordinal `i` derives key `i` from key `i-1` via
/// HKDF-SHA256, signs a link from `i-1` to `i`, signs the checkpoint under
/// key `i`, then zeroes key `i-1`.
pub struct Ratchet {
    current: ZeroizingSigningKey,
    next_ordinal: u64,
    previous_pubkey: Option<[u8; 32]>,
}

impl Ratchet {
    fn new(session_key: SigningKey) -> Self {
        Self {
            current: ZeroizingSigningKey::new(session_key),
            next_ordinal: 0,
            previous_pubkey: None,
        }
    }

    /// Signs the checkpoint at the ratchet's current ordinal and advances.
    pub fn sign_checkpoint(&mut self, checkpoint_hash: [u8; 32]) -> WitnessResult<CheckpointSignature> {
        let ordinal = self.next_ordinal;

        let (signing_key, link_signature) = if ordinal == 0 {
            (self.current.get().clone(), None)
        } else {
            let prev_key = self.current.get().clone();
            let mut seed_input = Vec::new();
            seed_input.extend_from_slice(RATCHET_DOMAIN);
            seed_input.extend_from_slice(&ordinal.to_be_bytes());
            let hk = Hkdf::<sha2::Sha256>::new(None, prev_key.as_bytes());
            let mut new_seed = [0u8; 32];
            hk.expand(&seed_input, &mut new_seed)
                .map_err(|_| WitnessError::Malformed("HKDF expand failed".into()))?;
            let new_key = SigningKey::from_bytes(&new_seed);
            let new_pub = new_key.verifying_key().to_bytes();
            let link_sig = prev_key.sign(&new_pub);

            self.current.zero();
            self.current = ZeroizingSigningKey::new(new_key);
            self.previous_pubkey = Some(prev_key.verifying_key().to_bytes());
            (self.current.get().clone(), Some(link_sig.to_bytes()))
        };

        let mut msg = Vec::new();
        msg.extend_from_slice(CHECKPOINT_DOMAIN);
        msg.extend_from_slice(&ordinal.to_be_bytes());
        msg.extend_from_slice(&checkpoint_hash);
        let signature = signing_key.sign(&msg);

        self.next_ordinal += 1;

        Ok(CheckpointSignature {
            ordinal,
            checkpoint_hash,
            one_shot_pubkey: signing_key.verifying_key().to_bytes(),
            signature: signature.to_bytes(),
            link_signature,
        })
    }
}

/// Verifies a sequence of checkpoint signatures under a session certificate:
/// the certificate under the master key, each signature under its own
/// one-shot key, and each link signature chaining the previous key to the
/// next. Rejects reused one-shot keys across ordinals.
pub fn verify_signature_chain(
    certificate: &SessionCertificate,
    signatures: &[CheckpointSignature],
) -> WitnessResult<()> {
    certificate.verify()?;

    let mut seen_keys = std::collections::HashSet::new();
    let mut previous_pubkey: Option<[u8; 32]> = None;

    for sig in signatures {
        if !seen_keys.insert(sig.one_shot_pubkey) {
            return Err(WitnessError::SignatureInvalid);
        }

        let verifying_key = VerifyingKey::from_bytes(&sig.one_shot_pubkey)
            .map_err(|e| WitnessError::CertificateInvalid(e.to_string()))?;
        let mut msg = Vec::new();
        msg.extend_from_slice(CHECKPOINT_DOMAIN);
        msg.extend_from_slice(&sig.ordinal.to_be_bytes());
        msg.extend_from_slice(&sig.checkpoint_hash);
        let signature = Signature::from_bytes(&sig.signature);
        verifying_key
            .verify(&msg, &signature)
            .map_err(|_| WitnessError::SignatureInvalid)?;

        if sig.ordinal == 0 {
            if sig.one_shot_pubkey != certificate.session_pubkey {
                return Err(WitnessError::SignatureInvalid);
            }
        } else {
            let prev = previous_pubkey.ok_or(WitnessError::SignatureInvalid)?;
            let link_sig = sig.link_signature.ok_or(WitnessError::SignatureInvalid)?;
            let prev_key = VerifyingKey::from_bytes(&prev)
                .map_err(|e| WitnessError::CertificateInvalid(e.to_string()))?;
            let link_signature = Signature::from_bytes(&link_sig);
            prev_key
                .verify(&sig.one_shot_pubkey, &link_signature)
                .map_err(|_| WitnessError::SignatureInvalid)?;
        }

        previous_pubkey = Some(sig.one_shot_pubkey);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPuf;
    impl PufProvider for FixedPuf {
        fn challenge(&self, input: &[u8]) -> Vec<u8> {
            sha256(input).to_vec()
        }
        fn device_id(&self) -> String {
            "test-device".into()
        }
    }

    #[test]
    fn ratchet_produces_verifiable_chain() {
        let puf = FixedPuf;
        let master = derive_master_identity(&puf).unwrap();
        let (cert, mut ratchet) = start_session(&puf, master, [9u8; 32], 0, 1_000_000).unwrap();

        let mut sigs = Vec::new();
        for i in 0u8..5 {
            sigs.push(ratchet.sign_checkpoint(sha256(&[i])).unwrap());
        }

        assert!(verify_signature_chain(&cert, &sigs).is_ok());
    }

    #[test]
    fn one_shot_keys_are_never_reused() {
        let puf = FixedPuf;
        let master = derive_master_identity(&puf).unwrap();
        let (_cert, mut ratchet) = start_session(&puf, master, [1u8; 32], 0, 1).unwrap();
        let a = ratchet.sign_checkpoint(sha256(b"a")).unwrap();
        let b = ratchet.sign_checkpoint(sha256(b"b")).unwrap();
        assert_ne!(a.one_shot_pubkey, b.one_shot_pubkey);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let puf = FixedPuf;
        let master = derive_master_identity(&puf).unwrap();
        let (cert, mut ratchet) = start_session(&puf, master, [2u8; 32], 0, 1).unwrap();
        let mut sig = ratchet.sign_checkpoint(sha256(b"a")).unwrap();
        sig.signature[0] ^= 0xFF;
        assert!(verify_signature_chain(&cert, &[sig]).is_err());
    }

    #[test]
    fn master_identity_is_deterministic_for_same_device() {
        let puf = FixedPuf;
        let a = derive_master_identity(&puf).unwrap();
        let b = derive_master_identity(&puf).unwrap();
        assert_eq!(a.verifying_key().to_bytes(), b.verifying_key().to_bytes());
    }
}
