//! Tamper-evident authorship evidence: VDF-linked checkpoint chains backed
//! by an append-only Merkle mountain range, a crash-durable write-ahead log
//! for high-frequency activity, a ratcheting Ed25519 key hierarchy, and
//! external anchoring to OpenTimestamps and RFC 3161 time-stamp authorities.

pub mod anchors;
pub mod chain;
pub mod controller;
pub mod core;
pub mod keys;
pub mod mmr;
pub mod vdf;
pub mod wal;

pub use core::errors::{WitnessError, WitnessResult};
