use thiserror::Error;

/// Comprehensive error type for the authorship-witness evidence system.
#[derive(Error, Debug)]
pub enum WitnessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("invalid magic bytes")]
    InvalidMagic,

    #[error("invalid version: {0}")]
    InvalidVersion(u32),

    #[error("corrupted entry at sequence {sequence}: {reason}")]
    Corrupted { sequence: u64, reason: String },

    #[error("broken hash chain at sequence {sequence}")]
    BrokenChain { sequence: u64 },

    #[error("HMAC verification failed at sequence {sequence}")]
    InvalidHmac { sequence: u64 },

    #[error("position {position} out of range (size {size})")]
    OutOfRange { position: u64, size: u64 },

    #[error("checkpoint chain broken at ordinal {index}: {reason}")]
    ChainBroken { index: u64, reason: String },

    #[error("VDF proof verification failed")]
    VdfInvalid,

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("certificate chain invalid: {0}")]
    CertificateInvalid(String),

    #[error("timestamp response nonce mismatch")]
    NonceMismatch,

    #[error("timestamp response message imprint mismatch")]
    HashMismatch,

    #[error("timestamp is in the future beyond tolerance")]
    FutureTimestamp,

    #[error("timestamp authority rejected request: status={status} failInfo={fail_info}")]
    Rejected { status: i64, fail_info: String },

    #[error("timestamp not yet available")]
    NotYetAvailable,

    #[error("WAL is older than the maximum allowed age")]
    WalTooOld,

    #[error("too many corrupted WAL entries encountered during recovery")]
    TooManyCorrupted,

    #[error("too many tampered WAL entries encountered during recovery")]
    TooManyTampered,

    #[error("performance target missed: {operation} took {actual_ms}ms (target {target_ms}ms)")]
    PerformanceTarget {
        operation: String,
        actual_ms: u64,
        target_ms: u64,
    },
}

pub type WitnessResult<T> = std::result::Result<T, WitnessError>;

/// Logs (but does not fail on) a missed performance target, matching the
/// soft-target semantics of the heartbeat controller and WAL fsync path.
pub fn check_performance_target(operation: &str, actual_ms: u64, target_ms: u64) {
    if actual_ms > target_ms {
        log::warn!(
            "performance target missed: {} took {}ms (target {}ms)",
            operation,
            actual_ms,
            target_ms
        );
    }
}
