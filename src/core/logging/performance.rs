/// Performance timing and throughput logging for the hot paths that the
/// heartbeat controller cares about: VDF computation, WAL fsync, MMR append,
/// and anchor submission round-trips.
use log::info;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum PerformanceCategory {
    VdfComputation,
    MmrAppend,
    WalFsync,
    ChainCommit,
    AnchorSubmission,
    KeyDerivation,
}

impl PerformanceCategory {
    fn category_name(&self) -> &'static str {
        match self {
            PerformanceCategory::VdfComputation => "VDF_COMPUTE",
            PerformanceCategory::MmrAppend => "MMR_APPEND",
            PerformanceCategory::WalFsync => "WAL_FSYNC",
            PerformanceCategory::ChainCommit => "CHAIN_COMMIT",
            PerformanceCategory::AnchorSubmission => "ANCHOR_SUBMIT",
            PerformanceCategory::KeyDerivation => "KEY_DERIVE",
        }
    }
}

/// Timer for measuring a single operation's duration, logged on `finish`.
#[derive(Debug)]
pub struct PerformanceTimer {
    start_time: Instant,
    operation_name: String,
}

impl PerformanceTimer {
    pub fn new(operation_name: &str) -> Self {
        Self {
            start_time: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn check_target(&self, target_ms: u64) {
        crate::core::errors::check_performance_target(
            &self.operation_name,
            self.elapsed_ms(),
            target_ms,
        );
    }

    pub fn finish(self) -> u64 {
        let elapsed_ms = self.elapsed_ms();
        info!("{}: {}ms", self.operation_name, elapsed_ms);
        elapsed_ms
    }
}

/// Logs a single hot-path operation's duration under its category, the way
/// `log_checkpoint_commit`/`log_anchor_submission` log their own events:
/// a direct call through `log`, no logger instance to thread around.
pub fn log_categorized_operation(category: PerformanceCategory, operation_name: &str, duration_ms: u64) {
    info!("{}: {} in {}ms", category.category_name(), operation_name, duration_ms);
}
