/// Structured logging for the authorship-witness system: checkpoint commits,
/// anchor submissions, and performance metrics, each routed through `log` so
/// host applications control the sink.
pub mod performance;

pub use performance::*;

use chrono::{DateTime, Utc};
use colored::*;
use log::{debug, error, info, warn};

/// Log levels for different components
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub level: LogLevel,
    pub show_timestamps: bool,
    pub show_colors: bool,
    pub show_performance: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            show_timestamps: true,
            show_colors: true,
            show_performance: true,
        }
    }
}

/// Initialize the logging system
pub fn init_logger(config: Option<LoggerConfig>) -> Result<(), Box<dyn std::error::Error>> {
    let config = config.unwrap_or_default();

    let log_level = match config.level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    std::env::set_var("RUST_LOG", log_level);

    match env_logger::try_init() {
        Ok(_) => {
            info!("authorship-witness logger initialized");
            info!("log level: {}", log_level.to_uppercase());
        }
        Err(_) => {
            debug!("logger already initialized, skipping");
        }
    }

    Ok(())
}

pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn log_with_color(level: LogLevel, category: &str, message: &str) {
    let timestamp = format_timestamp();
    let formatted_message = format!("[{}] {}: {}", timestamp, category, message);

    match level {
        LogLevel::Error => error!("{}", formatted_message.red()),
        LogLevel::Warn => warn!("{}", formatted_message.yellow()),
        LogLevel::Info => info!("{}", formatted_message.green()),
        LogLevel::Debug => debug!("{}", formatted_message.blue()),
        LogLevel::Trace => debug!("{}", formatted_message.white()),
    }
}

/// Logs a checkpoint commit: ordinal, chain length, and elapsed VDF time.
pub fn log_checkpoint_commit(ordinal: u64, chain_len: usize, vdf_elapsed_ms: u64) {
    log_with_color(
        LogLevel::Info,
        "checkpoint",
        &format!(
            "committed ordinal={} chain_len={} vdf_elapsed={}ms",
            ordinal, chain_len, vdf_elapsed_ms
        ),
    );
}

/// Logs the outcome of an anchor submission (OTS / RFC 3161).
pub fn log_anchor_submission(anchor_name: &str, success: bool, detail: &str) {
    let level = if success { LogLevel::Info } else { LogLevel::Warn };
    log_with_color(
        level,
        "anchor",
        &format!("{} submission {}: {}", anchor_name, if success { "ok" } else { "failed" }, detail),
    );
}
