//! Tracing/logging setup shared by every binary and test harness.

use docindex_core::LoggingConfig;

/// Initialize process-wide logging with default settings (JSON, `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&LoggingConfig::default());
}

/// Initialize process-wide logging from configuration.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_with(config: &LoggingConfig) -> bool {
    tracing::init(config)
}

/// Subscriber construction (filters, formats).
pub mod tracing;
