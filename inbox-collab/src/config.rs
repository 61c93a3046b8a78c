//! Engine configuration.

use std::time::Duration;

/// Tuning for the document store and sessions.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on waiting for a document's lock (and its first load)
    pub lock_timeout: Duration,
    /// Operation log length that triggers compaction
    pub log_compaction_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            log_compaction_threshold: 1024,
        }
    }
}

impl EngineConfig {
    /// Short timeout and a tiny log so tests exercise both paths quickly.
    pub fn for_testing() -> Self {
        Self {
            lock_timeout: Duration::from_millis(200),
            log_compaction_threshold: 8,
        }
    }
}
