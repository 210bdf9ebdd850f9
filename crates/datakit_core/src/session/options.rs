//! Session configuration.

use crate::session::tracking::TrackingMode;
use serde::{Deserialize, Serialize};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Options applied when a session and its connection are opened.
///
/// Every field has a default, so partial JSON/TOML documents are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Tracking mode a new session starts with.
    pub default_tracking: TrackingMode,
    /// Value of `PRAGMA foreign_keys` on opened connections.
    pub foreign_keys: bool,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            default_tracking: TrackingMode::NoTracking,
            foreign_keys: true,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionOptions;
    use crate::session::tracking::TrackingMode;

    #[test]
    fn defaults_enable_foreign_keys_without_tracking() {
        let options = SessionOptions::default();
        assert_eq!(options.default_tracking, TrackingMode::NoTracking);
        assert!(options.foreign_keys);
        assert_eq!(options.busy_timeout_ms, 5_000);
    }
}
