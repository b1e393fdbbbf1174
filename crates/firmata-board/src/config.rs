//! Session timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing parameters for opening a board.
///
/// All values are in milliseconds so the struct maps directly onto a
/// configuration file section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Time to let the device finish its reset before querying it, unless it
    /// announces itself first.
    pub boot_delay_ms: u64,
    /// Delay before re-sending an unanswered handshake query.
    pub retry_delay_ms: u64,
    /// Number of unanswered retries after which the handshake fails.
    pub max_retries: u32,
    /// Upper bound on the whole handshake.
    pub handshake_timeout_ms: u64,
    /// How long a single transport read may block before the reader loop
    /// checks its timers and stop flag.
    pub poll_interval_ms: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        BoardConfig {
            boot_delay_ms: 2000,
            retry_delay_ms: 500,
            max_retries: 10,
            handshake_timeout_ms: 10_000,
            poll_interval_ms: 20,
        }
    }
}

impl BoardConfig {
    /// Boot delay as a duration.
    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }

    /// Retry delay as a duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Handshake timeout as a duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// A configuration suited to in-process devices that answer immediately.
    pub fn fast() -> Self {
        BoardConfig {
            boot_delay_ms: 10,
            retry_delay_ms: 50,
            max_retries: 5,
            handshake_timeout_ms: 2000,
            poll_interval_ms: 5,
        }
    }
}
