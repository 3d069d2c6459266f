//! Driver configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs shared by every driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// How long receives may keep failing before the driver gives up
    pub timeout_ms: u64,
    /// Pause between retries after a failed receive
    pub sleeptime_ms: u64,
}

impl DriverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sleeptime(&self) -> Duration {
        Duration::from_millis(self.sleeptime_ms)
    }

    /// Sets the retry window
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            sleeptime_ms: 10,
        }
    }
}
