//! Configuration types for Cairn
//!
//! Tunables for the map monitor. Loaded from TOML by the daemon; tests
//! override individual fields.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Monitor behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds a down-and-in OSD may linger before the tick marks it out
    pub down_out_interval_secs: u64,
    /// Seconds between maintenance ticks
    pub tick_interval_secs: u64,
    /// Seconds to accumulate pending changes before a routine propose;
    /// full-map replacements and bulk reweights bypass this
    pub propose_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            down_out_interval_secs: 300,
            tick_interval_secs: 5,
            propose_interval_secs: 1,
        }
    }
}

impl MonitorConfig {
    /// Down-and-in grace period before demotion to out
    #[must_use]
    pub fn down_out_interval(&self) -> Duration {
        Duration::from_secs(self.down_out_interval_secs)
    }

    /// Maintenance tick period
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Routine propose back-off
    #[must_use]
    pub fn propose_interval(&self) -> Duration {
        Duration::from_secs(self.propose_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.down_out_interval(), Duration::from_secs(300));
        assert_eq!(config.tick_interval(), Duration::from_secs(5));
    }
}
