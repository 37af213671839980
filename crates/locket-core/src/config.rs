//! Lock client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables shared by every lock handle of one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease applied when the caller supplies none. While such a lock is
    /// held, the watchdog keeps resetting the key TTL to this value.
    pub watchdog_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: Duration::from_secs(30),
        }
    }
}

impl LockConfig {
    /// Watchdog renewal cadence: a third of the default lease, so two
    /// renewals can fail before the lock is at risk of expiring.
    pub fn renewal_interval(&self) -> Duration {
        self.watchdog_timeout / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LockConfig::default();
        assert_eq!(config.watchdog_timeout, Duration::from_secs(30));
        assert_eq!(config.renewal_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = LockConfig {
            watchdog_timeout: Duration::from_millis(1500),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: LockConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.watchdog_timeout, Duration::from_millis(1500));
    }
}
