//! Engine tunables.

use std::time::Duration;

/// Knobs for validation runs and the fixer consumer. `Default` matches the
/// values the engine shipped with; `from_env` lets deployments override them
/// without a config file.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reverse-sweep id batch size.
    pub batch_size: u64,
    /// Per store call budget inside a sweep.
    pub call_timeout: Duration,
    /// Delivery attempts before a poison event is dropped.
    pub max_delivery_attempts: u32,
    /// Budget for a single repair.
    pub fix_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            call_timeout: Duration::from_secs(1),
            max_delivery_attempts: 16,
            fix_timeout: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_u64("LIVESHIFT_BATCH_SIZE").unwrap_or(defaults.batch_size),
            call_timeout: env_u64("LIVESHIFT_CALL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_timeout),
            max_delivery_attempts: env_u64("LIVESHIFT_MAX_DELIVERY_ATTEMPTS")
                .map(|v| v as u32)
                .unwrap_or(defaults.max_delivery_attempts),
            fix_timeout: env_u64("LIVESHIFT_FIX_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.fix_timeout),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.call_timeout, Duration::from_secs(1));
        assert!(cfg.max_delivery_attempts > 0);
    }
}
