use std::time::Duration;

/// Tunables recognized by the core. All durations are milliseconds; none
/// are persisted and none come from the environment — callers (e.g.
/// `membership-kube`'s binary wiring) own that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub heartbeat_interval_ms: i64,
    pub stale_threshold_ms: i64,
    pub reconnect_interval_ms: u64,
    pub reconciler_quick_cycle_ms: u64,
    pub reconciler_long_cycle_ms: u64,
    pub shutdown_grace_ms: u64,
    /// Multiplier `k` (≥ 2) for the stale-sibling GC rule: siblings older
    /// than `stale_threshold_ms * gc_multiplier` are purged outright
    /// rather than merely filtered from `getSiblings`.
    pub gc_multiplier: i64,
}

impl ReconcilerConfig {
    /// `heartbeat_interval_ms` defaults to a third of `stale_threshold_ms`.
    pub fn with_stale_threshold(stale_threshold_ms: i64) -> Self {
        Self {
            heartbeat_interval_ms: stale_threshold_ms / 3,
            stale_threshold_ms,
            reconnect_interval_ms: 2_000,
            reconciler_quick_cycle_ms: 50,
            reconciler_long_cycle_ms: 5_000,
            shutdown_grace_ms: 5_000,
            gc_multiplier: 2,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stale_threshold_ms <= 0 {
            return Err(ConfigError::NotPositive("staleThresholdMs"));
        }
        if self.heartbeat_interval_ms <= 0 {
            return Err(ConfigError::NotPositive("heartbeatIntervalMs"));
        }
        if self.heartbeat_interval_ms >= self.stale_threshold_ms {
            return Err(ConfigError::HeartbeatNotBelowStaleThreshold);
        }
        if self.reconciler_quick_cycle_ms == 0 {
            return Err(ConfigError::NotPositive("reconcilerQuickCycleMs"));
        }
        if self.reconciler_long_cycle_ms == 0 {
            return Err(ConfigError::NotPositive("reconcilerLongCycleMs"));
        }
        if self.gc_multiplier < 2 {
            return Err(ConfigError::GcMultiplierTooSmall);
        }
        Ok(())
    }

    pub fn long_cycle(&self) -> Duration {
        Duration::from_millis(self.reconciler_long_cycle_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn gc_threshold_ms(&self) -> i64 {
        self.stale_threshold_ms.saturating_mul(self.gc_multiplier)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("heartbeatIntervalMs must be below staleThresholdMs")]
    HeartbeatNotBelowStaleThreshold,
    #[error("gc_multiplier must be at least 2")]
    GcMultiplierTooSmall,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ReconcilerConfig::with_stale_threshold(9_000).validate().is_ok());
    }

    #[test]
    fn rejects_heartbeat_at_or_above_stale_threshold() {
        let mut cfg = ReconcilerConfig::with_stale_threshold(9_000);
        cfg.heartbeat_interval_ms = 9_000;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::HeartbeatNotBelowStaleThreshold)
        );
    }

    #[test]
    fn rejects_gc_multiplier_below_two() {
        let mut cfg = ReconcilerConfig::with_stale_threshold(9_000);
        cfg.gc_multiplier = 1;
        assert_eq!(cfg.validate(), Err(ConfigError::GcMultiplierTooSmall));
    }
}
