//! Store clocks
//!
//! The store reads its clock once per transaction, so every timestamp written
//! by one atomic operation is identical. TTL expiry, cooldowns and
//! `updated_at` stamps all come from the same provider.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the store clock
pub trait TimeProvider: Send + Sync + 'static {
    /// Milliseconds since Unix epoch
    fn now_millis(&self) -> i64;
}

/// Wall clock; a clock before the epoch reads as 0
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Frozen clock
#[derive(Clone, Copy, Debug)]
pub struct FixedTimeProvider(pub i64);

impl FixedTimeProvider {
    pub fn new(now_ms: i64) -> Self {
        Self(now_ms)
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

/// Manually advanced clock
///
/// Shared through an `Arc` between the store and the test driving it, so
/// cooldown windows and TTLs can be crossed without sleeping.
#[derive(Debug, Default)]
pub struct ManualTimeProvider {
    now_ms: AtomicI64,
}

impl ManualTimeProvider {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs * 1000);
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Seconds as a millisecond TTL, saturating at `i64::MAX`
pub fn secs_to_millis(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemTimeProvider.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_fixed_clock_never_moves() {
        let clock = FixedTimeProvider::new(1_700_000_000_000);
        assert_eq!(clock.now_millis(), clock.now_millis());
        assert_eq!(clock.now_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_secs_to_millis_saturates() {
        assert_eq!(secs_to_millis(30), 30_000);
        assert_eq!(secs_to_millis(100_000_000_000_000_000), i64::MAX);
        assert_eq!(secs_to_millis(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_manual_time_provider() {
        let provider = ManualTimeProvider::new(1_000);
        assert_eq!(provider.now_millis(), 1_000);

        provider.advance_secs(30);
        assert_eq!(provider.now_millis(), 31_000);

        provider.advance_ms(5);
        assert_eq!(provider.now_millis(), 31_005);

        provider.set(0);
        assert_eq!(provider.now_millis(), 0);
    }
}
