//! VoltageEMS Realtime Database
//!
//! The shared key-value store every core engine runs against: strings,
//! hashes, sets, sorted sets and lists with TTLs, SCAN and pub/sub.
//!
//! # Key Components
//!
//! - **Rtdb trait**: Store handle, hands out atomic transactions
//! - **Txn**: Lock guard exposing the command set
//! - **MemoryRtdb**: In-memory backend
//! - **TimeProvider**: Pluggable store clock

pub mod error;
pub mod memory_impl;
pub mod time;
pub mod traits;
pub mod txn;

// Re-exports
pub use bytes::Bytes;
pub use error::{Result, RtdbError};
pub use memory_impl::{MemoryRtdb, MemoryStats};
pub use time::{
    secs_to_millis, FixedTimeProvider, ManualTimeProvider, SystemTimeProvider, TimeProvider,
};
pub use traits::{PubSubMessage, Rtdb};
pub use txn::{Txn, TTL_MISSING, TTL_PERSISTENT};

/// Helper functions for common operations
pub mod helpers {
    use super::{ManualTimeProvider, MemoryRtdb};
    use std::sync::Arc;

    // ==================== Test Support ====================

    /// Create an in-memory RTDB for unit testing
    ///
    /// # Example
    /// ```
    /// use voltage_rtdb::helpers::create_test_rtdb;
    /// use voltage_rtdb::Rtdb;
    ///
    /// let rtdb = create_test_rtdb();
    /// rtdb.begin().set("k", "v").unwrap();
    /// ```
    pub fn create_test_rtdb() -> Arc<MemoryRtdb> {
        Arc::new(MemoryRtdb::new())
    }

    /// Create an in-memory RTDB driven by a manual clock
    ///
    /// The returned clock is shared with the store; advancing it moves the
    /// store's notion of "now" (TTL expiry, cooldowns, timestamps).
    pub fn create_test_rtdb_with_clock(start_ms: i64) -> (Arc<MemoryRtdb>, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::new(start_ms));
        let rtdb = Arc::new(MemoryRtdb::with_time_provider(clock.clone()));
        (rtdb, clock)
    }
}
