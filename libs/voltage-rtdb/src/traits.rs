//! Trait definitions for RTDB abstraction

use crate::txn::Txn;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Message delivered to pub/sub subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

/// Shared realtime store
///
/// Every engine operation runs inside exactly one [`Txn`] obtained from
/// [`Rtdb::begin`]. Engine code is synchronous: a transaction must never be
/// held across an `.await`.
///
/// Implementations:
/// - `MemoryRtdb`: In-memory backend
pub trait Rtdb: Send + Sync + 'static {
    /// Start an atomic operation; the store is locked until the guard drops
    fn begin(&self) -> Txn<'_>;

    /// Receive every message published after this call
    fn subscribe(&self) -> broadcast::Receiver<PubSubMessage>;

    /// Current store clock in milliseconds since Unix epoch
    fn now_millis(&self) -> i64;
}
