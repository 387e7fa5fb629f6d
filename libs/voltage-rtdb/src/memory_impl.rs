//! In-memory RTDB implementation
//!
//! One `parking_lot::Mutex` guards the whole keyspace. Every engine operation
//! takes the lock once through [`Rtdb::begin`] and runs to completion, which
//! gives the same serializable, all-or-nothing visibility a server-side
//! store function has.

use crate::error::{Result, RtdbError};
use crate::time::{SystemTimeProvider, TimeProvider};
use crate::traits::{PubSubMessage, Rtdb};
use crate::txn::Txn;
use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::hash_map::Entry as MapEntry;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use voltage_model::KeyPattern;

/// Default pub/sub buffer per subscriber
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// Stored values
// ============================================================================

pub(crate) enum Value {
    Str(Bytes),
    Hash(BTreeMap<String, Bytes>),
    Set(BTreeSet<String>),
    ZSet(SortedSet),
    List(VecDeque<Bytes>),
}

impl Value {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::ZSet(_) => "zset",
            Value::List(_) => "list",
        }
    }

    fn is_empty_container(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.len() == 0,
            Value::List(l) => l.is_empty(),
        }
    }
}

/// Total order over f64 scores
#[derive(Debug, Clone, Copy)]
pub(crate) struct Score(pub f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sorted set: member -> score, ordered by (score, member)
#[derive(Default)]
pub(crate) struct SortedSet {
    scores: FxHashMap<String, f64>,
    order: BTreeSet<(Score, String)>,
}

impl SortedSet {
    /// Returns true when the member is new
    pub(crate) fn insert(&mut self, member: &str, score: f64) -> bool {
        match self.scores.insert(member.to_string(), score) {
            Some(old) => {
                self.order.remove(&(Score(old), member.to_string()));
                self.order.insert((Score(score), member.to_string()));
                false
            },
            None => {
                self.order.insert((Score(score), member.to_string()));
                true
            },
        }
    }

    pub(crate) fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.order.remove(&(Score(old), member.to_string()));
                true
            },
            None => false,
        }
    }

    pub(crate) fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.scores.len()
    }

    /// Members with `min <= score <= max`, ascending
    pub(crate) fn range(&self, min: f64, max: f64) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.order
            .range((Score(min), String::new())..)
            .take_while(move |(score, _)| score.0 <= max)
            .map(|(score, member)| (member.as_str(), score.0))
    }
}

// ============================================================================
// Keyspace
// ============================================================================

pub(crate) struct Entry {
    pub(crate) value: Value,
    seq: u64,
}

/// All keys of the store
///
/// Each key gets a creation sequence number; SCAN walks keys in sequence
/// order so a key that exists for the whole iteration is returned exactly
/// once, whatever is inserted or deleted between pages.
#[derive(Default)]
pub(crate) struct Keyspace {
    entries: FxHashMap<String, Entry>,
    order: BTreeMap<u64, String>,
    expires: FxHashMap<String, i64>,
    next_seq: u64,
}

macro_rules! typed_accessors {
    ($get:ident, $get_or_create:ident, $variant:ident, $ty:ty, $name:literal) => {
        pub(crate) fn $get(&mut self, key: &str, now: i64) -> Result<Option<&mut $ty>> {
            match self.lookup_mut(key, now) {
                None => Ok(None),
                Some(Value::$variant(inner)) => Ok(Some(inner)),
                Some(other) => Err(RtdbError::wrong_type($name, other.type_name())),
            }
        }

        pub(crate) fn $get_or_create(&mut self, key: &str, now: i64) -> Result<&mut $ty> {
            match self.get_or_insert_with(key, now, || Value::$variant(Default::default())) {
                Value::$variant(inner) => Ok(inner),
                other => Err(RtdbError::wrong_type($name, other.type_name())),
            }
        }
    };
}

impl Keyspace {
    fn is_expired(&self, key: &str, now: i64) -> bool {
        self.expires.get(key).is_some_and(|&at| at <= now)
    }

    /// Drop the key if its TTL has passed
    pub(crate) fn purge(&mut self, key: &str, now: i64) {
        if self.is_expired(key, now) {
            self.remove(key);
        }
    }

    pub(crate) fn lookup(&mut self, key: &str, now: i64) -> Option<&Value> {
        self.purge(key, now);
        self.entries.get(key).map(|e| &e.value)
    }

    pub(crate) fn lookup_mut(&mut self, key: &str, now: i64) -> Option<&mut Value> {
        self.purge(key, now);
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    pub(crate) fn get_or_insert_with(
        &mut self,
        key: &str,
        now: i64,
        make: impl FnOnce() -> Value,
    ) -> &mut Value {
        self.purge(key, now);
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(occupied) => &mut occupied.into_mut().value,
            MapEntry::Vacant(vacant) => {
                self.next_seq += 1;
                let seq = self.next_seq;
                self.order.insert(seq, key.to_string());
                &mut vacant.insert(Entry { value: make(), seq }).value
            },
        }
    }

    /// Replace the value at `key`, keeping its scan position, clearing its TTL
    pub(crate) fn insert(&mut self, key: &str, value: Value, now: i64) {
        *self.get_or_insert_with(key, now, || Value::Str(Bytes::new())) = value;
        self.expires.remove(key);
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        self.expires.remove(key);
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                true
            },
            None => false,
        }
    }

    /// Containers vanish when their last element is removed
    pub(crate) fn remove_if_empty(&mut self, key: &str) {
        if self
            .entries
            .get(key)
            .is_some_and(|e| e.value.is_empty_container())
        {
            self.remove(key);
        }
    }

    pub(crate) fn set_expiry(&mut self, key: &str, at_ms: i64) {
        self.expires.insert(key.to_string(), at_ms);
    }

    pub(crate) fn clear_expiry(&mut self, key: &str) -> bool {
        self.expires.remove(key).is_some()
    }

    pub(crate) fn expiry(&self, key: &str) -> Option<i64> {
        self.expires.get(key).copied()
    }

    typed_accessors!(hash, hash_or_create, Hash, BTreeMap<String, Bytes>, "hash");
    typed_accessors!(set, set_or_create, Set, BTreeSet<String>, "set");
    typed_accessors!(zset, zset_or_create, ZSet, SortedSet, "zset");
    typed_accessors!(list, list_or_create, List, VecDeque<Bytes>, "list");

    /// One SCAN page: examines at most `count` keys after `cursor`
    pub(crate) fn scan(
        &mut self,
        cursor: u64,
        pattern: Option<&KeyPattern>,
        count: usize,
        now: i64,
    ) -> (u64, Vec<String>) {
        let count = count.max(1);
        let mut keys = Vec::new();
        let mut expired = Vec::new();
        let mut examined = 0;
        let mut last_seq = 0;
        let mut exhausted = true;

        for (&seq, key) in self.order.range(cursor.saturating_add(1)..) {
            if examined == count {
                exhausted = false;
                break;
            }
            examined += 1;
            last_seq = seq;

            if self.is_expired(key, now) {
                expired.push(key.clone());
                continue;
            }
            if pattern.map_or(true, |p| p.is_match(key)) {
                keys.push(key.clone());
            }
        }

        for key in expired {
            self.remove(&key);
        }

        (if exhausted { 0 } else { last_seq }, keys)
    }

    /// Every live key matching `pattern`, sorted
    pub(crate) fn keys(&mut self, pattern: Option<&KeyPattern>, now: i64) -> Vec<String> {
        let expired: Vec<String> = self
            .expires
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }

        let mut keys: Vec<String> = self
            .entries
            .keys()
            .filter(|k| pattern.map_or(true, |p| p.is_match(k)))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats::default();
        for entry in self.entries.values() {
            match entry.value {
                Value::Str(_) => stats.string_count += 1,
                Value::Hash(_) => stats.hash_count += 1,
                Value::Set(_) => stats.set_count += 1,
                Value::ZSet(_) => stats.zset_count += 1,
                Value::List(_) => stats.list_count += 1,
            }
        }
        stats.expiring_count = self.expires.len();
        stats
    }
}

// ============================================================================
// MemoryRtdb
// ============================================================================

/// In-memory RTDB implementation
pub struct MemoryRtdb {
    keyspace: Mutex<Keyspace>,
    events: broadcast::Sender<PubSubMessage>,
    clock: Arc<dyn TimeProvider>,
}

impl MemoryRtdb {
    /// Create new in-memory RTDB instance on the system clock
    pub fn new() -> Self {
        Self::with_time_provider(Arc::new(SystemTimeProvider))
    }

    /// Create with a custom clock (fixed or manual time in tests)
    pub fn with_time_provider(clock: Arc<dyn TimeProvider>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            keyspace: Mutex::new(Keyspace::default()),
            events,
            clock,
        }
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        *self.keyspace.lock() = Keyspace::default();
    }

    /// Get statistics about stored data
    pub fn stats(&self) -> MemoryStats {
        self.keyspace.lock().stats()
    }
}

impl Default for MemoryRtdb {
    fn default() -> Self {
        Self::new()
    }
}

impl Rtdb for MemoryRtdb {
    fn begin(&self) -> Txn<'_> {
        let now_ms = self.clock.now_millis();
        Txn::new(self.keyspace.lock(), now_ms, &self.events)
    }

    fn subscribe(&self) -> broadcast::Receiver<PubSubMessage> {
        self.events.subscribe()
    }

    fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }
}

/// Statistics about memory RTDB usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub string_count: usize,
    pub hash_count: usize,
    pub set_count: usize,
    pub zset_count: usize,
    pub list_count: usize,
    pub expiring_count: usize,
}

impl MemoryStats {
    pub fn total_keys(&self) -> usize {
        self.string_count + self.hash_count + self.set_count + self.zset_count + self.list_count
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::time::ManualTimeProvider;

    #[test]
    fn test_sorted_set_reinsert_moves_member() {
        let mut z = SortedSet::default();
        assert!(z.insert("a", 5.0));
        assert!(z.insert("b", 1.0));
        assert!(!z.insert("a", 0.5));
        let order: Vec<_> = z.range(f64::NEG_INFINITY, f64::INFINITY).collect();
        assert_eq!(order, vec![("a", 0.5), ("b", 1.0)]);
        assert!(z.remove("a"));
        assert!(!z.remove("a"));
        assert_eq!(z.len(), 1);
    }

    #[test]
    fn test_scan_pages_cover_every_key_once() {
        let rtdb = MemoryRtdb::new();
        {
            let mut tx = rtdb.begin();
            for i in 0..25 {
                tx.set(&format!("k:{:02}", i), "v").unwrap();
            }
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let mut tx = rtdb.begin();
            let (next, keys) = tx.scan(cursor, Some("k:*"), 10).unwrap();
            // Insert between pages; existing keys must still all be seen
            tx.set(&format!("new:{}", cursor), "x").unwrap();
            seen.extend(keys);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn test_stats_by_type() {
        let rtdb = MemoryRtdb::new();
        {
            let mut tx = rtdb.begin();
            tx.set("s", "1").unwrap();
            tx.hset("h", "f", "v").unwrap();
            tx.sadd("set", "m").unwrap();
            tx.zadd("z", 1.0, "m").unwrap();
            tx.rpush("l", "x").unwrap();
            tx.expire("s", 1000).unwrap();
        }
        let stats = rtdb.stats();
        assert_eq!(stats.total_keys(), 5);
        assert_eq!(stats.zset_count, 1);
        assert_eq!(stats.expiring_count, 1);

        rtdb.clear();
        assert_eq!(rtdb.stats().total_keys(), 0);
    }

    #[test]
    fn test_expired_keys_are_invisible() {
        let clock = Arc::new(ManualTimeProvider::new(10_000));
        let rtdb = MemoryRtdb::with_time_provider(clock.clone());
        rtdb.begin().set("temp", "1").unwrap();
        rtdb.begin().expire("temp", 500).unwrap();

        clock.advance_ms(499);
        assert!(rtdb.begin().exists("temp").unwrap());

        clock.advance_ms(1);
        let mut tx = rtdb.begin();
        assert!(!tx.exists("temp").unwrap());
        assert!(tx.keys("*").unwrap().is_empty());
    }
}
