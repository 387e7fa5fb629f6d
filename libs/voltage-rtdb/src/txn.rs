//! Atomic store transaction
//!
//! A [`Txn`] holds the store lock for its whole lifetime. Commands follow the
//! Redis command set the rest of the platform speaks. Published messages are
//! queued and delivered to subscribers when the guard drops, after every write
//! of the transaction is in place.

use crate::error::{Result, RtdbError};
use crate::memory_impl::{Keyspace, Value};
use crate::traits::PubSubMessage;
use bytes::Bytes;
use parking_lot::MutexGuard;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::broadcast;
use voltage_model::KeyPattern;

/// TTL reported for a key that does not exist
pub const TTL_MISSING: i64 = -2;
/// TTL reported for a key without expiry
pub const TTL_PERSISTENT: i64 = -1;

/// Exclusive access to the store for one atomic operation
pub struct Txn<'a> {
    ks: MutexGuard<'a, Keyspace>,
    now_ms: i64,
    events: &'a broadcast::Sender<PubSubMessage>,
    pending: Vec<PubSubMessage>,
}

fn to_bytes(value: impl AsRef<[u8]>) -> Bytes {
    Bytes::copy_from_slice(value.as_ref())
}

fn decode(key: &str, bytes: &Bytes) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| RtdbError::SerializationError(format!("{}: {}", key, e)))
}

fn compile(pattern: &str) -> Result<KeyPattern> {
    KeyPattern::new(pattern).map_err(RtdbError::from)
}

/// Resolve Redis-style inclusive indices (negative counts from the end)
fn list_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start_idx = if start < 0 {
        (len + start).max(0)
    } else {
        start.min(len)
    };
    let stop_idx = if stop < 0 {
        (len + stop + 1).max(0)
    } else {
        (stop + 1).min(len)
    };
    (start_idx < stop_idx).then_some((start_idx as usize, stop_idx as usize))
}

impl<'a> Txn<'a> {
    pub(crate) fn new(
        ks: MutexGuard<'a, Keyspace>,
        now_ms: i64,
        events: &'a broadcast::Sender<PubSubMessage>,
    ) -> Self {
        Self {
            ks,
            now_ms,
            events,
            pending: Vec::new(),
        }
    }

    /// Store clock, read once when the transaction began
    pub fn now_millis(&self) -> i64 {
        self.now_ms
    }

    // ========== Key Operations ==========

    pub fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.ks.lookup(key, self.now_ms).is_some())
    }

    pub fn del(&mut self, key: &str) -> Result<bool> {
        self.ks.purge(key, self.now_ms);
        Ok(self.ks.remove(key))
    }

    /// Type name of the value at `key` ("string", "hash", "set", "zset", "list")
    pub fn type_of(&mut self, key: &str) -> Option<&'static str> {
        self.ks.lookup(key, self.now_ms).map(Value::type_name)
    }

    /// Set a time-to-live; `ttl_ms <= 0` deletes the key
    pub fn expire(&mut self, key: &str, ttl_ms: i64) -> Result<bool> {
        if self.ks.lookup(key, self.now_ms).is_none() {
            return Ok(false);
        }
        if ttl_ms <= 0 {
            self.ks.remove(key);
        } else {
            self.ks.set_expiry(key, self.now_ms.saturating_add(ttl_ms));
        }
        Ok(true)
    }

    pub fn persist(&mut self, key: &str) -> Result<bool> {
        if self.ks.lookup(key, self.now_ms).is_none() {
            return Ok(false);
        }
        Ok(self.ks.clear_expiry(key))
    }

    /// Remaining TTL in ms, [`TTL_PERSISTENT`] or [`TTL_MISSING`]
    pub fn ttl_millis(&mut self, key: &str) -> Result<i64> {
        if self.ks.lookup(key, self.now_ms).is_none() {
            return Ok(TTL_MISSING);
        }
        Ok(self
            .ks
            .expiry(key)
            .map_or(TTL_PERSISTENT, |at| at - self.now_ms))
    }

    /// One SCAN page; `next_cursor == 0` when the walk is complete
    pub fn scan(&mut self, cursor: u64, pattern: Option<&str>, count: usize) -> Result<(u64, Vec<String>)> {
        let matcher = pattern.map(compile).transpose()?;
        Ok(self.ks.scan(cursor, matcher.as_ref(), count, self.now_ms))
    }

    /// Every key matching `pattern`, sorted; unbounded
    pub fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        let matcher = compile(pattern)?;
        Ok(self.ks.keys(Some(&matcher), self.now_ms))
    }

    // ========== String Operations ==========

    pub fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        match self.ks.lookup(key, self.now_ms) {
            None => Ok(None),
            Some(Value::Str(b)) => Ok(Some(b.clone())),
            Some(other) => Err(RtdbError::wrong_type("string", other.type_name())),
        }
    }

    /// GET decoded as UTF-8
    pub fn get_string(&mut self, key: &str) -> Result<Option<String>> {
        match self.get(key)? {
            Some(b) => decode(key, &b).map(Some),
            None => Ok(None),
        }
    }

    /// SET; clears any previous TTL
    pub fn set(&mut self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        self.ks.insert(key, Value::Str(to_bytes(value)), self.now_ms);
        Ok(())
    }

    /// SET with PX
    pub fn set_with_ttl(&mut self, key: &str, value: impl AsRef<[u8]>, ttl_ms: i64) -> Result<()> {
        if ttl_ms <= 0 {
            return Err(RtdbError::InvalidArgument(format!(
                "ttl must be positive, got {}",
                ttl_ms
            )));
        }
        self.set(key, value)?;
        self.ks.set_expiry(key, self.now_ms.saturating_add(ttl_ms));
        Ok(())
    }

    // ========== Hash Operations ==========

    pub fn hget(&mut self, key: &str, field: &str) -> Result<Option<Bytes>> {
        Ok(self
            .ks
            .hash(key, self.now_ms)?
            .and_then(|h| h.get(field).cloned()))
    }

    pub fn hget_string(&mut self, key: &str, field: &str) -> Result<Option<String>> {
        match self.hget(key, field)? {
            Some(b) => decode(key, &b).map(Some),
            None => Ok(None),
        }
    }

    /// Returns true when the field is new
    pub fn hset(&mut self, key: &str, field: &str, value: impl AsRef<[u8]>) -> Result<bool> {
        let hash = self.ks.hash_or_create(key, self.now_ms)?;
        Ok(hash.insert(field.to_string(), to_bytes(value)).is_none())
    }

    pub fn hmset<I, F, V>(&mut self, key: &str, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: AsRef<[u8]>,
    {
        let hash = self.ks.hash_or_create(key, self.now_ms)?;
        for (field, value) in fields {
            hash.insert(field.into(), to_bytes(value));
        }
        self.ks.remove_if_empty(key);
        Ok(())
    }

    pub fn hgetall(&mut self, key: &str) -> Result<BTreeMap<String, Bytes>> {
        Ok(self.ks.hash(key, self.now_ms)?.cloned().unwrap_or_default())
    }

    /// HGETALL decoded as UTF-8
    pub fn hgetall_strings(&mut self, key: &str) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for (field, value) in self.hgetall(key)? {
            out.insert(field, decode(key, &value)?);
        }
        Ok(out)
    }

    pub fn hdel(&mut self, key: &str, field: &str) -> Result<bool> {
        let removed = match self.ks.hash(key, self.now_ms)? {
            Some(hash) => hash.remove(field).is_some(),
            None => false,
        };
        self.ks.remove_if_empty(key);
        Ok(removed)
    }

    pub fn hlen(&mut self, key: &str) -> Result<usize> {
        Ok(self.ks.hash(key, self.now_ms)?.map_or(0, |h| h.len()))
    }

    pub fn hincrby(&mut self, key: &str, field: &str, increment: i64) -> Result<i64> {
        let hash = self.ks.hash_or_create(key, self.now_ms)?;
        let current = match hash.get(field) {
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .ok_or_else(|| {
                    RtdbError::InvalidArgument(format!("hash field {}.{} is not an integer", key, field))
                })?,
            None => 0,
        };
        let next = current.saturating_add(increment);
        hash.insert(field.to_string(), Bytes::from(next.to_string()));
        Ok(next)
    }

    // ========== Set Operations ==========

    /// Returns true when the member is new
    pub fn sadd(&mut self, key: &str, member: &str) -> Result<bool> {
        Ok(self.ks.set_or_create(key, self.now_ms)?.insert(member.to_string()))
    }

    pub fn srem(&mut self, key: &str, member: &str) -> Result<bool> {
        let removed = match self.ks.set(key, self.now_ms)? {
            Some(set) => set.remove(member),
            None => false,
        };
        self.ks.remove_if_empty(key);
        Ok(removed)
    }

    /// Members in lexical order
    pub fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .ks
            .set(key, self.now_ms)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn sismember(&mut self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .ks
            .set(key, self.now_ms)?
            .is_some_and(|s| s.contains(member)))
    }

    pub fn scard(&mut self, key: &str) -> Result<usize> {
        Ok(self.ks.set(key, self.now_ms)?.map_or(0, |s| s.len()))
    }

    fn set_snapshot(&mut self, key: &str) -> Result<BTreeSet<String>> {
        Ok(self.ks.set(key, self.now_ms)?.cloned().unwrap_or_default())
    }

    /// Intersection of every set; a missing key is an empty set
    pub fn sinter(&mut self, keys: &[&str]) -> Result<Vec<String>> {
        let mut iter = keys.iter();
        let Some(first) = iter.next() else {
            return Ok(Vec::new());
        };
        let mut acc = self.set_snapshot(first)?;
        for key in iter {
            let next = self.set_snapshot(key)?;
            acc.retain(|m| next.contains(m));
        }
        Ok(acc.into_iter().collect())
    }

    pub fn sunion(&mut self, keys: &[&str]) -> Result<Vec<String>> {
        let mut acc = BTreeSet::new();
        for key in keys {
            acc.extend(self.set_snapshot(key)?);
        }
        Ok(acc.into_iter().collect())
    }

    // ========== Sorted Set Operations ==========

    /// Returns true when the member is new; an existing member moves to `score`
    pub fn zadd(&mut self, key: &str, score: f64, member: &str) -> Result<bool> {
        if score.is_nan() {
            return Err(RtdbError::InvalidArgument("score is not a number".to_string()));
        }
        Ok(self.ks.zset_or_create(key, self.now_ms)?.insert(member, score))
    }

    pub fn zrem(&mut self, key: &str, member: &str) -> Result<bool> {
        let removed = match self.ks.zset(key, self.now_ms)? {
            Some(z) => z.remove(member),
            None => false,
        };
        self.ks.remove_if_empty(key);
        Ok(removed)
    }

    pub fn zscore(&mut self, key: &str, member: &str) -> Result<Option<f64>> {
        Ok(self.ks.zset(key, self.now_ms)?.and_then(|z| z.score(member)))
    }

    pub fn zcard(&mut self, key: &str) -> Result<usize> {
        Ok(self.ks.zset(key, self.now_ms)?.map_or(0, |z| z.len()))
    }

    /// ZRANGEBYSCORE key min max WITHSCORES LIMIT offset count
    pub fn zrangebyscore(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>> {
        let Some(z) = self.ks.zset(key, self.now_ms)? else {
            return Ok(Vec::new());
        };
        let iter = z
            .range(min, max)
            .skip(offset)
            .map(|(m, s)| (m.to_string(), s));
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    // ========== List Operations ==========

    /// Returns the new length
    pub fn lpush(&mut self, key: &str, value: impl AsRef<[u8]>) -> Result<usize> {
        let list = self.ks.list_or_create(key, self.now_ms)?;
        list.push_front(to_bytes(value));
        Ok(list.len())
    }

    /// Returns the new length
    pub fn rpush(&mut self, key: &str, value: impl AsRef<[u8]>) -> Result<usize> {
        let list = self.ks.list_or_create(key, self.now_ms)?;
        list.push_back(to_bytes(value));
        Ok(list.len())
    }

    pub fn lrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<Bytes>> {
        let Some(list) = self.ks.list(key, self.now_ms)? else {
            return Ok(Vec::new());
        };
        Ok(match list_bounds(list.len(), start, stop) {
            Some((from, to)) => list.range(from..to).cloned().collect(),
            None => Vec::new(),
        })
    }

    /// LRANGE decoded as UTF-8
    pub fn lrange_strings(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.lrange(key, start, stop)?
            .iter()
            .map(|b| decode(key, b))
            .collect()
    }

    pub fn ltrim(&mut self, key: &str, start: isize, stop: isize) -> Result<()> {
        if let Some(list) = self.ks.list(key, self.now_ms)? {
            match list_bounds(list.len(), start, stop) {
                Some((from, to)) => {
                    list.truncate(to);
                    list.drain(..from);
                },
                None => list.clear(),
            }
        }
        self.ks.remove_if_empty(key);
        Ok(())
    }

    pub fn llen(&mut self, key: &str) -> Result<usize> {
        Ok(self.ks.list(key, self.now_ms)?.map_or(0, |l| l.len()))
    }

    // ========== Messaging Operations ==========

    /// Queue a message; delivered when the transaction ends
    ///
    /// Returns the number of subscribers at queue time.
    pub fn publish(&mut self, channel: &str, message: impl Into<String>) -> usize {
        self.pending.push(PubSubMessage {
            channel: channel.to_string(),
            payload: message.into(),
        });
        self.events.receiver_count()
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        for message in self.pending.drain(..) {
            tracing::trace!("PUBLISH {} ({} bytes)", message.channel, message.payload.len());
            // No subscribers is not an error; delivery is best-effort
            let _ = self.events.send(message);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use crate::{MemoryRtdb, Rtdb, RtdbError, TTL_MISSING, TTL_PERSISTENT};
    use bytes::Bytes;

    #[test]
    fn test_string_operations() {
        let rtdb = MemoryRtdb::new();
        let mut tx = rtdb.begin();

        tx.set("test:key", "value").unwrap();
        assert_eq!(tx.get("test:key").unwrap(), Some(Bytes::from("value")));
        assert_eq!(tx.get_string("test:key").unwrap().as_deref(), Some("value"));
        assert!(tx.exists("test:key").unwrap());
        assert!(tx.del("test:key").unwrap());
        assert!(!tx.exists("test:key").unwrap());
        assert!(!tx.del("nonexistent").unwrap());
    }

    #[test]
    fn test_wrong_type_access() {
        let rtdb = MemoryRtdb::new();
        let mut tx = rtdb.begin();
        tx.set("plain", "1").unwrap();

        assert!(matches!(
            tx.hget("plain", "f"),
            Err(RtdbError::InvalidDataType { .. })
        ));
        assert!(matches!(
            tx.sadd("plain", "m"),
            Err(RtdbError::InvalidDataType { .. })
        ));
        tx.hset("h", "f", "v").unwrap();
        assert!(matches!(tx.get("h"), Err(RtdbError::InvalidDataType { .. })));
        assert_eq!(tx.type_of("h"), Some("hash"));
    }

    #[test]
    fn test_hash_operations() {
        let rtdb = MemoryRtdb::new();
        let mut tx = rtdb.begin();

        assert!(tx.hset("test:hash", "field1", "value1").unwrap());
        assert!(!tx.hset("test:hash", "field1", "value1b").unwrap());
        tx.hmset("test:hash", vec![("field2", "value2"), ("field3", "value3")])
            .unwrap();

        assert_eq!(
            tx.hget_string("test:hash", "field1").unwrap().as_deref(),
            Some("value1b")
        );
        assert_eq!(tx.hlen("test:hash").unwrap(), 3);

        let all = tx.hgetall_strings("test:hash").unwrap();
        assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec!["field1", "field2", "field3"]);

        assert!(tx.hdel("test:hash", "field1").unwrap());
        assert!(!tx.hdel("test:hash", "field1").unwrap());
        tx.hdel("test:hash", "field2").unwrap();
        tx.hdel("test:hash", "field3").unwrap();
        // Empty hashes are removed
        assert!(!tx.exists("test:hash").unwrap());
    }

    #[test]
    fn test_hincrby_operation() {
        let rtdb = MemoryRtdb::new();
        let mut tx = rtdb.begin();
        assert_eq!(tx.hincrby("stats", "count", 1).unwrap(), 1);
        assert_eq!(tx.hincrby("stats", "count", 5).unwrap(), 6);
        assert_eq!(tx.hincrby("stats", "count", -2).unwrap(), 4);

        tx.hset("stats", "name", "abc").unwrap();
        assert!(matches!(
            tx.hincrby("stats", "name", 1),
            Err(RtdbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_set_operations() {
        let rtdb = MemoryRtdb::new();
        let mut tx = rtdb.begin();

        assert!(tx.sadd("a", "1").unwrap());
        assert!(!tx.sadd("a", "1").unwrap());
        tx.sadd("a", "2").unwrap();
        tx.sadd("a", "3").unwrap();
        tx.sadd("b", "2").unwrap();
        tx.sadd("b", "3").unwrap();
        tx.sadd("b", "4").unwrap();

        assert_eq!(tx.smembers("a").unwrap(), vec!["1", "2", "3"]);
        assert!(tx.sismember("a", "2").unwrap());
        assert_eq!(tx.scard("b").unwrap(), 3);
        assert_eq!(tx.sinter(&["a", "b"]).unwrap(), vec!["2", "3"]);
        assert_eq!(tx.sunion(&["a", "b"]).unwrap(), vec!["1", "2", "3", "4"]);
        assert!(tx.sinter(&["a", "missing"]).unwrap().is_empty());

        assert!(tx.srem("a", "1").unwrap());
        assert!(!tx.srem("a", "1").unwrap());
    }

    #[test]
    fn test_sorted_set_operations() {
        let rtdb = MemoryRtdb::new();
        let mut tx = rtdb.begin();

        tx.zadd("z", 30.0, "c").unwrap();
        tx.zadd("z", 10.0, "a").unwrap();
        tx.zadd("z", 20.0, "b").unwrap();
        assert_eq!(tx.zcard("z").unwrap(), 3);

        let all = tx.zrangebyscore("z", 0.0, 100.0, 0, None).unwrap();
        let members: Vec<_> = all.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["a", "b", "c"]);

        let page = tx.zrangebyscore("z", 15.0, 30.0, 1, Some(5)).unwrap();
        assert_eq!(page, vec![("c".to_string(), 30.0)]);

        // Re-add moves the member
        assert!(!tx.zadd("z", 5.0, "c").unwrap());
        assert_eq!(tx.zscore("z", "c").unwrap(), Some(5.0));
        assert_eq!(tx.zrangebyscore("z", 0.0, 100.0, 0, Some(1)).unwrap()[0].0, "c");

        assert!(tx.zadd("z", f64::NAN, "x").is_err());
        assert!(tx.zrem("z", "a").unwrap());
    }

    #[test]
    fn test_list_operations() {
        let rtdb = MemoryRtdb::new();
        let mut tx = rtdb.begin();

        tx.rpush("l", "b").unwrap();
        tx.rpush("l", "c").unwrap();
        assert_eq!(tx.lpush("l", "a").unwrap(), 3);
        assert_eq!(tx.lrange_strings("l", 0, -1).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(tx.lrange_strings("l", -2, -1).unwrap(), vec!["b", "c"]);
        assert!(tx.lrange("l", 5, 10).unwrap().is_empty());

        tx.ltrim("l", 0, 1).unwrap();
        assert_eq!(tx.lrange_strings("l", 0, -1).unwrap(), vec!["a", "b"]);
        assert_eq!(tx.llen("l").unwrap(), 2);

        tx.ltrim("l", 5, 10).unwrap();
        assert!(!tx.exists("l").unwrap());
    }

    #[test]
    fn test_ttl_reporting() {
        let rtdb = MemoryRtdb::with_time_provider(std::sync::Arc::new(
            crate::FixedTimeProvider::new(1_000),
        ));
        let mut tx = rtdb.begin();
        assert_eq!(tx.ttl_millis("nope").unwrap(), TTL_MISSING);

        tx.set("k", "v").unwrap();
        assert_eq!(tx.ttl_millis("k").unwrap(), TTL_PERSISTENT);
        assert!(tx.expire("k", 250).unwrap());
        assert_eq!(tx.ttl_millis("k").unwrap(), 250);
        assert!(tx.persist("k").unwrap());
        assert_eq!(tx.ttl_millis("k").unwrap(), TTL_PERSISTENT);

        tx.set_with_ttl("k2", "v", 10).unwrap();
        tx.set("k2", "v2").unwrap();
        assert_eq!(tx.ttl_millis("k2").unwrap(), TTL_PERSISTENT);
        assert!(tx.set_with_ttl("k3", "v", 0).is_err());

        assert!(tx.expire("k", 0).unwrap());
        assert!(!tx.exists("k").unwrap());
    }

    #[tokio::test]
    async fn test_publish_delivered_on_drop() {
        let rtdb = MemoryRtdb::new();
        let mut rx = rtdb.subscribe();

        {
            let mut tx = rtdb.begin();
            assert_eq!(tx.publish("events:test", "hello"), 1);
            // Not yet delivered while the transaction is open
            assert!(rx.try_recv().is_err());
        }

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "events:test");
        assert_eq!(msg.payload, "hello");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let rtdb = MemoryRtdb::new();
        let mut tx = rtdb.begin();
        assert_eq!(tx.publish("events:none", "x"), 0);
    }
}
