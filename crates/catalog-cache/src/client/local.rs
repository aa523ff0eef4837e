//! In-process key-value store.
//!
//! Mirrors the subset of Redis semantics the cache layer relies on (expiring
//! strings, counters, sorted-set windows, pub/sub) so a single instance runs
//! without an external store and tests run without Docker.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use regex::Regex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::{CacheError, WindowState};

/// Buffer size for each local pub/sub channel.
const CHANNEL_CAPACITY: usize = 1024;

/// How often the background task drops expired keys.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
enum LocalValue {
    Bytes(Arc<Vec<u8>>),
    /// `(score, member)` pairs, ordered by score.
    SortedSet(BTreeSet<(u64, String)>),
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: LocalValue,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn new(value: LocalValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Local store backing [`CacheClient::Local`](super::CacheClient::Local).
#[derive(Debug, Default)]
pub struct LocalStore {
    entries: DashMap<String, LocalEntry>,
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, including ones that expired but were not touched since.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired key and every channel nobody listens to.
    ///
    /// Returns the number of keys removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        before.saturating_sub(self.entries.len())
    }

    /// Start the background sweep. The task ends once the store is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    return;
                };
                let removed = store.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = store.len(), "Local cache cleanup completed");
                }
            }
        })
    }

    fn live<R>(&self, key: &str, f: impl FnOnce(&LocalEntry) -> R) -> Option<R> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(f(&entry));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    pub fn get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError> {
        match self.live(key, |entry| entry.value.clone()) {
            None => Ok(None),
            Some(LocalValue::Bytes(data)) => Ok(Some(data)),
            Some(LocalValue::SortedSet(_)) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            LocalEntry::new(LocalValue::Bytes(Arc::new(value)), ttl),
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now))
    }

    pub fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    /// `INCR` semantics: a missing key starts at 0 and keeps no expiry.
    pub fn increment(&self, key: &str) -> Result<i64, CacheError> {
        let now = Instant::now();
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| LocalEntry::new(LocalValue::Bytes(Arc::new(b"0".to_vec())), None));
        if slot.is_expired(now) {
            *slot = LocalEntry::new(LocalValue::Bytes(Arc::new(b"0".to_vec())), None);
        }
        let current = match &slot.value {
            LocalValue::Bytes(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| CacheError::WrongType(key.to_string()))?,
            LocalValue::SortedSet(_) => return Err(CacheError::WrongType(key.to_string())),
        };
        let next = current + 1;
        slot.value = LocalValue::Bytes(Arc::new(next.to_string().into_bytes()));
        Ok(next)
    }

    pub fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> bool {
        let now = Instant::now();
        let fresh = LocalEntry::new(LocalValue::Bytes(Arc::new(value)), Some(ttl));
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    slot.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                true
            }
        }
    }

    /// Remaining lifetime. `None` for missing keys and keys without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.live(key, |entry| entry.expires_at.map(|at| at.saturating_duration_since(now)))
            .flatten()
    }

    pub fn compare_and_delete(&self, key: &str, expected: &[u8]) -> bool {
        let now = Instant::now();
        self.entries
            .remove_if(key, |_, entry| {
                !entry.is_expired(now)
                    && matches!(&entry.value, LocalValue::Bytes(data) if data.as_slice() == expected)
            })
            .is_some()
    }

    /// Prune, count, conditionally add, and re-expire a window in one step.
    pub fn sliding_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
        member: &str,
    ) -> Result<WindowState, CacheError> {
        let now = Instant::now();
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64);

        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| {
            LocalEntry::new(LocalValue::SortedSet(BTreeSet::new()), Some(window))
        });
        if slot.is_expired(now) {
            *slot = LocalEntry::new(LocalValue::SortedSet(BTreeSet::new()), Some(window));
        }
        let LocalValue::SortedSet(set) = &mut slot.value else {
            return Err(CacheError::WrongType(key.to_string()));
        };

        set.retain(|(score, _)| *score > cutoff);
        let count = set.len() as u64;
        let admitted = count < limit;
        if admitted {
            set.insert((now_ms, member.to_string()));
        }
        let oldest_ms = set.iter().next().map(|(score, _)| *score);
        slot.expires_at = Some(now + window);

        Ok(WindowState {
            count,
            admitted,
            oldest_ms,
        })
    }

    /// Returns the number of receivers the payload reached.
    pub fn publish(&self, channel: &str, payload: Vec<u8>) -> usize {
        match self.channels.get(channel) {
            Some(tx) => tx.send(payload).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

/// Translate a Redis glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| CacheError::Pattern(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let store = LocalStore::new();
        store.set("a", b"1".to_vec(), None);
        assert_eq!(store.get("a").unwrap().as_deref(), Some(&b"1".to_vec()));
        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn test_expired_entries_are_invisible() {
        let store = LocalStore::new();
        store.set("a", b"1".to_vec(), Some(Duration::ZERO));
        assert!(store.get("a").unwrap().is_none());
        assert!(store.ttl("a").is_none());
        assert!(store.keys_matching("*").unwrap().is_empty());
    }

    #[test]
    fn test_keys_matching_glob() {
        let store = LocalStore::new();
        store.set("product:list:all", vec![], None);
        store.set("product:list:count:all", vec![], None);
        store.set("product:1", vec![], None);
        store.set("category:list:all", vec![], None);

        let mut keys = store.keys_matching("product:list:*").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["product:list:all", "product:list:count:all"]);
        assert_eq!(store.keys_matching("product:?").unwrap(), vec!["product:1"]);
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let store = LocalStore::new();
        store.set("a.b", vec![], None);
        store.set("axb", vec![], None);
        assert_eq!(store.keys_matching("a.b").unwrap(), vec!["a.b"]);
    }

    #[test]
    fn test_increment() {
        let store = LocalStore::new();
        assert_eq!(store.increment("n").unwrap(), 1);
        assert_eq!(store.increment("n").unwrap(), 2);
        store.set("s", b"abc".to_vec(), None);
        assert!(matches!(store.increment("s"), Err(CacheError::WrongType(_))));
    }

    #[test]
    fn test_set_if_absent_respects_live_holder() {
        let store = LocalStore::new();
        assert!(store.set_if_absent("lock", b"a".to_vec(), Duration::from_secs(5)));
        assert!(!store.set_if_absent("lock", b"b".to_vec(), Duration::from_secs(5)));
        assert!(!store.compare_and_delete("lock", b"b"));
        assert!(store.compare_and_delete("lock", b"a"));
        assert!(store.set_if_absent("lock", b"b".to_vec(), Duration::from_secs(5)));
    }

    #[test]
    fn test_set_if_absent_replaces_expired_holder() {
        let store = LocalStore::new();
        assert!(store.set_if_absent("lock", b"a".to_vec(), Duration::ZERO));
        assert!(store.set_if_absent("lock", b"b".to_vec(), Duration::from_secs(5)));
    }

    #[test]
    fn test_ttl_reports_remaining_lifetime() {
        let store = LocalStore::new();
        store.set("a", vec![], Some(Duration::from_secs(100)));
        store.set("b", vec![], None);
        let ttl = store.ttl("a").unwrap();
        assert!(ttl <= Duration::from_secs(100) && ttl > Duration::from_secs(99));
        assert!(store.ttl("b").is_none());
    }

    #[test]
    fn test_sliding_window_prunes_and_limits() {
        let store = LocalStore::new();
        let window = Duration::from_secs(60);

        let s = store.sliding_window("w", 0, window, 2, "r0").unwrap();
        assert_eq!((s.count, s.admitted, s.oldest_ms), (0, true, Some(0)));
        let s = store.sliding_window("w", 10_000, window, 2, "r1").unwrap();
        assert_eq!((s.count, s.admitted), (1, true));
        let s = store.sliding_window("w", 20_000, window, 2, "r2").unwrap();
        assert_eq!((s.count, s.admitted, s.oldest_ms), (2, false, Some(0)));
        // r0 falls out of the trailing window at t=60s.
        let s = store.sliding_window("w", 60_000, window, 2, "r3").unwrap();
        assert_eq!((s.count, s.admitted, s.oldest_ms), (1, true, Some(10_000)));
    }

    #[test]
    fn test_sliding_window_rejects_string_key() {
        let store = LocalStore::new();
        store.set("w", b"x".to_vec(), None);
        let err = store
            .sliding_window("w", 0, Duration::from_secs(1), 1, "m")
            .unwrap_err();
        assert!(matches!(err, CacheError::WrongType(_)));
    }

    #[test]
    fn test_purge_drops_expired_keys_and_idle_channels() {
        let store = LocalStore::new();
        for i in 0..100 {
            store
                .sliding_window(&format!("rate_limit:ip:{i}"), 0, Duration::ZERO, 5, "m")
                .unwrap();
        }
        store.set("kept", vec![], Some(Duration::from_secs(60)));
        drop(store.subscribe("idle"));
        let _live = store.subscribe("live");
        assert_eq!(store.len(), 101);

        assert_eq!(store.purge_expired(), 100);
        assert_eq!(store.len(), 1);
        assert_eq!(store.channels.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_task_shrinks_store() {
        let store = Arc::new(LocalStore::new());
        let task = store.start_cleanup_task(Duration::from_millis(10));
        for i in 0..500 {
            store
                .sliding_window(&format!("rate_limit:ip:{i}"), 0, Duration::from_millis(5), 5, "m")
                .unwrap();
        }
        assert_eq!(store.len(), 500);

        for _ in 0..100 {
            if store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.is_empty());

        // The sweep stops with the store.
        drop(store);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let store = LocalStore::new();
        assert_eq!(store.publish("ch", b"lost".to_vec()), 0);

        let mut rx = store.subscribe("ch");
        assert_eq!(store.publish("ch", b"hello".to_vec()), 1);
        assert_eq!(rx.recv().await.unwrap(), b"hello".to_vec());
    }
}
