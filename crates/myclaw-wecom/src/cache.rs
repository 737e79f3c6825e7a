//! In-memory TTL caches for WeCom reply routing and replay dedup (§3, §4.3
//! step 4 and step 6).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Chat id -> (response URL, absolute expiry). Default TTL 1h.
pub struct ReplyCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    ttl: Duration,
}

impl ReplyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn insert(&self, chat_id: impl Into<String>, response_url: impl Into<String>) {
        let expiry = Instant::now() + self.ttl;
        self.entries
            .lock()
            .unwrap()
            .insert(chat_id.into(), (response_url.into(), expiry));
    }

    /// Returns the response URL if present and not yet expired.
    pub fn get(&self, chat_id: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(chat_id) {
            Some((url, expiry)) if *expiry > Instant::now() => Some(url.clone()),
            Some(_) => {
                entries.remove(chat_id);
                None
            }
            None => None,
        }
    }
}

/// Message id -> absolute expiry, with a lazy GC pass gated to at most once
/// per minute (§4.3 step 4).
pub struct DedupCache {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    last_gc: Mutex<Instant>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            last_gc: Mutex::new(Instant::now()),
        }
    }

    /// Returns `true` the first time `msg_id` is seen (and records it);
    /// returns `false` when it is still within a prior insertion's TTL.
    pub fn check_and_insert(&self, msg_id: &str) -> bool {
        self.maybe_gc();
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if let Some(expiry) = entries.get(msg_id) {
            if *expiry > now {
                return false;
            }
        }
        entries.insert(msg_id.to_string(), now + self.ttl);
        true
    }

    fn maybe_gc(&self) {
        let mut last_gc = self.last_gc.lock().unwrap();
        let now = Instant::now();
        if now.duration_since(*last_gc) < GC_INTERVAL {
            return;
        }
        *last_gc = now;
        drop(last_gc);
        self.entries.lock().unwrap().retain(|_, expiry| *expiry > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_cache_returns_url_before_expiry() {
        let cache = ReplyCache::new(Duration::from_secs(3600));
        cache.insert("zhangsan", "https://example.com/resp");
        assert_eq!(cache.get("zhangsan").as_deref(), Some("https://example.com/resp"));
    }

    #[test]
    fn reply_cache_misses_after_expiry() {
        let cache = ReplyCache::new(Duration::from_millis(1));
        cache.insert("zhangsan", "https://example.com/resp");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("zhangsan"), None);
    }

    #[test]
    fn dedup_rejects_repeated_id_within_ttl() {
        let cache = DedupCache::new(Duration::from_secs(300));
        assert!(cache.check_and_insert("msg-1"));
        assert!(!cache.check_and_insert("msg-1"));
    }

    #[test]
    fn dedup_allows_id_again_after_ttl_elapses() {
        let cache = DedupCache::new(Duration::from_millis(1));
        assert!(cache.check_and_insert("msg-1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.check_and_insert("msg-1"));
    }
}
