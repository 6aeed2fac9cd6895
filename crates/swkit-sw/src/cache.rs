//! Versioned cache stores.

use hashbrown::HashMap;
use http::Method;
use swkit_common::unix_millis;
use swkit_net::{Request, Response};
use tracing::{debug, trace};
use url::Url;

use crate::ServiceWorkerError;

/// Request identity used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: Method,
    pub url: Url,
}

impl CacheKey {
    /// Create a key. URL fragments never reach the network, so they are dropped.
    pub fn new(method: Method, mut url: Url) -> Self {
        url.set_fragment(None);
        Self { method, url }
    }

    /// Key for a GET of `url`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Key identifying `request`.
    pub fn for_request(request: &Request) -> Self {
        Self::new(request.method.clone(), request.url.clone())
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request that produced the response.
    pub key: CacheKey,

    /// Stored response.
    pub response: Response,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    pub fn new(key: CacheKey, response: Response) -> Self {
        Self {
            key,
            response,
            cached_at: unix_millis(),
        }
    }

    /// Response to hand back to a page.
    pub fn to_response(&self) -> Response {
        let mut response = self.response.clone();
        response.from_cache = true;
        response
    }

    fn size(&self) -> u64 {
        self.response.body().len() as u64
    }
}

/// A single named cache store.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request by exact key.
    pub fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store an entry, replacing any previous entry for the same key.
    pub fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.key.clone(), entry)
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&CacheKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total stored body bytes.
    pub fn size_bytes(&self) -> u64 {
        self.entries.values().map(CacheEntry::size).sum()
    }
}

/// All cache stores, by name.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,

    /// Upper bound on stored body bytes across every cache.
    quota: Option<u64>,
}

impl CacheStorage {
    /// Create new cache storage without a quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create cache storage limited to `bytes` of stored bodies.
    pub fn with_quota(bytes: u64) -> Self {
        Self {
            caches: HashMap::new(),
            quota: Some(bytes),
        }
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(cache = %name, "Creating cache");
                Cache::new(name)
            })
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up `key` in the cache called `name`.
    pub fn match_in(&self, name: &str, key: &CacheKey) -> Option<Response> {
        let entry = self.caches.get(name)?.match_request(key)?;
        trace!(cache = %name, url = %key.url, "Cache hit");
        Some(entry.to_response())
    }

    /// Total stored body bytes across every cache.
    pub fn usage(&self) -> u64 {
        self.caches.values().map(Cache::size_bytes).sum()
    }

    /// Store one response, opening the cache if needed.
    pub fn put(
        &mut self,
        name: &str,
        key: CacheKey,
        response: Response,
    ) -> Result<(), ServiceWorkerError> {
        self.put_all(name, vec![(key, response)])
    }

    /// Store a batch of responses. Either every entry is stored or none is.
    pub fn put_all(
        &mut self,
        name: &str,
        entries: Vec<(CacheKey, Response)>,
    ) -> Result<(), ServiceWorkerError> {
        if let Some(quota) = self.quota {
            let needed = self.usage_after(name, &entries);
            if needed > quota {
                return Err(ServiceWorkerError::QuotaExceeded {
                    cache: name.to_string(),
                    needed,
                    quota,
                });
            }
        }

        let cache = self.open(name);
        for (key, response) in entries {
            trace!(cache = %name, url = %key.url, "Cache put");
            cache.put(CacheEntry::new(key, response));
        }
        Ok(())
    }

    /// Usage if `entries` were written to `name`, counting replacements once.
    fn usage_after(&self, name: &str, entries: &[(CacheKey, Response)]) -> u64 {
        let mut batch: HashMap<&CacheKey, u64> = HashMap::new();
        for (key, response) in entries {
            batch.insert(key, response.body().len() as u64);
        }

        let replaced: u64 = match self.caches.get(name) {
            Some(cache) => batch
                .keys()
                .filter_map(|key| cache.match_request(key))
                .map(CacheEntry::size)
                .sum(),
            None => 0,
        };

        self.usage() - replaced + batch.values().sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn response(u: &str, body: &'static str) -> Response {
        Response::new(url(u), StatusCode::OK, body)
    }

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("v1");
        let key = CacheKey::get(url("https://game.test/styles.css"));
        cache.put(CacheEntry::new(key.clone(), response("https://game.test/styles.css", "a{}")));

        assert!(cache.match_request(&key).is_some());
        assert!(cache
            .match_request(&CacheKey::get(url("https://game.test/other.css")))
            .is_none());
    }

    #[test]
    fn test_key_includes_method() {
        let mut cache = Cache::new("v1");
        let get = CacheKey::get(url("https://game.test/data"));
        cache.put(CacheEntry::new(get, response("https://game.test/data", "{}")));

        let head = CacheKey::new(Method::HEAD, url("https://game.test/data"));
        assert!(cache.match_request(&head).is_none());
    }

    #[test]
    fn test_key_ignores_fragment() {
        let a = CacheKey::get(url("https://game.test/index.html#top"));
        let b = CacheKey::get(url("https://game.test/index.html"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1");
        let key = CacheKey::get(url("https://game.test/app.js"));
        cache.put(CacheEntry::new(key.clone(), response("https://game.test/app.js", "")));

        assert!(cache.delete(&key));
        assert!(cache.match_request(&key).is_none());
        assert!(!cache.delete(&key));
    }

    #[test]
    fn test_repeated_put_keeps_one_entry() {
        let mut storage = CacheStorage::new();
        let key = CacheKey::get(url("https://game.test/app.js"));

        for body in ["one", "two", "three"] {
            storage
                .put("v1", key.clone(), response("https://game.test/app.js", body))
                .unwrap();
        }

        let cache = storage.get("v1").unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(storage.match_in("v1", &key).unwrap().body().as_ref(), b"three");
    }

    #[test]
    fn test_match_in_marks_from_cache() {
        let mut storage = CacheStorage::new();
        let key = CacheKey::get(url("https://game.test/"));
        storage
            .put("v1", key.clone(), response("https://game.test/", "<html>"))
            .unwrap();

        let hit = storage.match_in("v1", &key).unwrap();
        assert!(hit.from_cache);
        assert!(storage.match_in("v2", &key).is_none());
    }

    #[test]
    fn test_cache_storage_open_delete() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1");
        storage.open("v0");
        assert_eq!(storage.keys(), vec!["v0".to_string(), "v1".to_string()]);

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_quota_rejects_whole_batch() {
        let mut storage = CacheStorage::with_quota(8);
        let result = storage.put_all(
            "v1",
            vec![
                (CacheKey::get(url("https://game.test/a")), response("https://game.test/a", "12345")),
                (CacheKey::get(url("https://game.test/b")), response("https://game.test/b", "67890")),
            ],
        );

        assert!(matches!(
            result,
            Err(ServiceWorkerError::QuotaExceeded { needed: 10, quota: 8, .. })
        ));
        assert!(!storage.has("v1"));
        assert_eq!(storage.usage(), 0);
    }

    #[test]
    fn test_quota_counts_replacement_once() {
        let mut storage = CacheStorage::with_quota(6);
        let key = CacheKey::get(url("https://game.test/a"));

        storage.put("v1", key.clone(), response("https://game.test/a", "12345")).unwrap();
        storage.put("v1", key, response("https://game.test/a", "123456")).unwrap();

        assert_eq!(storage.usage(), 6);
    }
}
