use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode};
use http_body_util::BodyExt;
use ipnetwork::IpNetwork;

use crate::proxy::context::{full_body, BoxBody};

struct CacheEntry {
    bytes: Bytes,
    inserted_at: Instant,
}

/// Single-endpoint path-keyed response cache (spec.md §4.5). Internal
/// subnets always bypass the cache; TTL expiry is lazy (checked on read,
/// nothing ever proactively evicted).
///
/// Concurrency discipline: one `RwLock<HashMap<...>>`. Readers hold the
/// shared lock only long enough to clone the entry's `Bytes` out (spec.md
/// §5) — `Bytes` is refcounted so the clone is cheap.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    internal_subnets: Vec<IpNetwork>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, internal_subnets: Vec<IpNetwork>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            internal_subnets,
        }
    }

    /// True if `ip` lies in one of the configured internal subnets — such
    /// requests always bypass the cache, even on a hit (spec.md §4.5).
    pub fn bypasses(&self, ip: IpAddr) -> bool {
        self.internal_subnets.iter().any(|n| n.contains(ip))
    }

    /// Look up a path, returning a freshly built response if an unexpired
    /// entry exists.
    pub fn get(&self, path: &str) -> Option<Response<BoxBody>> {
        let guard = self.entries.read().expect("cache lock poisoned");
        let entry = guard.get(path)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            return None;
        }

        Some(
            Response::builder()
                .status(StatusCode::OK)
                .header(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(full_body(entry.bytes.clone()))
                .expect("static response is well-formed"),
        )
    }

    /// Buffer `resp`'s body, store it under `path`, and return a fresh
    /// response carrying the same bytes to send downstream (the original
    /// response's body is consumed in the process).
    pub async fn put_and_rebuild(
        &self,
        path: &str,
        resp: Response<BoxBody>,
    ) -> Response<BoxBody> {
        let (parts, body) = resp.into_parts();
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => {
                // Body failed mid-stream — nothing to cache, pass an empty body through.
                let mut builder = Response::builder().status(parts.status);
                for (name, value) in &parts.headers {
                    builder = builder.header(name, value);
                }
                return builder
                    .body(full_body(Bytes::new()))
                    .expect("response built from existing parts is well-formed");
            }
        };

        {
            let mut guard = self.entries.write().expect("cache lock poisoned");
            guard.insert(
                path.to_string(),
                CacheEntry {
                    bytes: bytes.clone(),
                    inserted_at: Instant::now(),
                },
            );
        }

        let mut builder = Response::builder().status(parts.status);
        for (name, value) in &parts.headers {
            builder = builder.header(name, value);
        }
        builder
            .body(full_body(bytes))
            .expect("response built from existing parts is well-formed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_subnets() -> Vec<IpNetwork> {
        vec!["172.16.0.0/16".parse().unwrap(), "172.19.0.0/16".parse().unwrap()]
    }

    #[test]
    fn test_bypasses_internal_subnets_only() {
        let cache = ResponseCache::new(Duration::from_secs(3600), default_subnets());
        assert!(cache.bypasses("172.16.5.1".parse().unwrap()));
        assert!(cache.bypasses("172.19.0.1".parse().unwrap()));
        assert!(!cache.bypasses("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_get_returns_none_before_any_put() {
        let cache = ResponseCache::new(Duration::from_secs(3600), default_subnets());
        assert!(cache.get("/nodeinfo/2.0.json").is_none());
    }

    #[tokio::test]
    async fn test_put_then_get_returns_cached_bytes() {
        let cache = ResponseCache::new(Duration::from_secs(3600), default_subnets());
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(full_body("hello"))
            .unwrap();

        let rebuilt = cache.put_and_rebuild("/nodeinfo/2.0.json", resp).await;
        assert_eq!(rebuilt.status(), StatusCode::OK);

        let cached = cache.get("/nodeinfo/2.0.json").unwrap();
        assert_eq!(cached.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_returned() {
        let cache = ResponseCache::new(Duration::from_millis(1), default_subnets());
        let resp = Response::builder().status(StatusCode::OK).body(full_body("x")).unwrap();
        cache.put_and_rebuild("/nodeinfo/2.0.json", resp).await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get("/nodeinfo/2.0.json").is_none());
    }
}
