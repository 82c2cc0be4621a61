//! Memoized client-info lookups.
//!
//! Client info is resolved server-side from the request that fetches it, so one lookup per
//! endpoint serves every task in the process. The cache stores the lookup future itself,
//! inserted synchronously on first access, so callers that arrive while the request is still
//! in flight attach to it instead of issuing their own.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    error::FetchError,
    fetch::{Fetcher, decode},
    macros::record,
};

/// Network attributes of the client and of its DNS resolver, as seen by the lookup service.
///
/// The lookup document is kept exactly as served: beacons carry its fields verbatim, so a field
/// the service leaves out stays out and a `null` stays `null`. The accessors read the well-known
/// `client_*` / `resolver_*` fields and return `None` when a field is absent or has another type.
#[record]
#[derive(Default)]
#[serde(transparent)]
pub struct ClientInfo(pub Map<String, Value>);

impl ClientInfo {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.text("client_ip")
    }

    pub fn client_asn(&self) -> Option<u64> {
        self.number("client_asn")
    }

    pub fn client_country_code(&self) -> Option<&str> {
        self.text("client_country_code")
    }

    pub fn resolver_ip(&self) -> Option<&str> {
        self.text("resolver_ip")
    }

    pub fn resolver_asn(&self) -> Option<u64> {
        self.number("resolver_asn")
    }

    fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    fn number(&self, field: &str) -> Option<u64> {
        self.0.get(field).and_then(Value::as_u64)
    }
}

/// What happens to a lookup that failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The failure stays cached: every later caller for that URL sees the same error.
    #[default]
    Retain,
    /// The failure is dropped from the cache once observed, so the next caller retries.
    Evict,
}

type Lookup = Shared<BoxFuture<'static, Result<ClientInfo, FetchError>>>;

pub struct ClientInfoResolver {
    fetcher: Arc<dyn Fetcher>,
    policy: FailurePolicy,
    cache: Mutex<HashMap<String, Lookup>>,
}

impl ClientInfoResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::with_policy(fetcher, FailurePolicy::default())
    }

    pub fn with_policy(fetcher: Arc<dyn Fetcher>, policy: FailurePolicy) -> Self {
        Self {
            fetcher,
            policy,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the client info served at `url`, issuing at most one request per URL.
    pub async fn get(&self, url: &str) -> Result<ClientInfo, FetchError> {
        let lookup = self.lookup(url);
        let result = lookup.clone().await;
        if result.is_err() && self.policy == FailurePolicy::Evict {
            let mut cache = self.cache();
            // Only evict our own lookup; a retry may already have replaced it.
            if cache.get(url).is_some_and(|cached| cached.ptr_eq(&lookup)) {
                tracing::debug!(url, "Evicting failed client info lookup");
                cache.remove(url);
            }
        }
        result
    }

    /// Drop the cached lookup for `url`. Returns whether there was one.
    pub fn reset(&self, url: &str) -> bool {
        self.cache().remove(url).is_some()
    }

    pub fn clear(&self) {
        self.cache().clear();
    }

    pub fn len(&self) -> usize {
        self.cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache().is_empty()
    }

    fn lookup(&self, url: &str) -> Lookup {
        let mut cache = self.cache();
        if let Some(existing) = cache.get(url) {
            tracing::debug!(url, "Client info cache hit");
            return existing.clone();
        }

        tracing::debug!(url, "Client info cache miss, fetching");
        let fetcher = Arc::clone(&self.fetcher);
        let owned = url.to_string();
        let lookup = async move {
            let value = fetcher.get_json(&owned).await?;
            decode::<ClientInfo>(&owned, value)
        }
        .boxed()
        .shared();
        cache.insert(url.to_string(), lookup.clone());
        lookup
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Lookup>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;
    use async_trait::async_trait;
    use futures::future::join_all;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    const URL: &str = "https://42.eu.u.example.com/l";

    fn fixture() -> Value {
        json!({
            "client_user_agent": "abc123",
            "client_ip": "1.2.3.4",
            "client_asn": 10225,
            "client_region": "abc123",
            "client_country_code": "abc123",
            "client_continent_code": "abc123",
            "client_metro_code": "abc123",
            "client_postal_code": "abc123",
            "client_conn_speed": "abc123",
            "client_gmt_offset": "abc123",
            "client_latitude": "abc123",
            "client_longitude": "abc123",
            "resolver_ip": "abc123",
            "resolver_asn": 33,
            "resolver_region": "abc123",
            "resolver_country_code": "abc123",
            "resolver_continent_code": "abc123",
            "resolver_conn_speed": "abc123",
            "resolver_latitude": "abc123",
            "resolver_longitude": "abc123",
            "client_isp": "example"
        })
    }

    /// Holds every request until a permit is released.
    struct Gated {
        calls: AtomicUsize,
        gate: Semaphore,
    }

    #[async_trait]
    impl Fetcher for Gated {
        async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            Ok(fixture())
        }
    }

    /// Fails the first request, succeeds afterwards.
    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for Flaky {
        async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: 503,
                });
            }
            Ok(fixture())
        }
    }

    #[tokio::test]
    async fn parses_the_lookup_document() {
        let fetcher = Arc::new(Gated {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(1),
        });
        let resolver = ClientInfoResolver::new(fetcher);
        let info = resolver.get(URL).await.unwrap();

        assert_eq!(info.client_ip(), Some("1.2.3.4"));
        assert_eq!(info.client_asn(), Some(10225));
        assert_eq!(info.resolver_asn(), Some(33));
        assert_eq!(info.resolver_ip(), Some("abc123"));
        assert_eq!(info.client_country_code(), Some("abc123"));
        assert_eq!(info.get("client_isp"), Some(&json!("example")));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_request() {
        let fetcher = Arc::new(Gated {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        });
        let resolver = ClientInfoResolver::new(fetcher.clone());

        let callers = (0..8).map(|_| resolver.get(URL));
        let (results, _) = tokio::join!(join_all(callers), async {
            tokio::task::yield_now().await;
            fetcher.gate.add_permits(1);
        });

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 8);
        let first = results[0].as_ref().unwrap();
        assert!(results.iter().all(|r| r.as_ref() == Ok(first)));

        // Later callers hit the resolved entry.
        resolver.get(URL).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.len(), 1);
    }

    #[tokio::test]
    async fn distinct_urls_are_fetched_separately() {
        let fetcher = Arc::new(Gated {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(2),
        });
        let resolver = ClientInfoResolver::new(fetcher.clone());
        resolver.get(URL).await.unwrap();
        resolver.get("https://other.example.com/l").await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retained_failures_are_served_from_cache() {
        let fetcher = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let resolver = ClientInfoResolver::new(fetcher.clone());

        let first = resolver.get(URL).await;
        let second = resolver.get(URL).await;
        assert!(matches!(first, Err(FetchError::Status { status: 503, .. })));
        assert_eq!(first, second);
        assert_eq!(first.unwrap_err().url(), URL);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        assert!(resolver.reset(URL));
        assert!(resolver.get(URL).await.is_ok());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn evicted_failures_are_retried() {
        let fetcher = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let resolver = ClientInfoResolver::with_policy(fetcher.clone(), FailurePolicy::Evict);

        assert!(resolver.get(URL).await.is_err());
        assert!(resolver.is_empty());
        assert!(resolver.get(URL).await.is_ok());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reset_of_unknown_url_is_a_no_op() {
        let fetcher = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let resolver = ClientInfoResolver::new(fetcher);
        assert!(!resolver.reset(URL));
        resolver.clear();
        assert!(resolver.is_empty());
    }

    struct Served(Value);

    #[async_trait]
    impl Fetcher for Served {
        async fn get_json(&self, _url: &str) -> Result<Value, FetchError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn lookup_document_is_kept_verbatim() {
        let document = json!({
            "client_ip": "1.2.3.4",
            "client_metro_code": null,
            "client_latitude": 51.5,
            "resolver_asn": "AS33"
        });
        let resolver = ClientInfoResolver::new(Arc::new(Served(document.clone())));
        let info = resolver.get(URL).await.unwrap();

        assert_eq!(Value::Object(info.to_fields()), document);
        assert_eq!(info.client_ip(), Some("1.2.3.4"));
        assert_eq!(info.client_asn(), None);
        assert_eq!(info.resolver_asn(), None);
        assert!(info.resolver_ip().is_none());
    }

    #[tokio::test]
    async fn non_object_documents_fail_to_decode() {
        let resolver = ClientInfoResolver::new(Arc::new(Served(json!(["client_ip"]))));
        assert!(matches!(resolver.get(URL).await, Err(FetchError::Decode { .. })));
    }
}
