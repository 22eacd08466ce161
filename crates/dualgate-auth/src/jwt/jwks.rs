//! JWKS (JSON Web Key Set) fetching and caching
//!
//! [`KeySetCache`] serves signing keys per discovery URL:
//!
//! - **Fast path**: an unexpired entry is returned from a concurrent map
//!   without touching the network or any async lock
//! - **Stampede protection**: misses take a per-URL mutex, so concurrent
//!   callers for the same URL share one fetch; other URLs are unaffected
//! - **Expiry**: `Cache-Control: max-age`, else the caller's duration, else
//!   12 hours
//! - **Stale-on-error**: a failed fetch falls back to the cached entry while
//!   it is still within its lifetime, otherwise reports no keys
//!
//! Fetch errors never reach the caller. They are logged and turned into
//! "cached entry or `None`"; callers treat `None` as "cannot validate".

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::jwk::{Jwk, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use reqwest::header::{CACHE_CONTROL, HeaderMap};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth_metrics;
use crate::clock::{Clock, SystemClock};
use crate::config::KeySetCacheConfig;
use crate::error::JwksError;

/// Public key usable for signature verification
pub struct SigningKey {
    key_id: Option<String>,
    algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
}

impl SigningKey {
    /// Build a verification key from a JWK
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::InvalidKey`] for encryption keys, keys declaring a
    /// non-signature algorithm, or key material `jsonwebtoken` cannot load.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, JwksError> {
        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            return Err(JwksError::InvalidKey("encryption key".to_string()));
        }

        let algorithm = match jwk.common.key_algorithm.as_ref() {
            Some(declared) => Some(declared.to_string().parse::<Algorithm>().map_err(|_| {
                JwksError::InvalidKey(format!("{declared} is not a signature algorithm"))
            })?),
            None => None,
        };

        let decoding_key =
            DecodingKey::from_jwk(jwk).map_err(|e| JwksError::InvalidKey(e.to_string()))?;

        Ok(Self {
            key_id: jwk.common.key_id.clone(),
            algorithm,
            decoding_key,
        })
    }

    /// Key ID (`kid`)
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Declared algorithm (`alg`), if the JWK carried one
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Verification key material
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Whether this key may verify a token with the given header `kid`/`alg`
    pub fn accepts(&self, kid: Option<&str>, alg: Algorithm) -> bool {
        let kid_ok = match kid {
            Some(kid) => self.key_id.as_deref() == Some(kid),
            None => true,
        };
        let alg_ok = self.algorithm.is_none_or(|declared| declared == alg);
        kid_ok && alg_ok
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Parsed JWKS document: the usable signing keys it contained
#[derive(Debug)]
pub struct JwksDocument {
    keys: Vec<SigningKey>,
    skipped: usize,
}

#[derive(Deserialize)]
struct RawJwks {
    #[serde(default)]
    keys: Option<Vec<serde_json::Value>>,
}

impl JwksDocument {
    /// Parse a JWKS response body
    ///
    /// Keys that fail to parse or load are skipped; unknown fields are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::InvalidJson`] if the body is not a JSON object and
    /// [`JwksError::NoUsableKeys`] if `keys` is missing, empty, or contains no
    /// usable key.
    pub fn from_slice(body: &[u8]) -> Result<Self, JwksError> {
        let raw: RawJwks =
            serde_json::from_slice(body).map_err(|e| JwksError::InvalidJson(e.to_string()))?;
        Self::from_raw_keys(raw.keys.unwrap_or_default())
    }

    /// Parse an already-decoded JWKS document
    ///
    /// # Errors
    ///
    /// Same as [`JwksDocument::from_slice`].
    pub fn from_json(value: serde_json::Value) -> Result<Self, JwksError> {
        let raw: RawJwks =
            serde_json::from_value(value).map_err(|e| JwksError::InvalidJson(e.to_string()))?;
        Self::from_raw_keys(raw.keys.unwrap_or_default())
    }

    fn from_raw_keys(raw_keys: Vec<serde_json::Value>) -> Result<Self, JwksError> {
        let mut keys = Vec::with_capacity(raw_keys.len());
        let mut skipped = 0;

        for raw in raw_keys {
            let parsed = serde_json::from_value::<Jwk>(raw)
                .map_err(|e| JwksError::InvalidKey(e.to_string()))
                .and_then(|jwk| SigningKey::from_jwk(&jwk));
            match parsed {
                Ok(key) => keys.push(key),
                Err(e) => {
                    skipped += 1;
                    debug!(error = %e, "Skipping unusable JWK");
                }
            }
        }

        if keys.is_empty() {
            return Err(JwksError::NoUsableKeys);
        }

        Ok(Self { keys, skipped })
    }

    /// Usable keys, in document order
    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// Number of keys that were skipped
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Result of a successful fetch
#[derive(Debug)]
pub struct FetchedJwks {
    /// Parsed key set
    pub document: JwksDocument,
    /// `Cache-Control: max-age` of the response
    pub max_age: Option<Duration>,
}

/// HTTP capability used by [`KeySetCache`] to fetch a JWKS document
#[async_trait]
pub trait JwksFetcher: Send + Sync + fmt::Debug {
    /// GET `url` and parse it as a JWKS document
    async fn fetch(&self, url: &str) -> Result<FetchedJwks, JwksError>;
}

/// [`JwksFetcher`] backed by a pooled `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpJwksFetcher {
    client: reqwest::Client,
    max_response_size: usize,
    require_https: bool,
}

impl HttpJwksFetcher {
    /// Create a fetcher with redirects disabled and the configured timeout
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: &KeySetCacheConfig) -> Result<Self, JwksError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| JwksError::ClientBuild(e.to_string()))?;

        Ok(Self::from_client(client, config))
    }

    /// Wrap an existing client
    ///
    /// The client should not follow redirects.
    pub fn from_client(client: reqwest::Client, config: &KeySetCacheConfig) -> Self {
        Self {
            client,
            max_response_size: config.max_response_size,
            require_https: config.require_https,
        }
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedJwks, JwksError> {
        check_url(url, self.require_https)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| JwksError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::Status(response.status().as_u16()));
        }

        let max_age = parse_max_age(response.headers());

        if let Some(content_length) = response.content_length()
            && content_length > self.max_response_size as u64
        {
            return Err(JwksError::ResponseTooLarge {
                limit: self.max_response_size,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| JwksError::Http(format!("Failed to read response: {e}")))?;

        if body.len() > self.max_response_size {
            return Err(JwksError::ResponseTooLarge {
                limit: self.max_response_size,
            });
        }

        let document = JwksDocument::from_slice(&body)?;
        Ok(FetchedJwks { document, max_age })
    }
}

/// Reject non-HTTP(S) URLs, and plain HTTP to anything but loopback when
/// `require_https` is set
fn check_url(url: &str, require_https: bool) -> Result<(), JwksError> {
    let parsed = url::Url::parse(url).map_err(|e| JwksError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" if !require_https || is_loopback(&parsed) => Ok(()),
        "http" => Err(JwksError::InsecureUrl(url.to_string())),
        other => Err(JwksError::InvalidUrl(format!("unsupported scheme {other}"))),
    }
}

fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Extract `max-age` from `Cache-Control` headers
pub fn parse_max_age(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|directive| {
            let (name, seconds) = directive.trim().split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("max-age") {
                return None;
            }
            seconds
                .trim()
                .trim_matches('"')
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        })
}

/// Cached signing keys for one discovery URL
///
/// Immutable once built; a refresh replaces the whole entry.
#[derive(Debug)]
pub struct SigningKeySet {
    keys: Vec<SigningKey>,
    fetched_at: SystemTime,
    expires_at: SystemTime,
}

impl SigningKeySet {
    /// Usable keys, in document order
    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// Find a key by `kid`
    pub fn find(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.key_id() == Some(kid))
    }

    /// Keys that may verify a token with the given header `kid`/`alg`
    pub fn candidates(&self, kid: Option<&str>, alg: Algorithm) -> impl Iterator<Item = &SigningKey> {
        self.keys.iter().filter(move |k| k.accepts(kid, alg))
    }

    /// When the keys were fetched
    pub fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }

    /// When the entry stops being served from the fast path
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false for cached entries
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn is_fresh(&self, now: SystemTime) -> bool {
        now < self.expires_at
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the fast path or after waiting on another fetch
    pub hits: u64,
    /// Lookups that had to take the per-URL lock
    pub misses: u64,
    /// Network fetches attempted
    pub fetches: u64,
    /// Fetches that failed
    pub fetch_failures: u64,
    /// Failed fetches answered with the previously cached entry
    pub stale_served: u64,
    /// Cached discovery URLs
    pub entries: usize,
    /// Cached discovery URLs that are still fresh
    pub fresh_entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    stale_served: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-URL fetch lock plus a count of failed fetches under it
///
/// A caller that sees the count move while it waited on the lock knows the
/// fetch it was waiting for failed, and does not repeat it.
#[derive(Debug, Default)]
struct FetchSlot {
    lock: Mutex<()>,
    failed_fetches: AtomicU64,
}

impl FetchSlot {
    fn failures(&self) -> u64 {
        self.failed_fetches.load(Ordering::Acquire)
    }
}

/// Process-wide cache of signing keys, keyed by discovery URL
///
/// Build one per process and share it behind an `Arc`.
///
/// # Example
///
/// ```rust,no_run
/// # use dualgate_auth::jwt::KeySetCache;
/// # use dualgate_auth::KeySetCacheConfig;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = KeySetCache::new(KeySetCacheConfig::default())?;
///
/// match cache.get("https://idp.example/.well-known/jwks.json", None).await {
///     Some(keys) => println!("{} signing keys", keys.len()),
///     None => println!("keys unavailable"),
/// }
/// # Ok(())
/// # }
/// ```
pub struct KeySetCache {
    entries: DashMap<String, Arc<SigningKeySet>>,
    slots: DashMap<String, Arc<FetchSlot>>,
    fetcher: Arc<dyn JwksFetcher>,
    clock: Arc<dyn Clock>,
    config: KeySetCacheConfig,
    counters: Counters,
}

impl fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySetCache")
            .field("entries", &self.entries.len())
            .field("fetcher", &self.fetcher)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KeySetCache {
    /// Create a cache that fetches over HTTPS with the wall clock
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: KeySetCacheConfig) -> Result<Self, JwksError> {
        let fetcher = HttpJwksFetcher::new(&config)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    /// Create a cache with a custom fetcher
    pub fn with_fetcher(config: KeySetCacheConfig, fetcher: Arc<dyn JwksFetcher>) -> Self {
        Self {
            entries: DashMap::new(),
            slots: DashMap::new(),
            fetcher,
            clock: Arc::new(SystemClock),
            config,
            counters: Counters::default(),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Time source shared with validators built on this cache
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Cache configuration
    pub fn config(&self) -> &KeySetCacheConfig {
        &self.config
    }

    /// Get the signing keys for a discovery URL
    ///
    /// Returns the cached entry while it is fresh; otherwise fetches under
    /// the URL's lock. `cache_duration` is used when the response carries no
    /// `max-age`. `None` means no keys could be obtained.
    pub async fn get(
        &self,
        discovery_url: &str,
        cache_duration: Option<Duration>,
    ) -> Option<Arc<SigningKeySet>> {
        if let Some(entry) = self.fresh_entry(discovery_url) {
            Counters::bump(&self.counters.hits);
            auth_metrics::record_cache_lookup(true);
            return Some(entry);
        }

        Counters::bump(&self.counters.misses);
        auth_metrics::record_cache_lookup(false);

        let slot = self.slot_for(discovery_url);
        let failures_before = slot.failures();
        let _guard = slot.lock.lock().await;

        // Another caller may have refreshed the entry while we waited
        if let Some(entry) = self.fresh_entry(discovery_url) {
            debug!(jwks_uri = %discovery_url, "JWKS refreshed by concurrent caller");
            Counters::bump(&self.counters.hits);
            return Some(entry);
        }

        if slot.failures() != failures_before {
            return self.stale_fallback(discovery_url, &"concurrent fetch failed");
        }

        self.fetch_and_store(discovery_url, cache_duration, &slot).await
    }

    /// Force a refresh, e.g. after a signature failure hints at key rotation
    ///
    /// Refreshes within `min_refresh_interval` of the last successful fetch
    /// return the cached entry without a network call. A failed refresh
    /// falls back like [`KeySetCache::get`].
    pub async fn refresh(
        &self,
        discovery_url: &str,
        cache_duration: Option<Duration>,
    ) -> Option<Arc<SigningKeySet>> {
        let slot = self.slot_for(discovery_url);
        let failures_before = slot.failures();
        let _guard = slot.lock.lock().await;

        if slot.failures() != failures_before {
            return self.stale_fallback(discovery_url, &"concurrent fetch failed");
        }

        if let Some(entry) = self.entries.get(discovery_url).map(|e| Arc::clone(e.value())) {
            let since_fetch = self
                .clock
                .now()
                .duration_since(entry.fetched_at)
                .unwrap_or_default();
            if entry.is_fresh(self.clock.now()) && since_fetch < self.config.min_refresh_interval {
                warn!(
                    jwks_uri = %discovery_url,
                    since_last_ms = since_fetch.as_millis(),
                    "JWKS refresh rate limited, using cache"
                );
                return Some(entry);
            }
        }

        self.fetch_and_store(discovery_url, cache_duration, &slot).await
    }

    /// Drop the entry for one discovery URL
    pub fn invalidate(&self, discovery_url: &str) {
        if self.entries.remove(discovery_url).is_some() {
            debug!(jwks_uri = %discovery_url, "JWKS cache entry invalidated");
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
        info!("JWKS cache cleared");
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let entries = self.entries.len();
        let fresh_entries = self.entries.iter().filter(|e| e.is_fresh(now)).count();

        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            fetch_failures: self.counters.fetch_failures.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            entries,
            fresh_entries,
        }
    }

    fn fresh_entry(&self, discovery_url: &str) -> Option<Arc<SigningKeySet>> {
        let entry = self.entries.get(discovery_url).map(|e| Arc::clone(e.value()))?;
        entry.is_fresh(self.clock.now()).then_some(entry)
    }

    /// Get or create the URL's fetch slot; concurrent creators share one
    fn slot_for(&self, discovery_url: &str) -> Arc<FetchSlot> {
        let entry = self
            .slots
            .entry(discovery_url.to_string())
            .or_insert_with(|| Arc::new(FetchSlot::default()));
        Arc::clone(entry.value())
    }

    fn ttl_for(&self, max_age: Option<Duration>, cache_duration: Option<Duration>) -> Duration {
        match (max_age, cache_duration) {
            (Some(max_age), _) => max_age.min(self.config.max_ttl),
            (None, Some(duration)) => duration,
            (None, None) => self.config.default_ttl,
        }
    }

    /// Fetch and replace the entry; caller holds `slot.lock`
    async fn fetch_and_store(
        &self,
        discovery_url: &str,
        cache_duration: Option<Duration>,
        slot: &FetchSlot,
    ) -> Option<Arc<SigningKeySet>> {
        info!(jwks_uri = %discovery_url, "Fetching JWKS from endpoint");
        Counters::bump(&self.counters.fetches);

        let result = self
            .fetcher
            .fetch(discovery_url)
            .await
            .and_then(|fetched| {
                if fetched.document.keys.is_empty() {
                    Err(JwksError::NoUsableKeys)
                } else {
                    Ok(fetched)
                }
            });

        match result {
            Ok(fetched) => {
                auth_metrics::record_jwks_fetch(true);
                let ttl = self.ttl_for(fetched.max_age, cache_duration);
                let fetched_at = self.clock.now();
                let entry = Arc::new(SigningKeySet {
                    keys: fetched.document.keys,
                    fetched_at,
                    expires_at: fetched_at + ttl,
                });

                info!(
                    jwks_uri = %discovery_url,
                    key_count = entry.len(),
                    skipped = fetched.document.skipped,
                    ttl_secs = ttl.as_secs(),
                    "Successfully fetched JWKS"
                );

                self.entries
                    .insert(discovery_url.to_string(), Arc::clone(&entry));
                Some(entry)
            }
            Err(e) => {
                auth_metrics::record_jwks_fetch(false);
                Counters::bump(&self.counters.fetch_failures);
                slot.failed_fetches.fetch_add(1, Ordering::Release);
                self.stale_fallback(discovery_url, &e)
            }
        }
    }

    fn stale_fallback(
        &self,
        discovery_url: &str,
        error: &dyn fmt::Display,
    ) -> Option<Arc<SigningKeySet>> {
        let now = self.clock.now();
        let cached = self.entries.get(discovery_url).map(|e| Arc::clone(e.value()));

        match cached {
            Some(entry) if now < entry.expires_at + self.config.stale_if_error => {
                Counters::bump(&self.counters.stale_served);
                warn!(
                    jwks_uri = %discovery_url,
                    error = %error,
                    "JWKS fetch failed, serving cached keys"
                );
                Some(entry)
            }
            _ => {
                warn!(
                    jwks_uri = %discovery_url,
                    error = %error,
                    "JWKS fetch failed and no usable cached keys"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    // Public RSA key from RFC 7517 Appendix A.1
    const RFC_N: &str = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";

    fn rsa_jwk(kid: &str) -> serde_json::Value {
        json!({ "kty": "RSA", "kid": kid, "use": "sig", "alg": "RS256", "n": RFC_N, "e": "AQAB" })
    }

    /// Fetcher that replays scripted JWKS bodies and counts calls
    #[derive(Debug, Default)]
    struct ScriptedFetcher {
        responses: StdMutex<Vec<Result<(serde_json::Value, Option<Duration>), u16>>>,
        calls: AtomicU64,
    }

    impl ScriptedFetcher {
        fn push_ok(&self, body: serde_json::Value, max_age: Option<Duration>) {
            self.responses.lock().unwrap().push(Ok((body, max_age)));
        }

        fn push_status(&self, status: u16) {
            self.responses.lock().unwrap().push(Err(status));
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JwksFetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedJwks, JwksError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().remove(0);
            match next {
                Ok((body, max_age)) => Ok(FetchedJwks {
                    document: JwksDocument::from_json(body)?,
                    max_age,
                }),
                Err(status) => Err(JwksError::Status(status)),
            }
        }
    }

    fn cache_with(fetcher: Arc<ScriptedFetcher>, clock: Arc<ManualClock>) -> KeySetCache {
        KeySetCache::with_fetcher(KeySetCacheConfig::default(), fetcher).with_clock(clock)
    }

    const URL: &str = "https://idp.example/.well-known/jwks.json";

    #[test]
    fn test_document_skips_unusable_keys() {
        let doc = JwksDocument::from_json(json!({
            "keys": [
                rsa_jwk("k1"),
                { "kty": "RSA", "kid": "enc", "use": "enc", "n": RFC_N, "e": "AQAB" },
                { "kty": "UNKNOWN", "kid": "weird" },
                { "kty": "RSA", "kid": "k2", "n": RFC_N, "e": "AQAB", "x5t": "extra-field" }
            ],
            "issuer": "ignored"
        }))
        .unwrap();

        let kids: Vec<_> = doc.keys().iter().map(|k| k.key_id()).collect();
        assert_eq!(kids, vec![Some("k1"), Some("k2")]);
        assert_eq!(doc.skipped(), 2);
        assert_eq!(doc.keys()[0].algorithm(), Some(Algorithm::RS256));
        assert_eq!(doc.keys()[1].algorithm(), None);
    }

    #[test]
    fn test_document_without_keys_is_rejected() {
        assert!(matches!(
            JwksDocument::from_json(json!({ "keys": [] })),
            Err(JwksError::NoUsableKeys)
        ));
        assert!(matches!(
            JwksDocument::from_json(json!({ "other": 1 })),
            Err(JwksError::NoUsableKeys)
        ));
        assert!(matches!(
            JwksDocument::from_slice(b"not json"),
            Err(JwksError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_key_accepts_kid_and_alg() {
        let doc = JwksDocument::from_json(json!({ "keys": [rsa_jwk("k1")] })).unwrap();
        let key = &doc.keys()[0];
        assert!(key.accepts(Some("k1"), Algorithm::RS256));
        assert!(key.accepts(None, Algorithm::RS256));
        assert!(!key.accepts(Some("k2"), Algorithm::RS256));
        assert!(!key.accepts(Some("k1"), Algorithm::PS256));
    }

    #[test]
    fn test_parse_max_age() {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));
        assert_eq!(parse_max_age(&headers), Some(Duration::from_secs(3600)));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        assert_eq!(parse_max_age(&headers), None);

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("Max-Age=\"60\", must-revalidate"));
        assert_eq!(parse_max_age(&headers), Some(Duration::from_secs(60)));

        assert_eq!(parse_max_age(&HeaderMap::new()), None);
    }

    #[test]
    fn test_check_url() {
        assert!(check_url("https://idp.example/keys", true).is_ok());
        assert!(check_url("http://127.0.0.1:8080/keys", true).is_ok());
        assert!(check_url("http://localhost/keys", true).is_ok());
        assert!(matches!(
            check_url("http://idp.example/keys", true),
            Err(JwksError::InsecureUrl(_))
        ));
        assert!(check_url("http://idp.example/keys", false).is_ok());
        assert!(matches!(
            check_url("ftp://idp.example/keys", false),
            Err(JwksError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_ttl_prefers_max_age_then_caller_then_default() {
        let clock = Arc::new(ManualClock::starting_now());
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_ok(json!({ "keys": [rsa_jwk("k1")] }), Some(Duration::from_secs(60)));
        fetcher.push_ok(json!({ "keys": [rsa_jwk("k1")] }), None);
        fetcher.push_ok(json!({ "keys": [rsa_jwk("k1")] }), None);
        let cache = cache_with(Arc::clone(&fetcher), Arc::clone(&clock));

        let first = cache.get(URL, Some(Duration::from_secs(600))).await.unwrap();
        assert_eq!(
            first.expires_at().duration_since(first.fetched_at()).unwrap(),
            Duration::from_secs(60)
        );

        cache.invalidate(URL);
        let second = cache.get(URL, Some(Duration::from_secs(600))).await.unwrap();
        assert_eq!(
            second.expires_at().duration_since(second.fetched_at()).unwrap(),
            Duration::from_secs(600)
        );

        cache.invalidate(URL);
        let third = cache.get(URL, None).await.unwrap();
        assert_eq!(
            third.expires_at().duration_since(third.fetched_at()).unwrap(),
            Duration::from_secs(12 * 60 * 60)
        );
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_max_age_is_capped() {
        let clock = Arc::new(ManualClock::starting_now());
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_ok(
            json!({ "keys": [rsa_jwk("k1")] }),
            Some(Duration::from_secs(365 * 24 * 60 * 60)),
        );
        let cache = cache_with(fetcher, clock);

        let entry = cache.get(URL, None).await.unwrap();
        assert_eq!(
            entry.expires_at().duration_since(entry.fetched_at()).unwrap(),
            crate::config::MAX_KEY_SET_TTL
        );
    }

    #[tokio::test]
    async fn test_expired_entry_not_served_after_failure() {
        let clock = Arc::new(ManualClock::starting_now());
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_ok(json!({ "keys": [rsa_jwk("k1")] }), Some(Duration::from_secs(60)));
        fetcher.push_status(503);
        let cache = cache_with(Arc::clone(&fetcher), Arc::clone(&clock));

        assert!(cache.get(URL, None).await.is_some());
        clock.advance(Duration::from_secs(61));
        assert!(cache.get(URL, None).await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.fetches, 2);
        assert_eq!(stats.fetch_failures, 1);
        assert_eq!(stats.stale_served, 0);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.fresh_entries, 0);
    }

    #[tokio::test]
    async fn test_stale_if_error_grace() {
        let clock = Arc::new(ManualClock::starting_now());
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_ok(json!({ "keys": [rsa_jwk("k1")] }), Some(Duration::from_secs(60)));
        fetcher.push_status(500);
        let config = KeySetCacheConfig {
            stale_if_error: Duration::from_secs(300),
            ..KeySetCacheConfig::default()
        };
        let cache = KeySetCache::with_fetcher(config, fetcher).with_clock(clock.clone());

        let original = cache.get(URL, None).await.unwrap();
        clock.advance(Duration::from_secs(120));
        let served = cache.get(URL, None).await.unwrap();

        assert!(Arc::ptr_eq(&original, &served));
        assert_eq!(cache.stats().stale_served, 1);
    }

    #[tokio::test]
    async fn test_refresh_is_rate_limited() {
        let clock = Arc::new(ManualClock::starting_now());
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push_ok(json!({ "keys": [rsa_jwk("k1")] }), None);
        fetcher.push_ok(json!({ "keys": [rsa_jwk("k2")] }), None);
        let cache = cache_with(Arc::clone(&fetcher), Arc::clone(&clock));

        cache.get(URL, None).await.unwrap();
        let limited = cache.refresh(URL, None).await.unwrap();
        assert!(limited.find("k1").is_some());
        assert_eq!(fetcher.calls(), 1);

        clock.advance(Duration::from_secs(6));
        let refreshed = cache.refresh(URL, None).await.unwrap();
        assert!(refreshed.find("k2").is_some());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let clock = Arc::new(ManualClock::starting_now());
        let fetcher = Arc::new(ScriptedFetcher::default());
        for _ in 0..3 {
            fetcher.push_ok(json!({ "keys": [rsa_jwk("k1")] }), None);
        }
        let cache = cache_with(Arc::clone(&fetcher), clock);
        let other = "https://other.example/.well-known/jwks.json";

        cache.get(URL, None).await.unwrap();
        cache.get(other, None).await.unwrap();
        assert_eq!(cache.stats().entries, 2);

        cache.invalidate(URL);
        assert_eq!(cache.stats().entries, 1);
        cache.get(URL, None).await.unwrap();
        assert_eq!(fetcher.calls(), 3);

        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_slot_for_returns_shared_instance() {
        let cache = cache_with(
            Arc::new(ScriptedFetcher::default()),
            Arc::new(ManualClock::starting_now()),
        );
        let a = cache.slot_for(URL);
        let b = cache.slot_for(URL);
        let c = cache.slot_for("https://other.example/keys");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
