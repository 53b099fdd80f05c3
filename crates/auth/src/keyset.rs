//! Remote key-set cache for asymmetric token verification.
//!
//! Keys are fetched from a JWKS endpoint and cached by `kid`. Two
//! knobs govern freshness: a refresh interval (elapsed → the next
//! lookup re-fetches) and a per-entry TTL. The TTL overrides the
//! refresh interval: a stale entry forces a re-fetch even inside the
//! refresh window. A failed fetch never discards the cache; entries
//! stay usable until their TTL expires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::AuthError;

/// Client-side bound on the key-set fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    kty: String,
    #[serde(rename = "use")]
    use_: Option<String>,
    alg: Option<String>,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

struct CachedKey {
    key: DecodingKey,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    keys: HashMap<String, CachedKey>,
    last_fetch: Option<Instant>,
}

pub struct KeySetCache {
    url: String,
    algorithm: Algorithm,
    refresh_interval: Duration,
    cache_ttl: Duration,
    client: reqwest::Client,
    state: RwLock<CacheState>,
}

impl KeySetCache {
    pub fn new(
        url: impl Into<String>,
        algorithm: Algorithm,
        refresh_interval: Duration,
        cache_ttl: Duration,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Misconfigured(format!("http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            algorithm,
            refresh_interval,
            cache_ttl,
            client,
            state: RwLock::new(CacheState::default()),
        })
    }

    /// Look up the verification key for `kid`, refreshing the set when
    /// the refresh interval elapsed or the entry went stale. Only one
    /// fetch is in flight at a time: the re-check and the fetch both
    /// happen under the writer lock.
    pub async fn get(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let state = self.state.read().await;
            if !self.refresh_due(&state) {
                if let Some(entry) = state.keys.get(kid) {
                    if self.entry_fresh(entry) {
                        return Ok(entry.key.clone());
                    }
                } else if state.last_fetch.is_some() {
                    return Err(AuthError::UnknownKey(kid.to_string()));
                }
            }
        }

        let mut state = self.state.write().await;
        // Re-check: another task may have refreshed while we waited.
        if !self.refresh_due(&state)
            && let Some(entry) = state.keys.get(kid)
            && self.entry_fresh(entry)
        {
            return Ok(entry.key.clone());
        }

        match self.fetch().await {
            Ok(keys) => {
                debug!(count = keys.len(), url = %self.url, "key set refreshed");
                state.keys = keys;
                state.last_fetch = Some(Instant::now());
            }
            Err(e) => {
                warn!(error = %e, url = %self.url, "key set refresh failed, keeping cache");
                // Entries within their TTL remain usable.
                if let Some(entry) = state.keys.get(kid) {
                    if self.entry_fresh(entry) {
                        return Ok(entry.key.clone());
                    }
                }
                return Err(e);
            }
        }

        state
            .keys
            .get(kid)
            .map(|entry| entry.key.clone())
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
    }

    fn refresh_due(&self, state: &CacheState) -> bool {
        state
            .last_fetch
            .is_none_or(|t| t.elapsed() >= self.refresh_interval)
    }

    fn entry_fresh(&self, entry: &CachedKey) -> bool {
        entry.fetched_at.elapsed() < self.cache_ttl
    }

    /// GET the endpoint and retain RSA signature keys whose algorithm
    /// matches the configured one.
    async fn fetch(&self) -> Result<HashMap<String, CachedKey>, AuthError> {
        let fetch_err = |e: reqwest::Error| AuthError::KeySetFetch(e.to_string());

        let doc: JwksDocument = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(fetch_err)?
            .error_for_status()
            .map_err(fetch_err)?
            .json()
            .await
            .map_err(fetch_err)?;

        let expected_alg = format!("{:?}", self.algorithm);
        let now = Instant::now();
        let mut keys = HashMap::new();
        for jwk in doc.keys {
            if jwk.kty != "RSA"
                || jwk.use_.as_deref() != Some("sig")
                || jwk.alg.as_deref() != Some(expected_alg.as_str())
            {
                continue;
            }
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(
                        kid,
                        CachedKey {
                            key,
                            fetched_at: now,
                        },
                    );
                }
                Err(err) => warn!(kid = %kid, error = %err, "skipping undecodable key"),
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use std::sync::{Arc, Mutex};

    type Served = Arc<Mutex<(u16, serde_json::Value)>>;

    async fn jwks_handler(State(served): State<Served>) -> impl IntoResponse {
        let (status, body) = served.lock().unwrap().clone();
        (
            StatusCode::from_u16(status).unwrap(),
            axum::Json(body),
        )
    }

    async fn serve(served: Served) -> String {
        let app = axum::Router::new()
            .route("/jwks.json", get(jwks_handler))
            .with_state(served);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/jwks.json")
    }

    fn good_document() -> serde_json::Value {
        serde_json::json!({
            "keys": [
                { "kty": "RSA", "use": "sig", "alg": "RS256", "kid": "k1",
                  "n": "sXchTqwutqLtVVNNONenmaAA", "e": "AQAB" },
                { "kty": "EC",  "use": "sig", "alg": "ES256", "kid": "k2",
                  "x": "abc", "y": "def" },
                { "kty": "RSA", "use": "enc", "alg": "RS256", "kid": "k3",
                  "n": "sXchTqwutqLtVVNNONenmaAA", "e": "AQAB" },
                { "kty": "RSA", "use": "sig", "alg": "RS512", "kid": "k4",
                  "n": "sXchTqwutqLtVVNNONenmaAA", "e": "AQAB" }
            ]
        })
    }

    fn cache(url: &str, refresh: Duration, ttl: Duration) -> KeySetCache {
        KeySetCache::new(url, Algorithm::RS256, refresh, ttl).unwrap()
    }

    #[tokio::test]
    async fn retains_only_matching_rsa_signature_keys() {
        let served: Served = Arc::new(Mutex::new((200, good_document())));
        let url = serve(served).await;
        let cache = cache(&url, Duration::from_secs(300), Duration::from_secs(900));

        assert!(cache.get("k1").await.is_ok());
        for filtered in ["k2", "k3", "k4"] {
            match cache.get(filtered).await {
                Err(AuthError::UnknownKey(kid)) => assert_eq!(kid, filtered),
                other => panic!("expected UnknownKey for {filtered}, got {}", if other.is_ok() { "Ok(_)" } else { "a different Err" }),
            }
        }
    }

    #[tokio::test]
    async fn failed_refresh_keeps_fresh_entries_usable() {
        let served: Served = Arc::new(Mutex::new((200, good_document())));
        let url = serve(served.clone()).await;
        // Refresh always due; generous TTL.
        let cache = cache(&url, Duration::ZERO, Duration::from_secs(3600));

        assert!(cache.get("k1").await.is_ok());

        served.lock().unwrap().0 = 500;
        // Fetch fails, but the cached entry is within its TTL.
        assert!(cache.get("k1").await.is_ok());
        // A kid the cache never saw cannot be served.
        assert!(cache.get("never-seen").await.is_err());
    }

    #[tokio::test]
    async fn stale_entries_fail_when_refresh_fails() {
        let served: Served = Arc::new(Mutex::new((200, good_document())));
        let url = serve(served.clone()).await;
        // TTL zero: every entry is stale the moment it lands.
        let cache = cache(&url, Duration::from_secs(3600), Duration::ZERO);

        // While the endpoint is healthy the stale entry forces a
        // re-fetch on every lookup, inside the refresh window.
        assert!(cache.get("k1").await.is_ok());
        assert!(cache.get("k1").await.is_ok());

        served.lock().unwrap().0 = 500;
        match cache.get("k1").await {
            Err(AuthError::KeySetFetch(_)) => {}
            other => panic!("expected KeySetFetch, got {}", if other.is_ok() { "Ok(_)" } else { "a different Err" }),
        }
    }

    #[tokio::test]
    async fn invalid_body_is_a_fetch_error() {
        let served: Served = Arc::new(Mutex::new((200, serde_json::json!("not a key set"))));
        let url = serve(served).await;
        let cache = cache(&url, Duration::ZERO, Duration::from_secs(3600));

        match cache.get("k1").await {
            Err(AuthError::KeySetFetch(_)) => {}
            other => panic!("expected KeySetFetch, got {}", if other.is_ok() { "Ok(_)" } else { "a different Err" }),
        }
    }
}
