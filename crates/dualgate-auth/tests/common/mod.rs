//! Common test utilities for integration tests
//!
//! Provides RSA signing keys, token minting, and a wiremock server that
//! plays both the first-party issuer and the enterprise identity provider.

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dualgate_auth::jwt::{KeySetCache, TokenValidator};
use dualgate_auth::{EnterpriseAuthority, KeySetCacheConfig, ManualClock, ValidationSettings};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const TENANT_ID: &str = "contoso";
pub const CLIENT_ID: &str = "api-client-id";
pub const AUDIENCE: &str = "https://api.example.com";

/// First-party issuer signing key
pub static OWN_KEY: LazyLock<TestKey> = LazyLock::new(|| TestKey::generate("own-2025"));

/// Enterprise provider signing key
pub static ENTERPRISE_KEY: LazyLock<TestKey> = LazyLock::new(|| TestKey::generate("entra-2025"));

/// Key nobody publishes
pub static ROGUE_KEY: LazyLock<TestKey> = LazyLock::new(|| TestKey::generate("rogue"));

/// RSA signing key with its public JWK
pub struct TestKey {
    pub kid: String,
    encoding_key: EncodingKey,
    n: String,
    e: String,
}

impl TestKey {
    /// Generate a 2048-bit RSA key pair
    pub fn generate(kid: &str) -> Self {
        use rsa::RsaPrivateKey;
        use rsa::pkcs1::EncodeRsaPrivateKey;
        use rsa::pkcs8::LineEnding;
        use rsa::traits::PublicKeyParts;

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");
        let pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("Failed to encode private key");

        Self {
            kid: kid.to_string(),
            encoding_key: EncodingKey::from_rsa_pem(pem.as_bytes()).expect("Invalid RSA key"),
            n: URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        }
    }

    /// Public JWK for this key
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": self.kid,
            "n": self.n,
            "e": self.e,
        })
    }

    /// Sign claims with RS256 and this key's `kid`
    pub fn sign(&self, claims: &Value) -> String {
        self.sign_as(claims, Some(&self.kid))
    }

    /// Sign claims with an arbitrary `kid` header
    pub fn sign_as(&self, claims: &Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &self.encoding_key).expect("Failed to encode test JWT")
    }
}

/// JWKS document containing the given keys
pub fn jwks_body(keys: &[&TestKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

/// 200 response with a JWKS body and optional `Cache-Control: max-age`
pub fn jwks_response(keys: &[&TestKey], max_age: Option<u64>) -> ResponseTemplate {
    let response = ResponseTemplate::new(200).set_body_json(jwks_body(keys));
    match max_age {
        Some(secs) => response.insert_header("Cache-Control", format!("public, max-age={secs}")),
        None => response,
    }
}

/// Mock server hosting both issuers' key endpoints
///
/// - first-party issuer: `{uri}/own`, keys at `/own/.well-known/jwks.json`
/// - enterprise login base `{uri}/login`, STS base `{uri}/sts`, keys at
///   `/login/contoso/discovery/v2.0/keys`
pub struct MockIdentityServer {
    pub server: MockServer,
}

impl MockIdentityServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// First-party issuer
    pub fn own_issuer(&self) -> String {
        format!("{}/own", self.uri())
    }

    pub fn own_jwks_path(&self) -> &'static str {
        "/own/.well-known/jwks.json"
    }

    pub fn own_jwks_url(&self) -> String {
        format!("{}{}", self.uri(), self.own_jwks_path())
    }

    pub fn enterprise(&self) -> EnterpriseAuthority {
        EnterpriseAuthority::new(format!("{}/login", self.uri()), format!("{}/sts", self.uri()))
    }

    pub fn enterprise_jwks_path(&self) -> String {
        format!("/login/{TENANT_ID}/discovery/v2.0/keys")
    }

    /// Enterprise v1 issuer (`{sts}/{tenant}/`)
    pub fn enterprise_v1_issuer(&self) -> String {
        format!("{}/sts/{TENANT_ID}/", self.uri())
    }

    /// Enterprise v2 issuer (`{login}/{tenant}/v2.0`)
    pub fn enterprise_v2_issuer(&self) -> String {
        format!("{}/login/{TENANT_ID}/v2.0", self.uri())
    }

    /// Settings pointing the enterprise authority at this server
    pub fn settings(&self) -> ValidationSettings {
        ValidationSettings::new(TENANT_ID, CLIENT_ID).with_enterprise(self.enterprise())
    }

    /// Serve `keys` from the first-party endpoint, expecting `calls` requests
    pub async fn mount_own_keys(&self, keys: &[&TestKey], calls: u64) {
        Mock::given(method("GET"))
            .and(path(self.own_jwks_path()))
            .respond_with(jwks_response(keys, Some(3600)))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` from the enterprise endpoint, expecting `calls` requests
    pub async fn mount_enterprise_keys(&self, keys: &[&TestKey], calls: u64) {
        Mock::given(method("GET"))
            .and(path(self.enterprise_jwks_path()))
            .respond_with(jwks_response(keys, Some(3600)))
            .expect(calls)
            .mount(&self.server)
            .await;
    }
}

/// Current Unix timestamp
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Claims valid for ten minutes
pub fn token_claims(sub: &str, iss: &str, aud: &str) -> Value {
    let now = current_timestamp();
    json!({
        "sub": sub,
        "iss": iss,
        "aud": aud,
        "exp": now + 600,
        "iat": now,
        "nbf": now,
    })
}

/// Cache settings for tests: fast timeouts, HTTP allowed to the mock server
pub fn test_cache_config() -> KeySetCacheConfig {
    KeySetCacheConfig {
        request_timeout: Duration::from_secs(5),
        ..KeySetCacheConfig::default()
    }
}

/// HTTP-backed cache on a manual clock
pub fn cache_with_clock(config: KeySetCacheConfig, clock: Arc<ManualClock>) -> Arc<KeySetCache> {
    Arc::new(
        KeySetCache::new(config)
            .expect("Failed to build cache")
            .with_clock(clock),
    )
}

/// Validator and its cache, on a manual clock starting now
pub fn validator() -> (TokenValidator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let cache = cache_with_clock(test_cache_config(), Arc::clone(&clock));
    (TokenValidator::new(cache), clock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_urls() {
        let mock = MockIdentityServer::start().await;
        assert!(mock.own_jwks_url().ends_with("/own/.well-known/jwks.json"));
        assert!(mock.enterprise().is_enterprise_issuer(&mock.enterprise_v2_issuer()));
        assert!(!mock.enterprise().is_enterprise_issuer(&mock.own_issuer()));
    }

    #[test]
    fn test_current_timestamp() {
        let ts = current_timestamp();
        assert!(ts > 1700000000); // After Nov 2023
    }
}
