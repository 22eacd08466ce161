//! Dual-issuer JWT validation with actor-token delegation
//!
//! This module implements bearer token validation with:
//! - Issuer routing (first-party issuer or enterprise identity provider)
//! - Multi-issuer validation (own issuer, enterprise v1 and v2 issuers)
//! - Case-insensitive, multi-valued audience matching
//! - Clock skew tolerance (60 seconds by default)
//! - Algorithm allow-list (asymmetric algorithms only)
//! - Nested `act` token verification against the enterprise provider
//!
//! Every failure collapses to `None` at [`TokenValidator::validate`]. The
//! reason is logged here, never returned, so responses do not reveal which
//! check failed.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, warn};

use super::jwks::{KeySetCache, SigningKeySet};
use super::routing::{accepted_issuers, enterprise_issuers, enterprise_route, route_issuer};
use crate::auth_metrics;
use crate::claims::{ACTOR_CLAIM, ActorInfo, ClaimSet, Principal};
use crate::clock::Clock;
use crate::config::ValidationSettings;
use crate::error::ValidationFailure;

/// Algorithms accepted by default
pub const DEFAULT_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Default clock skew tolerance
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Header and payload read without signature verification
///
/// Only used to pick keys; nothing here is trusted.
#[derive(Debug)]
struct UnverifiedToken {
    header: Header,
    payload: Map<String, Value>,
}

impl UnverifiedToken {
    fn parse(token: &str) -> Result<Self, ValidationFailure> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(ValidationFailure::MalformedToken(
                "expected three dot-separated parts".to_string(),
            ));
        }

        let header =
            decode_header(token).map_err(|e| ValidationFailure::MalformedToken(e.to_string()))?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|e| ValidationFailure::MalformedToken(format!("payload encoding: {e}")))?;
        let payload: Map<String, Value> = serde_json::from_slice(&payload_bytes)
            .map_err(|e| ValidationFailure::MalformedToken(format!("payload JSON: {e}")))?;

        Ok(Self { header, payload })
    }

    fn issuer(&self) -> Result<&str, ValidationFailure> {
        self.payload
            .get("iss")
            .and_then(Value::as_str)
            .filter(|iss| !iss.is_empty())
            .ok_or(ValidationFailure::MissingIssuer)
    }
}

/// Claims of a token whose signature and issuer have been verified
#[derive(Debug)]
struct VerifiedToken {
    payload: Map<String, Value>,
    key_id: Option<String>,
}

/// Bearer token validator for a first-party issuer and an enterprise provider
///
/// # Example
///
/// ```rust,no_run
/// # use dualgate_auth::jwt::{KeySetCache, TokenValidator};
/// # use dualgate_auth::{KeySetCacheConfig, ValidationSettings};
/// # use std::sync::Arc;
/// # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let cache = Arc::new(KeySetCache::new(KeySetCacheConfig::default())?);
/// let validator = TokenValidator::new(cache);
/// let settings = ValidationSettings::new("contoso-tenant", "api-client-id");
///
/// match validator
///     .validate(token, "https://auth.example.com", "https://api.example.com", &settings)
///     .await
/// {
///     Some(principal) => println!("authenticated {:?}", principal.subject()),
///     None => println!("not authenticated"),
/// }
/// # Ok(())
/// # }
/// ```
pub struct TokenValidator {
    key_sets: Arc<KeySetCache>,
    clock: Arc<dyn Clock>,
    clock_skew_leeway: Duration,
    allowed_algorithms: Vec<Algorithm>,
    key_set_ttl: Option<Duration>,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("key_sets", &self.key_sets)
            .field("clock_skew_leeway", &self.clock_skew_leeway)
            .field("allowed_algorithms", &self.allowed_algorithms)
            .field("key_set_ttl", &self.key_set_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Create a validator over a shared key-set cache
    ///
    /// Uses the cache's clock, 60 seconds of clock skew, and
    /// [`DEFAULT_ALGORITHMS`].
    pub fn new(key_sets: Arc<KeySetCache>) -> Self {
        let clock = key_sets.clock();
        Self {
            key_sets,
            clock,
            clock_skew_leeway: DEFAULT_CLOCK_SKEW,
            allowed_algorithms: DEFAULT_ALGORITHMS.to_vec(),
            key_set_ttl: None,
        }
    }

    /// Set custom clock skew tolerance
    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.clock_skew_leeway = leeway;
        self
    }

    /// Set allowed algorithms
    ///
    /// Only asymmetric algorithms make sense here: keys come from public
    /// JWKS documents.
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Replace the time source used for `exp`/`nbf` checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Key-set lifetime to request when a JWKS response has no `max-age`
    pub fn with_key_set_ttl(mut self, ttl: Duration) -> Self {
        self.key_set_ttl = Some(ttl);
        self
    }

    /// The shared key-set cache
    pub fn key_sets(&self) -> &Arc<KeySetCache> {
        &self.key_sets
    }

    /// Validate a bearer token
    ///
    /// `issuer` and `audience` are this service's own issuer and audience.
    /// Returns the principal, with actor claims merged in when the token
    /// carries an `act` delegation token, or `None` if anything about the
    /// token or its keys fails.
    pub async fn validate(
        &self,
        token: &str,
        issuer: &str,
        audience: &str,
        settings: &ValidationSettings,
    ) -> Option<Principal> {
        match self
            .validate_detailed(token, issuer, audience, settings)
            .await
        {
            Ok(principal) => {
                auth_metrics::record_token_validation(true, principal.is_delegated());
                debug!(
                    issuer = %principal.issuer,
                    subject = ?principal.subject(),
                    delegated = principal.is_delegated(),
                    "JWT validation successful"
                );
                Some(principal)
            }
            Err(failure) => {
                auth_metrics::record_token_validation(false, false);
                warn!(reason = %failure, "JWT validation failed");
                None
            }
        }
    }

    /// Validate and report why a token was rejected
    pub(crate) async fn validate_detailed(
        &self,
        token: &str,
        issuer: &str,
        audience: &str,
        settings: &ValidationSettings,
    ) -> Result<Principal, ValidationFailure> {
        let unverified = UnverifiedToken::parse(token)?;
        self.check_algorithm(unverified.header.alg)?;

        let token_issuer = unverified.issuer()?;
        let route = route_issuer(token_issuer, issuer, settings).ok_or_else(|| {
            ValidationFailure::Claims(format!("issuer {token_issuer} is not accepted"))
        })?;
        debug!(
            issuer_kind = ?route.kind,
            jwks_uri = %route.discovery_url,
            "Routing token to key endpoint"
        );

        let verified = self
            .verify_with_route(
                token,
                &unverified.header,
                &route.discovery_url,
                &accepted_issuers(issuer, settings),
            )
            .await?;

        let mut audiences = vec![audience];
        if !settings.client_id.is_empty() {
            audiences.push(settings.client_id.as_str());
        }
        check_audience(&verified.payload, &audiences)?;
        let exp = self.check_lifetime(&verified.payload)?;

        let mut claims = ClaimSet::from_payload(&verified.payload);

        let actor = match verified.payload.get(ACTOR_CLAIM) {
            None => None,
            Some(act) => {
                let (actor_claims, actor) = self
                    .validate_actor(act, settings)
                    .await
                    .map_err(|e| ValidationFailure::Actor(Box::new(e)))?;
                let added = claims.merge_from(&actor_claims);
                debug!(
                    actor_issuer = %actor.issuer,
                    merged_claims = added,
                    "Merged actor token claims"
                );
                Some(actor)
            }
        };

        let issuer = verified
            .payload
            .get("iss")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Principal {
            claims,
            issuer,
            key_id: verified.key_id,
            expires_at: DateTime::<Utc>::from_timestamp(exp, 0),
            actor,
        })
    }

    /// Verify the nested `act` token against the enterprise provider
    ///
    /// Audience is only checked when `settings.actor_audience` is set.
    async fn validate_actor(
        &self,
        act: &Value,
        settings: &ValidationSettings,
    ) -> Result<(ClaimSet, ActorInfo), ValidationFailure> {
        let inner = act.as_str().ok_or_else(|| {
            ValidationFailure::InvalidActor("act claim is not a token string".to_string())
        })?;

        let unverified = UnverifiedToken::parse(inner)?;
        self.check_algorithm(unverified.header.alg)?;

        let actor_issuer = unverified.issuer()?;
        if !settings.enterprise.is_enterprise_issuer(actor_issuer) {
            return Err(ValidationFailure::InvalidActor(format!(
                "actor issuer {actor_issuer} is not the enterprise provider"
            )));
        }
        let route = enterprise_route(settings);

        let verified = self
            .verify_with_route(
                inner,
                &unverified.header,
                &route.discovery_url,
                &enterprise_issuers(settings),
            )
            .await?;

        if let Some(actor_audience) = settings.actor_audience.as_deref() {
            check_audience(&verified.payload, &[actor_audience])?;
        }
        self.check_lifetime(&verified.payload)?;

        let info = ActorInfo {
            issuer: verified
                .payload
                .get("iss")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            subject: verified
                .payload
                .get("sub")
                .and_then(Value::as_str)
                .map(str::to_string),
        };

        Ok((ClaimSet::from_payload(&verified.payload), info))
    }

    fn check_algorithm(&self, alg: Algorithm) -> Result<(), ValidationFailure> {
        if self.allowed_algorithms.contains(&alg) {
            Ok(())
        } else {
            Err(ValidationFailure::AlgorithmNotAllowed(format!("{alg:?}")))
        }
    }

    /// Fetch keys for the route and verify; on an unknown `kid`, force one
    /// (rate-limited) refresh in case the provider rotated keys
    async fn verify_with_route(
        &self,
        token: &str,
        header: &Header,
        discovery_url: &str,
        issuers: &[String],
    ) -> Result<VerifiedToken, ValidationFailure> {
        let keys = self
            .key_sets
            .get(discovery_url, self.key_set_ttl)
            .await
            .ok_or_else(|| ValidationFailure::KeysUnavailable(discovery_url.to_string()))?;

        match verify_signature(token, header, &keys, issuers) {
            Err(ValidationFailure::KeyNotFound(kid)) => {
                debug!(
                    jwks_uri = %discovery_url,
                    key_id = ?kid,
                    "Key ID not found in JWKS, refreshing"
                );
                let keys = self
                    .key_sets
                    .refresh(discovery_url, self.key_set_ttl)
                    .await
                    .ok_or_else(|| ValidationFailure::KeysUnavailable(discovery_url.to_string()))?;
                verify_signature(token, header, &keys, issuers)
            }
            other => other,
        }
    }

    /// Check `exp` (required) and `nbf` (optional) against the clock with
    /// leeway; returns `exp`
    fn check_lifetime(&self, payload: &Map<String, Value>) -> Result<i64, ValidationFailure> {
        let now = self
            .clock
            .now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let leeway = self.clock_skew_leeway.as_secs() as i64;

        let exp = payload
            .get("exp")
            .and_then(numeric_date)
            .ok_or_else(|| ValidationFailure::Claims("exp must be a NumericDate".to_string()))?;
        if now > exp.saturating_add(leeway) {
            return Err(ValidationFailure::Expired);
        }

        if let Some(nbf) = payload.get("nbf") {
            let nbf = numeric_date(nbf)
                .ok_or_else(|| ValidationFailure::Claims("nbf must be a NumericDate".to_string()))?;
            if nbf > now.saturating_add(leeway) {
                return Err(ValidationFailure::NotYetValid);
            }
        }

        Ok(exp)
    }
}

/// Verify the signature against each candidate key and the issuer against
/// `issuers`. Lifetime and audience are checked separately.
fn verify_signature(
    token: &str,
    header: &Header,
    keys: &SigningKeySet,
    issuers: &[String],
) -> Result<VerifiedToken, ValidationFailure> {
    let mut validation = Validation::new(header.alg);
    validation.set_issuer(issuers);
    validation.set_required_spec_claims(&["exp", "iss"]);
    validation.validate_aud = false;
    validation.validate_exp = false;
    validation.validate_nbf = false;

    let kid = header.kid.as_deref();
    let mut candidates = keys.candidates(kid, header.alg).peekable();
    if candidates.peek().is_none() {
        return Err(ValidationFailure::KeyNotFound(header.kid.clone()));
    }

    for key in candidates {
        match decode::<Map<String, Value>>(token, key.decoding_key(), &validation) {
            Ok(data) => {
                return Ok(VerifiedToken {
                    payload: data.claims,
                    key_id: key.key_id().map(str::to_string),
                });
            }
            Err(e) => match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidKeyFormat
                | ErrorKind::InvalidRsaKey(_)
                | ErrorKind::InvalidEcdsaKey => {
                    debug!(key_id = ?key.key_id(), error = %e, "Key did not verify token");
                }
                _ => return Err(ValidationFailure::Claims(e.to_string())),
            },
        }
    }

    Err(ValidationFailure::Signature)
}

/// The token's `aud` (string or array) must contain one of `accepted`,
/// compared case-insensitively
fn check_audience(payload: &Map<String, Value>, accepted: &[&str]) -> Result<(), ValidationFailure> {
    let token_audiences: Vec<&str> = match payload.get("aud") {
        Some(Value::String(aud)) => vec![aud.as_str()],
        Some(Value::Array(auds)) => auds.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };

    let matched = token_audiences.iter().any(|aud| {
        let aud = aud.to_lowercase();
        accepted.iter().any(|expected| expected.to_lowercase() == aud)
    });

    if matched {
        Ok(())
    } else {
        Err(ValidationFailure::AudienceMismatch)
    }
}

fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|secs| secs as i64))
}
