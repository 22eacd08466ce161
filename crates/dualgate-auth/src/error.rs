//! Error types
//!
//! None of these cross the public validation boundary: [`JwksError`] is
//! absorbed by the key-set cache (stale entry or no keys), and
//! [`ValidationFailure`] is logged by the token validator and collapsed into
//! an absent principal.

use thiserror::Error;

/// Failure to obtain a usable key set from a discovery URL
#[derive(Debug, Error)]
pub enum JwksError {
    /// The discovery URL is not HTTPS (and not a loopback host)
    #[error("JWKS endpoint must use HTTPS: {0}")]
    InsecureUrl(String),

    /// The discovery URL could not be parsed
    #[error("Invalid JWKS URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be constructed
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),

    /// Network or transport error
    #[error("JWKS fetch failed: {0}")]
    Http(String),

    /// The endpoint answered with a non-success status
    #[error("JWKS endpoint returned status {0}")]
    Status(u16),

    /// The body exceeded the configured size limit
    #[error("JWKS response exceeds {limit} bytes")]
    ResponseTooLarge {
        /// Configured limit in bytes
        limit: usize,
    },

    /// The body is not a JWKS document
    #[error("Invalid JWKS format: {0}")]
    InvalidJson(String),

    /// A JWK could not be turned into a verification key
    #[error("Unusable JWK: {0}")]
    InvalidKey(String),

    /// The document parsed but contained no usable signing keys
    #[error("JWKS contains no usable signing keys")]
    NoUsableKeys,
}

/// Why a bearer token was rejected
///
/// Only used for logging. Callers of
/// [`TokenValidator::validate`](crate::jwt::TokenValidator::validate) see
/// `None` for every variant.
#[derive(Debug, Error)]
pub enum ValidationFailure {
    /// Not a three-part compact JWS, or header/payload are not base64url JSON
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Header algorithm is not on the allow-list
    #[error("algorithm {0} not allowed")]
    AlgorithmNotAllowed(String),

    /// Payload has no `iss` claim
    #[error("token has no issuer")]
    MissingIssuer,

    /// The key-set cache returned no keys for the discovery URL
    #[error("no signing keys available from {0}")]
    KeysUnavailable(String),

    /// No key in the set matches the header `kid` and algorithm
    #[error("no signing key matches kid {0:?}")]
    KeyNotFound(Option<String>),

    /// None of the candidate keys verified the signature
    #[error("signature verification failed")]
    Signature,

    /// Issuer or claim shape rejected during verification
    #[error("claim validation failed: {0}")]
    Claims(String),

    /// `aud` does not contain any accepted audience
    #[error("audience mismatch")]
    AudienceMismatch,

    /// `exp` is past, beyond the clock-skew leeway
    #[error("token expired")]
    Expired,

    /// `nbf` is in the future, beyond the clock-skew leeway
    #[error("token not yet valid")]
    NotYetValid,

    /// The `act` claim is present but cannot be treated as a delegation token
    #[error("invalid actor claim: {0}")]
    InvalidActor(String),

    /// The nested actor token failed validation
    #[error("actor token rejected: {0}")]
    Actor(Box<ValidationFailure>),
}

/// Configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("environment variable {0} not set")]
    MissingVar(&'static str),
}
