//! JWT infrastructure
//!
//! ```text
//!            bearer token
//!                 │
//!        ┌────────▼────────┐
//!        │ TokenValidator  │  routing, iss/aud/exp/nbf, act delegation
//!        └────────┬────────┘
//!                 │ discovery URL
//!        ┌────────▼────────┐
//!        │  KeySetCache    │  per-URL lock, max-age expiry, stale-on-error
//!        └────────┬────────┘
//!                 │
//!        ┌────────▼────────┐
//!        │  JwksFetcher    │  HTTPS, size limit, Cache-Control
//!        └─────────────────┘
//! ```
//!
//! # Modules
//!
//! - `jwks` - JWKS fetching and caching
//! - `routing` - Issuer to key-endpoint routing
//! - `validator` - Token and actor-token validation

pub mod jwks;
pub mod routing;
pub mod validator;

// Re-export commonly used types
pub use jwks::{
    CacheStats, FetchedJwks, HttpJwksFetcher, JwksDocument, JwksFetcher, KeySetCache, SigningKey,
    SigningKeySet, parse_max_age,
};
pub use routing::{IssuerKind, KeyRoute, enterprise_route, route_issuer};
pub use validator::{DEFAULT_ALGORITHMS, DEFAULT_CLOCK_SKEW, TokenValidator};
