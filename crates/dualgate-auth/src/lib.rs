//! # Dualgate Auth - Dual-Issuer Bearer Token Validation
//!
//! Validates bearer tokens issued either by a first-party token service or
//! by an enterprise identity provider (Microsoft Entra ID by default), and
//! accepts first-party tokens that delegate on behalf of an enterprise
//! identity through a nested `act` token.
//!
//! ## Key Features
//!
//! - **Key-set cache** - Per-URL JWKS cache with `Cache-Control: max-age`
//!   expiry, single-flight refresh, and stale-on-error fallback
//! - **Issuer routing** - Unverified `iss` picks the key endpoint; trust
//!   comes from the signature and an explicit issuer allow-list
//! - **Actor delegation** - Nested `act` tokens are verified against the
//!   enterprise provider and their claims merged without overwriting
//! - **Fail closed** - Every failure yields "no principal"; reasons are
//!   logged through `tracing`, never returned
//!
//! ## Architecture
//!
//! - [`jwt`] - Key-set cache, issuer routing, token validator
//! - [`claims`] - Multi-valued claim sets and the validated [`Principal`]
//! - [`config`] - Cache configuration and per-call [`ValidationSettings`]
//! - [`clock`] - Injectable time source
//! - [`error`] - Internal error types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dualgate_auth::jwt::{KeySetCache, TokenValidator};
//! use dualgate_auth::{KeySetCacheConfig, ValidationSettings};
//! use std::sync::Arc;
//!
//! # async fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(KeySetCache::new(KeySetCacheConfig::default())?);
//! let validator = TokenValidator::new(Arc::clone(&cache));
//! let settings = ValidationSettings::from_env()?;
//!
//! if let Some(principal) = validator
//!     .validate(token, "https://auth.example.com", "https://api.example.com", &settings)
//!     .await
//! {
//!     for role in principal.claims.values("roles") {
//!         println!("role: {role}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics` - Counters for cache lookups, JWKS fetches and validations

#![cfg_attr(docsrs, feature(doc_cfg))]

// Submodules
pub(crate) mod auth_metrics;
pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod jwt;

// Re-export configuration types
#[doc(inline)]
pub use config::*;

#[doc(inline)]
pub use claims::{ACTOR_CLAIM, ActorInfo, ClaimSet, Principal};

#[doc(inline)]
pub use clock::{Clock, ManualClock, SystemClock};

#[doc(inline)]
pub use error::{ConfigError, JwksError, ValidationFailure};

#[doc(inline)]
pub use jwt::{KeySetCache, TokenValidator};

#[cfg(feature = "metrics")]
pub use auth_metrics::init_auth_metrics;
