//! Metrics for key-set caching and token validation
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder
//! to be installed (e.g., via `metrics-exporter-prometheus`). Without the
//! feature every recorder below is a no-op.
//!
//! ## Metrics Provided
//!
//! - `dualgate_jwks_cache_lookups_total` - Counter for key-set lookups (labels: result)
//! - `dualgate_jwks_fetches_total` - Counter for JWKS network fetches (labels: status)
//! - `dualgate_token_validations_total` - Counter for token validations (labels: status, delegated)

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Register metric descriptions. Call once at startup.
///
/// This function is idempotent - it's safe to call multiple times.
#[cfg(feature = "metrics")]
pub fn init_auth_metrics() {
    INIT.call_once(|| {
        describe_counter!(
            "dualgate_jwks_cache_lookups_total",
            "Key-set cache lookups by fast-path hit or miss"
        );
        describe_counter!(
            "dualgate_jwks_fetches_total",
            "JWKS fetches from discovery URLs"
        );
        describe_counter!(
            "dualgate_token_validations_total",
            "Bearer token validations"
        );
    });
}

/// Record a key-set cache lookup
pub(crate) fn record_cache_lookup(hit: bool) {
    #[cfg(feature = "metrics")]
    {
        let result = if hit { "hit" } else { "miss" };
        counter!("dualgate_jwks_cache_lookups_total", "result" => result).increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = hit;
}

/// Record a JWKS fetch
pub(crate) fn record_jwks_fetch(success: bool) {
    #[cfg(feature = "metrics")]
    {
        let status = if success { "success" } else { "failure" };
        counter!("dualgate_jwks_fetches_total", "status" => status).increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = success;
}

/// Record a token validation outcome
pub(crate) fn record_token_validation(success: bool, delegated: bool) {
    #[cfg(feature = "metrics")]
    {
        let status = if success { "success" } else { "failure" };
        let delegated = if delegated { "true" } else { "false" };
        counter!(
            "dualgate_token_validations_total",
            "status" => status,
            "delegated" => delegated
        )
        .increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (success, delegated);
}
