//! Issuer routing
//!
//! The unverified `iss` claim only selects which configured key endpoint to
//! query. Key URLs are never built from token contents, and an issuer that is
//! neither enterprise nor the configured own issuer gets no route at all.
//! Trust comes later, from the signature and the accepted-issuer set.

use crate::config::ValidationSettings;

/// Which provider a token claims to come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerKind {
    /// The upstream enterprise identity provider
    Enterprise,
    /// The first-party issuer
    Own,
}

/// Where to fetch keys for a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRoute {
    /// Provider selected from the unverified issuer
    pub kind: IssuerKind,
    /// JWKS discovery URL for that provider
    pub discovery_url: String,
}

/// Select the key endpoint for an unverified issuer
///
/// `own_issuer` is the configured first-party issuer. Returns `None` when
/// `token_issuer` is neither an enterprise issuer nor exactly `own_issuer`.
pub fn route_issuer(
    token_issuer: &str,
    own_issuer: &str,
    settings: &ValidationSettings,
) -> Option<KeyRoute> {
    if settings.enterprise.is_enterprise_issuer(token_issuer) {
        Some(enterprise_route(settings))
    } else if token_issuer == own_issuer {
        Some(KeyRoute {
            kind: IssuerKind::Own,
            discovery_url: own_discovery_url(own_issuer),
        })
    } else {
        None
    }
}

/// Key endpoint for the configured enterprise tenant
pub fn enterprise_route(settings: &ValidationSettings) -> KeyRoute {
    KeyRoute {
        kind: IssuerKind::Enterprise,
        discovery_url: settings.enterprise.jwks_url(&settings.tenant_id),
    }
}

/// `{issuer}/.well-known/jwks.json`
pub fn own_discovery_url(issuer: &str) -> String {
    format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'))
}

/// Enterprise issuers for the configured tenant (v1 and v2)
pub fn enterprise_issuers(settings: &ValidationSettings) -> Vec<String> {
    vec![
        settings.enterprise.v1_issuer(&settings.tenant_id),
        settings.enterprise.v2_issuer(&settings.tenant_id),
    ]
}

/// Issuers accepted on an outer token
pub fn accepted_issuers(own_issuer: &str, settings: &ValidationSettings) -> Vec<String> {
    let mut issuers = vec![own_issuer.to_string()];
    issuers.extend(enterprise_issuers(settings));
    issuers
}
