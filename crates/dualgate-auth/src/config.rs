//! Configuration types
//!
//! [`KeySetCacheConfig`] is fixed when the cache is built. [`ValidationSettings`]
//! is supplied by the caller on every validation; the validator never stores
//! it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Default key-set lifetime when the response carries no `max-age` (12 hours)
pub const DEFAULT_KEY_SET_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Upper bound applied to `max-age` (7 days)
pub const MAX_KEY_SET_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Microsoft Entra ID v2 login authority
pub const ENTRA_LOGIN_BASE: &str = "https://login.microsoftonline.com";

/// Microsoft Entra ID v1 token service
pub const ENTRA_STS_BASE: &str = "https://sts.windows.net";

/// Key-set cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySetCacheConfig {
    /// Lifetime used when neither `max-age` nor a caller duration is present
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,

    /// Cap applied to `Cache-Control: max-age`
    #[serde(with = "duration_secs")]
    pub max_ttl: Duration,

    /// How long past expiry an entry may still be served when a refresh fails.
    /// Zero means only unexpired entries are ever served.
    #[serde(with = "duration_secs")]
    pub stale_if_error: Duration,

    /// Forced refreshes within this long of the last successful fetch reuse
    /// the cached entry instead of hitting the network
    #[serde(with = "duration_secs")]
    pub min_refresh_interval: Duration,

    /// Timeout for a single JWKS request
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Maximum JWKS response body size in bytes
    pub max_response_size: usize,

    /// Refuse non-HTTPS discovery URLs (loopback hosts are always allowed)
    pub require_https: bool,

    /// User agent for JWKS requests
    pub user_agent: String,
}

impl Default for KeySetCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_KEY_SET_TTL,
            max_ttl: MAX_KEY_SET_TTL,
            stale_if_error: Duration::ZERO,
            min_refresh_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            max_response_size: 64 * 1024,
            require_https: true,
            user_agent: format!("dualgate-auth/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Base URLs of the enterprise identity provider
///
/// Tokens whose issuer starts with either base (plus `/`) are routed to the
/// enterprise key endpoint. Defaults to Microsoft Entra ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnterpriseAuthority {
    /// v2 authority, also hosts the key discovery endpoint
    pub login_base: String,
    /// v1 token service
    pub sts_base: String,
}

impl Default for EnterpriseAuthority {
    fn default() -> Self {
        Self {
            login_base: ENTRA_LOGIN_BASE.to_string(),
            sts_base: ENTRA_STS_BASE.to_string(),
        }
    }
}

impl EnterpriseAuthority {
    /// Authority rooted at custom base URLs
    pub fn new(login_base: impl Into<String>, sts_base: impl Into<String>) -> Self {
        Self {
            login_base: trim_base(login_base.into()),
            sts_base: trim_base(sts_base.into()),
        }
    }

    /// Whether an (unverified) issuer belongs to this provider
    pub fn is_enterprise_issuer(&self, issuer: &str) -> bool {
        [&self.login_base, &self.sts_base].iter().any(|base| {
            issuer
                .strip_prefix(base.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Key discovery URL for a tenant
    pub fn jwks_url(&self, tenant_id: &str) -> String {
        format!("{}/{}/discovery/v2.0/keys", self.login_base, tenant_id)
    }

    /// v1 issuer for a tenant (`{sts}/{tenant}/`)
    pub fn v1_issuer(&self, tenant_id: &str) -> String {
        format!("{}/{}/", self.sts_base, tenant_id)
    }

    /// v2 issuer for a tenant (`{login}/{tenant}/v2.0`)
    pub fn v2_issuer(&self, tenant_id: &str) -> String {
        format!("{}/{}/v2.0", self.login_base, tenant_id)
    }
}

fn trim_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}

/// Per-call validation settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Enterprise tenant identifier
    pub tenant_id: String,
    /// This service's client (application) ID, accepted as an audience
    pub client_id: String,
    /// If set, actor tokens must carry this audience
    pub actor_audience: Option<String>,
    /// Enterprise provider base URLs
    pub enterprise: EnterpriseAuthority,
}

impl ValidationSettings {
    /// Settings for a tenant and client on the default enterprise authority
    pub fn new(tenant_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Require actor tokens to carry `audience`
    pub fn with_actor_audience(mut self, audience: impl Into<String>) -> Self {
        self.actor_audience = Some(audience.into());
        self
    }

    /// Use a different enterprise authority
    pub fn with_enterprise(mut self, enterprise: EnterpriseAuthority) -> Self {
        self.enterprise = enterprise;
        self
    }

    /// Load settings from the environment
    ///
    /// Reads `DUALGATE_TENANT_ID` and `DUALGATE_CLIENT_ID` (required), and
    /// `DUALGATE_ACTOR_AUDIENCE`, `DUALGATE_ENTERPRISE_LOGIN_BASE`,
    /// `DUALGATE_ENTERPRISE_STS_BASE` (optional).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVar`] if a required variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let tenant_id = std::env::var("DUALGATE_TENANT_ID")
            .map_err(|_| ConfigError::MissingVar("DUALGATE_TENANT_ID"))?;
        let client_id = std::env::var("DUALGATE_CLIENT_ID")
            .map_err(|_| ConfigError::MissingVar("DUALGATE_CLIENT_ID"))?;

        let defaults = EnterpriseAuthority::default();
        let enterprise = EnterpriseAuthority::new(
            std::env::var("DUALGATE_ENTERPRISE_LOGIN_BASE").unwrap_or(defaults.login_base),
            std::env::var("DUALGATE_ENTERPRISE_STS_BASE").unwrap_or(defaults.sts_base),
        );

        Ok(Self {
            tenant_id,
            client_id,
            actor_audience: std::env::var("DUALGATE_ACTOR_AUDIENCE").ok(),
            enterprise,
        })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
