//! Claim sets and the validated principal
//!
//! Claims are kept as an ordered multi-map: one claim type can carry several
//! values (e.g. `aud` or `roles`), and the order in which types were first
//! seen is preserved. Merging is a union over `(type, value)` pairs, so a
//! merged-in claim never replaces an existing one.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Claim name carrying a nested delegation token
pub const ACTOR_CLAIM: &str = "act";

/// Ordered multi-map of claim type to values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSet {
    entries: Vec<(String, Vec<String>)>,
}

impl ClaimSet {
    /// Create an empty claim set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a claim set from a decoded JWT payload
    ///
    /// Strings become one value, arrays one value per element, other scalars
    /// and objects their JSON text. `null` values and the `act` claim are
    /// skipped.
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let mut set = Self::new();
        for (claim_type, value) in payload {
            if claim_type == ACTOR_CLAIM {
                continue;
            }
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        if let Some(text) = claim_text(item) {
                            set.add(claim_type, text);
                        }
                    }
                }
                other => {
                    if let Some(text) = claim_text(other) {
                        set.add(claim_type, text);
                    }
                }
            }
        }
        set
    }

    /// Append a value, even if the same pair already exists
    pub fn add(&mut self, claim_type: impl Into<String>, value: impl Into<String>) {
        let claim_type = claim_type.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(t, _)| *t == claim_type) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((claim_type, vec![value])),
        }
    }

    /// Append a value unless the exact `(type, value)` pair is present
    ///
    /// Returns `true` if the claim was added.
    pub fn add_if_absent(&mut self, claim_type: &str, value: &str) -> bool {
        if self.contains(claim_type, value) {
            return false;
        }
        self.add(claim_type, value);
        true
    }

    /// Whether the exact `(type, value)` pair is present
    pub fn contains(&self, claim_type: &str, value: &str) -> bool {
        self.values(claim_type).any(|v| v == value)
    }

    /// All values for a claim type, in insertion order
    pub fn values<'a>(&'a self, claim_type: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.entries
            .iter()
            .find(|(t, _)| t == claim_type)
            .into_iter()
            .flat_map(|(_, values)| values.iter().map(String::as_str))
    }

    /// First value for a claim type
    pub fn first(&self, claim_type: &str) -> Option<&str> {
        self.values(claim_type).next()
    }

    /// Union `other` into `self` by `(type, value)` pair
    ///
    /// Returns how many claims were added.
    pub fn merge_from(&mut self, other: &ClaimSet) -> usize {
        other
            .iter()
            .filter(|(claim_type, value)| self.add_if_absent(claim_type, value))
            .count()
    }

    /// Iterate over every `(type, value)` pair
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(claim_type, values)| {
            values.iter().map(move |v| (claim_type.as_str(), v.as_str()))
        })
    }

    /// Number of `(type, value)` pairs
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, values)| values.len()).sum()
    }

    /// Whether the set has no claims
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn claim_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Identity asserted by a verified delegation token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorInfo {
    /// Issuer of the actor token
    pub issuer: String,
    /// Subject of the actor token, if it has one
    pub subject: Option<String>,
}

/// Successfully validated identity
#[derive(Debug, Clone)]
pub struct Principal {
    /// Outer token claims merged with actor token claims
    pub claims: ClaimSet,
    /// Issuer of the outer token
    pub issuer: String,
    /// Key ID that verified the outer token
    pub key_id: Option<String>,
    /// Expiry of the outer token
    pub expires_at: Option<DateTime<Utc>>,
    /// Delegation details when the token carried an `act` claim
    pub actor: Option<ActorInfo>,
}

impl Principal {
    /// `sub` claim of the outer token
    pub fn subject(&self) -> Option<&str> {
        self.claims.first("sub")
    }

    /// Whether this identity was asserted on behalf of another
    pub fn is_delegated(&self) -> bool {
        self.actor.is_some()
    }
}
