//! Authentication tickets.
//!
//! A ticket is the internal form of every credential the server issues: the
//! principal's claims plus a property bag. The same type travels through all
//! stages of the flow; [`TicketStage`] records which provider produced it.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;

/// Value type used when a claim does not specify one.
pub const DEFAULT_VALUE_TYPE: &str = "http://www.w3.org/2001/XMLSchema#string";

/// Issuer used when a claim does not specify one.
pub const DEFAULT_ISSUER: &str = "LOCAL AUTHORITY";

/// Well-known keys of the ticket property bag.
pub mod properties {
    pub const CLIENT_ID: &str = "client_id";
    pub const REDIRECT_URI: &str = "redirect_uri";
    pub const SCOPE: &str = "scope";
    pub const NONCE: &str = "nonce";
    pub const RESPONSE_TYPE: &str = "response_type";
    pub const CODE_CHALLENGE: &str = "code_challenge";
    pub const CODE_CHALLENGE_METHOD: &str = "code_challenge_method";
}

/// The stage of the flow that produced a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStage {
    AuthorizationCode,
    AccessToken,
    RefreshToken,
    IdToken,
}

impl TicketStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdToken => "id_token",
        }
    }
}

impl fmt::Display for TicketStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single statement about the principal.
///
/// Claims are immutable; the claims mapper can only drop or replace them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    claim_type: String,
    value: String,
    value_type: String,
    issuer: String,
}

impl Claim {
    /// Creates a string claim issued by the local authority.
    #[must_use]
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
            value_type: DEFAULT_VALUE_TYPE.to_string(),
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Returns a copy of this claim with a different value type.
    #[must_use]
    pub fn with_value_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = value_type.into();
        self
    }

    /// Returns a copy of this claim with a different issuer.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn claim_type(&self) -> &str {
        &self.claim_type
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn value_type(&self) -> &str {
        &self.value_type
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

/// Properties attached to a ticket.
///
/// Issuance and expiration times are typed; everything else is a string
/// dictionary keyed by the names in [`properties`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationProperties {
    /// When the ticket was issued.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub issued_at: Option<OffsetDateTime>,

    /// When the ticket stops being valid. `None` means it never expires.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,

    /// Additional string properties.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub items: IndexMap<String, String>,
}

impl AuthenticationProperties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a property value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    /// Sets a property value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.items.insert(key.into(), value.into());
    }

    /// Sets a property value when one is given.
    pub fn set_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.set(key, value);
        }
    }

    /// Removes a property value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.items.shift_remove(key)
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.get(properties::CLIENT_ID)
    }

    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        self.get(properties::REDIRECT_URI)
    }

    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.get(properties::SCOPE)
    }

    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.get(properties::NONCE)
    }

    /// Returns `true` if the space-separated `scope` property contains `scope`.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope()
            .unwrap_or_default()
            .split_whitespace()
            .any(|s| s == scope)
    }

    /// Stamps issuance at `now` and expiration `lifetime` later.
    ///
    /// A `None` lifetime clears the expiration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the expiration is past the last
    /// representable instant. The properties are left untouched.
    pub fn stamp(
        &mut self,
        now: OffsetDateTime,
        lifetime: Option<std::time::Duration>,
    ) -> AuthResult<()> {
        let expires_at = lifetime.map(|lifetime| expires_after(now, lifetime)).transpose()?;
        self.issued_at = Some(now);
        self.expires_at = expires_at;
        Ok(())
    }

    /// Returns `true` if the properties carry an expiration at or before `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// `now + lifetime`, failing instead of overflowing.
///
/// # Errors
///
/// Returns `Configuration` when the sum cannot be represented.
pub fn expires_after(
    now: OffsetDateTime,
    lifetime: std::time::Duration,
) -> AuthResult<OffsetDateTime> {
    time::Duration::try_from(lifetime)
        .ok()
        .and_then(|lifetime| now.checked_add(lifetime))
        .ok_or_else(|| {
            AuthError::configuration(format!(
                "lifetime of {}s overflows the expiration date",
                lifetime.as_secs()
            ))
        })
}

/// A principal's claims plus their properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationTicket {
    /// Which stage produced this ticket.
    pub stage: TicketStage,

    /// The principal's claims.
    #[serde(default)]
    pub claims: Vec<Claim>,

    /// Ticket properties.
    #[serde(default)]
    pub properties: AuthenticationProperties,
}

impl AuthenticationTicket {
    #[must_use]
    pub fn new(
        stage: TicketStage,
        claims: Vec<Claim>,
        properties: AuthenticationProperties,
    ) -> Self {
        Self {
            stage,
            claims,
            properties,
        }
    }

    /// Returns the first claim of the given type.
    #[must_use]
    pub fn find_claim(&self, claim_type: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.claim_type() == claim_type)
    }

    /// Returns the value of the first claim of the given type.
    #[must_use]
    pub fn claim_value(&self, claim_type: &str) -> Option<&str> {
        self.find_claim(claim_type).map(Claim::value)
    }

    /// Returns `true` if the ticket has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.properties.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use time::macros::datetime;

    #[test]
    fn test_claim_defaults() {
        let claim = Claim::new("sub", "alice");
        assert_eq!(claim.claim_type(), "sub");
        assert_eq!(claim.value(), "alice");
        assert_eq!(claim.value_type(), DEFAULT_VALUE_TYPE);
        assert_eq!(claim.issuer(), DEFAULT_ISSUER);

        let claim = claim.with_issuer("https://idp.example");
        assert_eq!(claim.issuer(), "https://idp.example");
    }

    #[test]
    fn test_stamp_and_expiry() {
        let now = datetime!(2024-01-01 0:00 UTC);
        let mut props = AuthenticationProperties::new();
        props.stamp(now, Some(Duration::from_secs(300))).unwrap();

        assert_eq!(props.issued_at, Some(now));
        assert_eq!(props.expires_at, Some(datetime!(2024-01-01 0:05 UTC)));
        assert!(!props.is_expired(datetime!(2024-01-01 0:04:59 UTC)));
        assert!(props.is_expired(datetime!(2024-01-01 0:05 UTC)));
    }

    #[test]
    fn test_no_lifetime_never_expires() {
        let mut props = AuthenticationProperties::new();
        props.stamp(datetime!(2024-01-01 0:00 UTC), None).unwrap();
        assert!(props.expires_at.is_none());
        assert!(!props.is_expired(datetime!(2100-01-01 0:00 UTC)));
    }

    #[test]
    fn test_overflowing_lifetime_is_an_error() {
        let now = datetime!(2024-01-01 0:00 UTC);
        let mut props = AuthenticationProperties::new();
        props.stamp(now, Some(Duration::from_secs(60))).unwrap();

        let err = props
            .stamp(now, Some(Duration::from_secs(300_000 * 365 * 24 * 3600)))
            .unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
        assert_eq!(props.expires_at, Some(datetime!(2024-01-01 0:01 UTC)));

        assert!(expires_after(now, Duration::MAX).is_err());
    }

    #[test]
    fn test_scope_lookup() {
        let mut props = AuthenticationProperties::new();
        props.set(properties::SCOPE, "openid profile");
        assert!(props.has_scope("openid"));
        assert!(!props.has_scope("open"));
    }

    #[test]
    fn test_ticket_json_roundtrip_preserves_subsecond_time() {
        let mut props = AuthenticationProperties::new();
        props.stamp(
            datetime!(2024-01-01 0:00:00.123456789 UTC),
            Some(Duration::from_secs(60)),
        )
        .unwrap();
        props.set(properties::CLIENT_ID, "abc");
        let ticket = AuthenticationTicket::new(
            TicketStage::AccessToken,
            vec![Claim::new("sub", "alice")],
            props,
        );

        let json = serde_json::to_string(&ticket).unwrap();
        let decoded: AuthenticationTicket = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, ticket);
        assert_eq!(decoded.claim_value("sub"), Some("alice"));
    }
}
