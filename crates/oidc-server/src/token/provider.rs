//! Token providers.
//!
//! A provider turns a ticket into the string handed to the client and back.
//! The server uses three of them:
//!
//! - authorization codes: [`AuthorizationCodeProvider`], single-use, the
//!   protected ticket stays in a [`CodeStore`]
//! - access tokens and refresh tokens: [`ProtectedTokenProvider`], the
//!   protected ticket is the token itself
//!
//! Every failure to receive a token collapses into one `invalid_grant`
//! error for the client. The reason only reaches the logs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::AuthResult;
use crate::clock::Clock;
use crate::codec::TicketCodec;
use crate::error::AuthError;
use crate::random::{SecureRandom, generate_identifier};
use crate::ticket::{AuthenticationTicket, TicketStage, expires_after};
use crate::token::store::{CodeStore, Redemption};

/// Creates and receives one kind of token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The ticket stage this provider handles.
    fn stage(&self) -> TicketStage;

    /// The expiration window applied to new tickets. `None` means no expiry.
    fn lifetime(&self) -> Option<Duration>;

    /// Protects a ticket and returns the token string.
    ///
    /// # Errors
    ///
    /// Returns a server error if the ticket cannot be protected or stored.
    async fn create(&self, ticket: &AuthenticationTicket) -> AuthResult<String>;

    /// Restores the ticket behind a token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` if the token is malformed, tampered, expired,
    /// of another stage or already consumed.
    async fn receive(&self, token: &str) -> AuthResult<AuthenticationTicket>;
}

/// Hashes a token for storage lookups using SHA-256.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn rejected(stage: TicketStage) -> AuthError {
    AuthError::invalid_grant(match stage {
        TicketStage::AuthorizationCode => "The authorization code is invalid",
        TicketStage::RefreshToken => "The refresh token is invalid",
        _ => "The token is invalid",
    })
}

fn check_ticket(
    stage: TicketStage,
    ticket: AuthenticationTicket,
    clock: &dyn Clock,
) -> AuthResult<AuthenticationTicket> {
    if ticket.stage != stage {
        tracing::debug!(expected = %stage, actual = %ticket.stage, "Ticket stage mismatch");
        return Err(rejected(stage));
    }
    if ticket.is_expired(clock.now()) {
        tracing::debug!(stage = %stage, "Ticket expired");
        return Err(rejected(stage));
    }
    Ok(ticket)
}

// ============================================================================
// Protected (stateless) provider
// ============================================================================

/// Provider whose tokens are the protected tickets themselves.
///
/// Tokens stay valid until they expire; nothing is stored.
pub struct ProtectedTokenProvider {
    stage: TicketStage,
    codec: Arc<dyn TicketCodec>,
    clock: Arc<dyn Clock>,
    lifetime: Option<Duration>,
}

impl ProtectedTokenProvider {
    #[must_use]
    pub fn new(
        stage: TicketStage,
        codec: Arc<dyn TicketCodec>,
        clock: Arc<dyn Clock>,
        lifetime: Option<Duration>,
    ) -> Self {
        Self {
            stage,
            codec,
            clock,
            lifetime,
        }
    }
}

#[async_trait]
impl TokenProvider for ProtectedTokenProvider {
    fn stage(&self) -> TicketStage {
        self.stage
    }

    fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    async fn create(&self, ticket: &AuthenticationTicket) -> AuthResult<String> {
        Ok(self.codec.protect(ticket)?)
    }

    async fn receive(&self, token: &str) -> AuthResult<AuthenticationTicket> {
        let ticket = self.codec.unprotect(token).map_err(|e| {
            if e.is_rejection() {
                tracing::debug!(stage = %self.stage, error = %e, "Failed to unprotect token");
            } else {
                tracing::warn!(stage = %self.stage, error = %e, "Authentic token could not be decoded");
            }
            rejected(self.stage)
        })?;
        check_ticket(self.stage, ticket, self.clock.as_ref())
    }
}

// ============================================================================
// Authorization code provider
// ============================================================================

/// Single-use authorization code provider.
///
/// The code is 256 random bits. The protected ticket is stored under the
/// code's SHA-256 hash and removed on first redemption.
pub struct AuthorizationCodeProvider {
    codec: Arc<dyn TicketCodec>,
    store: Arc<dyn CodeStore>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn SecureRandom>,
    lifetime: Duration,
}

impl AuthorizationCodeProvider {
    #[must_use]
    pub fn new(
        codec: Arc<dyn TicketCodec>,
        store: Arc<dyn CodeStore>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn SecureRandom>,
        lifetime: Duration,
    ) -> Self {
        Self {
            codec,
            store,
            clock,
            random,
            lifetime,
        }
    }

    /// Removes expired codes from the store.
    ///
    /// Hosts using the in-memory store call this periodically.
    pub async fn purge_expired(&self) -> AuthResult<u64> {
        self.store.purge_expired(self.clock.now()).await
    }
}

#[async_trait]
impl TokenProvider for AuthorizationCodeProvider {
    fn stage(&self) -> TicketStage {
        TicketStage::AuthorizationCode
    }

    fn lifetime(&self) -> Option<Duration> {
        Some(self.lifetime)
    }

    async fn create(&self, ticket: &AuthenticationTicket) -> AuthResult<String> {
        let protected = self.codec.protect(ticket)?;
        let now = self.clock.now();
        let expires_at = match ticket.properties.expires_at {
            Some(expires_at) => expires_at,
            None => expires_after(now, self.lifetime)?,
        };

        let code = generate_identifier(self.random.as_ref());
        self.store
            .insert(&hash_token(&code), protected, now, expires_at)
            .await?;
        Ok(code)
    }

    async fn receive(&self, code: &str) -> AuthResult<AuthenticationTicket> {
        let now = self.clock.now();
        let protected = match self.store.redeem(&hash_token(code), now).await? {
            Redemption::Redeemed(protected) => protected,
            Redemption::Replayed => {
                tracing::warn!(
                    target: "oidc_server::security",
                    "Authorization code presented after it was redeemed"
                );
                return Err(rejected(TicketStage::AuthorizationCode));
            }
            Redemption::Expired => {
                tracing::debug!("Authorization code expired");
                return Err(rejected(TicketStage::AuthorizationCode));
            }
            Redemption::NotFound => {
                tracing::debug!("Authorization code not found");
                return Err(rejected(TicketStage::AuthorizationCode));
            }
        };

        let ticket = self.codec.unprotect(&protected).map_err(|e| {
            tracing::warn!(error = %e, "Stored authorization code ticket is unreadable");
            rejected(TicketStage::AuthorizationCode)
        })?;
        check_ticket(TicketStage::AuthorizationCode, ticket, self.clock.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::AesGcmTicketCodec;
    use crate::random::OsSecureRandom;
    use crate::ticket::{AuthenticationProperties, Claim};
    use crate::token::store::InMemoryCodeStore;
    use time::macros::datetime;

    fn clock() -> ManualClock {
        ManualClock::new(datetime!(2024-01-01 0:00 UTC))
    }

    fn ticket(stage: TicketStage, clock: &ManualClock, lifetime: Option<Duration>) -> AuthenticationTicket {
        let mut props = AuthenticationProperties::new();
        props.set("client_id", "abc");
        props.stamp(clock.now(), lifetime).unwrap();
        AuthenticationTicket::new(stage, vec![Claim::new("sub", "alice")], props)
    }

    fn protected_provider(stage: TicketStage, clock: &ManualClock) -> ProtectedTokenProvider {
        ProtectedTokenProvider::new(
            stage,
            Arc::new(AesGcmTicketCodec::new(b"secret", stage.as_str())),
            Arc::new(clock.clone()),
            Some(Duration::from_secs(1200)),
        )
    }

    fn code_provider(clock: &ManualClock) -> AuthorizationCodeProvider {
        AuthorizationCodeProvider::new(
            Arc::new(AesGcmTicketCodec::new(b"secret", "authorization_code")),
            Arc::new(InMemoryCodeStore::new()),
            Arc::new(clock.clone()),
            Arc::new(OsSecureRandom),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn test_hash_token() {
        let hash = hash_token("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("abc"));
        assert_ne!(hash, hash_token("abd"));
    }

    #[tokio::test]
    async fn test_access_token_roundtrip() {
        let clock = clock();
        let provider = protected_provider(TicketStage::AccessToken, &clock);
        let ticket = ticket(TicketStage::AccessToken, &clock, provider.lifetime());

        let token = provider.create(&ticket).await.unwrap();
        assert_eq!(provider.receive(&token).await.unwrap(), ticket);
        // Access tokens are reusable until they expire.
        assert_eq!(provider.receive(&token).await.unwrap(), ticket);
    }

    #[tokio::test]
    async fn test_refresh_token_without_expiry_roundtrip() {
        let clock = clock();
        let provider = ProtectedTokenProvider::new(
            TicketStage::RefreshToken,
            Arc::new(AesGcmTicketCodec::new(b"secret", "refresh_token")),
            Arc::new(clock.clone()),
            None,
        );
        let ticket = ticket(TicketStage::RefreshToken, &clock, None);

        let token = provider.create(&ticket).await.unwrap();
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert_eq!(provider.receive(&token).await.unwrap(), ticket);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let clock = clock();
        let provider = protected_provider(TicketStage::AccessToken, &clock);
        let ticket = ticket(TicketStage::AccessToken, &clock, provider.lifetime());
        let token = provider.create(&ticket).await.unwrap();

        clock.advance(Duration::from_secs(1200));
        let err = provider.receive(&token).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_stage_mismatch_rejected() {
        let clock = clock();
        let codec: Arc<dyn TicketCodec> = Arc::new(AesGcmTicketCodec::new(b"secret", "shared"));
        let access = ProtectedTokenProvider::new(
            TicketStage::AccessToken,
            codec.clone(),
            Arc::new(clock.clone()),
            None,
        );
        let refresh = ProtectedTokenProvider::new(
            TicketStage::RefreshToken,
            codec,
            Arc::new(clock.clone()),
            None,
        );

        let token = refresh
            .create(&ticket(TicketStage::RefreshToken, &clock, None))
            .await
            .unwrap();
        assert!(access.receive(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let clock = clock();
        let provider = protected_provider(TicketStage::RefreshToken, &clock);
        let err = provider.receive("garbage").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_code_single_use() {
        let clock = clock();
        let provider = code_provider(&clock);
        let ticket = ticket(TicketStage::AuthorizationCode, &clock, provider.lifetime());

        let code = provider.create(&ticket).await.unwrap();
        assert_eq!(code.len(), 43);
        assert_eq!(provider.receive(&code).await.unwrap(), ticket);

        let err = provider.receive(&code).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_code_expires() {
        let clock = clock();
        let provider = code_provider(&clock);
        let ticket = ticket(TicketStage::AuthorizationCode, &clock, provider.lifetime());
        let code = provider.create(&ticket).await.unwrap();

        clock.advance(Duration::from_secs(301));
        let err = provider.receive(&code).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_unknown_code_rejected() {
        let clock = clock();
        let provider = code_provider(&clock);
        assert!(provider.receive("unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_purge_expired_codes() {
        let clock = clock();
        let provider = code_provider(&clock);
        let ticket = ticket(TicketStage::AuthorizationCode, &clock, provider.lifetime());
        provider.create(&ticket).await.unwrap();

        assert_eq!(provider.purge_expired().await.unwrap(), 0);
        clock.advance(Duration::from_secs(300));
        assert_eq!(provider.purge_expired().await.unwrap(), 1);
    }
}
