//! The OpenID Connect server.
//!
//! [`OpenIdConnectServer`] is transport-agnostic: the host parses the HTTP
//! request into an [`OpenIdConnectMessage`] plus a [`RequestContext`], calls
//! the endpoint method, and writes the returned outcome back.
//!
//! # Example
//!
//! ```ignore
//! let server = OpenIdConnectServer::builder(ServerConfig::default())
//!     .with_provider(Arc::new(MyProvider))
//!     .with_ticket_secret(b"a long random secret")
//!     .with_signing_credentials(SigningCredentials::generate_rsa(SigningAlgorithm::RS256)?)
//!     .with_refresh_tokens()
//!     .build()?;
//!
//! match server.match_endpoint(path) {
//!     Some(Endpoint::Authorize) => server.authorize(&request, &ctx).await?,
//!     Some(Endpoint::Token) => server.token(&request, &ctx).await,
//!     ...
//! }
//! ```

pub mod authorize;
pub mod render;
pub mod token;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use crate::AuthResult;
use crate::claims::{ClaimsMapper, IdentityClaimsMapper};
use crate::clock::{Clock, SystemClock};
use crate::codec::AesGcmTicketCodec;
use crate::config::{ConfigError, ServerConfig};
use crate::error::AuthError;
use crate::message::OpenIdConnectMessage;
use crate::notifications::{DefaultServerProvider, ServerProvider};
use crate::random::{OsSecureRandom, SecureRandom};
use crate::ticket::TicketStage;
use crate::token::{
    AuthorizationCodeProvider, CodeStore, InMemoryCodeStore, Jwks, ProtectedTokenProvider,
    SigningCredentials, SigningService, TokenProvider,
};

pub use authorize::{AuthorizationOutcome, AuthorizationRedirect, DisplayError, PendingAuthorization};
pub use token::TokenResponse;
pub use validation::ValidationResponse;

/// Transport facts about the incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// URL scheme the request arrived on (`https` or `http`).
    pub scheme: String,
    /// Host and optional port.
    pub host: String,
}

impl RequestContext {
    #[must_use]
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    /// Shorthand for an `https` request.
    #[must_use]
    pub fn https(host: impl Into<String>) -> Self {
        Self::new("https", host)
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("https")
    }

    /// Returns `scheme://host`.
    #[must_use]
    pub fn base_uri(&self) -> String {
        format!("{}://{}", self.scheme.to_ascii_lowercase(), self.host)
    }
}

/// The endpoints served by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Authorize,
    Token,
    FormPost,
    Validation,
}

/// Embeddable OpenID Connect authorization server.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct OpenIdConnectServer {
    config: Arc<ServerConfig>,
    clock: Arc<dyn Clock>,
    claims_mapper: Arc<dyn ClaimsMapper>,
    provider: Arc<dyn ServerProvider>,
    code_provider: Arc<dyn TokenProvider>,
    access_token_provider: Arc<dyn TokenProvider>,
    refresh_token_provider: Option<Arc<dyn TokenProvider>>,
    code_store: Option<Arc<dyn CodeStore>>,
    signing: Option<SigningService>,
}

impl std::fmt::Debug for OpenIdConnectServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenIdConnectServer")
            .field("config", &self.config)
            .field("signing", &self.signing)
            .finish_non_exhaustive()
    }
}

impl OpenIdConnectServer {
    /// Starts building a server.
    #[must_use]
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Maps a request path to the endpoint configured for it.
    #[must_use]
    pub fn match_endpoint(&self, path: &str) -> Option<Endpoint> {
        let endpoints = &self.config.endpoints;
        let path = path.split(['?', '#']).next().unwrap_or_default();
        if path == endpoints.authorize {
            Some(Endpoint::Authorize)
        } else if path == endpoints.token {
            Some(Endpoint::Token)
        } else if path == endpoints.form_post {
            Some(Endpoint::FormPost)
        } else if path == endpoints.validation {
            Some(Endpoint::Validation)
        } else {
            None
        }
    }

    /// Returns the issuer for tokens minted for this request.
    ///
    /// Falls back to `scheme://host` when no issuer is configured.
    #[must_use]
    pub fn issuer(&self, ctx: &RequestContext) -> String {
        match self.config.issuer {
            Some(ref issuer) => issuer.clone(),
            None => ctx.base_uri(),
        }
    }

    /// Returns the public signing keys, empty when there are none to publish.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.signing
            .as_ref()
            .map(SigningService::jwks)
            .unwrap_or_default()
    }

    /// Returns the signing service, if ID tokens can be issued.
    #[must_use]
    pub fn signing_service(&self) -> Option<&SigningService> {
        self.signing.as_ref()
    }

    /// Returns `true` if a refresh token provider is configured.
    #[must_use]
    pub fn issues_refresh_tokens(&self) -> bool {
        self.refresh_token_provider.is_some()
    }

    /// Removes expired entries from the built-in code store.
    ///
    /// Returns 0 when the host supplied its own code provider.
    pub async fn purge_expired_codes(&self) -> AuthResult<u64> {
        match self.code_store {
            Some(ref store) => store.purge_expired(self.clock.now()).await,
            None => Ok(0),
        }
    }

    /// Spawns a task that purges expired codes every `every`.
    pub fn spawn_code_purge_task(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = server.purge_expired_codes().await {
                    tracing::error!(error = %e, "Authorization code purge failed");
                }
            }
        })
    }

    /// Rejects plain-HTTP requests unless insecure HTTP is allowed.
    fn check_transport(&self, ctx: &RequestContext) -> AuthResult<()> {
        if !ctx.is_secure() && !self.config.allow_insecure_http {
            return Err(AuthError::invalid_request(
                "This server only accepts HTTPS requests",
            ));
        }
        Ok(())
    }
}

/// Builder for [`OpenIdConnectServer`].
///
/// Collaborators left unset get their defaults: system clock, OS random
/// source, identity claims mapper, [`DefaultServerProvider`], in-memory code
/// store and AES-GCM protected providers keyed by the ticket secret.
#[must_use]
pub struct ServerBuilder {
    config: ServerConfig,
    clock: Arc<dyn Clock>,
    random: Arc<dyn SecureRandom>,
    claims_mapper: Arc<dyn ClaimsMapper>,
    provider: Arc<dyn ServerProvider>,
    ticket_secret: Option<Vec<u8>>,
    code_store: Option<Arc<dyn CodeStore>>,
    code_provider: Option<Arc<dyn TokenProvider>>,
    access_token_provider: Option<Arc<dyn TokenProvider>>,
    refresh_token_provider: Option<Arc<dyn TokenProvider>>,
    refresh_tokens: bool,
    signing_credentials: Option<SigningCredentials>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            random: Arc::new(OsSecureRandom),
            claims_mapper: Arc::new(IdentityClaimsMapper),
            provider: Arc::new(DefaultServerProvider),
            ticket_secret: None,
            code_store: None,
            code_provider: None,
            access_token_provider: None,
            refresh_token_provider: None,
            refresh_tokens: false,
            signing_credentials: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_random(mut self, random: Arc<dyn SecureRandom>) -> Self {
        self.random = random;
        self
    }

    pub fn with_claims_mapper(mut self, mapper: Arc<dyn ClaimsMapper>) -> Self {
        self.claims_mapper = mapper;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ServerProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Secret the default providers derive their ticket keys from.
    pub fn with_ticket_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.ticket_secret = Some(secret.into());
        self
    }

    /// Store used by the default authorization code provider.
    pub fn with_code_store(mut self, store: Arc<dyn CodeStore>) -> Self {
        self.code_store = Some(store);
        self
    }

    pub fn with_code_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.code_provider = Some(provider);
        self
    }

    pub fn with_access_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.access_token_provider = Some(provider);
        self
    }

    /// Issues refresh tokens through the given provider.
    pub fn with_refresh_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.refresh_token_provider = Some(provider);
        self
    }

    /// Issues refresh tokens through the default provider.
    pub fn with_refresh_tokens(mut self) -> Self {
        self.refresh_tokens = true;
        self
    }

    pub fn with_signing_credentials(mut self, credentials: SigningCredentials) -> Self {
        self.signing_credentials = Some(credentials);
        self
    }

    /// Validates the configuration and assembles the server.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if:
    /// - The configuration fails [`ServerConfig::validate`]
    /// - ID tokens are enabled without signing credentials
    /// - A default provider is needed but no ticket secret was given
    /// - A custom provider handles the wrong ticket stage
    pub fn build(self) -> AuthResult<OpenIdConnectServer> {
        self.config.validate()?;

        if self.config.id_tokens_enabled && self.signing_credentials.is_none() {
            return Err(ConfigError::Missing(
                "signing credentials (required while ID tokens are enabled)".to_string(),
            )
            .into());
        }

        let codec = |purpose: TicketStage| -> AuthResult<Arc<AesGcmTicketCodec>> {
            let secret = self.ticket_secret.as_deref().ok_or_else(|| {
                AuthError::from(ConfigError::Missing(format!(
                    "ticket secret (required by the default {} provider)",
                    purpose
                )))
            })?;
            Ok(Arc::new(
                AesGcmTicketCodec::new(secret, purpose.as_str()).with_random(self.random.clone()),
            ))
        };

        let mut code_store = None;
        let code_provider: Arc<dyn TokenProvider> = match self.code_provider {
            Some(ref provider) => provider.clone(),
            None => {
                let store = self
                    .code_store
                    .clone()
                    .unwrap_or_else(|| Arc::new(InMemoryCodeStore::new()));
                code_store = Some(store.clone());
                Arc::new(AuthorizationCodeProvider::new(
                    codec(TicketStage::AuthorizationCode)?,
                    store,
                    self.clock.clone(),
                    self.random.clone(),
                    self.config.authorization_code_lifetime,
                ))
            }
        };

        let access_token_provider: Arc<dyn TokenProvider> = match self.access_token_provider {
            Some(ref provider) => provider.clone(),
            None => Arc::new(ProtectedTokenProvider::new(
                TicketStage::AccessToken,
                codec(TicketStage::AccessToken)?,
                self.clock.clone(),
                Some(self.config.access_token_lifetime),
            )),
        };

        let refresh_token_provider: Option<Arc<dyn TokenProvider>> =
            match self.refresh_token_provider {
                Some(ref provider) => Some(provider.clone()),
                None if self.refresh_tokens => Some(Arc::new(ProtectedTokenProvider::new(
                    TicketStage::RefreshToken,
                    codec(TicketStage::RefreshToken)?,
                    self.clock.clone(),
                    self.config.refresh_token_lifetime,
                ))),
                None => None,
            };

        for (provider, expected) in [
            (Some(&code_provider), TicketStage::AuthorizationCode),
            (Some(&access_token_provider), TicketStage::AccessToken),
            (refresh_token_provider.as_ref(), TicketStage::RefreshToken),
        ] {
            if let Some(provider) = provider
                && provider.stage() != expected
            {
                return Err(AuthError::configuration(format!(
                    "{} provider handles {} tickets",
                    expected,
                    provider.stage()
                )));
            }
        }

        let signing = self.signing_credentials.map(SigningService::new);

        tracing::info!(
            issuer = self.config.issuer.as_deref().unwrap_or("<request host>"),
            id_tokens = signing.is_some() && self.config.id_tokens_enabled,
            refresh_tokens = refresh_token_provider.is_some(),
            "OpenID Connect server configured"
        );

        Ok(OpenIdConnectServer {
            config: Arc::new(self.config),
            clock: self.clock,
            claims_mapper: self.claims_mapper,
            provider: self.provider,
            code_provider,
            access_token_provider,
            refresh_token_provider,
            code_store,
            signing,
        })
    }
}

/// Echoes `state` from the request into an outbound message.
fn with_state(mut message: OpenIdConnectMessage, request: &OpenIdConnectMessage) -> OpenIdConnectMessage {
    if let Some(state) = request.state() {
        message.set(crate::message::parameters::STATE, state);
    }
    message
}
