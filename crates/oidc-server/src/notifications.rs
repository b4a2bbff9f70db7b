//! Host extension points.
//!
//! The server calls into a [`ServerProvider`] at fixed points of each flow.
//! Every hook receives a mutable context, inspects the request and marks the
//! context validated or rejected. A rejection carries the error returned to
//! the client and short-circuits the flow.
//!
//! | hook | flow | left pending |
//! |---|---|---|
//! | `validate_client_redirect_uri` | authorization | client rejected |
//! | `validate_authorization_request` | authorization | accepted |
//! | `authorize_endpoint` | authorization | consent deferred to host UI |
//! | `validate_client_authentication` | token | public client |
//! | `token_endpoint` | token | accepted |
//! | `grant_custom_extension` | token | `unsupported_grant_type` |
//! | `validation_endpoint` | validation | accepted |

use async_trait::async_trait;

use crate::AuthResult;
use crate::error::ErrorResponse;
use crate::message::OpenIdConnectMessage;
use crate::ticket::{AuthenticationProperties, AuthenticationTicket, Claim};

/// Validation state of a hook context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Validation {
    /// The hook made no decision.
    #[default]
    Pending,
    /// The hook accepted the request.
    Validated,
    /// The hook rejected the request with this error.
    Rejected(ErrorResponse),
}

macro_rules! validation_methods {
    ($context:ty) => {
        impl $context {
            /// Marks the request as accepted.
            pub fn validate(&mut self) {
                self.validation = Validation::Validated;
            }

            /// Rejects the request with an error code and optional description.
            pub fn reject(&mut self, error: impl Into<String>, description: Option<&str>) {
                let mut response = ErrorResponse::new(error);
                response.error_description = description.map(str::to_string);
                self.validation = Validation::Rejected(response);
            }

            /// Rejects the request with a complete error response.
            pub fn reject_with(&mut self, response: ErrorResponse) {
                self.validation = Validation::Rejected(response);
            }

            #[must_use]
            pub fn validation(&self) -> &Validation {
                &self.validation
            }

            #[must_use]
            pub fn is_validated(&self) -> bool {
                self.validation == Validation::Validated
            }

            #[must_use]
            pub fn is_rejected(&self) -> bool {
                matches!(self.validation, Validation::Rejected(_))
            }
        }
    };
}

// ============================================================================
// Authorization endpoint contexts
// ============================================================================

/// Context for validating the client and its redirect URI.
#[derive(Debug, Clone)]
pub struct ValidateClientRedirectUriContext {
    /// The authorization request.
    pub request: OpenIdConnectMessage,
    /// The requesting client.
    pub client_id: String,
    /// The redirect URI from the request, or the one set by the hook.
    pub redirect_uri: Option<String>,
    validation: Validation,
}

impl ValidateClientRedirectUriContext {
    #[must_use]
    pub fn new(request: OpenIdConnectMessage, client_id: String) -> Self {
        let redirect_uri = request.redirect_uri().map(str::to_string);
        Self {
            request,
            client_id,
            redirect_uri,
            validation: Validation::Pending,
        }
    }

    /// Accepts the client and replaces the redirect URI.
    ///
    /// Used when the request carried no `redirect_uri` and the host supplies
    /// the registered one.
    pub fn validate_with(&mut self, redirect_uri: impl Into<String>) {
        self.redirect_uri = Some(redirect_uri.into());
        self.validation = Validation::Validated;
    }
}

validation_methods!(ValidateClientRedirectUriContext);

/// Context for validating the rest of an authorization request (scopes,
/// prompts, custom parameters).
#[derive(Debug, Clone)]
pub struct ValidateAuthorizationRequestContext {
    pub request: OpenIdConnectMessage,
    pub client_id: String,
    pub redirect_uri: String,
    validation: Validation,
}

impl ValidateAuthorizationRequestContext {
    #[must_use]
    pub fn new(request: OpenIdConnectMessage, client_id: String, redirect_uri: String) -> Self {
        Self {
            request,
            client_id,
            redirect_uri,
            validation: Validation::Pending,
        }
    }
}

validation_methods!(ValidateAuthorizationRequestContext);

/// The consent decision recorded by [`ServerProvider::authorize_endpoint`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConsentDecision {
    /// No decision yet; the host shows its consent UI.
    #[default]
    Undecided,
    /// The grant is approved with these claims.
    Approved(Vec<Claim>),
    /// The grant is denied.
    Denied(ErrorResponse),
}

/// Context for the consent step.
#[derive(Debug, Clone)]
pub struct AuthorizeEndpointContext {
    pub request: OpenIdConnectMessage,
    pub client_id: String,
    pub redirect_uri: String,
    decision: ConsentDecision,
}

impl AuthorizeEndpointContext {
    #[must_use]
    pub fn new(request: OpenIdConnectMessage, client_id: String, redirect_uri: String) -> Self {
        Self {
            request,
            client_id,
            redirect_uri,
            decision: ConsentDecision::Undecided,
        }
    }

    /// Approves the grant for a principal with the given claims.
    pub fn approve(&mut self, claims: Vec<Claim>) {
        self.decision = ConsentDecision::Approved(claims);
    }

    /// Denies the grant with `access_denied`.
    pub fn deny(&mut self, description: Option<&str>) {
        let mut response = ErrorResponse::new("access_denied");
        response.error_description = description.map(str::to_string);
        self.decision = ConsentDecision::Denied(response);
    }

    /// Denies the grant with a custom error.
    pub fn deny_with(&mut self, response: ErrorResponse) {
        self.decision = ConsentDecision::Denied(response);
    }

    #[must_use]
    pub fn decision(&self) -> &ConsentDecision {
        &self.decision
    }

    pub(crate) fn into_decision(self) -> ConsentDecision {
        self.decision
    }
}

// ============================================================================
// Token endpoint contexts
// ============================================================================

/// Context for authenticating the client at the token endpoint.
///
/// Leaving the context pending treats the caller as a public client
/// identified by the `client_id` parameter.
#[derive(Debug, Clone)]
pub struct ValidateClientAuthenticationContext {
    pub request: OpenIdConnectMessage,
    /// Client identifier presented in the request body.
    pub client_id: Option<String>,
    /// Client secret presented in the request body.
    pub client_secret: Option<String>,
    validation: Validation,
}

impl ValidateClientAuthenticationContext {
    #[must_use]
    pub fn new(request: OpenIdConnectMessage) -> Self {
        let client_id = request.client_id().map(str::to_string);
        let client_secret = request
            .get(crate::message::parameters::CLIENT_SECRET)
            .map(str::to_string);
        Self {
            request,
            client_id,
            client_secret,
            validation: Validation::Pending,
        }
    }

    /// Accepts the client under the given identifier.
    ///
    /// Used when credentials came from elsewhere (for example an
    /// `Authorization` header parsed by the host).
    pub fn validate_with(&mut self, client_id: impl Into<String>) {
        self.client_id = Some(client_id.into());
        self.validation = Validation::Validated;
    }
}

validation_methods!(ValidateClientAuthenticationContext);

/// Context for vetoing or annotating a token response.
///
/// The ticket holds the mapped claims and the properties carried over from
/// the grant. It becomes the access token, and its claims also go into the
/// ID token. Refresh tokens keep the unmapped principal.
#[derive(Debug, Clone)]
pub struct TokenEndpointContext {
    pub request: OpenIdConnectMessage,
    pub grant_type: String,
    pub client_id: String,
    pub ticket: AuthenticationTicket,
    validation: Validation,
}

impl TokenEndpointContext {
    #[must_use]
    pub fn new(
        request: OpenIdConnectMessage,
        grant_type: String,
        client_id: String,
        ticket: AuthenticationTicket,
    ) -> Self {
        Self {
            request,
            grant_type,
            client_id,
            ticket,
            validation: Validation::Pending,
        }
    }

    /// Denies the request with `access_denied`.
    pub fn deny(&mut self, description: Option<&str>) {
        self.reject("access_denied", description);
    }
}

validation_methods!(TokenEndpointContext);

/// Context for grant types the server does not know.
#[derive(Debug, Clone)]
pub struct CustomGrantContext {
    pub request: OpenIdConnectMessage,
    pub grant_type: String,
    pub client_id: String,
    ticket: Option<(Vec<Claim>, AuthenticationProperties)>,
    validation: Validation,
}

impl CustomGrantContext {
    #[must_use]
    pub fn new(request: OpenIdConnectMessage, grant_type: String, client_id: String) -> Self {
        Self {
            request,
            grant_type,
            client_id,
            ticket: None,
            validation: Validation::Pending,
        }
    }

    /// Accepts the grant for a principal with the given claims.
    pub fn validate_with(&mut self, claims: Vec<Claim>, properties: AuthenticationProperties) {
        self.ticket = Some((claims, properties));
        self.validation = Validation::Validated;
    }

    pub(crate) fn into_ticket(self) -> Option<(Vec<Claim>, AuthenticationProperties)> {
        self.ticket
    }
}

validation_methods!(CustomGrantContext);

// ============================================================================
// Validation endpoint context
// ============================================================================

/// Context for the token validation endpoint.
///
/// `claims` starts as the access token's claims; whatever it holds after the
/// hook is returned to the caller.
#[derive(Debug, Clone)]
pub struct ValidationEndpointContext {
    pub request: OpenIdConnectMessage,
    pub ticket: AuthenticationTicket,
    pub claims: Vec<Claim>,
    validation: Validation,
}

impl ValidationEndpointContext {
    #[must_use]
    pub fn new(request: OpenIdConnectMessage, ticket: AuthenticationTicket) -> Self {
        let claims = ticket.claims.clone();
        Self {
            request,
            ticket,
            claims,
            validation: Validation::Pending,
        }
    }
}

validation_methods!(ValidationEndpointContext);

// ============================================================================
// Provider trait
// ============================================================================

/// Host hooks invoked by the server.
///
/// Every method has a default, so implementations override only the
/// points they care about. Returning `Err` aborts the request with a
/// `server_error`; protocol rejections go through the context instead.
///
/// # Example
///
/// ```ignore
/// struct MyProvider;
///
/// #[async_trait::async_trait]
/// impl ServerProvider for MyProvider {
///     async fn validate_client_redirect_uri(
///         &self,
///         ctx: &mut ValidateClientRedirectUriContext,
///     ) -> AuthResult<()> {
///         if ctx.client_id == "abc" {
///             ctx.validate_with("https://client.example/cb");
///         } else {
///             ctx.reject("invalid_client", Some("Unknown client"));
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ServerProvider: Send + Sync {
    /// Validates the client and its redirect URI.
    ///
    /// A client left pending is rejected; the error is shown to the
    /// user-agent since the redirect URI cannot be trusted.
    async fn validate_client_redirect_uri(
        &self,
        _ctx: &mut ValidateClientRedirectUriContext,
    ) -> AuthResult<()> {
        Ok(())
    }

    /// Validates scopes and other request parameters.
    async fn validate_authorization_request(
        &self,
        _ctx: &mut ValidateAuthorizationRequestContext,
    ) -> AuthResult<()> {
        Ok(())
    }

    /// Decides consent.
    ///
    /// Leaving the decision undecided defers it: the server returns
    /// `ConsentRequired` and the host completes it later.
    async fn authorize_endpoint(&self, _ctx: &mut AuthorizeEndpointContext) -> AuthResult<()> {
        Ok(())
    }

    /// Authenticates the client at the token endpoint.
    async fn validate_client_authentication(
        &self,
        _ctx: &mut ValidateClientAuthenticationContext,
    ) -> AuthResult<()> {
        Ok(())
    }

    /// Vetoes or annotates a token response.
    async fn token_endpoint(&self, _ctx: &mut TokenEndpointContext) -> AuthResult<()> {
        Ok(())
    }

    /// Handles grant types other than `authorization_code` and
    /// `refresh_token`.
    async fn grant_custom_extension(&self, _ctx: &mut CustomGrantContext) -> AuthResult<()> {
        Ok(())
    }

    /// Inspects a validated access token and adjusts the returned claims.
    async fn validation_endpoint(&self, _ctx: &mut ValidationEndpointContext) -> AuthResult<()> {
        Ok(())
    }
}

/// Provider that keeps every default.
///
/// No client passes redirect URI validation, so a server built with it
/// rejects every authorization request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultServerProvider;

#[async_trait]
impl ServerProvider for DefaultServerProvider {}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OpenIdConnectMessage {
        OpenIdConnectMessage::from_query(
            "client_id=abc&redirect_uri=https%3A%2F%2Fclient.example%2Fcb",
        )
    }

    #[test]
    fn test_redirect_context_starts_pending() {
        let ctx = ValidateClientRedirectUriContext::new(request(), "abc".to_string());
        assert_eq!(ctx.validation(), &Validation::Pending);
        assert_eq!(ctx.redirect_uri.as_deref(), Some("https://client.example/cb"));
    }

    #[test]
    fn test_validate_with_rewrites_redirect_uri() {
        let mut ctx = ValidateClientRedirectUriContext::new(request(), "abc".to_string());
        ctx.validate_with("https://client.example/other");
        assert!(ctx.is_validated());
        assert_eq!(ctx.redirect_uri.as_deref(), Some("https://client.example/other"));
    }

    #[test]
    fn test_reject() {
        let mut ctx = ValidateClientAuthenticationContext::new(request());
        ctx.reject("invalid_client", Some("bad secret"));
        assert!(ctx.is_rejected());
        assert_eq!(
            ctx.validation(),
            &Validation::Rejected(
                ErrorResponse::new("invalid_client").with_description("bad secret")
            )
        );
    }

    #[test]
    fn test_consent_decisions() {
        let mut ctx = AuthorizeEndpointContext::new(
            request(),
            "abc".to_string(),
            "https://client.example/cb".to_string(),
        );
        assert_eq!(ctx.decision(), &ConsentDecision::Undecided);

        ctx.approve(vec![Claim::new("sub", "alice")]);
        assert!(matches!(ctx.decision(), ConsentDecision::Approved(c) if c.len() == 1));

        ctx.deny(None);
        assert_eq!(
            ctx.decision(),
            &ConsentDecision::Denied(ErrorResponse::new("access_denied"))
        );
    }

    #[test]
    fn test_validation_context_copies_claims() {
        let ticket = AuthenticationTicket::new(
            crate::ticket::TicketStage::AccessToken,
            vec![Claim::new("sub", "alice")],
            AuthenticationProperties::new(),
        );
        let ctx = ValidationEndpointContext::new(OpenIdConnectMessage::new(), ticket);
        assert_eq!(ctx.claims, vec![Claim::new("sub", "alice")]);
    }

    #[tokio::test]
    async fn test_default_provider_leaves_client_pending() {
        let mut ctx = ValidateClientRedirectUriContext::new(request(), "abc".to_string());
        DefaultServerProvider
            .validate_client_redirect_uri(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.validation(), &Validation::Pending);
    }
}
