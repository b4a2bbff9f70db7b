//! Authorization endpoint.
//!
//! Validates the request, asks the host for consent through the
//! [`ServerProvider`](crate::notifications::ServerProvider) hooks and issues
//! an authorization code.
//!
//! Errors found before the redirect URI is trusted are shown to the
//! user-agent ([`AuthorizationOutcome::DisplayError`]); later errors are
//! sent back to the client through the redirect.

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::{AuthError, ErrorResponse};
use crate::message::{OpenIdConnectMessage, ResponseMode, parameters};
use crate::notifications::{
    AuthorizeEndpointContext, ConsentDecision, ValidateAuthorizationRequestContext,
    ValidateClientRedirectUriContext, Validation,
};
use crate::server::render::{render_error_page, render_form_post};
use crate::server::{OpenIdConnectServer, RequestContext, with_state};
use crate::ticket::{AuthenticationProperties, AuthenticationTicket, Claim, TicketStage, properties};

/// Result of an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    /// Send the user-agent back to the client.
    Redirect(AuthorizationRedirect),
    /// Show an error to the user-agent; the client cannot be trusted.
    DisplayError(DisplayError),
    /// The host must collect consent, then call
    /// [`OpenIdConnectServer::complete_authorization`] or
    /// [`OpenIdConnectServer::deny_authorization`].
    ConsentRequired(PendingAuthorization),
}

/// A response delivered through the client's redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRedirect {
    pub redirect_uri: String,
    pub response_mode: ResponseMode,
    /// The response parameters (`code` and `state`, or the error).
    pub parameters: OpenIdConnectMessage,
    /// Target of a `302` for the `query` and `fragment` modes.
    pub location: Option<String>,
    /// Auto-submitting form for `form_post` when the default form is on.
    pub body: Option<String>,
}

impl AuthorizationRedirect {
    /// Returns `true` if this redirect carries an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.parameters.is_error()
    }
}

/// An error shown directly to the user-agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayError {
    pub error: ErrorResponse,
    pub status: u16,
    /// Default error page, absent when the application renders errors.
    pub body: Option<String>,
}

/// A validated authorization request waiting for the host's consent UI.
///
/// Serializable so the host can park it in a session between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub request: OpenIdConnectMessage,
    pub client_id: String,
    pub redirect_uri: String,
    pub response_mode: ResponseMode,
}

impl OpenIdConnectServer {
    /// Handles an authorization request.
    ///
    /// # Errors
    ///
    /// Only server-side failures (hook errors, storage, ticket protection)
    /// are returned as `Err`; protocol errors are part of the outcome.
    pub async fn authorize(
        &self,
        request: &OpenIdConnectMessage,
        ctx: &RequestContext,
    ) -> AuthResult<AuthorizationOutcome> {
        if let Err(e) = self.check_transport(ctx) {
            return Ok(self.display_error(e.to_error_response()));
        }

        match request.response_type() {
            Some(response_type) if self.config.supports_response_type(response_type) => {}
            response_type => {
                tracing::debug!(response_type = ?response_type, "Unsupported response type");
                return Ok(self.display_error(
                    AuthError::unsupported_response_type(response_type.unwrap_or_default())
                        .to_error_response(),
                ));
            }
        }

        let Some(client_id) = request.client_id() else {
            return Ok(self.display_invalid_request("The mandatory 'client_id' parameter is missing"));
        };

        if let Some(redirect_uri) = request.redirect_uri()
            && let Err(description) = self.check_redirect_uri(redirect_uri)
        {
            return Ok(self.display_invalid_request(description));
        }

        let response_mode = match request.response_mode() {
            None => ResponseMode::default(),
            Some(mode) => match ResponseMode::parse(mode) {
                Some(mode) => mode,
                None => {
                    return Ok(self.display_invalid_request(
                        "The specified 'response_mode' parameter is not supported",
                    ));
                }
            },
        };

        let mut client_ctx =
            ValidateClientRedirectUriContext::new(request.clone(), client_id.to_string());
        self.provider
            .validate_client_redirect_uri(&mut client_ctx)
            .await?;
        let validation = client_ctx.validation().clone();
        let redirect_uri = match validation {
            Validation::Pending => {
                tracing::warn!(client_id = %client_id, "Client or redirect URI not validated");
                return Ok(self.display_error(
                    AuthError::invalid_client("The client application is not authorized")
                        .to_error_response(),
                ));
            }
            Validation::Rejected(error) => {
                tracing::warn!(client_id = %client_id, error = %error, "Client rejected");
                return Ok(self.display_error(error));
            }
            Validation::Validated => match client_ctx.redirect_uri {
                Some(uri) => uri,
                None => {
                    return Ok(self.display_invalid_request(
                        "The mandatory 'redirect_uri' parameter is missing",
                    ));
                }
            },
        };

        // The hook may have supplied the registered URI.
        if let Err(description) = self.check_redirect_uri(&redirect_uri) {
            return Ok(self.display_invalid_request(description));
        }

        let pending = PendingAuthorization {
            request: request.clone(),
            client_id: client_id.to_string(),
            redirect_uri,
            response_mode,
        };

        let mut request_ctx = ValidateAuthorizationRequestContext::new(
            request.clone(),
            pending.client_id.clone(),
            pending.redirect_uri.clone(),
        );
        self.provider
            .validate_authorization_request(&mut request_ctx)
            .await?;
        if let Validation::Rejected(error) = request_ctx.validation() {
            tracing::debug!(client_id = %client_id, error = %error, "Authorization request rejected");
            return self.redirect_error(&pending, error.clone());
        }

        let mut consent_ctx = AuthorizeEndpointContext::new(
            request.clone(),
            pending.client_id.clone(),
            pending.redirect_uri.clone(),
        );
        self.provider.authorize_endpoint(&mut consent_ctx).await?;
        match consent_ctx.into_decision() {
            ConsentDecision::Approved(claims) => self.issue_code(&pending, claims).await,
            ConsentDecision::Denied(error) => self.deny_authorization(&pending, Some(error)),
            ConsentDecision::Undecided => Ok(AuthorizationOutcome::ConsentRequired(pending)),
        }
    }

    /// Completes a deferred authorization with the approved claims.
    pub async fn complete_authorization(
        &self,
        pending: &PendingAuthorization,
        claims: Vec<Claim>,
    ) -> AuthResult<AuthorizationOutcome> {
        self.issue_code(pending, claims).await
    }

    /// Denies an authorization, with `access_denied` unless an error is given.
    ///
    /// The error is rendered to the user-agent when the application displays
    /// errors itself; otherwise it is redirected to the client.
    pub fn deny_authorization(
        &self,
        pending: &PendingAuthorization,
        error: Option<ErrorResponse>,
    ) -> AuthResult<AuthorizationOutcome> {
        let error = error.unwrap_or_else(|| {
            ErrorResponse::new("access_denied").with_description("The authorization was denied")
        });
        tracing::debug!(client_id = %pending.client_id, error = %error, "Authorization denied");

        if self.config.application_can_display_errors {
            return Ok(self.display_error(error));
        }
        self.redirect_error(pending, error)
    }

    async fn issue_code(
        &self,
        pending: &PendingAuthorization,
        claims: Vec<Claim>,
    ) -> AuthResult<AuthorizationOutcome> {
        let request = &pending.request;
        let mut props = AuthenticationProperties::new();
        props.set(properties::CLIENT_ID, &pending.client_id);
        props.set(properties::REDIRECT_URI, &pending.redirect_uri);
        props.set_opt(properties::SCOPE, request.scope());
        props.set_opt(properties::NONCE, request.nonce());
        props.set_opt(properties::RESPONSE_TYPE, request.response_type());
        props.set_opt(
            properties::CODE_CHALLENGE,
            request.get(parameters::CODE_CHALLENGE),
        );
        props.set_opt(
            properties::CODE_CHALLENGE_METHOD,
            request.get(parameters::CODE_CHALLENGE_METHOD),
        );
        props.stamp(self.clock.now(), self.code_provider.lifetime())?;

        let ticket = AuthenticationTicket::new(TicketStage::AuthorizationCode, claims, props);
        let code = self.code_provider.create(&ticket).await?;

        tracing::debug!(client_id = %pending.client_id, "Authorization code issued");

        let mut response = OpenIdConnectMessage::new();
        response.set(parameters::CODE, code);
        self.redirect(pending, with_state(response, request))
    }

    fn redirect_error(
        &self,
        pending: &PendingAuthorization,
        error: ErrorResponse,
    ) -> AuthResult<AuthorizationOutcome> {
        self.redirect(pending, error.to_message(pending.request.state()))
    }

    fn redirect(
        &self,
        pending: &PendingAuthorization,
        parameters: OpenIdConnectMessage,
    ) -> AuthResult<AuthorizationOutcome> {
        let (location, body) = match pending.response_mode {
            ResponseMode::FormPost => {
                let body = self
                    .config
                    .use_default_form
                    .then(|| render_form_post(&pending.redirect_uri, &parameters));
                (None, body)
            }
            mode => {
                let location = parameters
                    .to_redirect_url(&pending.redirect_uri, mode)
                    .map_err(|e| AuthError::internal(format!("Invalid redirect URI: {}", e)))?;
                (Some(location), None)
            }
        };

        Ok(AuthorizationOutcome::Redirect(AuthorizationRedirect {
            redirect_uri: pending.redirect_uri.clone(),
            response_mode: pending.response_mode,
            parameters,
            location,
            body,
        }))
    }

    fn display_invalid_request(&self, description: &str) -> AuthorizationOutcome {
        self.display_error(AuthError::invalid_request(description).to_error_response())
    }

    fn display_error(&self, error: ErrorResponse) -> AuthorizationOutcome {
        let body = (!self.config.application_can_display_errors).then(|| render_error_page(&error));
        AuthorizationOutcome::DisplayError(DisplayError {
            status: error.http_status(),
            error,
            body,
        })
    }

    fn check_redirect_uri(&self, redirect_uri: &str) -> Result<(), &'static str> {
        let url = url::Url::parse(redirect_uri)
            .map_err(|_| "The 'redirect_uri' parameter must be an absolute URL")?;
        if url.fragment().is_some() {
            return Err("The 'redirect_uri' parameter must not include a fragment");
        }
        match url.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_insecure_http => Ok(()),
            "http" => Err("The 'redirect_uri' parameter must use HTTPS"),
            // Native clients register custom schemes.
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::config::ServerConfig;
    use crate::notifications::ServerProvider;
    use crate::token::SigningCredentials;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    struct TestProvider {
        approve: bool,
    }

    #[async_trait]
    impl ServerProvider for TestProvider {
        async fn validate_client_redirect_uri(
            &self,
            ctx: &mut ValidateClientRedirectUriContext,
        ) -> AuthResult<()> {
            match ctx.client_id.as_str() {
                "abc" => {
                    let uri = ctx
                        .redirect_uri
                        .clone()
                        .unwrap_or_else(|| "https://client.example/cb".to_string());
                    ctx.validate_with(uri);
                }
                "evil" => ctx.reject("unauthorized_client", Some("Blocked")),
                _ => {}
            }
            Ok(())
        }

        async fn authorize_endpoint(&self, ctx: &mut AuthorizeEndpointContext) -> AuthResult<()> {
            if self.approve {
                ctx.approve(vec![Claim::new("sub", "alice")]);
            }
            Ok(())
        }
    }

    fn server(config: ServerConfig, approve: bool) -> OpenIdConnectServer {
        OpenIdConnectServer::builder(config)
            .with_provider(Arc::new(TestProvider { approve }))
            .with_ticket_secret(SECRET)
            .with_signing_credentials(SigningCredentials::from_secret("k1", SECRET).unwrap())
            .build()
            .unwrap()
    }

    fn request(query: &str) -> OpenIdConnectMessage {
        OpenIdConnectMessage::from_query(query)
    }

    fn ctx() -> RequestContext {
        RequestContext::https("auth.example.com")
    }

    #[tokio::test]
    async fn test_code_redirect_with_state() {
        let server = server(ServerConfig::default(), true);
        let outcome = server
            .authorize(
                &request("response_type=code&client_id=abc&redirect_uri=https%3A%2F%2Fclient.example%2Fcb&state=xyz"),
                &ctx(),
            )
            .await
            .unwrap();

        let AuthorizationOutcome::Redirect(redirect) = outcome else {
            panic!("expected redirect, got {:?}", outcome);
        };
        assert!(!redirect.is_error());
        assert_eq!(redirect.parameters.get("state"), Some("xyz"));
        assert_eq!(redirect.parameters.code().map(str::len), Some(43));
        let location = redirect.location.unwrap();
        assert!(location.starts_with("https://client.example/cb?code="));
        assert!(location.ends_with("&state=xyz"));
    }

    #[tokio::test]
    async fn test_unsupported_response_type_is_displayed() {
        let server = server(ServerConfig::default(), true);
        for query in [
            "response_type=token&client_id=abc",
            "client_id=abc",
        ] {
            let outcome = server.authorize(&request(query), &ctx()).await.unwrap();
            let AuthorizationOutcome::DisplayError(display) = outcome else {
                panic!("expected display error, got {:?}", outcome);
            };
            assert_eq!(display.error.error, "unsupported_response_type");
            assert_eq!(display.status, 400);
            assert!(display.body.unwrap().contains("unsupported_response_type"));
        }
    }

    #[tokio::test]
    async fn test_missing_client_id() {
        let server = server(ServerConfig::default(), true);
        let outcome = server
            .authorize(&request("response_type=code"), &ctx())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthorizationOutcome::DisplayError(ref d) if d.error.error == "invalid_request"
        ));
    }

    #[tokio::test]
    async fn test_relative_redirect_uri_rejected() {
        let server = server(ServerConfig::default(), true);
        let outcome = server
            .authorize(
                &request("response_type=code&client_id=abc&redirect_uri=%2Fcb"),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthorizationOutcome::DisplayError(ref d) if d.error.error == "invalid_request"
        ));
    }

    #[tokio::test]
    async fn test_insecure_transport_rejected() {
        let server = server(ServerConfig::default(), true);
        let outcome = server
            .authorize(
                &request("response_type=code&client_id=abc"),
                &RequestContext::new("http", "auth.example.com"),
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthorizationOutcome::DisplayError(ref d) if d.error.error == "invalid_request"
        ));
    }

    #[tokio::test]
    async fn test_unknown_response_mode() {
        let server = server(ServerConfig::default(), true);
        let outcome = server
            .authorize(
                &request("response_type=code&client_id=abc&response_mode=jwt"),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthorizationOutcome::DisplayError(ref d) if d.error.error == "invalid_request"
        ));
    }

    #[tokio::test]
    async fn test_unvalidated_client_rejected() {
        let server = server(ServerConfig::default(), true);
        let outcome = server
            .authorize(&request("response_type=code&client_id=unknown"), &ctx())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthorizationOutcome::DisplayError(ref d) if d.error.error == "invalid_client"
        ));
    }

    #[tokio::test]
    async fn test_client_rejection_keeps_custom_code() {
        let server = server(ServerConfig::default(), true);
        let outcome = server
            .authorize(&request("response_type=code&client_id=evil"), &ctx())
            .await
            .unwrap();
        let AuthorizationOutcome::DisplayError(display) = outcome else {
            panic!("expected display error");
        };
        assert_eq!(display.error.error, "unauthorized_client");
        assert_eq!(display.error.error_description.as_deref(), Some("Blocked"));
    }

    #[tokio::test]
    async fn test_application_displays_errors() {
        let server = server(
            ServerConfig {
                application_can_display_errors: true,
                ..Default::default()
            },
            true,
        );
        let outcome = server
            .authorize(&request("response_type=code"), &ctx())
            .await
            .unwrap();
        let AuthorizationOutcome::DisplayError(display) = outcome else {
            panic!("expected display error");
        };
        assert!(display.body.is_none());
    }

    #[tokio::test]
    async fn test_registered_redirect_uri_used_when_absent() {
        let server = server(ServerConfig::default(), true);
        let outcome = server
            .authorize(&request("response_type=code&client_id=abc"), &ctx())
            .await
            .unwrap();
        let AuthorizationOutcome::Redirect(redirect) = outcome else {
            panic!("expected redirect");
        };
        assert_eq!(redirect.redirect_uri, "https://client.example/cb");
    }

    #[tokio::test]
    async fn test_fragment_response_mode() {
        let server = server(ServerConfig::default(), true);
        let outcome = server
            .authorize(
                &request("response_type=code&client_id=abc&response_mode=fragment&state=s1"),
                &ctx(),
            )
            .await
            .unwrap();
        let AuthorizationOutcome::Redirect(redirect) = outcome else {
            panic!("expected redirect");
        };
        assert_eq!(redirect.response_mode, ResponseMode::Fragment);
        assert!(redirect.location.unwrap().starts_with("https://client.example/cb#code="));
    }

    #[tokio::test]
    async fn test_form_post_renders_default_form() {
        let server = server(ServerConfig::default(), true);
        let outcome = server
            .authorize(
                &request("response_type=code&client_id=abc&response_mode=form_post&state=s1"),
                &ctx(),
            )
            .await
            .unwrap();
        let AuthorizationOutcome::Redirect(redirect) = outcome else {
            panic!("expected redirect");
        };
        assert!(redirect.location.is_none());
        let body = redirect.body.unwrap();
        assert!(body.contains("action=\"https://client.example/cb\""));
        assert!(body.contains("name=\"state\" value=\"s1\""));
    }

    #[tokio::test]
    async fn test_form_post_without_default_form() {
        let server = server(
            ServerConfig {
                use_default_form: false,
                ..Default::default()
            },
            true,
        );
        let outcome = server
            .authorize(
                &request("response_type=code&client_id=abc&response_mode=form_post"),
                &ctx(),
            )
            .await
            .unwrap();
        let AuthorizationOutcome::Redirect(redirect) = outcome else {
            panic!("expected redirect");
        };
        assert!(redirect.location.is_none());
        assert!(redirect.body.is_none());
        assert!(redirect.parameters.code().is_some());
    }

    #[tokio::test]
    async fn test_consent_deferred_then_denied() {
        let server = server(ServerConfig::default(), false);
        let outcome = server
            .authorize(&request("response_type=code&client_id=abc&state=s1"), &ctx())
            .await
            .unwrap();
        let AuthorizationOutcome::ConsentRequired(pending) = outcome else {
            panic!("expected consent required");
        };
        assert_eq!(pending.client_id, "abc");
        assert_eq!(pending.redirect_uri, "https://client.example/cb");

        let outcome = server.deny_authorization(&pending, None).unwrap();
        let AuthorizationOutcome::Redirect(redirect) = outcome else {
            panic!("expected redirect");
        };
        assert_eq!(redirect.parameters.error(), Some("access_denied"));
        assert_eq!(redirect.parameters.state(), Some("s1"));
    }

    #[tokio::test]
    async fn test_pending_authorization_survives_serialization() {
        let server = server(ServerConfig::default(), false);
        let outcome = server
            .authorize(&request("response_type=code&client_id=abc"), &ctx())
            .await
            .unwrap();
        let AuthorizationOutcome::ConsentRequired(pending) = outcome else {
            panic!("expected consent required");
        };

        let json = serde_json::to_string(&pending).unwrap();
        let restored: PendingAuthorization = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, pending);

        let outcome = server
            .complete_authorization(&restored, vec![Claim::new("sub", "alice")])
            .await
            .unwrap();
        assert!(matches!(outcome, AuthorizationOutcome::Redirect(ref r) if !r.is_error()));
    }
}
