//! Token endpoint.
//!
//! Redeems authorization codes and refresh tokens (plus host-defined
//! grants) for an access token, an optional refresh token and an optional
//! ID token.

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::claims;
use crate::error::AuthError;
use crate::message::{OpenIdConnectMessage, TOKEN_TYPE_BEARER, grant_types, parameters, scopes};
use crate::notifications::{
    CustomGrantContext, TokenEndpointContext, ValidateClientAuthenticationContext, Validation,
};
use crate::server::{OpenIdConnectServer, RequestContext};
use crate::ticket::{
    AuthenticationProperties, AuthenticationTicket, Claim, TicketStage, expires_after, properties,
};
use crate::token::IdTokenClaims;

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Converts the response into a protocol message.
    #[must_use]
    pub fn to_message(&self) -> OpenIdConnectMessage {
        let mut message = OpenIdConnectMessage::new();
        message.set(parameters::ACCESS_TOKEN, &self.access_token);
        message.set(parameters::TOKEN_TYPE, &self.token_type);
        if let Some(expires_in) = self.expires_in {
            message.set(parameters::EXPIRES_IN, expires_in.to_string());
        }
        if let Some(ref refresh_token) = self.refresh_token {
            message.set(parameters::REFRESH_TOKEN, refresh_token);
        }
        if let Some(ref id_token) = self.id_token {
            message.set(parameters::ID_TOKEN, id_token);
        }
        message
    }
}

/// The principal and properties a grant resolved to.
struct Grant {
    claims: Vec<Claim>,
    properties: AuthenticationProperties,
}

impl OpenIdConnectServer {
    /// Handles a token request.
    ///
    /// # Errors
    ///
    /// Protocol errors come back as `AuthError` client errors; hosts send
    /// `err.to_error_response()` as JSON with `err.http_status()`.
    pub async fn token(
        &self,
        request: &OpenIdConnectMessage,
        ctx: &RequestContext,
    ) -> AuthResult<TokenResponse> {
        self.check_transport(ctx)?;

        let grant_type = request
            .grant_type()
            .ok_or_else(|| AuthError::invalid_request("The mandatory 'grant_type' parameter is missing"))?;

        let client_id = self.authenticate_client(request).await?;

        let result = match grant_type {
            grant_types::AUTHORIZATION_CODE => self.redeem_code(request, &client_id).await,
            grant_types::REFRESH_TOKEN => self.redeem_refresh_token(request, &client_id).await,
            _ => self.custom_grant(request, grant_type, &client_id).await,
        };
        let grant = match result {
            Ok(grant) => grant,
            Err(e) => {
                if e.is_client_error() {
                    tracing::warn!(
                        client_id = %client_id,
                        grant_type = %grant_type,
                        category = %e.category(),
                        error = %e,
                        "Token request rejected"
                    );
                }
                return Err(e);
            }
        };

        self.issue_tokens(request, ctx, grant_type, &client_id, grant).await
    }

    /// Runs the client authentication hook and returns the client identifier.
    async fn authenticate_client(&self, request: &OpenIdConnectMessage) -> AuthResult<String> {
        let mut client_ctx = ValidateClientAuthenticationContext::new(request.clone());
        self.provider
            .validate_client_authentication(&mut client_ctx)
            .await?;

        match client_ctx.validation() {
            Validation::Rejected(error) => {
                tracing::warn!(
                    client_id = ?client_ctx.client_id,
                    error = %error,
                    "Client authentication failed"
                );
                Err(AuthError::Rejected(error.clone()))
            }
            Validation::Validated => client_ctx
                .client_id
                .clone()
                .ok_or_else(|| AuthError::invalid_client("The client could not be identified")),
            // Public client.
            Validation::Pending => request.client_id().map(str::to_string).ok_or_else(|| {
                AuthError::invalid_request("The mandatory 'client_id' parameter is missing")
            }),
        }
    }

    async fn redeem_code(
        &self,
        request: &OpenIdConnectMessage,
        client_id: &str,
    ) -> AuthResult<Grant> {
        let code = request
            .code()
            .ok_or_else(|| AuthError::invalid_request("The mandatory 'code' parameter is missing"))?;

        let ticket = self.code_provider.receive(code).await?;

        if ticket.properties.client_id() != Some(client_id) {
            tracing::warn!(
                target: "oidc_server::security",
                client_id = %client_id,
                "Authorization code presented by another client"
            );
            return Err(AuthError::invalid_grant(
                "The authorization code was issued to another client",
            ));
        }

        if let Some(redirect_uri) = request.redirect_uri()
            && ticket.properties.redirect_uri() != Some(redirect_uri)
        {
            return Err(AuthError::invalid_grant(
                "The 'redirect_uri' parameter does not match the authorization request",
            ));
        }

        Ok(Grant {
            claims: ticket.claims,
            properties: ticket.properties,
        })
    }

    async fn redeem_refresh_token(
        &self,
        request: &OpenIdConnectMessage,
        client_id: &str,
    ) -> AuthResult<Grant> {
        let Some(ref provider) = self.refresh_token_provider else {
            return Err(AuthError::unsupported_grant_type(grant_types::REFRESH_TOKEN));
        };

        let refresh_token = request.refresh_token().ok_or_else(|| {
            AuthError::invalid_request("The mandatory 'refresh_token' parameter is missing")
        })?;

        let ticket = provider.receive(refresh_token).await?;
        if ticket.properties.client_id() != Some(client_id) {
            return Err(AuthError::invalid_grant(
                "The refresh token was issued to another client",
            ));
        }

        Ok(Grant {
            claims: ticket.claims,
            properties: ticket.properties,
        })
    }

    async fn custom_grant(
        &self,
        request: &OpenIdConnectMessage,
        grant_type: &str,
        client_id: &str,
    ) -> AuthResult<Grant> {
        let mut grant_ctx =
            CustomGrantContext::new(request.clone(), grant_type.to_string(), client_id.to_string());
        self.provider.grant_custom_extension(&mut grant_ctx).await?;

        let validation = grant_ctx.validation().clone();
        match validation {
            Validation::Rejected(error) => Err(AuthError::Rejected(error)),
            Validation::Pending => Err(AuthError::unsupported_grant_type(grant_type)),
            Validation::Validated => {
                let (claims, mut props) = grant_ctx
                    .into_ticket()
                    .ok_or_else(|| AuthError::internal("Custom grant validated without a principal"))?;
                if props.client_id().is_none() {
                    props.set(properties::CLIENT_ID, client_id);
                }
                Ok(Grant {
                    claims,
                    properties: props,
                })
            }
        }
    }

    async fn issue_tokens(
        &self,
        request: &OpenIdConnectMessage,
        ctx: &RequestContext,
        grant_type: &str,
        client_id: &str,
        grant: Grant,
    ) -> AuthResult<TokenResponse> {
        let Grant {
            claims: principal,
            properties: props,
        } = grant;

        let mapped = self.claims_mapper.map_claims(principal.clone());
        let access_ticket = AuthenticationTicket::new(TicketStage::AccessToken, mapped, props);

        let mut token_ctx = TokenEndpointContext::new(
            request.clone(),
            grant_type.to_string(),
            client_id.to_string(),
            access_ticket,
        );
        self.provider.token_endpoint(&mut token_ctx).await?;
        if let Validation::Rejected(error) = token_ctx.validation() {
            tracing::warn!(client_id = %client_id, error = %error, "Token request denied by host");
            return Err(AuthError::Rejected(error.clone()));
        }

        let now = self.clock.now();
        let mut access_ticket = token_ctx.ticket;
        access_ticket.stage = TicketStage::AccessToken;
        access_ticket
            .properties
            .stamp(now, self.access_token_provider.lifetime())?;

        let refresh_token = match self.refresh_token_provider {
            Some(ref provider) => {
                let mut refresh_props = access_ticket.properties.clone();
                refresh_props.remove(properties::NONCE);
                refresh_props.stamp(now, provider.lifetime())?;
                let refresh_ticket =
                    AuthenticationTicket::new(TicketStage::RefreshToken, principal.clone(), refresh_props);
                Some(provider.create(&refresh_ticket).await?)
            }
            None => None,
        };

        let id_token = self.issue_id_token(ctx, &principal, &access_ticket, client_id)?;
        let access_token = self.access_token_provider.create(&access_ticket).await?;

        tracing::debug!(
            client_id = %client_id,
            grant_type = %grant_type,
            refresh_token = refresh_token.is_some(),
            id_token = id_token.is_some(),
            "Tokens issued"
        );

        Ok(TokenResponse {
            access_token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: self.access_token_provider.lifetime().map(|l| l.as_secs()),
            refresh_token,
            id_token,
        })
    }

    /// Signs an ID token when the grant asked for `openid` (or the server
    /// always issues one).
    fn issue_id_token(
        &self,
        ctx: &RequestContext,
        principal: &[Claim],
        access_ticket: &AuthenticationTicket,
        client_id: &str,
    ) -> AuthResult<Option<String>> {
        let Some(ref signing) = self.signing else {
            return Ok(None);
        };
        let props = &access_ticket.properties;
        let requested = props.has_scope(scopes::OPENID) || self.config.always_issue_id_token;
        if !self.config.id_tokens_enabled || !requested {
            return Ok(None);
        }

        let subject = claims::subject(principal)
            .or_else(|| claims::subject(&access_ticket.claims))
            .ok_or_else(|| AuthError::internal("The principal has no subject claim"))?;
        let issuer = self.issuer(ctx);
        let issued_at = props.issued_at.unwrap_or_else(|| self.clock.now());

        let id_claims = IdTokenClaims::new(
            issuer,
            client_id,
            subject,
            issued_at,
            expires_after(issued_at, self.config.id_token_lifetime)?,
        )
        .with_nonce(props.nonce())
        .with_claims(&access_ticket.claims);

        Ok(Some(signing.sign(&id_claims)?))
    }
}
