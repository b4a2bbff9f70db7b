//! Token validation endpoint.
//!
//! Lets resource servers that cannot read access tokens themselves ask the
//! authorization server what a token stands for.

use serde::Serialize;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::message::{OpenIdConnectMessage, parameters};
use crate::notifications::{ValidationEndpointContext, Validation};
use crate::server::{OpenIdConnectServer, RequestContext};
use crate::ticket::Claim;

/// What an access token stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<OffsetDateTime>,
    /// Seconds until expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    pub claims: Vec<Claim>,
}

impl OpenIdConnectServer {
    /// Validates the access token in the `token` parameter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when the parameter is missing, `InvalidGrant`
    /// when the token is invalid or expired, and `Rejected` when the host
    /// refuses it.
    pub async fn validate_token(
        &self,
        request: &OpenIdConnectMessage,
        ctx: &RequestContext,
    ) -> AuthResult<ValidationResponse> {
        self.check_transport(ctx)?;

        let token = request
            .get(parameters::TOKEN)
            .ok_or_else(|| AuthError::invalid_request("The mandatory 'token' parameter is missing"))?;

        let ticket = self.access_token_provider.receive(token).await?;

        let mut validation_ctx = ValidationEndpointContext::new(request.clone(), ticket);
        self.provider
            .validation_endpoint(&mut validation_ctx)
            .await?;
        if let Validation::Rejected(error) = validation_ctx.validation() {
            tracing::debug!(error = %error, "Token validation rejected by host");
            return Err(AuthError::Rejected(error.clone()));
        }

        let now = self.clock.now();
        let props = &validation_ctx.ticket.properties;
        let expires_in = props
            .expires_at
            .map(|expires_at| (expires_at - now).whole_seconds().max(0) as u64);

        Ok(ValidationResponse {
            client_id: props.client_id().map(str::to_string),
            scope: props.scope().map(str::to_string),
            expires_at: props.expires_at,
            expires_in,
            claims: validation_ctx.claims,
        })
    }
}
