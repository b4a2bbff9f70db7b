//! Protocol and engine failures.
//!
//! [`AuthError`] is what every endpoint returns; [`ErrorResponse`] is the
//! `error` / `error_description` / `error_uri` triple a client sees.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::{OpenIdConnectMessage, parameters};

/// Failure of an endpoint operation.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is missing a parameter or is otherwise malformed.
    #[error("invalid_request: {message}")]
    InvalidRequest {
        message: String,
    },

    /// The client is unknown or failed to authenticate.
    #[error("invalid_client: {message}")]
    InvalidClient {
        message: String,
    },

    /// The authorization code or refresh token is invalid, expired,
    /// already used or was issued to someone else.
    #[error("invalid_grant: {message}")]
    InvalidGrant {
        message: String,
    },

    /// The server does not support the requested response type.
    #[error("unsupported_response_type: {response_type}")]
    UnsupportedResponseType {
        response_type: String,
    },

    /// The server does not support the requested grant type.
    #[error("unsupported_grant_type: {grant_type}")]
    UnsupportedGrantType {
        grant_type: String,
    },

    /// A host hook rejected the request with its own error code.
    #[error("rejected by host: {0}")]
    Rejected(ErrorResponse),

    /// The single-use store failed.
    #[error("code store failure: {message}")]
    Storage {
        message: String,
    },

    /// A ticket could not be protected.
    #[error("ticket protection failure: {message}")]
    Codec {
        message: String,
    },

    /// An ID token could not be signed.
    #[error("ID token signing failure: {message}")]
    Signing {
        message: String,
    },

    /// The server configuration is invalid.
    #[error("misconfigured server: {message}")]
    Configuration {
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("internal failure: {message}")]
    Internal {
        message: String,
    },
}

impl AuthError {
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsupported_response_type(response_type: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            response_type: response_type.into(),
        }
    }

    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller is at fault. Host rejections count unless they
    /// carry `server_error`.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidRequest { .. }
            | Self::InvalidClient { .. }
            | Self::InvalidGrant { .. }
            | Self::UnsupportedResponseType { .. }
            | Self::UnsupportedGrantType { .. } => true,
            Self::Rejected(response) => response.error != "server_error",
            _ => false,
        }
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Coarse bucket used in log fields.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::InvalidClient { .. } => ErrorCategory::Authentication,
            Self::InvalidGrant { .. } => ErrorCategory::Grant,
            Self::UnsupportedResponseType { .. } => ErrorCategory::Validation,
            Self::UnsupportedGrantType { .. } => ErrorCategory::Validation,
            Self::Rejected(_) => ErrorCategory::Authorization,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Codec { .. } => ErrorCategory::Infrastructure,
            Self::Signing { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// The `error` value sent on the wire.
    #[must_use]
    pub fn oauth_error_code(&self) -> &str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::UnsupportedResponseType { .. } => "unsupported_response_type",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::Rejected(response) => &response.error,
            Self::Storage { .. }
            | Self::Codec { .. }
            | Self::Signing { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Returns the HTTP status a host should use for this error at the
    /// token endpoint.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidClient { .. } => 401,
            Self::Rejected(response) => response.http_status(),
            _ if self.is_client_error() => 400,
            _ => 500,
        }
    }

    /// Converts this error into the structure sent to the client.
    ///
    /// Server-side failures never leak their internal message.
    #[must_use]
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            Self::Rejected(response) => response.clone(),
            Self::InvalidRequest { message }
            | Self::InvalidClient { message }
            | Self::InvalidGrant { message } => {
                ErrorResponse::new(self.oauth_error_code()).with_description(message.clone())
            }
            Self::UnsupportedResponseType { response_type } => {
                ErrorResponse::new(self.oauth_error_code()).with_description(format!(
                    "The response type '{}' is not supported",
                    response_type
                ))
            }
            Self::UnsupportedGrantType { grant_type } => ErrorResponse::new(
                self.oauth_error_code(),
            )
            .with_description(format!("The grant type '{}' is not supported", grant_type)),
            _ => ErrorResponse::new("server_error")
                .with_description("The authorization server encountered an internal error"),
        }
    }
}

/// Log bucket for an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unknown client or bad client credentials.
    Authentication,
    /// Consent refused or host veto.
    Authorization,
    /// Bad code or refresh token.
    Grant,
    Validation,
    /// Store, codec or signer.
    Infrastructure,
    Configuration,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Grant => "grant",
            Self::Validation => "validation",
            Self::Infrastructure => "infrastructure",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error as seen by the client.
///
/// JSON body at the token endpoint; redirect parameters at the
/// authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// URI of a page describing the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: None,
            error_uri: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.error_uri = Some(uri.into());
        self
    }

    /// Status for the token endpoint; unknown codes map to 400.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.error.as_str() {
            "invalid_client" => 401,
            "access_denied" => 403,
            "server_error" => 500,
            "temporarily_unavailable" => 503,
            _ => 400,
        }
    }

    /// Redirect parameters, echoing `state` when given.
    #[must_use]
    pub fn to_message(&self, state: Option<&str>) -> OpenIdConnectMessage {
        let mut message = OpenIdConnectMessage::new();
        message.set(parameters::ERROR, &self.error);
        if let Some(ref description) = self.error_description {
            message.set(parameters::ERROR_DESCRIPTION, description);
        }
        if let Some(ref uri) = self.error_uri {
            message.set(parameters::ERROR_URI, uri);
        }
        if let Some(state) = state {
            message.set(parameters::STATE, state);
        }
        message
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_description {
            Some(ref description) => write!(f, "{}: {}", self.error, description),
            None => write!(f, "{}", self.error),
        }
    }
}

impl From<AuthError> for ErrorResponse {
    fn from(err: AuthError) -> Self {
        err.to_error_response()
    }
}
