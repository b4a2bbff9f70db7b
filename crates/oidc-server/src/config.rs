//! Authorization server configuration.
//!
//! Only plain settings live here. Collaborators that cannot be serialized
//! (clock, random source, codec, providers, hooks, signing credentials) are
//! wired through [`crate::server::ServerBuilder`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::message::response_types;

/// Response types the engine knows how to handle.
pub const UNDERSTOOD_RESPONSE_TYPES: &[&str] = &[response_types::CODE];

/// Upper bound for every configured lifetime (100 years).
pub const MAX_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Authorization server configuration.
///
/// # Example (TOML)
///
/// ```toml
/// issuer = "https://auth.example.com"
/// access_token_lifetime = "1h"
/// refresh_token_lifetime = "30d"
///
/// [endpoints]
/// authorize = "/oauth/authorize"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Issuer placed in the `iss` claim of ID tokens.
    /// When unset, the issuer is derived from the request scheme and host.
    pub issuer: Option<String>,

    /// Allow plain `http` issuers, redirect URIs and requests.
    /// Only meant for local development and tests.
    pub allow_insecure_http: bool,

    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// Access token lifetime. Also reported as `expires_in`.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,

    /// Refresh token lifetime. `None` means refresh tokens never expire.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Option<Duration>,

    /// When set, authorization errors that cannot be redirected are handed
    /// to the host for display instead of the built-in error page.
    pub application_can_display_errors: bool,

    /// Render the built-in auto-submitting form for `form_post` responses.
    pub use_default_form: bool,

    /// Issue an ID token even when `openid` was not requested.
    pub always_issue_id_token: bool,

    /// Issue ID tokens at all. Requires signing credentials.
    pub id_tokens_enabled: bool,

    /// Response types accepted at the authorization endpoint.
    pub supported_response_types: Vec<String>,

    /// Endpoint paths.
    pub endpoints: EndpointPaths,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            allow_insecure_http: false,
            authorization_code_lifetime: Duration::from_secs(5 * 60),
            access_token_lifetime: Duration::from_secs(20 * 60),
            id_token_lifetime: Duration::from_secs(20 * 60),
            refresh_token_lifetime: None,
            application_can_display_errors: false,
            use_default_form: true,
            always_issue_id_token: false,
            id_tokens_enabled: true,
            supported_response_types: vec![response_types::CODE.to_string()],
            endpoints: EndpointPaths::default(),
        }
    }
}

/// Paths the host routes to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointPaths {
    pub authorize: String,
    pub token: String,
    pub form_post: String,
    pub validation: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            authorize: "/connect/authorize".to_string(),
            token: "/connect/token".to_string(),
            form_post: "/openid/form_post".to_string(),
            validation: "/connect/validate".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration source could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        AuthError::configuration(err.to_string())
    }
}

impl ServerConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and any error
    /// reported by [`ServerConfig::validate`].
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The issuer is not an absolute URL, carries a query or fragment, or
    ///   is not `https` while insecure HTTP is not allowed
    /// - An endpoint path does not start with `/`
    /// - A lifetime is zero or longer than [`MAX_LIFETIME`]
    /// - A response type is not understood by the engine
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref issuer) = self.issuer {
            validate_issuer(issuer, self.allow_insecure_http)?;
        }

        for (name, path) in [
            ("authorize", &self.endpoints.authorize),
            ("token", &self.endpoints.token),
            ("form_post", &self.endpoints.form_post),
            ("validation", &self.endpoints.validation),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidValue(format!(
                    "endpoint path '{}' for {} must start with '/'",
                    path, name
                )));
            }
        }

        for (name, lifetime) in [
            ("authorization_code_lifetime", Some(self.authorization_code_lifetime)),
            ("access_token_lifetime", Some(self.access_token_lifetime)),
            ("id_token_lifetime", Some(self.id_token_lifetime)),
            ("refresh_token_lifetime", self.refresh_token_lifetime),
        ] {
            let Some(lifetime) = lifetime else { continue };
            if lifetime.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{} must be > 0", name)));
            }
            if lifetime > MAX_LIFETIME {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must not exceed 100 years",
                    name
                )));
            }
        }

        if self.supported_response_types.is_empty() {
            return Err(ConfigError::Missing("supported_response_types".to_string()));
        }
        for response_type in &self.supported_response_types {
            if !UNDERSTOOD_RESPONSE_TYPES.contains(&response_type.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "Unsupported response type: '{}'",
                    response_type
                )));
            }
        }

        Ok(())
    }

    /// Returns `true` if `response_type` is accepted at the authorization
    /// endpoint.
    ///
    /// Multi-valued response types match regardless of value order.
    #[must_use]
    pub fn supports_response_type(&self, response_type: &str) -> bool {
        let mut requested: Vec<&str> = response_type.split_whitespace().collect();
        requested.sort_unstable();
        self.supported_response_types.iter().any(|supported| {
            let mut values: Vec<&str> = supported.split_whitespace().collect();
            values.sort_unstable();
            values == requested
        })
    }
}

fn validate_issuer(issuer: &str, allow_insecure_http: bool) -> Result<(), ConfigError> {
    let url = url::Url::parse(issuer).map_err(|e| {
        ConfigError::InvalidValue(format!("issuer must be an absolute URL: {}", e))
    })?;

    if url.query().is_some() || url.fragment().is_some() {
        return Err(ConfigError::InvalidValue(
            "issuer must not contain a query or fragment".to_string(),
        ));
    }

    match url.scheme() {
        "https" => Ok(()),
        "http" if allow_insecure_http => Ok(()),
        "http" => Err(ConfigError::InvalidValue(
            "issuer must use https unless allow_insecure_http is set".to_string(),
        )),
        other => Err(ConfigError::InvalidValue(format!(
            "issuer scheme '{}' is not supported",
            other
        ))),
    }
}
