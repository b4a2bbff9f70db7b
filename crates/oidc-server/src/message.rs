//! OpenID Connect protocol messages.
//!
//! A message is an ordered map from parameter name to string value. The
//! hosting layer builds inbound messages from query strings or form bodies;
//! the engine builds outbound messages that the host serializes as a
//! redirect, a form post or a JSON body.
//!
//! # Example
//!
//! ```ignore
//! use oidc_server::message::{OpenIdConnectMessage, parameters};
//!
//! let request = OpenIdConnectMessage::from_query(
//!     "response_type=code&client_id=abc&redirect_uri=https%3A%2F%2Fclient.example%2Fcb",
//! );
//! assert_eq!(request.client_id(), Some("abc"));
//! ```

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Protocol parameter names.
pub mod parameters {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const CLIENT_ID: &str = "client_id";
    pub const CLIENT_SECRET: &str = "client_secret";
    pub const CODE: &str = "code";
    pub const CODE_CHALLENGE: &str = "code_challenge";
    pub const CODE_CHALLENGE_METHOD: &str = "code_challenge_method";
    pub const CODE_VERIFIER: &str = "code_verifier";
    pub const ERROR: &str = "error";
    pub const ERROR_DESCRIPTION: &str = "error_description";
    pub const ERROR_URI: &str = "error_uri";
    pub const EXPIRES_IN: &str = "expires_in";
    pub const GRANT_TYPE: &str = "grant_type";
    pub const ID_TOKEN: &str = "id_token";
    pub const NONCE: &str = "nonce";
    pub const REDIRECT_URI: &str = "redirect_uri";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const RESPONSE_MODE: &str = "response_mode";
    pub const RESPONSE_TYPE: &str = "response_type";
    pub const SCOPE: &str = "scope";
    pub const STATE: &str = "state";
    pub const TOKEN: &str = "token";
    pub const TOKEN_TYPE: &str = "token_type";
}

/// Grant type values accepted at the token endpoint.
pub mod grant_types {
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

/// Response type values accepted at the authorization endpoint.
pub mod response_types {
    pub const CODE: &str = "code";
    pub const ID_TOKEN: &str = "id_token";
    pub const TOKEN: &str = "token";
}

/// Well-known scope values.
pub mod scopes {
    pub const OPENID: &str = "openid";
    pub const OFFLINE_ACCESS: &str = "offline_access";
}

/// Token type returned with every access token.
pub const TOKEN_TYPE_BEARER: &str = "bearer";

/// A protocol-level request or response message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenIdConnectMessage {
    parameters: IndexMap<String, String>,
}

impl OpenIdConnectMessage {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message from name/value pairs.
    ///
    /// Later duplicates replace earlier ones; empty values are dropped.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut message = Self::new();
        for (name, value) in pairs {
            let value = value.into();
            if !value.is_empty() {
                message.parameters.insert(name.into(), value);
            }
        }
        message
    }

    /// Parses an `application/x-www-form-urlencoded` query string or body.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()).into_owned())
    }

    /// Returns the value of a parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Sets a parameter, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(name.into(), value.into());
    }

    /// Removes a parameter, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.parameters.shift_remove(name)
    }

    /// Returns `true` if the parameter is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    /// Iterates over all parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parameters
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Returns `true` if the message has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.get(parameters::CLIENT_ID)
    }

    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        self.get(parameters::REDIRECT_URI)
    }

    #[must_use]
    pub fn response_type(&self) -> Option<&str> {
        self.get(parameters::RESPONSE_TYPE)
    }

    #[must_use]
    pub fn response_mode(&self) -> Option<&str> {
        self.get(parameters::RESPONSE_MODE)
    }

    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.get(parameters::SCOPE)
    }

    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.get(parameters::STATE)
    }

    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.get(parameters::NONCE)
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.get(parameters::CODE)
    }

    #[must_use]
    pub fn grant_type(&self) -> Option<&str> {
        self.get(parameters::GRANT_TYPE)
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.get(parameters::REFRESH_TOKEN)
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.get(parameters::ERROR)
    }

    /// Iterates over the space-separated values of the `scope` parameter.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope().unwrap_or_default().split_whitespace()
    }

    /// Returns `true` if `scope` contains the given value.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|s| s == scope)
    }

    /// Iterates over the space-separated values of `response_type`.
    pub fn response_types(&self) -> impl Iterator<Item = &str> {
        self.response_type().unwrap_or_default().split_whitespace()
    }

    /// Returns `true` if this is an error message.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.contains(parameters::ERROR)
    }

    /// Serializes the message as `application/x-www-form-urlencoded`.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish()
    }

    /// Builds the URL the user-agent is redirected to.
    ///
    /// For `query` the parameters are appended to the query string; for
    /// `fragment` they replace the fragment. `form_post` returns the
    /// redirect URI unchanged since the parameters travel in the body.
    pub fn to_redirect_url(
        &self,
        redirect_uri: &str,
        mode: ResponseMode,
    ) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(redirect_uri)?;
        match mode {
            ResponseMode::Query => {
                url.query_pairs_mut().extend_pairs(self.iter());
            }
            ResponseMode::Fragment => {
                url.set_fragment(Some(&self.to_query_string()));
            }
            ResponseMode::FormPost => {}
        }
        Ok(url.to_string())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OpenIdConnectMessage {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// How authorization responses are returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Parameters appended to the redirect URI query string.
    #[default]
    Query,
    /// Parameters placed in the redirect URI fragment.
    Fragment,
    /// Parameters posted by an auto-submitting HTML form.
    FormPost,
}

impl ResponseMode {
    /// Parses a `response_mode` value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "query" => Some(Self::Query),
            "fragment" => Some(Self::Fragment),
            "form_post" => Some(Self::FormPost),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Fragment => "fragment",
            Self::FormPost => "form_post",
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
