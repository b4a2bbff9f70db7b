//! # oidc-server
//!
//! Embeddable OAuth 2.0 / OpenID Connect authorization server engine.
//!
//! This crate provides:
//! - Authorization endpoint processing for the authorization code flow
//! - Token endpoint processing for `authorization_code`, `refresh_token`
//!   and host-defined grants
//! - Single-use authorization codes backed by a pluggable store
//! - Signed ID tokens and JWKS export
//! - Host hooks for client validation, consent and token annotation
//!
//! ## Overview
//!
//! The engine is transport-agnostic. The host turns HTTP requests into
//! [`OpenIdConnectMessage`]s, calls [`OpenIdConnectServer`] and writes the
//! outcome back. Hosts decide who their clients and users are by
//! implementing [`ServerProvider`].
//!
//! ## Modules
//!
//! - [`config`] - Server configuration
//! - [`message`] - Protocol messages and parameter names
//! - [`ticket`] - Authentication tickets and claims
//! - [`claims`] - Claims mapping and JSON flattening
//! - [`codec`] - Ticket protection
//! - [`token`] - Token providers, code storage and ID token signing
//! - [`notifications`] - Host hooks
//! - [`server`] - The endpoints
//! - [`clock`] / [`random`] - Injected time and randomness

pub mod claims;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod notifications;
pub mod random;
pub mod server;
pub mod ticket;
pub mod token;

pub use claims::{ClaimsMapper, IdentityClaimsMapper};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{AesGcmTicketCodec, CodecError, TicketCodec};
pub use config::{ConfigError, EndpointPaths, ServerConfig};
pub use error::{AuthError, ErrorCategory, ErrorResponse};
pub use message::{OpenIdConnectMessage, ResponseMode};
pub use notifications::{DefaultServerProvider, ServerProvider, Validation};
pub use random::{OsSecureRandom, SecureRandom};
pub use server::{
    AuthorizationOutcome, AuthorizationRedirect, DisplayError, Endpoint, OpenIdConnectServer,
    PendingAuthorization, RequestContext, ServerBuilder, TokenResponse, ValidationResponse,
};
pub use ticket::{AuthenticationProperties, AuthenticationTicket, Claim, TicketStage};
pub use token::{
    AuthorizationCodeProvider, CodeStore, InMemoryCodeStore, ProtectedTokenProvider,
    SigningAlgorithm, SigningCredentials, SigningService, TokenProvider,
};

/// Type alias for authorization server results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use oidc_server::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::claims::{ClaimsMapper, IdentityClaimsMapper};
    pub use crate::config::ServerConfig;
    pub use crate::error::{AuthError, ErrorResponse};
    pub use crate::message::{OpenIdConnectMessage, ResponseMode};
    pub use crate::notifications::{
        AuthorizeEndpointContext, CustomGrantContext, ServerProvider, TokenEndpointContext,
        ValidateAuthorizationRequestContext, ValidateClientAuthenticationContext,
        ValidateClientRedirectUriContext, ValidationEndpointContext,
    };
    pub use crate::server::{
        AuthorizationOutcome, Endpoint, OpenIdConnectServer, PendingAuthorization,
        RequestContext, TokenResponse,
    };
    pub use crate::ticket::{AuthenticationProperties, Claim};
    pub use crate::token::{SigningAlgorithm, SigningCredentials};
}
