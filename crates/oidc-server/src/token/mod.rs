//! Token issuance and redemption.
//!
//! This module provides:
//!
//! - Token providers for authorization codes, access tokens and refresh tokens
//! - Single-use authorization code storage
//! - ID token signing and JWKS export

pub mod provider;
pub mod signing;
pub mod store;

pub use provider::{AuthorizationCodeProvider, ProtectedTokenProvider, TokenProvider, hash_token};
pub use signing::{
    IdTokenClaims, Jwk, Jwks, SigningAlgorithm, SigningCredentials, SigningError, SigningService,
};
pub use store::{CodeStore, InMemoryCodeStore, Redemption};
