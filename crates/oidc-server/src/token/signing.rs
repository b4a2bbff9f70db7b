//! ID token signing.
//!
//! The [`SigningService`] wraps one set of [`SigningCredentials`] for the
//! lifetime of the server and turns [`IdTokenClaims`] into a compact JWS.
//!
//! ## Algorithms
//!
//! - **HS256**: HMAC with SHA-256 (shared secret, no JWKS export)
//! - **RS256**: RSASSA-PKCS1-v1_5 with SHA-256
//! - **RS384**: RSA with SHA-384
//! - **ES384**: ECDSA on P-384
//!
//! ## Example
//!
//! ```ignore
//! use oidc_server::token::signing::{SigningCredentials, SigningService, SigningAlgorithm};
//!
//! let credentials = SigningCredentials::generate_rsa(SigningAlgorithm::RS256)?;
//! let service = SigningService::new(credentials);
//!
//! let claims = IdTokenClaims::new("https://auth.example.com", "abc", "alice", iat, exp)
//!     .with_nonce(Some("n-0S6_WzA2Mj"));
//! let id_token = service.sign(&claims)?;
//! ```

use std::fmt;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey as EcDecodePrivateKey, EncodePrivateKey as EcEncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::claims::{self, REGISTERED_CLAIMS};
use crate::error::AuthError;
use crate::ticket::Claim;

// ============================================================================
// Error Types
// ============================================================================

/// Failures while loading credentials or producing an ID token.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("ID token could not be signed: {message}")]
    Sign { message: String },

    /// The token did not verify against the server's own key.
    #[error("ID token signature check failed: {message}")]
    Verify { message: String },

    /// The RNG or key encoder failed while creating a fresh key pair.
    #[error("Could not create signing key: {message}")]
    KeyCreation { message: String },

    /// Supplied key material could not be used.
    #[error("Unusable signing key: {message}")]
    UnusableKey { message: String },
}

impl SigningError {
    #[must_use]
    pub fn sign(message: impl Into<String>) -> Self {
        Self::Sign {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn verify(message: impl Into<String>) -> Self {
        Self::Verify {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn key_creation(message: impl Into<String>) -> Self {
        Self::KeyCreation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unusable_key(message: impl Into<String>) -> Self {
        Self::UnusableKey {
            message: message.into(),
        }
    }
}

impl From<SigningError> for AuthError {
    fn from(err: SigningError) -> Self {
        AuthError::signing(err.to_string())
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms for ID tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256.
    HS256,
    /// RSA with SHA-256.
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with P-384 curve.
    ES384,
}

impl SigningAlgorithm {
    /// The matching `jsonwebtoken` algorithm.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Name used for the `alg` header and JWK member.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ID Token Claims
// ============================================================================

/// ID token claims.
///
/// The registered claims are typed; the mapped principal claims are
/// flattened next to them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject.
    pub sub: String,

    /// Audience (client ID).
    pub aud: String,

    /// Seconds since the epoch after which the token is void.
    pub exp: i64,

    /// Seconds since the epoch at which the token was minted.
    pub iat: i64,

    /// Nonce from the authorization request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Mapped principal claims.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl IdTokenClaims {
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        subject: impl Into<String>,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            aud: audience.into(),
            exp: expires_at.unix_timestamp(),
            iat: issued_at.unix_timestamp(),
            nonce: None,
            claims: Map::new(),
        }
    }

    /// Sets the nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: Option<&str>) -> Self {
        self.nonce = nonce.map(str::to_string);
        self
    }

    /// Adds principal claims.
    ///
    /// Claims named like a registered claim are skipped; repeated types
    /// become arrays.
    #[must_use]
    pub fn with_claims(mut self, claims: &[Claim]) -> Self {
        self.claims = claims::to_json_object(claims, REGISTERED_CLAIMS);
        self
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// `RSA` or `EC`.
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Always `sig`.
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// Base64url modulus, RSA only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// Base64url public exponent, RSA only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// Base64url affine x, EC only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// Base64url affine y, EC only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Credentials
// ============================================================================

/// A signing key and its algorithm.
pub struct SigningCredentials {
    /// Key ID placed in the JWT header.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
}

/// Public key material for JWKS export.
enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
    Symmetric,
}

impl SigningCredentials {
    /// Creates HS256 credentials from a shared secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is shorter than 32 bytes.
    pub fn from_secret(kid: impl Into<String>, secret: &[u8]) -> Result<Self, SigningError> {
        if secret.len() < 32 {
            return Err(SigningError::unusable_key(
                "HS256 secret must be at least 32 bytes",
            ));
        }

        Ok(Self {
            kid: kid.into(),
            algorithm: SigningAlgorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            public_key_data: PublicKeyData::Symmetric,
        })
    }

    /// Generates a new RSA key pair.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails or the algorithm is not
    /// RSA-based.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, SigningError> {
        if !algorithm.is_rsa() {
            return Err(SigningError::unusable_key(format!(
                "Algorithm {} is not RSA-based",
                algorithm
            )));
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| SigningError::key_creation(e.to_string()))?;
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SigningError::key_creation(e.to_string()))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::key_creation(e.to_string()))?;

        Self::from_pem(
            uuid::Uuid::new_v4().to_string(),
            algorithm,
            private_pem.as_str(),
            &public_pem,
        )
    }

    /// Generates a new ES384 key pair.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, SigningError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SigningError::key_creation(e.to_string()))?;
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| SigningError::key_creation(e.to_string()))?;

        let (decoding_key, public_key_data) = ec_public_parts(&secret_key)?;

        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            public_key_data,
        })
    }

    /// Loads credentials from PEM strings.
    ///
    /// RSA keys take a PKCS#8 private key and an SPKI public key. EC keys
    /// take a SEC1 or PKCS#8 private key; the public key is derived from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM data is invalid or the algorithm is
    /// symmetric.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, SigningError> {
        let (encoding_key, decoding_key, public_key_data) = match algorithm {
            SigningAlgorithm::RS256 | SigningAlgorithm::RS384 => {
                let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                    .map_err(|e| SigningError::unusable_key(e.to_string()))?;
                let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                    .map_err(|e| SigningError::unusable_key(e.to_string()))?;

                let public_key = RsaPublicKey::from_public_key_pem(public_pem)
                    .map_err(|e| SigningError::unusable_key(e.to_string()))?;
                let n = public_key.n().to_bytes_be();
                let e = public_key.e().to_bytes_be();

                (encoding_key, decoding_key, PublicKeyData::Rsa { n, e })
            }
            SigningAlgorithm::ES384 => {
                let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
                    .map_err(|e| SigningError::unusable_key(e.to_string()))?;
                let secret_key = match EcSecretKey::from_sec1_pem(private_pem) {
                    Ok(key) => key,
                    Err(_) => EcSecretKey::from_pkcs8_pem(private_pem)
                        .map_err(|e| SigningError::unusable_key(e.to_string()))?,
                };
                let (decoding_key, public_key_data) = ec_public_parts(&secret_key)?;

                (encoding_key, decoding_key, public_key_data)
            }
            SigningAlgorithm::HS256 => {
                return Err(SigningError::unusable_key(
                    "HS256 credentials are created with from_secret",
                ));
            }
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
        })
    }

    /// Exports the public key as a JWK.
    ///
    /// Returns `None` for symmetric credentials, which must never be
    /// published.
    #[must_use]
    pub fn to_jwk(&self) -> Option<Jwk> {
        let base = |kty: &str| Jwk {
            kty: kty.to_string(),
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: self.algorithm.as_str().to_string(),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
        };

        match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => Some(Jwk {
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                ..base("RSA")
            }),
            PublicKeyData::Ec { x, y } => Some(Jwk {
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
                ..base("EC")
            }),
            PublicKeyData::Symmetric => None,
        }
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn ec_public_parts(secret_key: &EcSecretKey) -> Result<(DecodingKey, PublicKeyData), SigningError> {
    let signing_key = EcSigningKey::from(secret_key);
    let point = signing_key.verifying_key().to_encoded_point(false);
    let x = point
        .x()
        .ok_or_else(|| SigningError::unusable_key("Missing x coordinate"))?;
    let y = point
        .y()
        .ok_or_else(|| SigningError::unusable_key("Missing y coordinate"))?;

    let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
    let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
    let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
        .map_err(|e| SigningError::unusable_key(e.to_string()))?;

    Ok((
        decoding_key,
        PublicKeyData::Ec {
            x: x.to_vec(),
            y: y.to_vec(),
        },
    ))
}

// ============================================================================
// Signing Service
// ============================================================================

/// Produces signed ID tokens.
///
/// Cheap to clone; the credentials are shared read-only.
#[derive(Debug, Clone)]
pub struct SigningService {
    credentials: Arc<SigningCredentials>,
}

impl SigningService {
    #[must_use]
    pub fn new(credentials: SigningCredentials) -> Self {
        Self {
            credentials: Arc::new(credentials),
        }
    }

    /// Signs the claims into a compact JWS.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn sign(&self, claims: &IdTokenClaims) -> Result<String, SigningError> {
        let mut header = Header::new(self.credentials.algorithm.to_jwt_algorithm());
        header.kid = Some(self.credentials.kid.clone());

        encode(&header, claims, &self.credentials.encoding_key)
            .map_err(|e| SigningError::sign(e.to_string()))
    }

    /// Verifies the signature and audience of an ID token.
    ///
    /// Expiration is not checked here; callers compare `exp` against their
    /// own clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature or audience does not match.
    pub fn verify(&self, token: &str, audience: &str) -> Result<IdTokenClaims, SigningError> {
        let mut validation = Validation::new(self.credentials.algorithm.to_jwt_algorithm());
        validation.validate_exp = false;
        validation.set_audience(&[audience]);

        decode::<IdTokenClaims>(token, &self.credentials.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| SigningError::verify(e.to_string()))
    }

    /// Returns the credentials' key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.credentials.kid
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.credentials.algorithm
    }

    /// Returns the JWKS containing the public key, empty for symmetric keys.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: self.credentials.to_jwk().into_iter().collect(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn claims() -> IdTokenClaims {
        IdTokenClaims::new(
            "https://auth.example.com",
            "abc",
            "alice",
            datetime!(2024-01-01 0:00 UTC),
            datetime!(2024-01-01 0:20 UTC),
        )
    }

    #[test]
    fn test_hs256_sign_verify() {
        let service = SigningService::new(SigningCredentials::from_secret("k1", SECRET).unwrap());

        let claims = claims()
            .with_nonce(Some("n-0S6"))
            .with_claims(&[Claim::new("email", "alice@example.com")]);
        let token = service.sign(&claims).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let decoded = service.verify(&token, "abc").unwrap();
        assert_eq!(decoded, claims);
        assert_eq!(decoded.exp - decoded.iat, 1200);
        assert_eq!(decoded.claims["email"], "alice@example.com");
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let service = SigningService::new(SigningCredentials::from_secret("k1", SECRET).unwrap());
        let token = service.sign(&claims()).unwrap();
        assert!(service.verify(&token, "other").is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = SigningCredentials::from_secret("k1", b"short").unwrap_err();
        assert!(matches!(err, SigningError::UnusableKey { .. }));
    }

    #[test]
    fn test_registered_claims_not_overridden() {
        let claims = claims().with_claims(&[Claim::new("sub", "mallory"), Claim::new("iss", "x")]);
        assert!(claims.claims.is_empty());

        let service = SigningService::new(SigningCredentials::from_secret("k1", SECRET).unwrap());
        let decoded = service.verify(&service.sign(&claims).unwrap(), "abc").unwrap();
        assert_eq!(decoded.sub, "alice");
    }

    #[test]
    fn test_rs256_sign_verify() {
        let credentials = SigningCredentials::generate_rsa(SigningAlgorithm::RS256).unwrap();
        let service = SigningService::new(credentials);

        let token = service.sign(&claims()).unwrap();
        let decoded = service.verify(&token, "abc").unwrap();
        assert_eq!(decoded.sub, "alice");
    }

    #[test]
    fn test_es384_sign_verify() {
        let service = SigningService::new(SigningCredentials::generate_ec().unwrap());
        let token = service.sign(&claims()).unwrap();
        assert_eq!(service.verify(&token, "abc").unwrap().sub, "alice");
    }

    #[test]
    fn test_rsa_requires_rsa_algorithm() {
        assert!(SigningCredentials::generate_rsa(SigningAlgorithm::ES384).is_err());
    }

    #[test]
    fn test_jwks_export() {
        let service = SigningService::new(SigningCredentials::generate_ec().unwrap());
        let jwks = service.jwks();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kty, "EC");
        assert_eq!(jwks.keys[0].crv.as_deref(), Some("P-384"));
        assert_eq!(jwks.keys[0].kid, service.kid());

        let symmetric =
            SigningService::new(SigningCredentials::from_secret("k1", SECRET).unwrap());
        assert!(symmetric.jwks().keys.is_empty());
    }

    #[test]
    fn test_signing_algorithm_properties() {
        assert!(SigningAlgorithm::RS384.is_rsa());
        assert!(!SigningAlgorithm::ES384.is_rsa());
        assert_eq!(SigningAlgorithm::RS256.to_string(), "RS256");
    }
}
