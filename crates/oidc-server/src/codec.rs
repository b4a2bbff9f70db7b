//! Ticket protection.
//!
//! A [`TicketCodec`] turns a ticket into an opaque string and back. The
//! default [`AesGcmTicketCodec`] encrypts the JSON form of the ticket with
//! AES-256-GCM.
//!
//! Format: `base64url( nonce || ciphertext || tag )`
//!
//! Each codec instance is bound to a purpose. Keys are derived from the
//! shared secret and the purpose, so a refresh token can never be
//! unprotected as an access token.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::error::AuthError;
use crate::random::{OsSecureRandom, SecureRandom};
use crate::ticket::AuthenticationTicket;

const NONCE_LEN: usize = 12;

/// Errors raised while protecting or unprotecting a ticket.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The protected string is not valid base64url or is truncated.
    #[error("Malformed protected ticket: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },

    /// Decryption failed: wrong key, wrong purpose or tampered data.
    #[error("Protected ticket failed integrity check")]
    Integrity,

    /// The ticket could not be serialized or deserialized.
    #[error("Ticket serialization failed: {message}")]
    Serialization {
        /// Description of the problem.
        message: String,
    },

    /// Encryption failed.
    #[error("Ticket encryption failed: {message}")]
    Encryption {
        /// Description of the problem.
        message: String,
    },
}

impl CodecError {
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption {
            message: message.into(),
        }
    }

    /// Returns `true` if the input was rejected rather than the codec failing.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Malformed { .. } | Self::Integrity)
    }
}

impl From<CodecError> for AuthError {
    fn from(err: CodecError) -> Self {
        AuthError::codec(err.to_string())
    }
}

/// Protects and unprotects authentication tickets.
///
/// Implementations must detect tampering: `unprotect` of a modified string
/// fails instead of returning a different ticket.
pub trait TicketCodec: Send + Sync {
    /// Serializes and protects a ticket.
    fn protect(&self, ticket: &AuthenticationTicket) -> Result<String, CodecError>;

    /// Verifies and restores a ticket.
    fn unprotect(&self, protected: &str) -> Result<AuthenticationTicket, CodecError>;
}

/// AES-256-GCM ticket codec.
#[derive(Clone)]
pub struct AesGcmTicketCodec {
    cipher: Aes256Gcm,
    purpose: String,
    random: Arc<dyn SecureRandom>,
}

impl AesGcmTicketCodec {
    /// Creates a codec whose key is derived from `secret` and `purpose`.
    #[must_use]
    pub fn new(secret: &[u8], purpose: impl Into<String>) -> Self {
        let purpose = purpose.into();
        let key = derive_key(secret, &purpose);
        Self {
            cipher: Aes256Gcm::new(&key.into()),
            purpose,
            random: Arc::new(OsSecureRandom),
        }
    }

    /// Uses the given random source for nonces.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn SecureRandom>) -> Self {
        self.random = random;
        self
    }

    #[must_use]
    pub fn purpose(&self) -> &str {
        &self.purpose
    }
}

impl fmt::Debug for AesGcmTicketCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmTicketCodec")
            .field("purpose", &self.purpose)
            .finish_non_exhaustive()
    }
}

impl TicketCodec for AesGcmTicketCodec {
    fn protect(&self, ticket: &AuthenticationTicket) -> Result<String, CodecError> {
        let plaintext =
            serde_json::to_vec(ticket).map_err(|e| CodecError::serialization(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        self.random.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|e| CodecError::encryption(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(&blob))
    }

    fn unprotect(&self, protected: &str) -> Result<AuthenticationTicket, CodecError> {
        let blob = URL_SAFE_NO_PAD
            .decode(protected)
            .map_err(|e| CodecError::malformed(e.to_string()))?;

        if blob.len() <= NONCE_LEN {
            return Err(CodecError::malformed("protected ticket too short"));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Integrity)?;

        serde_json::from_slice(&plaintext).map_err(|e| CodecError::serialization(e.to_string()))
    }
}

/// Derives a 256-bit key from the secret and purpose using SHA-256.
fn derive_key(secret: &[u8], purpose: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    hasher.update([0u8]);
    hasher.update(purpose.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{AuthenticationProperties, Claim, TicketStage};

    fn ticket() -> AuthenticationTicket {
        let mut props = AuthenticationProperties::new();
        props.set("client_id", "abc");
        AuthenticationTicket::new(
            TicketStage::AccessToken,
            vec![Claim::new("sub", "alice")],
            props,
        )
    }

    #[test]
    fn test_protect_unprotect() {
        let codec = AesGcmTicketCodec::new(b"secret", "access_token");
        let protected = codec.protect(&ticket()).unwrap();

        assert!(!protected.contains("alice"));
        assert_eq!(codec.unprotect(&protected).unwrap(), ticket());
    }

    #[test]
    fn test_nonce_makes_output_unique() {
        let codec = AesGcmTicketCodec::new(b"secret", "access_token");
        let a = codec.protect(&ticket()).unwrap();
        let b = codec.protect(&ticket()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_purpose_isolation() {
        let access = AesGcmTicketCodec::new(b"secret", "access_token");
        let refresh = AesGcmTicketCodec::new(b"secret", "refresh_token");

        let protected = refresh.protect(&ticket()).unwrap();
        assert!(matches!(
            access.unprotect(&protected),
            Err(CodecError::Integrity)
        ));
    }

    #[test]
    fn test_tampered_ticket_rejected() {
        let codec = AesGcmTicketCodec::new(b"secret", "access_token");
        let protected = codec.protect(&ticket()).unwrap();

        let mut blob = URL_SAFE_NO_PAD.decode(&protected).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(&blob);

        let err = codec.unprotect(&tampered).unwrap_err();
        assert!(err.is_rejection());
    }

    #[test]
    fn test_malformed_input_rejected() {
        let codec = AesGcmTicketCodec::new(b"secret", "access_token");
        assert!(matches!(
            codec.unprotect("not base64!"),
            Err(CodecError::Malformed { .. })
        ));
        assert!(matches!(
            codec.unprotect("AAAA"),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let codec = AesGcmTicketCodec::new(b"secret", "access_token");
        let debug = format!("{:?}", codec);
        assert!(debug.contains("access_token"));
        assert!(!debug.contains("cipher"));
    }
}
