//! Secure random source.
//!
//! Authorization codes and ticket nonces draw their entropy from a
//! [`SecureRandom`] supplied at server construction.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Number of random bytes in a generated identifier (256 bits).
pub const IDENTIFIER_BYTES: usize = 32;

/// Cryptographically secure source of random bytes.
pub trait SecureRandom: Send + Sync + fmt::Debug {
    /// Fills `dest` with random bytes.
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Random source backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSecureRandom;

impl SecureRandom for OsSecureRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// Generates a 256-bit random identifier, base64url-encoded without padding.
///
/// The result is 43 characters long and safe to place in URLs.
#[must_use]
pub fn generate_identifier(random: &dyn SecureRandom) -> String {
    let mut bytes = [0u8; IDENTIFIER_BYTES];
    random.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
