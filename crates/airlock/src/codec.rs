//! Envelope encryption for airlock.
//!
//! Telemetry travels as opaque envelopes sealed with XChaCha20-Poly1305:
//! a fresh random 24-byte nonce followed by ciphertext and authentication
//! tag. The extended nonce makes random generation per message safe, and the
//! tag means any corruption of the envelope is a hard rejection rather than
//! garbled plaintext.

use base64::{engine::general_purpose::URL_SAFE, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::reading::Reading;

/// Length of the shared symmetric key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the per-envelope nonce in bytes.
pub const NONCE_LEN: usize = 24;

/// Length of the Poly1305 authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Shared symmetric key (256-bit), zeroed on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a key from URL-safe base64.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the input is not valid base64 or does
    /// not decode to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = URL_SAFE
            .decode(encoded.trim())
            .map_err(|e| Error::invalid_key(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| Error::invalid_key(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self(bytes))
    }

    /// Generate a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// Encode the key as URL-safe base64 for config files and env vars.
    #[must_use]
    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Get the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Seals and opens telemetry envelopes under a shared key.
///
/// The key is injected at construction; there is no ambient key state, so
/// tests can run each with their own codec.
#[derive(Debug, Clone)]
pub struct Codec {
    key: SecretKey,
}

impl Codec {
    /// Create a codec using the given shared key.
    #[must_use]
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }

    /// Seal a plaintext into an envelope.
    ///
    /// A fresh random nonce is generated for every call and prepended to the
    /// ciphertext. Nonce reuse would break confidentiality, so callers must
    /// never cache envelopes for re-sending with altered contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionFailed`] if the cipher rejects the
    /// plaintext (only possible for absurdly large inputs).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new(self.key.as_bytes().into());

        let mut nonce = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    /// Open an envelope, returning the authenticated plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnvelopeTooShort`] if the envelope cannot contain a
    /// nonce and tag, or [`Error::AuthenticationFailed`] if the tag does not
    /// verify. No partial plaintext is ever produced.
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        if envelope.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::EnvelopeTooShort {
                len: envelope.len(),
            });
        }

        let (nonce, ciphertext) = envelope.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new(self.key.as_bytes().into());

        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::AuthenticationFailed)
    }

    /// Open an envelope and parse the plaintext as a telemetry record.
    ///
    /// Returns the parsed reading together with the verbatim plaintext, which
    /// the storage layer retains for audit and export.
    ///
    /// # Errors
    ///
    /// Returns decryption errors as [`Self::decrypt`] does, or
    /// [`Error::MalformedPayload`] if the plaintext is not UTF-8 JSON in the
    /// expected shape.
    pub fn decrypt_reading(&self, envelope: &[u8]) -> Result<(Reading, String)> {
        let plaintext = self.decrypt(envelope)?;
        let text =
            String::from_utf8(plaintext).map_err(|_| Error::malformed("plaintext is not UTF-8"))?;
        let reading = Reading::from_plaintext(&text)?;
        Ok((reading, text))
    }
}
