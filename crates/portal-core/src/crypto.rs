//! Cryptographic primitives for the portal.
//!
//! Provides AES-256-GCM authenticated encryption, HKDF-SHA256 key derivation,
//! a zeroize-on-drop key newtype, and [`TextCipher`], the text-in/text-out
//! cipher used for restricted documents and the unlock password.
//!
//! # Security model
//!
//! - Every encryption generates a fresh 96-bit nonce via `OsRng`, so equal
//!   plaintexts never produce equal ciphertexts.
//! - Binary format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`;
//!   [`TextCipher`] wraps it in standard base64.
//! - Each [`CipherPurpose`] derives its own key, so a document ciphertext
//!   can never be replayed as the reference password or vice versa.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Nonce length for AES-256-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// Minimum ciphertext length: 12-byte nonce + 16-byte AES-GCM tag.
const MIN_CIPHERTEXT_LEN: usize = NONCE_LEN + 16;

/// A 256-bit encryption key that is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// The caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypt bytes with AES-256-GCM under a fresh random nonce.
///
/// Returns `nonce || ciphertext || tag`.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut combined = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

/// Decrypt bytes produced by [`encrypt`].
///
/// # Errors
///
/// Returns [`CryptoError::CiphertextTooShort`] for inputs under 28 bytes and
/// [`CryptoError::Decryption`] if authentication fails (wrong key, corrupted
/// data, or tampered tag).
pub fn decrypt(key: &EncryptionKey, combined: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if combined.len() < MIN_CIPHERTEXT_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: MIN_CIPHERTEXT_LEN,
            actual: combined.len(),
        });
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
}

/// Derive a purpose-specific key from input keying material with HKDF-SHA256.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if HKDF expansion fails.
pub fn derive_key(
    ikm: &EncryptionKey,
    salt: Option<&[u8]>,
    info: &[u8],
) -> Result<EncryptionKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm.as_bytes());
    let mut derived = [0u8; 32];
    hk.expand(info, &mut derived)
        .map_err(|e| CryptoError::KeyDerivation {
            context: String::from_utf8_lossy(info).into_owned(),
            reason: e.to_string(),
        })?;
    Ok(EncryptionKey::from_bytes(derived))
}

/// What a [`TextCipher`] is used for. Each purpose gets its own derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherPurpose {
    /// Serialized restricted documents.
    Documents,
    /// The reference unlock password.
    UnlockPassword,
}

impl CipherPurpose {
    /// HKDF `info` label for this purpose.
    #[must_use]
    pub fn info(self) -> &'static [u8] {
        match self {
            Self::Documents => b"portal-documents-v1",
            Self::UnlockPassword => b"portal-unlock-v1",
        }
    }
}

/// Text-in, text-out cipher.
///
/// `encrypt` turns any UTF-8 string (including the empty string) into
/// printable base64 suitable for a JSON file; `decrypt` reverses it and
/// fails loudly rather than returning garbage.
#[derive(Clone)]
pub struct TextCipher {
    key: EncryptionKey,
}

impl TextCipher {
    /// Create a cipher using `key` directly.
    #[must_use]
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Encrypt a string into base64 text.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let sealed = encrypt(&self.key, plaintext.as_bytes())?;
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt base64 text produced by [`TextCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// - [`CryptoError::Encoding`] if the input is not base64 or the result is not UTF-8.
    /// - [`CryptoError::CiphertextTooShort`] / [`CryptoError::Decryption`] from [`decrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let sealed = BASE64
            .decode(ciphertext.trim())
            .map_err(|e| CryptoError::Encoding {
                reason: format!("base64 decode failed: {e}"),
            })?;
        let plaintext = decrypt(&self.key, &sealed)?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Encoding {
            reason: format!("plaintext is not UTF-8: {e}"),
        })
    }
}

impl fmt::Debug for TextCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextCipher").finish_non_exhaustive()
    }
}
