//! Error types for `portal-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto and gate errors never include key material, passwords,
//! or document contents; only ids, paths, and operation descriptions.

use portal_storage::StorageError;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// HKDF key derivation failed.
    #[error("key derivation failed for context '{context}': {reason}")]
    KeyDerivation { context: String, reason: String },

    /// Ciphertext is too short to contain a valid nonce + tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },

    /// The ciphertext text is not valid base64, or the plaintext is not UTF-8.
    #[error("invalid encoding: {reason}")]
    Encoding { reason: String },
}

/// Errors from loading or generating the key and IV files.
#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    /// Reading or writing a key file failed.
    #[error("key file '{path}': {reason}")]
    Io { path: String, reason: String },

    /// A key file exists but has the wrong length.
    #[error("key file '{path}' is corrupted: expected {expected} bytes, found {actual}")]
    Corrupted {
        path: String,
        expected: usize,
        actual: usize,
    },

    /// Only one of the two files exists. Regenerating the missing half would
    /// silently orphan every encrypted document, so this is refused.
    #[error("key file '{present}' exists but '{missing}' is missing; refusing to regenerate")]
    Incomplete { present: String, missing: String },
}

/// Errors from document store operations.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The request failed validation; nothing was written.
    #[error("invalid document: {reason}")]
    Validation { reason: String },

    /// No document with this id exists in either bucket.
    #[error("document {id} not found")]
    NotFound { id: u64 },

    /// A restricted document could not be decrypted.
    #[error("document {id} could not be decrypted: {source}")]
    Crypto {
        id: u64,
        #[source]
        source: CryptoError,
    },

    /// A stored record could not be parsed.
    #[error("stored record '{key}' is corrupted: {reason}")]
    Corrupted { key: String, reason: String },

    /// A referenced tag does not exist.
    #[error("tag {id} not found")]
    TagNotFound { id: u64 },

    /// The operation would change a restricted document, which the caller
    /// may not do.
    #[error("document {id} is restricted")]
    Restricted { id: u64 },

    /// A tag with the same name already exists.
    #[error("tag '{name}' already exists")]
    TagConflict { name: String },

    /// The underlying storage backend returned an error.
    #[error("document storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the access gate.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// No reference password has been configured yet.
    #[error("unlock password is not configured")]
    NotInitialized,

    /// A reference password is already configured.
    #[error("unlock password is already configured")]
    AlreadyInitialized,

    /// The submitted password does not match.
    #[error("incorrect password")]
    IncorrectPassword,

    /// Too many failed attempts; retry after the lockout elapses.
    #[error("too many failed attempts, retry in {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },

    /// The operation requires the gate to be unlocked.
    #[error("access gate is locked")]
    Locked,

    /// The proposed password is unacceptable.
    #[error("invalid password: {reason}")]
    InvalidPassword { reason: String },

    /// Decrypting or encrypting the reference password failed.
    #[error("gate crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The underlying storage backend returned an error.
    #[error("gate storage error: {0}")]
    Storage(#[from] StorageError),
}
