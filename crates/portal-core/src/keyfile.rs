//! Key and IV files.
//!
//! The deployment's key material is two small files: a 32-byte key and a
//! 16-byte IV. They are generated on first use and read back on every start
//! afterwards. Losing either file makes every restricted document and the
//! reference password permanently unreadable; there is no recovery path.
//!
//! The key is HKDF input keying material and the IV is the HKDF salt. Actual
//! encryption keys are derived per [`CipherPurpose`], and each encryption
//! draws its own nonce, so the IV is never used as a GCM nonce.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, CipherPurpose, EncryptionKey, TextCipher};
use crate::error::{CryptoError, KeyFileError};

/// Length of the key file.
pub const KEY_LEN: usize = 32;

/// Length of the IV file.
pub const IV_LEN: usize = 16;

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct Iv([u8; IV_LEN]);

/// The deployment's key + IV pair.
#[derive(Clone)]
pub struct KeyMaterial {
    key: EncryptionKey,
    iv: Iv,
}

impl KeyMaterial {
    /// Generate a fresh pair in memory.
    #[must_use]
    pub fn generate() -> Self {
        // 16 bytes straight from the CSPRNG.
        let seed = EncryptionKey::generate();
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&seed.as_bytes()[..IV_LEN]);
        Self {
            key: EncryptionKey::generate(),
            iv: Iv(iv),
        }
    }

    /// Build key material from raw bytes.
    #[must_use]
    pub fn from_bytes(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self {
            key: EncryptionKey::from_bytes(key),
            iv: Iv(iv),
        }
    }

    /// Load the pair from `key_path` and `iv_path`, generating and
    /// persisting both when neither exists.
    ///
    /// New files are created exclusively with mode `0600` on Unix.
    ///
    /// # Errors
    ///
    /// - [`KeyFileError::Incomplete`] if exactly one of the files exists.
    /// - [`KeyFileError::Corrupted`] if a file has the wrong length.
    /// - [`KeyFileError::Io`] on any filesystem failure.
    pub async fn load_or_generate(
        key_path: impl AsRef<Path>,
        iv_path: impl AsRef<Path>,
    ) -> Result<Self, KeyFileError> {
        let key_path = key_path.as_ref();
        let iv_path = iv_path.as_ref();

        let key_bytes = read_optional(key_path).await?;
        let iv_bytes = read_optional(iv_path).await?;

        match (key_bytes, iv_bytes) {
            (Some(key), Some(iv)) => {
                let key: [u8; KEY_LEN] = fixed_len(key_path, &key)?;
                let iv: [u8; IV_LEN] = fixed_len(iv_path, &iv)?;
                info!(key_file = %key_path.display(), "loaded encryption key material");
                Ok(Self::from_bytes(key, iv))
            }
            (None, None) => {
                let material = Self::generate();
                persist_pair(&material, key_path, iv_path).await?;
                warn!(
                    key_file = %key_path.display(),
                    iv_file = %iv_path.display(),
                    "generated new encryption key material; back these files up"
                );
                Ok(material)
            }
            (Some(key), None) => {
                // A crash between publishing the key and the IV leaves the
                // IV under its staging name.
                let staged = staging_path(iv_path);
                match read_optional(&staged).await? {
                    Some(iv) if iv.len() == IV_LEN => {
                        let key: [u8; KEY_LEN] = fixed_len(key_path, &key)?;
                        let iv: [u8; IV_LEN] = fixed_len(&staged, &iv)?;
                        publish(&staged, iv_path).await?;
                        warn!(
                            iv_file = %iv_path.display(),
                            "completed interrupted key generation"
                        );
                        Ok(Self::from_bytes(key, iv))
                    }
                    _ => Err(KeyFileError::Incomplete {
                        present: key_path.display().to_string(),
                        missing: iv_path.display().to_string(),
                    }),
                }
            }
            (None, Some(_)) => Err(KeyFileError::Incomplete {
                present: iv_path.display().to_string(),
                missing: key_path.display().to_string(),
            }),
        }
    }

    /// Derive the text cipher for `purpose`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if HKDF expansion fails.
    pub fn cipher(&self, purpose: CipherPurpose) -> Result<TextCipher, CryptoError> {
        let derived = crypto::derive_key(&self.key, Some(&self.iv.0), purpose.info())?;
        Ok(TextCipher::new(derived))
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, KeyFileError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(KeyFileError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

fn fixed_len<const N: usize>(path: &Path, bytes: &[u8]) -> Result<[u8; N], KeyFileError> {
    bytes.try_into().map_err(|_| KeyFileError::Corrupted {
        path: path.display().to_string(),
        expected: N,
        actual: bytes.len(),
    })
}

/// Write a freshly generated pair so that a failure never leaves half of it
/// under its final name.
///
/// Both files are written under staging names first. The key is renamed into
/// place before the IV; a crash between the two renames is completed by the
/// next [`KeyMaterial::load_or_generate`].
async fn persist_pair(
    material: &KeyMaterial,
    key_path: &Path,
    iv_path: &Path,
) -> Result<(), KeyFileError> {
    let key_staged = staging_path(key_path);
    let iv_staged = staging_path(iv_path);

    // Leftovers of an earlier failed attempt; nothing was encrypted with them.
    discard(&key_staged).await;
    discard(&iv_staged).await;

    let result = async {
        write_new(&key_staged, material.key.as_bytes()).await?;
        write_new(&iv_staged, &material.iv.0).await?;
        publish(&key_staged, key_path).await?;
        if let Err(e) = publish(&iv_staged, iv_path).await {
            discard(key_path).await;
            return Err(e);
        }
        Ok(())
    }
    .await;

    if result.is_err() {
        discard(&key_staged).await;
        discard(&iv_staged).await;
    }
    result
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn publish(from: &Path, to: &Path) -> Result<(), KeyFileError> {
    fs::rename(from, to).await.map_err(|e| KeyFileError::Io {
        path: to.display().to_string(),
        reason: e.to_string(),
    })
}

async fn discard(path: &Path) {
    fs::remove_file(path).await.ok();
}

async fn write_new(path: &Path, bytes: &[u8]) -> Result<(), KeyFileError> {
    let io_err = |e: std::io::Error| KeyFileError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await.map_err(io_err)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await.map_err(io_err)?;
    file.write_all(bytes).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    Ok(())
}
