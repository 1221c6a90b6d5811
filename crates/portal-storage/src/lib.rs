//! Storage backend abstraction for the portal.
//!
//! This crate defines the [`StorageBackend`] trait, a plain key-value
//! interface that knows nothing about documents or encryption. The
//! document store in `portal-core` decides which keys hold plaintext and
//! which hold ciphertext.
//!
//! Three implementations are provided:
//!
//! - [`FileBackend`]: production default, one file per key under a root directory
//! - [`PostgresBackend`]: single-table relational backend (feature `postgres-backend`)
//! - [`MemoryBackend`]: in-memory, for testing and throwaway deployments

mod error;
mod file_backend;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;

pub use error::StorageError;
pub use file_backend::FileBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresBackend;

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g. `wiki/12.json`,
/// `sys/tags.json`). Values are opaque byte arrays.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Deleting a non-existent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys that start with the given prefix, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Write `value` at `to` and remove `from`, as one logical step.
    ///
    /// The default writes the destination before deleting the source, so an
    /// interruption leaves the value under both keys rather than under
    /// neither. Backends that can do better (a single lock, a transaction)
    /// override this.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] or [`StorageError::Delete`] from the
    /// step that failed.
    async fn transfer(&self, from: &str, to: &str, value: &[u8]) -> Result<(), StorageError> {
        self.put(to, value).await?;
        if from != to {
            self.delete(from).await?;
        }
        Ok(())
    }
}
