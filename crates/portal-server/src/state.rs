//! Shared application state for the portal server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the document store, the access gate,
//! and the write-gating switch.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use portal_core::crypto::CipherPurpose;
use portal_core::error::GateError;
use portal_core::gate::{AccessGate, ThrottlePolicy};
use portal_core::keyfile::KeyMaterial;
use portal_core::store::DocumentStore;
use portal_storage::StorageBackend;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Documents, tags, and categories.
    pub store: DocumentStore,
    /// Unlocked/locked switch for restricted content.
    pub gate: AccessGate,
    /// Require an unlocked gate for every document and tag mutation.
    pub require_unlock_for_writes: bool,
}

/// Options for [`AppState::build`].
#[derive(Debug, Clone, Default)]
pub struct StateOptions {
    pub throttle: ThrottlePolicy,
    pub require_unlock_for_writes: bool,
    /// Unlock password to store if none is configured yet.
    pub bootstrap_password: Option<String>,
}

impl AppState {
    /// Derive both ciphers from `keys`, open the store (repairing
    /// interrupted moves), and bootstrap the unlock password if requested.
    ///
    /// # Errors
    ///
    /// Fails if key derivation, the startup scan, or the bootstrap write fails.
    pub async fn build(
        storage: Arc<dyn StorageBackend>,
        keys: &KeyMaterial,
        options: StateOptions,
    ) -> anyhow::Result<Arc<Self>> {
        let documents = keys
            .cipher(CipherPurpose::Documents)
            .context("failed to derive document cipher")?;
        let unlock = keys
            .cipher(CipherPurpose::UnlockPassword)
            .context("failed to derive unlock-password cipher")?;

        let store = DocumentStore::open(Arc::clone(&storage), documents)
            .await
            .context("failed to open document store")?;
        let gate = AccessGate::new(storage, unlock, options.throttle);

        if let Some(password) = options.bootstrap_password.as_deref() {
            match gate.initialize(password).await {
                Ok(()) => info!("unlock password bootstrapped from environment"),
                Err(GateError::AlreadyInitialized) => {
                    info!("unlock password already configured, ignoring bootstrap value");
                }
                Err(e) => return Err(e).context("failed to bootstrap unlock password"),
            }
        }

        Ok(Arc::new(Self {
            store,
            gate,
            require_unlock_for_writes: options.require_unlock_for_writes,
        }))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("require_unlock_for_writes", &self.require_unlock_for_writes)
            .finish_non_exhaustive()
    }
}
