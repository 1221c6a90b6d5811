//! Access gate for restricted content.
//!
//! The gate is a process-scoped `unlocked` flag. It starts locked, becomes
//! unlocked when the site password is submitted, and locks again on request
//! or restart. It is an API authorization switch and has no effect on
//! encryption at rest.
//!
//! # Security model
//!
//! - The reference password is stored at `sys/unlock_password` as
//!   [`TextCipher`] output under its own derived key.
//! - Candidates are compared in constant time and the decrypted reference is
//!   zeroized after each check.
//! - After [`ThrottlePolicy::max_attempts`] consecutive failures further
//!   attempts are refused for [`ThrottlePolicy::lockout`]. A policy with
//!   `max_attempts == 0` never throttles.

use std::sync::Arc;
use std::time::Duration;

use portal_storage::StorageBackend;
use serde::Serialize;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::crypto::TextCipher;
use crate::error::GateError;

/// Storage key for the encrypted reference password.
const REFERENCE_KEY: &str = "sys/unlock_password";

/// Upper bound on password length in bytes.
const PASSWORD_MAX_LEN: usize = 1024;

/// How failed unlock attempts are throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Consecutive failures before a lockout. `0` disables throttling.
    pub max_attempts: u32,
    /// How long a lockout lasts.
    pub lockout: Duration,
}

impl ThrottlePolicy {
    /// A policy that never refuses an attempt.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            lockout: Duration::ZERO,
        }
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout: Duration::from_secs(60),
        }
    }
}

/// Snapshot returned by [`AccessGate::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStatus {
    pub unlocked: bool,
    /// Whether a reference password exists.
    pub configured: bool,
    /// Seconds until attempts are accepted again, while throttled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Default)]
struct GateState {
    unlocked: bool,
    failures: u32,
    lockout_until: Option<Instant>,
}

impl GateState {
    /// Remaining lockout at `now`, clearing an expired one.
    fn remaining_lockout(&mut self, now: Instant) -> Option<Duration> {
        let until = self.lockout_until?;
        if now < until {
            return Some(until.duration_since(now));
        }
        self.lockout_until = None;
        self.failures = 0;
        None
    }
}

/// Password-protected unlocked/locked switch.
pub struct AccessGate {
    storage: Arc<dyn StorageBackend>,
    cipher: TextCipher,
    policy: ThrottlePolicy,
    state: Mutex<GateState>,
}

impl AccessGate {
    /// Create a locked gate.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        cipher: TextCipher,
        policy: ThrottlePolicy,
    ) -> Self {
        Self {
            storage,
            cipher,
            policy,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Whether a reference password has been stored.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Storage`] if the backend fails.
    pub async fn is_configured(&self) -> Result<bool, GateError> {
        Ok(self.storage.exists(REFERENCE_KEY).await?)
    }

    /// Store the reference password. The gate stays locked.
    ///
    /// # Errors
    ///
    /// - [`GateError::InvalidPassword`] if the password is empty or too long.
    /// - [`GateError::AlreadyInitialized`] if one is already stored.
    pub async fn initialize(&self, password: &str) -> Result<(), GateError> {
        check_password(password)?;

        let _state = self.state.lock().await;
        if self.storage.exists(REFERENCE_KEY).await? {
            return Err(GateError::AlreadyInitialized);
        }
        self.store_reference(password).await?;

        info!("unlock password configured");
        Ok(())
    }

    /// Compare `candidate` with the reference and unlock on a match.
    ///
    /// A mismatch leaves the unlocked flag as it was.
    ///
    /// # Errors
    ///
    /// - [`GateError::Throttled`] while a lockout is in effect.
    /// - [`GateError::NotInitialized`] if no reference password exists.
    /// - [`GateError::IncorrectPassword`] on a mismatch.
    /// - [`GateError::Crypto`] if the reference cannot be decrypted.
    pub async fn submit_password(&self, candidate: &str) -> Result<(), GateError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(remaining) = state.remaining_lockout(now) {
            return Err(GateError::Throttled {
                retry_after_secs: ceil_secs(remaining),
            });
        }

        if self.matches_reference(candidate).await? {
            state.unlocked = true;
            state.failures = 0;
            info!("access gate unlocked");
            return Ok(());
        }

        self.record_failure(&mut state, now);
        Err(GateError::IncorrectPassword)
    }

    /// Lock the gate.
    pub async fn lock(&self) {
        let mut state = self.state.lock().await;
        if state.unlocked {
            info!("access gate locked");
        }
        state.unlocked = false;
    }

    /// Whether restricted documents are currently accessible.
    pub async fn is_unlocked(&self) -> bool {
        self.state.lock().await.unlocked
    }

    /// Current gate status.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Storage`] if the backend fails.
    pub async fn status(&self) -> Result<GateStatus, GateError> {
        let configured = self.is_configured().await?;
        let mut state = self.state.lock().await;
        let retry_after_secs = state.remaining_lockout(Instant::now()).map(ceil_secs);
        Ok(GateStatus {
            unlocked: state.unlocked,
            configured,
            retry_after_secs,
        })
    }

    /// Replace the reference password. Requires the gate to be unlocked and
    /// `current` to match.
    ///
    /// # Errors
    ///
    /// - [`GateError::Locked`] if the gate is locked.
    /// - [`GateError::InvalidPassword`] if `new` is empty or too long.
    /// - [`GateError::Throttled`] / [`GateError::IncorrectPassword`] as for
    ///   [`AccessGate::submit_password`].
    pub async fn change_password(&self, current: &str, new: &str) -> Result<(), GateError> {
        let mut state = self.state.lock().await;
        if !state.unlocked {
            return Err(GateError::Locked);
        }
        check_password(new)?;

        let now = Instant::now();
        if let Some(remaining) = state.remaining_lockout(now) {
            return Err(GateError::Throttled {
                retry_after_secs: ceil_secs(remaining),
            });
        }
        if !self.matches_reference(current).await? {
            self.record_failure(&mut state, now);
            return Err(GateError::IncorrectPassword);
        }

        self.store_reference(new).await?;
        state.failures = 0;
        info!("unlock password changed");
        Ok(())
    }

    async fn matches_reference(&self, candidate: &str) -> Result<bool, GateError> {
        let sealed = self
            .storage
            .get(REFERENCE_KEY)
            .await?
            .ok_or(GateError::NotInitialized)?;
        let sealed = String::from_utf8_lossy(&sealed);
        let reference = Zeroizing::new(self.cipher.decrypt(&sealed)?);
        Ok(bool::from(candidate.as_bytes().ct_eq(reference.as_bytes())))
    }

    async fn store_reference(&self, password: &str) -> Result<(), GateError> {
        let sealed = self.cipher.encrypt(password)?;
        self.storage.put(REFERENCE_KEY, sealed.as_bytes()).await?;
        Ok(())
    }

    fn record_failure(&self, state: &mut GateState, now: Instant) {
        state.failures = state.failures.saturating_add(1);
        if self.policy.max_attempts > 0 && state.failures >= self.policy.max_attempts {
            state.lockout_until = Some(now + self.policy.lockout);
            state.failures = 0;
            warn!(
                lockout_secs = self.policy.lockout.as_secs(),
                "too many failed unlock attempts, throttling"
            );
        } else {
            warn!(failures = state.failures, "incorrect unlock password");
        }
    }
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn check_password(password: &str) -> Result<(), GateError> {
    if password.is_empty() {
        return Err(GateError::InvalidPassword {
            reason: "password must not be empty".to_owned(),
        });
    }
    if password.len() > PASSWORD_MAX_LEN {
        return Err(GateError::InvalidPassword {
            reason: format!("password exceeds {PASSWORD_MAX_LEN} bytes"),
        });
    }
    Ok(())
}

/// Whole seconds, rounded up, never zero.
fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs().saturating_add(u64::from(d.subsec_nanos() > 0));
    secs.max(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use portal_storage::MemoryBackend;

    use super::*;
    use crate::crypto::CipherPurpose;
    use crate::keyfile::KeyMaterial;

    fn gate_with(policy: ThrottlePolicy) -> (MemoryBackend, AccessGate) {
        let backend = MemoryBackend::new();
        let cipher = KeyMaterial::generate()
            .cipher(CipherPurpose::UnlockPassword)
            .unwrap();
        let gate = AccessGate::new(Arc::new(backend.clone()), cipher, policy);
        (backend, gate)
    }

    async fn configured(policy: ThrottlePolicy) -> AccessGate {
        let (_backend, gate) = gate_with(policy);
        gate.initialize("opensesame").await.unwrap();
        gate
    }

    #[tokio::test]
    async fn starts_locked_and_unconfigured() {
        let (_backend, gate) = gate_with(ThrottlePolicy::default());
        assert!(!gate.is_unlocked().await);
        assert_eq!(
            gate.status().await.unwrap(),
            GateStatus {
                unlocked: false,
                configured: false,
                retry_after_secs: None,
            }
        );
        assert!(matches!(
            gate.submit_password("anything").await,
            Err(GateError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn reference_is_stored_encrypted() {
        let (backend, gate) = gate_with(ThrottlePolicy::default());
        gate.initialize("opensesame").await.unwrap();

        let raw = backend.get(REFERENCE_KEY).await.unwrap().unwrap();
        assert!(!String::from_utf8(raw).unwrap().contains("opensesame"));
        assert!(!gate.is_unlocked().await);
        assert!(matches!(
            gate.initialize("other").await,
            Err(GateError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn empty_password_is_rejected() {
        let (_backend, gate) = gate_with(ThrottlePolicy::default());
        assert!(matches!(
            gate.initialize("").await,
            Err(GateError::InvalidPassword { .. })
        ));
        assert!(!gate.is_configured().await.unwrap());
    }

    #[tokio::test]
    async fn correct_password_unlocks_and_lock_relocks() {
        let gate = configured(ThrottlePolicy::default()).await;
        gate.submit_password("opensesame").await.unwrap();
        assert!(gate.is_unlocked().await);

        gate.lock().await;
        assert!(!gate.is_unlocked().await);
        gate.lock().await;
        assert!(!gate.is_unlocked().await);
    }

    #[tokio::test]
    async fn comparison_is_exact() {
        let gate = configured(ThrottlePolicy::disabled()).await;
        for wrong in ["", "opensesame ", "OpenSesame", "opensesam", "opensesame\n"] {
            assert!(matches!(
                gate.submit_password(wrong).await,
                Err(GateError::IncorrectPassword)
            ));
        }
        assert!(!gate.is_unlocked().await);
    }

    #[tokio::test]
    async fn wrong_password_does_not_relock() {
        let gate = configured(ThrottlePolicy::default()).await;
        gate.submit_password("opensesame").await.unwrap();
        assert!(gate.submit_password("nope").await.is_err());
        assert!(gate.is_unlocked().await);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_throttle_until_lockout_elapses() {
        let policy = ThrottlePolicy {
            max_attempts: 3,
            lockout: Duration::from_secs(30),
        };
        let gate = configured(policy).await;

        for _ in 0..3 {
            assert!(matches!(
                gate.submit_password("nope").await,
                Err(GateError::IncorrectPassword)
            ));
        }
        // Even the right password is refused during the lockout.
        assert!(matches!(
            gate.submit_password("opensesame").await,
            Err(GateError::Throttled {
                retry_after_secs: 30
            })
        ));
        assert_eq!(gate.status().await.unwrap().retry_after_secs, Some(30));

        tokio::time::advance(Duration::from_secs(31)).await;
        gate.submit_password("opensesame").await.unwrap();
        assert!(gate.is_unlocked().await);
        assert_eq!(gate.status().await.unwrap().retry_after_secs, None);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let policy = ThrottlePolicy {
            max_attempts: 2,
            lockout: Duration::from_secs(60),
        };
        let gate = configured(policy).await;

        assert!(gate.submit_password("nope").await.is_err());
        gate.submit_password("opensesame").await.unwrap();
        assert!(matches!(
            gate.submit_password("nope").await,
            Err(GateError::IncorrectPassword)
        ));
        gate.submit_password("opensesame").await.unwrap();
    }

    #[tokio::test]
    async fn disabled_policy_never_throttles() {
        let gate = configured(ThrottlePolicy::disabled()).await;
        for _ in 0..20 {
            assert!(matches!(
                gate.submit_password("nope").await,
                Err(GateError::IncorrectPassword)
            ));
        }
        gate.submit_password("opensesame").await.unwrap();
    }

    #[tokio::test]
    async fn change_password_requires_unlock_and_current_password() {
        let gate = configured(ThrottlePolicy::default()).await;
        assert!(matches!(
            gate.change_password("opensesame", "new-secret").await,
            Err(GateError::Locked)
        ));

        gate.submit_password("opensesame").await.unwrap();
        assert!(matches!(
            gate.change_password("wrong", "new-secret").await,
            Err(GateError::IncorrectPassword)
        ));
        gate.change_password("opensesame", "new-secret").await.unwrap();

        gate.lock().await;
        assert!(gate.submit_password("opensesame").await.is_err());
        gate.submit_password("new-secret").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_attempts_are_serialized() {
        let gate = Arc::new(configured(ThrottlePolicy::disabled()).await);
        let mut handles = Vec::new();
        for i in 0..16 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                let candidate = if i % 4 == 0 { "opensesame" } else { "nope" };
                gate.submit_password(candidate).await.is_ok()
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 4);
        assert!(gate.is_unlocked().await);
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(29_500)), 30);
        assert_eq!(ceil_secs(Duration::from_secs(30)), 30);
    }
}
