//! User record store boundary.
//!
//! Durable account state lives outside this crate; the MFA engine only needs
//! the MFA-related slice of a user record and three mutations. Updates to
//! backup-code lists are read-modify-write; implementations must not lose an
//! update to a concurrent write on the same fields.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// MFA-related slice of a user record.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MfaProfile {
    pub enabled: bool,
    pub secret: Option<String>,
    pub backup_codes: Vec<String>,
}

/// Durable storage of per-subject MFA state.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Load the MFA slice of a subject's record; `None` when the subject has
    /// no record.
    async fn mfa_profile(&self, subject: Uuid) -> anyhow::Result<Option<MfaProfile>>;

    /// Commit an enrollment: set the secret and backup codes and flip
    /// `enabled` on, atomically with each other.
    async fn enable_mfa(
        &self,
        subject: Uuid,
        secret: &str,
        backup_codes: &[String],
    ) -> anyhow::Result<()>;

    /// Clear the secret and backup codes and flip `enabled` off.
    async fn disable_mfa(&self, subject: Uuid) -> anyhow::Result<()>;

    /// Replace the backup-code list wholesale.
    async fn replace_backup_codes(
        &self,
        subject: Uuid,
        backup_codes: &[String],
    ) -> anyhow::Result<()>;
}

/// In-memory [`UserStore`] for tests and local development.
#[derive(Default)]
pub struct MemoryUserStore {
    profiles: Mutex<HashMap<Uuid, MfaProfile>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, MfaProfile>> {
        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn mfa_profile(&self, subject: Uuid) -> anyhow::Result<Option<MfaProfile>> {
        Ok(self.lock().get(&subject).cloned())
    }

    async fn enable_mfa(
        &self,
        subject: Uuid,
        secret: &str,
        backup_codes: &[String],
    ) -> anyhow::Result<()> {
        self.lock().insert(
            subject,
            MfaProfile {
                enabled: true,
                secret: Some(secret.to_string()),
                backup_codes: backup_codes.to_vec(),
            },
        );
        Ok(())
    }

    async fn disable_mfa(&self, subject: Uuid) -> anyhow::Result<()> {
        self.lock().insert(subject, MfaProfile::default());
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        subject: Uuid,
        backup_codes: &[String],
    ) -> anyhow::Result<()> {
        let mut profiles = self.lock();
        let profile = profiles.entry(subject).or_default();
        profile.backup_codes = backup_codes.to_vec();
        Ok(())
    }
}
