//! Attempt guard: sliding-window failure counters over the TTL store.
//!
//! Keyed by subject, source address, and purpose. The guard is policy-free:
//! it counts, increments, and clears; the threshold decision belongs to the
//! caller, which keeps the same counters reusable across TOTP and
//! backup-code throttling.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::TtlStore;

/// What the counted attempts were for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptPurpose {
    Totp,
    BackupCode,
}

impl AttemptPurpose {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::BackupCode => "backup_code",
        }
    }
}

fn attempt_key(subject: Uuid, source: &str, purpose: AttemptPurpose) -> String {
    format!("attempts:{}:{subject}:{source}", purpose.as_str())
}

/// Per-subject, per-source failure counter with a rolling window.
#[derive(Clone)]
pub struct AttemptGuard {
    store: Arc<dyn TtlStore>,
    window: Duration,
}

impl AttemptGuard {
    #[must_use]
    pub fn new(store: Arc<dyn TtlStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// Current failure count inside the window; 0 when absent.
    ///
    /// # Errors
    /// [`Error::StoreUnavailable`] on infrastructure failure, or when the
    /// counter value is corrupt. Corruption must not read as zero; that
    /// would hand back a fresh brute-force budget.
    pub async fn count(
        &self,
        subject: Uuid,
        source: &str,
        purpose: AttemptPurpose,
    ) -> Result<u64> {
        let key = attempt_key(subject, source, purpose);
        let Some(raw) = self.store.get(&key).await.map_err(Error::store)? else {
            return Ok(0);
        };
        std::str::from_utf8(&raw)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or_else(|| Error::store(anyhow::anyhow!("attempt counter is corrupt")))
    }

    /// Record a failed attempt and return the new count.
    ///
    /// The window TTL is set only when the counter is created, so the window
    /// stays anchored to the first failure; an attacker cannot push their
    /// own window forward by failing repeatedly.
    ///
    /// # Errors
    /// [`Error::StoreUnavailable`] on infrastructure failure.
    pub async fn record_failure(
        &self,
        subject: Uuid,
        source: &str,
        purpose: AttemptPurpose,
    ) -> Result<u64> {
        let key = attempt_key(subject, source, purpose);
        self.store
            .incr(&key, self.window)
            .await
            .map_err(Error::store)
    }

    /// Delete the counter, so the next failure starts a fresh window.
    ///
    /// Called on successful verification.
    ///
    /// # Errors
    /// [`Error::StoreUnavailable`] on infrastructure failure.
    pub async fn clear(
        &self,
        subject: Uuid,
        source: &str,
        purpose: AttemptPurpose,
    ) -> Result<()> {
        let key = attempt_key(subject, source, purpose);
        self.store.delete(&key).await.map_err(Error::store)
    }
}
