//! Single-use token lifecycle.
//!
//! Issues, verifies-and-consumes, and revokes short-lived tokens (password
//! reset, email verification, MFA setup, invitation) on top of the TTL
//! store. A token record exists in the store iff it has not expired and has
//! not been consumed; consumption and expiry are both modeled as deletion,
//! so there is no "used" flag to forget to check.
//!
//! Raw tokens are only returned to the caller. The store is keyed by a
//! SHA-256 hash of the token, and a reverse-lookup record
//! (`subject + kind -> storage key`) answers "is a token of this kind
//! pending" without revealing the token itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::random;
use crate::store::TtlStore;

const PASSWORD_RESET_TTL: Duration = Duration::from_secs(60 * 60);
const EMAIL_VERIFICATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MFA_SETUP_TTL: Duration = Duration::from_secs(10 * 60);
const INVITATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Token categories; each carries a fixed lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    PasswordReset,
    EmailVerification,
    MfaSetup,
    Invitation,
}

impl TokenKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::EmailVerification => "email_verification",
            Self::MfaSetup => "mfa_setup",
            Self::Invitation => "invitation",
        }
    }

    /// Fixed lifetime for tokens of this kind.
    #[must_use]
    pub const fn ttl(self) -> Duration {
        match self {
            Self::PasswordReset => PASSWORD_RESET_TTL,
            Self::EmailVerification => EMAIL_VERIFICATION_TTL,
            Self::MfaSetup => MFA_SETUP_TTL,
            Self::Invitation => INVITATION_TTL,
        }
    }

    /// Storage key for a primary token record. Keys are namespaced per kind
    /// so equal tokens of different kinds can never collide.
    pub(crate) fn storage_key(self, token_hash: &str) -> String {
        format!("token:{}:{token_hash}", self.as_str())
    }

    /// Storage key for the reverse-lookup (pending) record of a subject.
    pub(crate) fn pending_key(self, subject: Uuid) -> String {
        format!("pending:{}:{subject}", self.as_str())
    }
}

/// Kind-specific token payload, returned on successful consumption.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenPayload {
    PasswordReset {
        user_id: Uuid,
        email: String,
    },
    EmailVerification {
        user_id: Uuid,
        email: String,
    },
    MfaSetup {
        user_id: Uuid,
        /// Base32 TOTP seed held only for the duration of enrollment.
        secret: String,
    },
    Invitation {
        org_id: Uuid,
        email: String,
        role: String,
        invited_by: Uuid,
    },
}

impl TokenPayload {
    /// The kind this payload belongs to; issuance derives the namespace from
    /// the payload so a record can never be filed under the wrong kind.
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        match self {
            Self::PasswordReset { .. } => TokenKind::PasswordReset,
            Self::EmailVerification { .. } => TokenKind::EmailVerification,
            Self::MfaSetup { .. } => TokenKind::MfaSetup,
            Self::Invitation { .. } => TokenKind::Invitation,
        }
    }
}

/// Stored form of an outstanding token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct TokenRecord {
    pub kind: TokenKind,
    pub subject: Uuid,
    pub payload: TokenPayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues and consumes single-use tokens.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn TtlStore>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    #[must_use]
    pub fn new(store: Arc<dyn TtlStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Issue a token for `subject`, valid for the payload kind's fixed TTL.
    ///
    /// Writes the primary record and the reverse-lookup record. The raw
    /// token is returned only here and never logged in full.
    ///
    /// # Errors
    /// Returns [`Error::IssueFailed`] when either store write fails; the
    /// caller should treat this as retryable. A half-written pair self-heals
    /// via TTL expiry.
    pub async fn issue(&self, subject: Uuid, payload: TokenPayload) -> Result<String> {
        let kind = payload.kind();
        let token = random::generate_token().map_err(Error::IssueFailed)?;
        let now = self.clock.now();
        let ttl = kind.ttl();
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|err| Error::IssueFailed(anyhow::anyhow!(err)))?;
        let record = TokenRecord {
            kind,
            subject,
            payload,
            created_at: now,
            expires_at,
        };
        let value = serde_json::to_vec(&record)
            .map_err(|err| Error::IssueFailed(anyhow::anyhow!(err)))?;

        let primary_key = kind.storage_key(&random::hash_token(&token));
        self.store
            .put(&primary_key, &value, ttl)
            .await
            .map_err(Error::IssueFailed)?;
        self.store
            .put(&kind.pending_key(subject), primary_key.as_bytes(), ttl)
            .await
            .map_err(Error::IssueFailed)?;

        debug!(
            kind = kind.as_str(),
            subject = %subject,
            token = %random::mask(&token),
            "issued token"
        );
        Ok(token)
    }

    /// Verify a token and consume it, returning its payload.
    ///
    /// Consumption uses the store's atomic take, so a second call with the
    /// same token always fails with [`Error::NotFound`], even under
    /// concurrent duplicate submissions. The reverse-lookup record is
    /// removed alongside the primary record unless a later issue already
    /// repointed it at a newer token, in which case it is left for that
    /// token.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the token never existed, already expired, or
    /// was already consumed (indistinguishable by design);
    /// [`Error::Expired`] when the record outlived its own deadline but the
    /// store had not evicted it yet; [`Error::StoreUnavailable`] on
    /// infrastructure failure.
    pub async fn verify_and_consume(&self, kind: TokenKind, token: &str) -> Result<TokenPayload> {
        let primary_key = kind.storage_key(&random::hash_token(token));
        let Some(raw) = self.store.take(&primary_key).await.map_err(Error::store)? else {
            return Err(Error::NotFound);
        };
        let Ok(record) = serde_json::from_slice::<TokenRecord>(&raw) else {
            warn!(kind = kind.as_str(), "dropping undecodable token record");
            return Err(Error::NotFound);
        };
        if record.kind != kind {
            return Err(Error::NotFound);
        }

        let pending_key = kind.pending_key(record.subject);
        if self.clock.now() > record.expires_at {
            // Defense in depth: the store's TTL should have evicted this.
            self.release_pending(&pending_key, &primary_key).await?;
            return Err(Error::Expired);
        }

        self.release_pending(&pending_key, &primary_key).await?;
        debug!(
            kind = kind.as_str(),
            subject = %record.subject,
            token = %random::mask(token),
            "consumed token"
        );
        Ok(record.payload)
    }

    /// Remove the reverse-lookup record, but only while it still points at
    /// the consumed primary record. After a re-issue the reverse record
    /// belongs to the newer token and must survive consumption of an older
    /// one.
    async fn release_pending(&self, pending_key: &str, primary_key: &str) -> Result<()> {
        let Some(raw) = self.store.get(pending_key).await.map_err(Error::store)? else {
            return Ok(());
        };
        if raw == primary_key.as_bytes() {
            self.store
                .delete(pending_key)
                .await
                .map_err(Error::store)?;
        }
        Ok(())
    }

    /// Load a token record without consuming it.
    ///
    /// Used by MFA enrollment, where a wrong TOTP code must not destroy the
    /// session. Expired records are treated as absent.
    pub(crate) async fn peek(&self, kind: TokenKind, token: &str) -> Result<Option<TokenRecord>> {
        let primary_key = kind.storage_key(&random::hash_token(token));
        let Some(raw) = self.store.get(&primary_key).await.map_err(Error::store)? else {
            return Ok(None);
        };
        let Ok(record) = serde_json::from_slice::<TokenRecord>(&raw) else {
            return Ok(None);
        };
        if record.kind != kind || self.clock.now() > record.expires_at {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Whether `subject` has an outstanding token of `kind`.
    ///
    /// Reads only the reverse-lookup record, so callers can suppress
    /// duplicate issuance without touching the primary record.
    ///
    /// # Errors
    /// [`Error::StoreUnavailable`] on infrastructure failure.
    pub async fn has_pending(&self, kind: TokenKind, subject: Uuid) -> Result<bool> {
        let pending = self
            .store
            .get(&kind.pending_key(subject))
            .await
            .map_err(Error::store)?;
        Ok(pending.is_some())
    }

    /// Best-effort revocation of a subject's outstanding token of `kind`.
    ///
    /// Used when all of a subject's tokens must be invalidated, e.g. after a
    /// password change.
    ///
    /// # Errors
    /// [`Error::StoreUnavailable`] on infrastructure failure.
    pub async fn revoke(&self, kind: TokenKind, subject: Uuid) -> Result<()> {
        let Some(raw) = self
            .store
            .take(&kind.pending_key(subject))
            .await
            .map_err(Error::store)?
        else {
            return Ok(());
        };
        if let Ok(primary_key) = String::from_utf8(raw) {
            self.store.delete(&primary_key).await.map_err(Error::store)?;
        }
        debug!(kind = kind.as_str(), subject = %subject, "revoked pending token");
        Ok(())
    }
}
