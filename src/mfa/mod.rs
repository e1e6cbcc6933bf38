//! MFA enrollment and verification engine.
//!
//! State machine per subject over two persistent states, `disabled` and
//! `enabled`, bridged by a transient enrollment session held in the TTL
//! store under a setup token:
//!
//! ```text
//! disabled --generate_setup--> enrolling --verify_setup(code)--> enabled
//! enrolling --expiry (10 min, no verify)--> disabled
//! enabled --disable(code)--> disabled
//! ```
//!
//! Security boundaries:
//! - The secret and backup codes are committed to the user record together;
//!   an abandoned enrollment leaves nothing behind once the session expires.
//! - TOTP and backup-code verification are throttled per subject and source
//!   address (5 failures per 15 minutes by default).
//! - Backup codes are single-use; a successful verification persists the
//!   shortened list before returning.

pub(crate) mod backup;
pub(crate) mod totp;

use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::guard::{AttemptGuard, AttemptPurpose};
use crate::random;
use crate::store::TtlStore;
use crate::token::{TokenKind, TokenPayload, TokenService};
use crate::users::{MfaProfile, UserStore};

/// Everything the user needs to finish enrollment.
#[derive(Clone, Debug)]
pub struct SetupBundle {
    /// Base32 TOTP seed, for manual entry.
    pub secret: String,
    /// `otpauth://` provisioning URI.
    pub provisioning_uri: String,
    /// QR rendering of the provisioning URI (base64 PNG).
    pub qr_png_base64: String,
    /// Backup codes, shown now but committed only on `verify_setup`.
    pub backup_codes: Vec<String>,
    /// Opaque handle for `verify_setup`; expires after 10 minutes.
    pub setup_token: String,
}

/// Outcome of a backup-code verification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackupCodeCheck {
    pub ok: bool,
    /// Codes left after this verification; callers should warn the user
    /// when this drops to 2 or fewer.
    pub remaining: usize,
}

/// Pending backup codes live next to the enrollment session, keyed by the
/// same setup token.
fn setup_codes_key(setup_token: &str) -> String {
    format!("mfa_setup_codes:{}", random::hash_token(setup_token))
}

/// MFA enrollment and verification engine.
#[derive(Clone)]
pub struct MfaService {
    tokens: TokenService,
    store: Arc<dyn TtlStore>,
    users: Arc<dyn UserStore>,
    guard: AttemptGuard,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl MfaService {
    #[must_use]
    pub fn new(
        store: Arc<dyn TtlStore>,
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        config: CoreConfig,
    ) -> Self {
        Self {
            tokens: TokenService::new(store.clone(), clock.clone()),
            guard: AttemptGuard::new(store.clone(), config.attempt_window()),
            store,
            users,
            audit,
            clock,
            config,
        }
    }

    /// Begin enrollment: generate a secret and backup codes and stash both
    /// under a setup token for 10 minutes.
    ///
    /// Nothing is committed to the user record yet; an abandoned enrollment
    /// disappears when the session expires.
    ///
    /// # Errors
    /// [`Error::AlreadyEnabled`] when the subject already has MFA enabled;
    /// [`Error::IssueFailed`] / [`Error::StoreUnavailable`] on store failure.
    pub async fn generate_setup(&self, subject: Uuid, label: &str) -> Result<SetupBundle> {
        let profile = self
            .users
            .mfa_profile(subject)
            .await
            .map_err(Error::store)?;
        if profile.is_some_and(|profile| profile.enabled) {
            return Err(Error::AlreadyEnabled);
        }

        let seed = totp::generate_seed().map_err(Error::store)?;
        let totp = totp::from_seed(seed, self.config.issuer(), label).map_err(Error::store)?;
        let secret = totp.get_secret_base32();
        let provisioning_uri = totp.get_url();
        let qr_png_base64 = totp
            .get_qr_base64()
            .map_err(|err| Error::store(anyhow::anyhow!("QR generation failed: {err}")))?;

        let backup_codes = backup::generate_backup_codes(self.config.backup_code_count())
            .map_err(Error::store)?;

        let setup_token = self
            .tokens
            .issue(
                subject,
                TokenPayload::MfaSetup {
                    user_id: subject,
                    secret: secret.clone(),
                },
            )
            .await?;

        let codes_value =
            serde_json::to_vec(&backup_codes).map_err(|err| Error::IssueFailed(err.into()))?;
        self.store
            .put(
                &setup_codes_key(&setup_token),
                &codes_value,
                TokenKind::MfaSetup.ttl(),
            )
            .await
            .map_err(Error::IssueFailed)?;

        self.audit.record(AuditEvent::new(
            "mfa_enroll_start",
            subject,
            AuditOutcome::Success,
        ));

        Ok(SetupBundle {
            secret,
            provisioning_uri,
            qr_png_base64,
            backup_codes,
            setup_token,
        })
    }

    /// Confirm enrollment with a first TOTP code; commits the secret and
    /// backup codes to the user record and returns the codes one final time.
    ///
    /// A wrong code leaves the session intact so the user can retry within
    /// the session's lifetime.
    ///
    /// # Errors
    /// [`Error::InvalidSetupToken`] when the session is absent, expired, or
    /// bound to a different subject; [`Error::InvalidTotpCode`] on a wrong
    /// code; [`Error::BackupCodesNotFound`] when the session outlived its
    /// codes; [`Error::AlreadyEnabled`] when MFA got enabled in the
    /// meantime; [`Error::StoreUnavailable`] on store failure.
    pub async fn verify_setup(
        &self,
        setup_token: &str,
        code: &str,
        subject: Uuid,
    ) -> Result<Vec<String>> {
        let profile = self
            .users
            .mfa_profile(subject)
            .await
            .map_err(Error::store)?;
        if profile.is_some_and(|profile| profile.enabled) {
            return Err(Error::AlreadyEnabled);
        }

        let Some(record) = self.tokens.peek(TokenKind::MfaSetup, setup_token).await? else {
            return Err(Error::InvalidSetupToken);
        };
        // Bind the session to the caller; prevents token substitution
        // across concurrent enrollments.
        if record.subject != subject {
            return Err(Error::InvalidSetupToken);
        }
        let TokenPayload::MfaSetup { secret, .. } = record.payload else {
            return Err(Error::InvalidSetupToken);
        };

        let totp = totp::build(&secret, self.config.issuer(), "enrollment").map_err(Error::store)?;
        if !totp.check(code.trim(), self.clock.unix_timestamp()) {
            self.audit.record(AuditEvent::new(
                "mfa_enroll_confirm",
                subject,
                AuditOutcome::Failure,
            ));
            return Err(Error::InvalidTotpCode);
        }

        let codes_key = setup_codes_key(setup_token);
        let Some(raw_codes) = self.store.get(&codes_key).await.map_err(Error::store)? else {
            return Err(Error::BackupCodesNotFound);
        };
        let backup_codes: Vec<String> =
            serde_json::from_slice(&raw_codes).map_err(|_| Error::BackupCodesNotFound)?;

        // Commit; this is the transition to `enabled`.
        self.users
            .enable_mfa(subject, &secret, &backup_codes)
            .await
            .map_err(Error::store)?;

        // Cleanup is best-effort: leftovers expire with the session TTL.
        if let Err(err) = self
            .tokens
            .verify_and_consume(TokenKind::MfaSetup, setup_token)
            .await
        {
            warn!(subject = %subject, error = %err, "failed to consume setup token after commit");
        }
        if let Err(err) = self.store.delete(&codes_key).await {
            warn!(subject = %subject, error = %err, "failed to delete pending backup codes");
        }

        self.audit.record(AuditEvent::new(
            "mfa_enroll_confirm",
            subject,
            AuditOutcome::Success,
        ));
        Ok(backup_codes)
    }

    /// Verify a TOTP code at authentication time.
    ///
    /// A wrong code is a normal `Ok(false)` return, not an error; only
    /// precondition violations raise.
    ///
    /// # Errors
    /// [`Error::MfaNotEnabled`] when the subject has no committed secret;
    /// [`Error::RateLimitExceeded`] once the window's failure budget is
    /// spent; [`Error::StoreUnavailable`] on store failure.
    pub async fn verify_totp(&self, subject: Uuid, code: &str, source: &str) -> Result<bool> {
        let secret = self.enabled_secret(subject).await?;
        self.check_budget(subject, source, AttemptPurpose::Totp)
            .await?;

        let totp = totp::build(&secret, self.config.issuer(), "verification")
            .map_err(Error::store)?;
        if totp.check(code.trim(), self.clock.unix_timestamp()) {
            self.guard
                .clear(subject, source, AttemptPurpose::Totp)
                .await?;
            self.audit.record(
                AuditEvent::new("mfa_totp_verify", subject, AuditOutcome::Success)
                    .with_source(source),
            );
            Ok(true)
        } else {
            self.guard
                .record_failure(subject, source, AttemptPurpose::Totp)
                .await?;
            self.audit.record(
                AuditEvent::new("mfa_totp_verify", subject, AuditOutcome::Failure)
                    .with_source(source),
            );
            Ok(false)
        }
    }

    /// Verify a backup code, consuming it on success.
    ///
    /// # Errors
    /// [`Error::MfaNotEnabled`], [`Error::RateLimitExceeded`] as for
    /// [`Self::verify_totp`]; [`Error::InvalidBackupCode`] when the input
    /// cannot be a backup code at all (still counted as a failed attempt);
    /// [`Error::StoreUnavailable`] on store failure.
    pub async fn verify_backup_code(
        &self,
        subject: Uuid,
        code: &str,
        source: &str,
    ) -> Result<BackupCodeCheck> {
        let profile = self.enabled_profile(subject).await?;
        self.check_budget(subject, source, AttemptPurpose::BackupCode)
            .await?;

        let Some(normalized) = backup::normalize(code) else {
            self.guard
                .record_failure(subject, source, AttemptPurpose::BackupCode)
                .await?;
            self.audit.record(
                AuditEvent::new("mfa_backup_verify", subject, AuditOutcome::Failure)
                    .with_source(source),
            );
            return Err(Error::InvalidBackupCode);
        };

        let position = profile
            .backup_codes
            .iter()
            .position(|candidate| candidate == &normalized);
        match position {
            Some(index) => {
                let mut remaining_codes = profile.backup_codes;
                remaining_codes.remove(index);
                // Persist the shortened list before reporting success.
                self.users
                    .replace_backup_codes(subject, &remaining_codes)
                    .await
                    .map_err(Error::store)?;
                self.guard
                    .clear(subject, source, AttemptPurpose::BackupCode)
                    .await?;
                self.audit.record(
                    AuditEvent::new("mfa_backup_verify", subject, AuditOutcome::Success)
                        .with_source(source),
                );
                Ok(BackupCodeCheck {
                    ok: true,
                    remaining: remaining_codes.len(),
                })
            }
            None => {
                self.guard
                    .record_failure(subject, source, AttemptPurpose::BackupCode)
                    .await?;
                self.audit.record(
                    AuditEvent::new("mfa_backup_verify", subject, AuditOutcome::Failure)
                        .with_source(source),
                );
                Ok(BackupCodeCheck {
                    ok: false,
                    remaining: profile.backup_codes.len(),
                })
            }
        }
    }

    /// Disable MFA; requires a currently-valid TOTP code. The only path back
    /// to `disabled` from `enabled`.
    ///
    /// # Errors
    /// [`Error::InvalidTotpCode`] on a wrong code, plus everything
    /// [`Self::verify_totp`] can raise.
    pub async fn disable(&self, subject: Uuid, code: &str, source: &str) -> Result<()> {
        if !self.verify_totp(subject, code, source).await? {
            return Err(Error::InvalidTotpCode);
        }
        self.users
            .disable_mfa(subject)
            .await
            .map_err(Error::store)?;
        // Counters for this source are cleared here; counters keyed to other
        // source addresses expire with their own window.
        self.guard
            .clear(subject, source, AttemptPurpose::BackupCode)
            .await?;
        self.audit.record(
            AuditEvent::new("mfa_disable", subject, AuditOutcome::Success).with_source(source),
        );
        Ok(())
    }

    /// Replace the whole backup-code list; requires a currently-valid TOTP
    /// code.
    ///
    /// # Errors
    /// [`Error::InvalidTotpCode`] on a wrong code, plus everything
    /// [`Self::verify_totp`] can raise.
    pub async fn regenerate_backup_codes(
        &self,
        subject: Uuid,
        code: &str,
        source: &str,
    ) -> Result<Vec<String>> {
        if !self.verify_totp(subject, code, source).await? {
            return Err(Error::InvalidTotpCode);
        }
        let backup_codes = backup::generate_backup_codes(self.config.backup_code_count())
            .map_err(Error::store)?;
        self.users
            .replace_backup_codes(subject, &backup_codes)
            .await
            .map_err(Error::store)?;
        self.audit.record(
            AuditEvent::new("mfa_backup_regenerate", subject, AuditOutcome::Success)
                .with_source(source),
        );
        Ok(backup_codes)
    }

    async fn enabled_profile(&self, subject: Uuid) -> Result<MfaProfile> {
        let profile = self
            .users
            .mfa_profile(subject)
            .await
            .map_err(Error::store)?;
        match profile {
            Some(profile) if profile.enabled => Ok(profile),
            _ => Err(Error::MfaNotEnabled),
        }
    }

    async fn enabled_secret(&self, subject: Uuid) -> Result<String> {
        let profile = self.enabled_profile(subject).await?;
        profile.secret.ok_or(Error::MfaNotEnabled)
    }

    async fn check_budget(
        &self,
        subject: Uuid,
        source: &str,
        purpose: AttemptPurpose,
    ) -> Result<()> {
        let count = self.guard.count(subject, source, purpose).await?;
        if count >= self.config.max_attempts() {
            self.audit.record(
                AuditEvent::new(
                    match purpose {
                        AttemptPurpose::Totp => "mfa_totp_verify",
                        AttemptPurpose::BackupCode => "mfa_backup_verify",
                    },
                    subject,
                    AuditOutcome::RateLimited,
                )
                .with_source(source),
            );
            return Err(Error::RateLimitExceeded);
        }
        Ok(())
    }
}
