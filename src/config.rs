//! Core configuration.
//!
//! Token lifetimes are fixed per kind (see `token`); what varies by
//! deployment is the TOTP issuer shown in authenticator apps and the
//! attempt-throttling policy.

use std::time::Duration;

const DEFAULT_ISSUER: &str = "OmnisecAI";
const DEFAULT_MAX_ATTEMPTS: u64 = 5;
const DEFAULT_ATTEMPT_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_BACKUP_CODE_COUNT: usize = 10;

const ENV_TOTP_ISSUER: &str = "OMNISEC_AUTH_TOTP_ISSUER";
const ENV_MAX_ATTEMPTS: &str = "OMNISEC_AUTH_MAX_ATTEMPTS";
const ENV_ATTEMPT_WINDOW_SECONDS: &str = "OMNISEC_AUTH_ATTEMPT_WINDOW_SECONDS";
const ENV_BACKUP_CODE_COUNT: &str = "OMNISEC_AUTH_BACKUP_CODE_COUNT";

/// Configuration for the credential core, loaded at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    issuer: String,
    max_attempts: u64,
    attempt_window: Duration,
    backup_code_count: usize,
}

impl CoreConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_window: DEFAULT_ATTEMPT_WINDOW,
            backup_code_count: DEFAULT_BACKUP_CODE_COUNT,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_attempt_window(mut self, window: Duration) -> Self {
        self.attempt_window = window;
        self
    }

    #[must_use]
    pub fn with_backup_code_count(mut self, count: usize) -> Self {
        self.backup_code_count = count;
        self
    }

    /// Issuer string bound into provisioning URIs.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Failed attempts allowed per window before verification is refused.
    #[must_use]
    pub fn max_attempts(&self) -> u64 {
        self.max_attempts
    }

    /// Rolling window for attempt counters.
    #[must_use]
    pub fn attempt_window(&self) -> Duration {
        self.attempt_window
    }

    /// Number of backup codes issued per enrollment.
    #[must_use]
    pub fn backup_code_count(&self) -> usize {
        self.backup_code_count
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for unset or unparsable values.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(issuer) = std::env::var(ENV_TOTP_ISSUER) {
            let issuer = issuer.trim();
            if !issuer.is_empty() {
                config = config.with_issuer(issuer);
            }
        }
        if let Some(max_attempts) = parse_u64_env(ENV_MAX_ATTEMPTS) {
            config = config.with_max_attempts(max_attempts);
        }
        if let Some(seconds) = parse_u64_env(ENV_ATTEMPT_WINDOW_SECONDS) {
            config = config.with_attempt_window(Duration::from_secs(seconds));
        }
        if let Some(count) = parse_u64_env(ENV_BACKUP_CODE_COUNT) {
            if let Ok(count) = usize::try_from(count) {
                config = config.with_backup_code_count(count);
            }
        }
        config
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_u64_env(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|value| value.trim().parse().ok())
}
