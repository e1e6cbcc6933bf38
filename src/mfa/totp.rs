//! TOTP construction and checking.
//!
//! RFC-6238 parameters: SHA-1, 6 digits, 30-second step, skew of 1 step on
//! each side of "now" (codes valid at t-30s, t, or t+30s are accepted).
//! Checks take an explicit timestamp from the injected clock so the window
//! is testable without sleeping.

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

pub(crate) const DIGITS: usize = 6;
pub(crate) const STEP_SECONDS: u64 = 30;
pub(crate) const SKEW_STEPS: u8 = 1;

/// Generate a fresh random TOTP seed.
pub(crate) fn generate_seed() -> Result<Vec<u8>> {
    Secret::generate_secret()
        .to_bytes()
        .map_err(|err| anyhow!("secret generation failed: {err:?}"))
}

/// Build a TOTP instance from raw seed bytes, bound to an issuer and
/// account label. The base32 form handed to the user comes from
/// `TOTP::get_secret_base32`.
pub(crate) fn from_seed(seed: Vec<u8>, issuer: &str, label: &str) -> Result<TOTP> {
    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        SKEW_STEPS,
        STEP_SECONDS,
        seed,
        Some(issuer.to_string()),
        label.to_string(),
    )
    .map_err(|err| anyhow!("failed to build TOTP: {err:?}"))
}

/// Build a TOTP instance from a stored base32 secret.
pub(crate) fn build(secret_base32: &str, issuer: &str, label: &str) -> Result<TOTP> {
    let seed = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|err| anyhow!("invalid TOTP secret: {err:?}"))?;
    from_seed(seed, issuer, label)
}
