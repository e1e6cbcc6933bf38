//! Secure random generation and token masking helpers.
//!
//! Raw token values are only ever handed to the caller; the store sees a
//! hash and diagnostics see a masked prefix.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;
const MASK_PREFIX_LEN: usize = 8;

/// Generate an opaque single-use token (256 bits, URL-safe).
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a token for use as a storage key; raw tokens never touch the store.
pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Fill a buffer with cryptographically strong random bytes.
pub(crate) fn fill_bytes(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .context("failed to generate random bytes")
}

/// Masked form of a token for diagnostics: a short prefix, never the value.
pub(crate) fn mask(token: &str) -> String {
    let prefix: String = token.chars().take(MASK_PREFIX_LEN).collect();
    format!("{prefix}…")
}
