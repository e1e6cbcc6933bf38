//! Backup-code generation and normalization.
//!
//! Codes are formatted as two 4-character uppercase hex groups
//! (`A1B2-C3D4`). Verification input is case-insensitive and tolerant of
//! missing or extra separators; both sides compare in the canonical grouped
//! form.

use anyhow::Result;
use std::collections::HashSet;

use crate::random;

const CODE_HEX_LEN: usize = 8;
const GROUP_LEN: usize = 4;

/// Generate `count` unique backup codes.
pub(crate) fn generate_backup_codes(count: usize) -> Result<Vec<String>> {
    let mut seen = HashSet::with_capacity(count);
    let mut codes = Vec::with_capacity(count);
    while codes.len() < count {
        let code = generate_code()?;
        if seen.insert(code.clone()) {
            codes.push(code);
        }
    }
    Ok(codes)
}

fn generate_code() -> Result<String> {
    let mut raw = [0u8; CODE_HEX_LEN / 2];
    random::fill_bytes(&mut raw)?;
    let hex: String = raw.iter().map(|byte| format!("{byte:02X}")).collect();
    Ok(format!("{}-{}", &hex[..GROUP_LEN], &hex[GROUP_LEN..]))
}

/// Normalize user input to the canonical grouped form; `None` when the
/// input cannot be a backup code (wrong length or alphabet).
pub(crate) fn normalize(input: &str) -> Option<String> {
    let hex: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    if hex.len() != CODE_HEX_LEN || !hex.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("{}-{}", &hex[..GROUP_LEN], &hex[GROUP_LEN..]))
}
