//! Hook bearer-token generation and verification (§4.4).

use crate::error::{HookError, Result};
use rand::RngCore as _;
use std::os::unix::fs::PermissionsExt as _;
use std::path::Path;

/// Generate a fresh 32-byte hex token and write it to `path` with mode
/// `0600`, rotating it on every daemon start per the original spec.
pub fn generate_and_write(path: &Path) -> Result<String> {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &token)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

    Ok(token)
}

/// Check an `Authorization: Bearer <token>` header value against `expected`.
/// Missing header, malformed scheme, or mismatched token all map to the same
/// `401` outcome — the original spec doesn't distinguish them.
pub fn verify_bearer(header: Option<&str>, expected: &str) -> Result<()> {
    let Some(header) = header else {
        return Err(HookError::Unauthorized.into());
    };
    let Some(token) = header.strip_prefix("Bearer ") else {
        return Err(HookError::Unauthorized.into());
    };
    if constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(HookError::Unauthorized.into())
    }
}

/// Constant-time comparison so token verification doesn't leak timing
/// information about how many leading bytes matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_is_64_hex_chars_and_mode_0600() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".hook-token");
        let token = generate_and_write(&path).unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn verify_bearer_rejects_missing_or_wrong_token() {
        assert!(verify_bearer(None, "secret").is_err());
        assert!(verify_bearer(Some("Bearer wrong"), "secret").is_err());
        assert!(verify_bearer(Some("Basic secret"), "secret").is_err());
        assert!(verify_bearer(Some("Bearer secret"), "secret").is_ok());
    }
}
