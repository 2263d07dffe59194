//! Key name validation.
//!
//! Replicated keys must match `^[^_][\w-]{1,255}$`: the first character is
//! anything but an underscore, followed by 1 to 255 word characters or
//! hyphens. Underscore-prefixed names are reserved for non-replicated,
//! internal use (e.g. the remote service's `_all_keys` endpoint).

use crate::error::{StoreError, StoreResult};

/// Maximum number of characters after the leading character.
const MAX_TAIL_LEN: usize = 255;

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Validates a key name, failing with [`StoreError::InvalidKey`] on mismatch.
///
/// Runs before every ledger operation so invalid keys never touch storage.
///
/// # Example
///
/// ```rust
/// use vaultkv_core::check_key;
///
/// assert!(check_key("wallet-info").is_ok());
/// assert!(check_key("_reserved").is_err());
/// assert!(check_key("a").is_err());
/// ```
pub fn check_key(key: &str) -> StoreResult<()> {
    let mut chars = key.chars();

    let Some(first) = chars.next() else {
        return Err(StoreError::invalid_key(key));
    };
    if first == '_' || !is_word_char(first) {
        return Err(StoreError::invalid_key(key));
    }

    let mut tail_len = 0usize;
    for c in chars {
        if !is_word_char(c) {
            return Err(StoreError::invalid_key(key));
        }
        tail_len += 1;
    }

    if tail_len == 0 || tail_len > MAX_TAIL_LEN {
        return Err(StoreError::invalid_key(key));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_word_and_hyphen_keys() {
        for key in ["hello", "wallet-info", "txn2-metadata", "AB", "a-_b9"] {
            assert!(check_key(key).is_ok(), "expected {key:?} to be valid");
        }
    }

    #[test]
    fn rejects_reserved_prefix() {
        assert!(check_key("_reserved").is_err());
        assert!(check_key("_all_keys").is_err());
    }

    #[test]
    fn rejects_short_and_empty() {
        assert!(check_key("").is_err());
        assert!(check_key("a").is_err());
    }

    #[test]
    fn rejects_non_word_characters() {
        for key in ["has space", "sla/sh", "dot.ted", "uni\u{00e9}"] {
            assert!(check_key(key).is_err(), "expected {key:?} to be invalid");
        }
    }

    #[test]
    fn length_boundary() {
        let max = format!("k{}", "a".repeat(255));
        assert!(check_key(&max).is_ok());

        let too_long = format!("k{}", "a".repeat(256));
        assert!(check_key(&too_long).is_err());
    }
}
