//! Storage key <-> directory name mapping.
//!
//! Keys like `yahoo/AAPL` fold to `yahoo_AAPL`. Characters that would make the
//! fold ambiguous are percent-escaped first, so the mapping is reversible:
//! `%` -> `%25`, `_` -> `%5F`, `\` -> `%5C`, and a leading `.` -> `%2E`
//! (dot-prefixed names are reserved for `.metadata` and `.chunks`).

use super::error::{StorageError, StorageResult};

/// Encode a storage key into a single filesystem-safe directory name.
pub fn encode_key(key: &str) -> StorageResult<String> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "key is empty".into(),
        });
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey {
            key: key.escape_debug().to_string(),
            reason: "key contains a NUL byte".into(),
        });
    }

    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        match ch {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            '\\' => out.push_str("%5C"),
            '.' if i == 0 => out.push_str("%2E"),
            '/' => out.push('_'),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Reverse [`encode_key`]. Returns `None` for names it could not have produced.
pub fn decode_key(dir_name: &str) -> Option<String> {
    if dir_name.is_empty() || dir_name.starts_with('.') {
        return None;
    }

    let mut out = String::with_capacity(dir_name.len());
    let mut chars = dir_name.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '_' => out.push('/'),
            '%' => {
                let code: String = chars.by_ref().take(2).collect();
                match code.as_str() {
                    "25" => out.push('%'),
                    "5F" => out.push('_'),
                    "5C" => out.push('\\'),
                    "2E" if out.is_empty() => out.push('.'),
                    _ => return None,
                }
            }
            '\\' => return None,
            c => out.push(c),
        }
    }
    Some(out)
}
