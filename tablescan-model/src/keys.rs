//! Partition/row key ordering.
//!
//! Table stores compare keys by UTF-16 code unit, not by code point. The two
//! orders disagree once a supplementary-plane character (encoded as a
//! surrogate pair, `D800..=DFFF`) meets a BMP character at or above `U+E000`:
//! in UTF-16 order the surrogate pair sorts first, in Rust's `str` order it
//! sorts last. Every comparison that mirrors a store range filter must go
//! through [`compare_keys`].

use std::cmp::Ordering;

use crate::error::{ModelError, Result};

/// Column name of the partition key.
pub const PARTITION_KEY: &str = "PartitionKey";

/// Column name of the row key.
pub const ROW_KEY: &str = "RowKey";

/// Columns every projection must carry so rows can be re-identified.
pub const MIN_SELECT_COLUMNS: [&str; 2] = [PARTITION_KEY, ROW_KEY];

/// Largest UTF-16 code unit that can be written as a Rust `char`.
pub const MAX_CHAR: char = '\u{FFFF}';

/// Upper size limit for a single key, in UTF-8 bytes.
pub const MAX_KEY_BYTES: usize = 1024;

/// Compare two keys by UTF-16 code unit.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

/// The larger of two keys in UTF-16 order.
pub fn key_max<'a>(a: &'a str, b: &'a str) -> &'a str {
    if compare_keys(a, b) == Ordering::Greater { a } else { b }
}

/// The smaller of two keys in UTF-16 order.
pub fn key_min<'a>(a: &'a str, b: &'a str) -> &'a str {
    if compare_keys(a, b) == Ordering::Less { a } else { b }
}

/// Exclusive upper bound covering every key that starts with `prefix`.
pub fn prefix_upper_bound(prefix: &str) -> String {
    let mut bound = String::with_capacity(prefix.len() + MAX_CHAR.len_utf8());
    bound.push_str(prefix);
    bound.push(MAX_CHAR);
    bound
}

/// Reject keys the store would refuse to persist.
pub fn validate_key(key: &str) -> Result<()> {
    if key.len() > MAX_KEY_BYTES {
        return Err(ModelError::InvalidKey {
            key: key.chars().take(32).collect(),
            reason: "key exceeds 1 KiB",
        });
    }

    if key.chars().any(|c| matches!(c, '/' | '\\' | '#' | '?')) {
        return Err(ModelError::InvalidKey {
            key: key.to_string(),
            reason: "key contains a reserved character",
        });
    }

    // Range scans bound every prefix by `prefix + MAX_CHAR`, so keys holding
    // it cannot be enumerated.
    if key.contains(MAX_CHAR) {
        return Err(ModelError::InvalidKey {
            key: key.escape_unicode().to_string(),
            reason: "key contains U+FFFF",
        });
    }

    if key.chars().any(char::is_control) {
        return Err(ModelError::InvalidKey {
            key: key.escape_debug().to_string(),
            reason: "key contains a control character",
        });
    }

    Ok(())
}

/// Fully qualified row identity, ordered the way the store orders rows.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityKey {
    pub partition_key: String,
    pub row_key: String,
}

impl EntityKey {
    pub fn new(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }
}

impl Ord for EntityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.partition_key, &other.partition_key)
            .then_with(|| compare_keys(&self.row_key, &other.row_key))
    }
}

impl PartialOrd for EntityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.partition_key, self.row_key)
    }
}
