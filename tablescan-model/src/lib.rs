//! Core data model definitions shared across tablescan crates.
#![allow(missing_docs)]

pub mod error;
pub mod keys;
pub mod row;

pub use error::{ModelError, Result as ModelResult};
pub use keys::{
    EntityKey, MAX_CHAR, MAX_KEY_BYTES, MIN_SELECT_COLUMNS, PARTITION_KEY,
    ROW_KEY, compare_keys, key_max, key_min, prefix_upper_bound,
    validate_key,
};
pub use row::TableRow;
