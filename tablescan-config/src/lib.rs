//! Configuration loading for table scans.
//!
//! Settings come from a TOML or JSON file, inline JSON in the environment, or
//! built-in defaults. The binary and embedding services share
//! [`ScanSettings::load_from_env`] so defaults and lookup order stay in one
//! place.

#![allow(missing_docs)]

pub mod settings;
pub mod telemetry;

pub use settings::{ScanSettings, ScanSettingsSource};
pub use telemetry::{DEFAULT_LOG_FILTER, init_tracing};
