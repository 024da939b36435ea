//! Partition-key prefix scans over sorted, partitioned tables.
//!
//! The store seam only offers equality and range filters; [`prefix_scan`]
//! turns those into a complete enumeration of every row under a partition
//! key prefix, and [`table_scan`] distributes the same work through a
//! message queue.
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod prefix_scan;
pub mod store;
pub mod table_scan;

pub use config::{PrefixScanConfig, TableScanConfig, WorkerConfig};
pub use error::{Result, ScanError};
pub use prefix_scan::{ListRequest, TablePrefixScanner};
pub use store::{TableResolver, TableStore, TableWriter};
pub use tablescan_model::{EntityKey, TableRow};
