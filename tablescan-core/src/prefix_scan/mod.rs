//! Partition-key prefix scan.
//!
//! A table store can only answer equality and range filters, so enumerating
//! every partition key under a prefix is done by repeatedly splitting the key
//! space: a range query discovers a batch of keys, the key straddling the
//! page boundary gets its own equality query, and the remainder is delegated
//! to a child range query one character longer.

pub mod expand;
pub mod scanner;
pub mod step;
pub mod trace;

pub use expand::{expand, increment_prefix};
pub use scanner::{ListRequest, TablePrefixScanner};
pub use step::{QueryParameters, ScanStep, StepKind};
pub use trace::{StepTracer, TraceEntry, TraceOrder, write_json_lines};
