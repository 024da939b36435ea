//! Engine configuration types.
//!
//! These structures are loaded by `tablescan-config` and handed to the
//! scanner, the scan service and the worker pool. Every field has a default so
//! partial configuration payloads are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::store::MAX_TAKE_COUNT;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TableScanConfig {
    /// Paging and expansion knobs for prefix scans.
    pub prefix_scan: PrefixScanConfig,
    /// Worker pool sizing and redelivery policy.
    pub worker: WorkerConfig,
}

impl TableScanConfig {
    pub fn validate(&self) -> Result<()> {
        self.prefix_scan.validate()?;
        self.worker.validate()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrefixScanConfig {
    /// Page size used for range queries. Must be in `1..=1000`.
    pub take_count: usize,
    /// Issue partition key queries for keys straddling a page boundary.
    pub expand_partition_keys: bool,
    /// Non-empty pages to gather for the first range query of a step.
    pub segments_per_first_prefix: usize,
    /// Non-empty pages to gather for every later range query.
    pub segments_per_subsequent_prefix: usize,
}

impl Default for PrefixScanConfig {
    fn default() -> Self {
        Self {
            take_count: MAX_TAKE_COUNT,
            expand_partition_keys: true,
            segments_per_first_prefix: 1,
            segments_per_subsequent_prefix: 1,
        }
    }
}

impl PrefixScanConfig {
    pub fn validate(&self) -> Result<()> {
        validate_take_count(self.take_count)?;
        validate_segments(
            self.segments_per_first_prefix,
            self.segments_per_subsequent_prefix,
        )
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks.
    pub workers: usize,
    /// Deliveries allowed before a failing message is poisoned.
    pub max_dequeue_count: u32,
    /// Sleep between polls of an empty queue (milliseconds).
    pub idle_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_dequeue_count: 5,
            idle_poll_ms: 50,
        }
    }
}

impl WorkerConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ScanError::InvalidArgument(
                "worker count must be at least 1".into(),
            ));
        }
        if self.max_dequeue_count == 0 {
            return Err(ScanError::InvalidArgument(
                "max_dequeue_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_take_count(take_count: usize) -> Result<()> {
    if take_count == 0 || take_count > MAX_TAKE_COUNT {
        return Err(ScanError::InvalidArgument(format!(
            "take count {take_count} must be between 1 and {MAX_TAKE_COUNT}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_segments(first: usize, subsequent: usize) -> Result<()> {
    if first == 0 || subsequent == 0 {
        return Err(ScanError::InvalidArgument(format!(
            "segments per prefix must be at least 1 (first {first}, subsequent {subsequent})"
        )));
    }
    Ok(())
}
