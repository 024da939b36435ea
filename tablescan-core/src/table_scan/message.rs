//! Queue message formats.
//!
//! A step travels as a flat tagged JSON object:
//!
//! ```json
//! {"t": "pq", "d": 2, "n": 1000, "p": "PA", "lb": "PA", "ub": "PA\uffff"}
//! ```
//!
//! `t` selects the step kind (`s`, `pkq`, `pq`, `es`), `d` is the depth and
//! `n` the page size. The table handle is not serializable, so the enclosing
//! [`TableScanMessage`] carries the table name and the receiver resolves it
//! again.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tablescan_model::TableRow;
use uuid::Uuid;

use crate::error::{Result, ScanError};
use crate::prefix_scan::{QueryParameters, ScanStep, StepKind};

/// Identifies one scan across all of its step messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ScanId(pub Uuid);

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a scan message enumerates its table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TableScanStrategy {
    /// One worker pages through the whole table.
    Serial,
    /// Key space is split into independent step messages.
    PrefixScan,
}

/// Wire form of a [`ScanStep`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum StepPayload {
    #[serde(rename = "s")]
    Start {
        #[serde(rename = "d")]
        depth: u32,
        #[serde(rename = "n")]
        take_count: usize,
        #[serde(rename = "p")]
        prefix: String,
        #[serde(rename = "lb", default, skip_serializing_if = "Option::is_none")]
        lower_bound: Option<String>,
        #[serde(rename = "ub", default, skip_serializing_if = "Option::is_none")]
        upper_bound: Option<String>,
    },
    #[serde(rename = "pkq")]
    PartitionKeyQuery {
        #[serde(rename = "d")]
        depth: u32,
        #[serde(rename = "n")]
        take_count: usize,
        #[serde(rename = "pk")]
        partition_key: String,
        #[serde(rename = "rs", default, skip_serializing_if = "Option::is_none")]
        row_key_skip: Option<String>,
    },
    #[serde(rename = "pq")]
    PrefixQuery {
        #[serde(rename = "d")]
        depth: u32,
        #[serde(rename = "n")]
        take_count: usize,
        #[serde(rename = "p")]
        prefix: String,
        #[serde(rename = "lb")]
        lower_bound: String,
        #[serde(rename = "ub")]
        upper_bound: String,
    },
    #[serde(rename = "es")]
    EntitySegment {
        #[serde(rename = "d")]
        depth: u32,
        #[serde(rename = "n")]
        take_count: usize,
        #[serde(rename = "r")]
        rows: Vec<TableRow>,
    },
}

impl StepPayload {
    pub fn from_step(step: &ScanStep) -> Self {
        let depth = step.depth;
        let take_count = step.parameters.take_count();
        match &step.kind {
            StepKind::Start {
                prefix,
                lower_bound,
                upper_bound,
            } => StepPayload::Start {
                depth,
                take_count,
                prefix: prefix.clone(),
                lower_bound: lower_bound.clone(),
                upper_bound: upper_bound.clone(),
            },
            StepKind::PartitionKeyQuery {
                partition_key,
                row_key_skip,
            } => StepPayload::PartitionKeyQuery {
                depth,
                take_count,
                partition_key: partition_key.clone(),
                row_key_skip: row_key_skip.clone(),
            },
            StepKind::PrefixQuery {
                prefix,
                lower_bound,
                upper_bound,
            } => StepPayload::PrefixQuery {
                depth,
                take_count,
                prefix: prefix.clone(),
                lower_bound: lower_bound.clone(),
                upper_bound: upper_bound.clone(),
            },
            StepKind::EntitySegment { rows } => StepPayload::EntitySegment {
                depth,
                take_count,
                rows: rows.clone(),
            },
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            StepPayload::Start { depth, .. }
            | StepPayload::PartitionKeyQuery { depth, .. }
            | StepPayload::PrefixQuery { depth, .. }
            | StepPayload::EntitySegment { depth, .. } => *depth,
        }
    }

    pub fn take_count(&self) -> usize {
        match self {
            StepPayload::Start { take_count, .. }
            | StepPayload::PartitionKeyQuery { take_count, .. }
            | StepPayload::PrefixQuery { take_count, .. }
            | StepPayload::EntitySegment { take_count, .. } => *take_count,
        }
    }

    /// Rebuild the step against freshly resolved parameters.
    pub fn into_step(self, parameters: Arc<QueryParameters>) -> Result<ScanStep> {
        if self.take_count() != parameters.take_count() {
            return Err(ScanError::MalformedStep(format!(
                "page size {} does not match parameters ({})",
                self.take_count(),
                parameters.take_count()
            )));
        }

        let depth = self.depth();
        let kind = match self {
            StepPayload::Start {
                depth,
                prefix,
                lower_bound,
                upper_bound,
                ..
            } => {
                if depth != 0 {
                    return Err(ScanError::MalformedStep(format!(
                        "start step at depth {depth}"
                    )));
                }
                StepKind::Start {
                    prefix,
                    lower_bound,
                    upper_bound,
                }
            }
            StepPayload::PartitionKeyQuery {
                partition_key,
                row_key_skip,
                ..
            } => StepKind::PartitionKeyQuery {
                partition_key,
                row_key_skip,
            },
            StepPayload::PrefixQuery {
                prefix,
                lower_bound,
                upper_bound,
                ..
            } => StepKind::PrefixQuery {
                prefix,
                lower_bound,
                upper_bound,
            },
            StepPayload::EntitySegment { rows, .. } => {
                StepKind::EntitySegment { rows }
            }
        };

        Ok(ScanStep {
            parameters,
            depth,
            kind,
        })
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Self::deserialize(value)
            .map_err(|e| ScanError::MalformedStep(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ScanError::MalformedStep(e.to_string()))
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Queue envelope around one step of one scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableScanMessage {
    pub started: DateTime<Utc>,
    pub scan_id: ScanId,
    pub table: String,
    pub strategy: TableScanStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
    pub expand_partition_keys: bool,
    pub segments_per_first_prefix: usize,
    pub segments_per_subsequent_prefix: usize,
    /// Opaque settings for the segment sink.
    #[serde(default)]
    pub driver_parameters: serde_json::Value,
    pub step: serde_json::Value,
}

impl TableScanMessage {
    pub fn decode(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| ScanError::MalformedStep(e.to_string()))
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn payload(&self) -> Result<StepPayload> {
        StepPayload::from_value(&self.step)
    }

    /// A sibling message for `step`, inheriting every scan-level field.
    pub fn for_step(&self, step: &ScanStep) -> Result<Self> {
        Ok(Self {
            strategy: TableScanStrategy::PrefixScan,
            step: StepPayload::from_step(step).to_value()?,
            ..self.clone()
        })
    }

    /// `"step-"` followed by the hex SHA-256 of the step payload.
    pub fn step_id(&self) -> Result<String> {
        let canonical = serde_json::to_string(&self.step)?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(format!("step-{}", hex::encode(digest)))
    }
}
