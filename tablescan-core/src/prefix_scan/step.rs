use std::{fmt, sync::Arc};

use tablescan_model::{MIN_SELECT_COLUMNS, TableRow};

use crate::config::{validate_segments, validate_take_count};
use crate::error::Result;
use crate::store::TableStore;

/// Immutable settings shared by every step of one scan.
#[derive(Clone)]
pub struct QueryParameters {
    table: Arc<dyn TableStore>,
    select: Option<Vec<String>>,
    take_count: usize,
    expand_partition_keys: bool,
    segments_per_first_prefix: usize,
    segments_per_subsequent_prefix: usize,
}

impl fmt::Debug for QueryParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryParameters")
            .field("table", &self.table.name())
            .field("select", &self.select)
            .field("take_count", &self.take_count)
            .field("expand_partition_keys", &self.expand_partition_keys)
            .field("segments_per_first_prefix", &self.segments_per_first_prefix)
            .field(
                "segments_per_subsequent_prefix",
                &self.segments_per_subsequent_prefix,
            )
            .finish()
    }
}

impl QueryParameters {
    /// Projections are widened with the key columns.
    pub fn new(
        table: Arc<dyn TableStore>,
        select: Option<Vec<String>>,
        take_count: usize,
    ) -> Result<Self> {
        validate_take_count(take_count)?;
        Ok(Self {
            table,
            select: select.map(with_key_columns),
            take_count,
            expand_partition_keys: true,
            segments_per_first_prefix: 1,
            segments_per_subsequent_prefix: 1,
        })
    }

    pub fn with_expand_partition_keys(mut self, expand: bool) -> Self {
        self.expand_partition_keys = expand;
        self
    }

    pub fn with_segments_per_prefix(
        mut self,
        first: usize,
        subsequent: usize,
    ) -> Result<Self> {
        validate_segments(first, subsequent)?;
        self.segments_per_first_prefix = first;
        self.segments_per_subsequent_prefix = subsequent;
        Ok(self)
    }

    pub fn table(&self) -> &Arc<dyn TableStore> {
        &self.table
    }

    pub fn select(&self) -> Option<&[String]> {
        self.select.as_deref()
    }

    pub fn take_count(&self) -> usize {
        self.take_count
    }

    pub fn expand_partition_keys(&self) -> bool {
        self.expand_partition_keys
    }

    pub fn segments_per_first_prefix(&self) -> usize {
        self.segments_per_first_prefix
    }

    pub fn segments_per_subsequent_prefix(&self) -> usize {
        self.segments_per_subsequent_prefix
    }
}

fn with_key_columns(mut select: Vec<String>) -> Vec<String> {
    for column in MIN_SELECT_COLUMNS.iter().rev() {
        if !select.iter().any(|c| c == column) {
            select.insert(0, (*column).to_string());
        }
    }
    select
}

/// One unit of scan work.
#[derive(Clone, Debug)]
pub struct ScanStep {
    pub parameters: Arc<QueryParameters>,
    pub depth: u32,
    pub kind: StepKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StepKind {
    /// Root of a scan. Expands without touching the store.
    Start {
        prefix: String,
        lower_bound: Option<String>,
        upper_bound: Option<String>,
    },
    /// Every row of one partition key, after `row_key_skip` when set.
    PartitionKeyQuery {
        partition_key: String,
        row_key_skip: Option<String>,
    },
    /// Discover partition keys in `(lower_bound, upper_bound)` that start with
    /// `prefix`.
    PrefixQuery {
        prefix: String,
        lower_bound: String,
        upper_bound: String,
    },
    /// Terminal rows.
    EntitySegment { rows: Vec<TableRow> },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Start { .. } => "start",
            StepKind::PartitionKeyQuery { .. } => "partition_key_query",
            StepKind::PrefixQuery { .. } => "prefix_query",
            StepKind::EntitySegment { .. } => "entity_segment",
        }
    }

    /// Whether expanding this step issues store queries.
    pub fn needs_query(&self) -> bool {
        matches!(
            self,
            StepKind::PartitionKeyQuery { .. } | StepKind::PrefixQuery { .. }
        )
    }
}

impl ScanStep {
    pub fn start(
        parameters: Arc<QueryParameters>,
        prefix: impl Into<String>,
        lower_bound: Option<String>,
        upper_bound: Option<String>,
    ) -> Self {
        Self {
            parameters,
            depth: 0,
            kind: StepKind::Start {
                prefix: prefix.into(),
                lower_bound,
                upper_bound,
            },
        }
    }

    /// A step one level below `self`, sharing its parameters.
    pub fn child(&self, kind: StepKind) -> Self {
        Self {
            parameters: Arc::clone(&self.parameters),
            depth: self.depth + 1,
            kind,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Start {
                prefix,
                lower_bound,
                upper_bound,
            } => write!(
                f,
                "start(prefix={prefix:?}, lower={lower_bound:?}, upper={upper_bound:?})"
            ),
            StepKind::PartitionKeyQuery {
                partition_key,
                row_key_skip,
            } => write!(f, "pkq(pk={partition_key:?}, skip={row_key_skip:?})"),
            StepKind::PrefixQuery {
                prefix,
                lower_bound,
                upper_bound,
            } => write!(
                f,
                "pq(prefix={prefix:?}, lower={lower_bound:?}, upper={upper_bound:?})"
            ),
            StepKind::EntitySegment { rows } => {
                write!(f, "segment(rows={})", rows.len())
            }
        }
    }
}
