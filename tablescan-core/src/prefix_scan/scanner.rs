use std::sync::Arc;

use tablescan_model::TableRow;
use tracing::{Instrument, debug, info_span};

use super::expand::{expand, expand_start};
use super::step::{QueryParameters, ScanStep, StepKind};
use crate::config::PrefixScanConfig;
use crate::error::Result;
use crate::store::TableStore;

/// Options for a single listing call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: String,
    /// Exclusive lower partition key bound.
    pub lower_bound: Option<String>,
    /// Exclusive upper partition key bound.
    pub upper_bound: Option<String>,
    pub select: Option<Vec<String>>,
    pub take_count: usize,
    pub expand_partition_keys: bool,
    pub segments_per_first_prefix: usize,
    pub segments_per_subsequent_prefix: usize,
}

impl ListRequest {
    pub fn new(prefix: impl Into<String>, config: &PrefixScanConfig) -> Self {
        Self {
            prefix: prefix.into(),
            lower_bound: None,
            upper_bound: None,
            select: None,
            take_count: config.take_count,
            expand_partition_keys: config.expand_partition_keys,
            segments_per_first_prefix: config.segments_per_first_prefix,
            segments_per_subsequent_prefix: config
                .segments_per_subsequent_prefix,
        }
    }

    pub fn with_bounds(
        mut self,
        lower_bound: Option<String>,
        upper_bound: Option<String>,
    ) -> Self {
        self.lower_bound = lower_bound;
        self.upper_bound = upper_bound;
        self
    }

    pub fn with_select(mut self, select: Option<Vec<String>>) -> Self {
        self.select = select;
        self
    }

    pub fn with_take_count(mut self, take_count: usize) -> Self {
        self.take_count = take_count;
        self
    }

    pub fn with_expand_partition_keys(mut self, expand: bool) -> Self {
        self.expand_partition_keys = expand;
        self
    }

    pub fn with_segments_per_prefix(
        mut self,
        first: usize,
        subsequent: usize,
    ) -> Self {
        self.segments_per_first_prefix = first;
        self.segments_per_subsequent_prefix = subsequent;
        self
    }

    /// Validated parameters plus the root step for this request.
    pub fn into_start_step(
        self,
        table: Arc<dyn TableStore>,
    ) -> Result<ScanStep> {
        let parameters = QueryParameters::new(table, self.select, self.take_count)?
            .with_expand_partition_keys(self.expand_partition_keys)
            .with_segments_per_prefix(
                self.segments_per_first_prefix,
                self.segments_per_subsequent_prefix,
            )?;
        Ok(ScanStep::start(
            Arc::new(parameters),
            self.prefix,
            self.lower_bound,
            self.upper_bound,
        ))
    }
}

/// Lists every row under a partition key prefix within one process.
///
/// Steps are drained from an explicit stack, depth first. Any error aborts
/// the call; no partial results are returned.
#[derive(Clone, Debug, Default)]
pub struct TablePrefixScanner {
    config: PrefixScanConfig,
}

impl TablePrefixScanner {
    pub fn new(config: PrefixScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PrefixScanConfig {
        &self.config
    }

    /// A request seeded with this scanner's defaults.
    pub fn request(&self, prefix: impl Into<String>) -> ListRequest {
        ListRequest::new(prefix, &self.config)
    }

    pub async fn list(
        &self,
        table: Arc<dyn TableStore>,
        prefix: &str,
    ) -> Result<Vec<TableRow>> {
        self.list_with(table, self.request(prefix)).await
    }

    pub async fn list_with(
        &self,
        table: Arc<dyn TableStore>,
        request: ListRequest,
    ) -> Result<Vec<TableRow>> {
        let segments = self.list_segments(table, request).await?;
        Ok(segments.into_iter().flatten().collect())
    }

    /// Terminal segments in the order they were produced.
    pub async fn list_segments(
        &self,
        table: Arc<dyn TableStore>,
        request: ListRequest,
    ) -> Result<Vec<Vec<TableRow>>> {
        let span = info_span!(
            "prefix_scan",
            table = table.name(),
            prefix = %request.prefix
        );
        let start = request.into_start_step(table)?;
        drain(start).instrument(span).await
    }
}

async fn drain(start: ScanStep) -> Result<Vec<Vec<TableRow>>> {
    let mut stack = expand_start(&start)?;
    stack.reverse();

    let mut segments = Vec::new();
    let mut expanded = 0usize;

    while let Some(step) = stack.pop() {
        if let StepKind::EntitySegment { rows } = step.kind {
            segments.push(rows);
            continue;
        }

        let mut children = expand(&step).await?;
        expanded += 1;
        children.reverse();
        stack.extend(children);
    }

    debug!(
        steps = expanded,
        segments = segments.len(),
        rows = segments.iter().map(Vec::len).sum::<usize>(),
        "prefix scan drained"
    );

    Ok(segments)
}
