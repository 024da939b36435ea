use std::{any::type_name, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tablescan_model::TableRow;
use tracing::{Instrument, debug, debug_span, info, warn};

use super::message::{StepPayload, TableScanMessage, TableScanStrategy};
use super::queue::MessageQueue;
use super::sink::{SegmentContext, SegmentSink};
use super::task_state::{TaskState, TaskStateKey, TaskStateStore};
use crate::error::{Result, ScanError};
use crate::prefix_scan::{QueryParameters, ScanStep, StepKind, expand};
use crate::prefix_scan::expand::expand_start;
use crate::store::{TableFilter, TableQuery, TableResolver};

/// Outcome of processing a single queue message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProcessStatus {
    Complete,
    Retry { error: String },
    Poison { error: String },
}

impl ProcessStatus {
    pub fn needs_retry(&self) -> bool {
        matches!(self, ProcessStatus::Retry { .. })
    }

    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => ProcessStatus::Complete,
            Err(err) if err.is_retryable() => ProcessStatus::Retry {
                error: err.to_string(),
            },
            Err(err) => ProcessStatus::Poison {
                error: err.to_string(),
            },
        }
    }
}

/// Primary contract exposed to worker loops for executing delivered messages.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, body: &str) -> ProcessStatus;
}

/// Executes one table scan message: a single remote expansion whose terminal
/// rows go to the sink and whose other children become new messages.
pub struct TableScanMessageProcessor<Q, T>
where
    Q: MessageQueue + 'static,
    T: TaskStateStore + 'static,
{
    resolver: Arc<dyn TableResolver>,
    queue: Arc<Q>,
    task_states: Arc<T>,
    sink: Arc<dyn SegmentSink>,
}

impl<Q, T> fmt::Debug for TableScanMessageProcessor<Q, T>
where
    Q: MessageQueue + 'static,
    T: TaskStateStore + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableScanMessageProcessor")
            .field("resolver", &"TableResolver")
            .field("queue", &type_name::<Q>())
            .field("task_states", &type_name::<T>())
            .field("sink", &"SegmentSink")
            .finish()
    }
}

impl<Q, T> TableScanMessageProcessor<Q, T>
where
    Q: MessageQueue + 'static,
    T: TaskStateStore + 'static,
{
    pub fn new(
        resolver: Arc<dyn TableResolver>,
        queue: Arc<Q>,
        task_states: Arc<T>,
        sink: Arc<dyn SegmentSink>,
    ) -> Self {
        Self {
            resolver,
            queue,
            task_states,
            sink,
        }
    }

    pub async fn process(&self, body: &str) -> Result<()> {
        let message = TableScanMessage::decode(body)?;
        // Malformed steps are poisoned even when no task state matches them.
        message.payload()?;
        let key = TaskStateKey::new(message.scan_id, message.step_id()?);

        let span = debug_span!(
            "table_scan_message",
            scan_id = %message.scan_id,
            step_id = %key.step_id,
            table = %message.table,
        );

        async {
            if !self.task_states.start(&key).await? {
                debug!("task state already gone, acknowledging");
                return Ok(());
            }

            match message.strategy {
                TableScanStrategy::Serial => {
                    self.process_serial(&message).await?
                }
                TableScanStrategy::PrefixScan => {
                    self.process_prefix_scan(&message).await?
                }
            }

            self.task_states.delete(&key).await?;

            let since_started = Utc::now() - message.started;
            debug!(
                since_started_ms = since_started.num_milliseconds(),
                "table scan message complete"
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    fn segment_context(message: &TableScanMessage) -> SegmentContext {
        SegmentContext {
            scan_id: message.scan_id,
            table: message.table.clone(),
            driver_parameters: message.driver_parameters.clone(),
        }
    }

    async fn process_serial(&self, message: &TableScanMessage) -> Result<()> {
        let StepPayload::Start {
            take_count,
            prefix,
            lower_bound,
            upper_bound,
            ..
        } = message.payload()?
        else {
            return Err(ScanError::MalformedStep(
                "serial scans only carry a start step".into(),
            ));
        };

        if !prefix.is_empty()
            || lower_bound.is_some()
            || upper_bound.is_some()
            || !message.expand_partition_keys
        {
            return Err(ScanError::InvalidArgument(
                "serial scans require an empty prefix, no bounds and partition key expansion".into(),
            ));
        }

        let table = self.resolver.resolve(&message.table).await?;
        let parameters =
            QueryParameters::new(table, message.select.clone(), take_count)?;
        let query = TableQuery::new(TableFilter::All, take_count)
            .with_select(parameters.select().map(<[String]>::to_vec));
        let context = Self::segment_context(message);

        let mut token = None;
        let mut pages = 0usize;
        loop {
            let page = parameters.table().query(&query, token.as_ref()).await?;
            if !page.rows.is_empty() {
                pages += 1;
                self.sink.process_segment(&context, page.rows).await?;
            }
            match page.continuation {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        info!(pages, "serial table scan finished");
        Ok(())
    }

    async fn process_prefix_scan(
        &self,
        message: &TableScanMessage,
    ) -> Result<()> {
        let payload = message.payload()?;
        let table = self.resolver.resolve(&message.table).await?;
        let parameters = QueryParameters::new(
            table,
            message.select.clone(),
            payload.take_count(),
        )?
        .with_expand_partition_keys(message.expand_partition_keys)
        .with_segments_per_prefix(
            message.segments_per_first_prefix,
            message.segments_per_subsequent_prefix,
        )?;
        let step = payload.into_step(Arc::new(parameters))?;

        // Start splits locally; each remote step is expanded once and its
        // children are left for other messages.
        let mut current = vec![step];
        let mut discovered = Vec::new();
        while let Some(step) = current.pop() {
            match &step.kind {
                StepKind::Start { .. } => {
                    let mut children = expand_start(&step)?;
                    children.reverse();
                    current.extend(children);
                }
                StepKind::EntitySegment { .. } => discovered.push(step),
                StepKind::PartitionKeyQuery { .. }
                | StepKind::PrefixQuery { .. } => {
                    discovered.extend(expand(&step).await?);
                }
            }
        }

        self.dispatch_discovered(message, discovered).await
    }

    async fn dispatch_discovered(
        &self,
        message: &TableScanMessage,
        discovered: Vec<ScanStep>,
    ) -> Result<()> {
        let mut rows: Vec<TableRow> = Vec::new();
        let mut segments = 0usize;
        let mut next_messages = Vec::new();

        for step in discovered {
            match step.kind {
                StepKind::EntitySegment { rows: segment } => {
                    segments += 1;
                    rows.extend(segment);
                }
                StepKind::Start { .. } => {
                    return Err(ScanError::UnexpectedResponse(
                        "expansion produced a start step".into(),
                    ));
                }
                StepKind::PartitionKeyQuery { .. }
                | StepKind::PrefixQuery { .. } => {
                    next_messages.push(message.for_step(&step)?);
                }
            }
        }

        debug!(
            segments,
            rows = rows.len(),
            enqueue = next_messages.len(),
            "prefix scan step expanded"
        );

        if !rows.is_empty() {
            self.sink
                .process_segment(&Self::segment_context(message), rows)
                .await?;
        }

        if next_messages.is_empty() {
            return Ok(());
        }

        let mut states = Vec::with_capacity(next_messages.len());
        let mut bodies = Vec::with_capacity(next_messages.len());
        for next in &next_messages {
            let body = next.encode()?;
            let key = TaskStateKey::new(next.scan_id, next.step_id()?);
            states.push(TaskState::new(key, body.clone()));
            bodies.push(body);
        }

        self.task_states.add(&states).await?;
        self.queue.enqueue_many(bodies).await?;
        Ok(())
    }
}

#[async_trait]
impl<Q, T> MessageDispatcher for TableScanMessageProcessor<Q, T>
where
    Q: MessageQueue + 'static,
    T: TaskStateStore + 'static,
{
    async fn dispatch(&self, body: &str) -> ProcessStatus {
        let status = ProcessStatus::from_result(self.process(body).await);
        if let ProcessStatus::Retry { error } | ProcessStatus::Poison { error } =
            &status
        {
            warn!(error = %error, retry = status.needs_retry(), "table scan message failed");
        }
        status
    }
}
