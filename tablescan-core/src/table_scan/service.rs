use std::{any::type_name, fmt, sync::Arc};

use chrono::Utc;
use tracing::info;

use super::message::{ScanId, StepPayload, TableScanMessage, TableScanStrategy};
use super::queue::MessageQueue;
use super::task_state::{TaskState, TaskStateKey, TaskStateStore};
use crate::config::{PrefixScanConfig, validate_segments, validate_take_count};
use crate::error::Result;

/// Everything needed to seed a queue-driven scan.
#[derive(Clone, Debug, PartialEq)]
pub struct TableScanRequest {
    pub table: String,
    pub strategy: TableScanStrategy,
    pub prefix: String,
    pub lower_bound: Option<String>,
    pub upper_bound: Option<String>,
    pub select: Option<Vec<String>>,
    pub take_count: usize,
    pub expand_partition_keys: bool,
    pub segments_per_first_prefix: usize,
    pub segments_per_subsequent_prefix: usize,
    pub driver_parameters: serde_json::Value,
}

impl TableScanRequest {
    pub fn new(table: impl Into<String>, config: &PrefixScanConfig) -> Self {
        Self {
            table: table.into(),
            strategy: TableScanStrategy::PrefixScan,
            prefix: String::new(),
            lower_bound: None,
            upper_bound: None,
            select: None,
            take_count: config.take_count,
            expand_partition_keys: config.expand_partition_keys,
            segments_per_first_prefix: config.segments_per_first_prefix,
            segments_per_subsequent_prefix: config
                .segments_per_subsequent_prefix,
            driver_parameters: serde_json::Value::Null,
        }
    }
}

/// Starts scans and reports when their fan-out has drained.
pub struct TableScanService<Q, T>
where
    Q: MessageQueue + 'static,
    T: TaskStateStore + 'static,
{
    queue: Arc<Q>,
    task_states: Arc<T>,
    config: PrefixScanConfig,
}

impl<Q, T> fmt::Debug for TableScanService<Q, T>
where
    Q: MessageQueue + 'static,
    T: TaskStateStore + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableScanService")
            .field("queue", &type_name::<Q>())
            .field("task_states", &type_name::<T>())
            .field("config", &self.config)
            .finish()
    }
}

impl<Q, T> TableScanService<Q, T>
where
    Q: MessageQueue + 'static,
    T: TaskStateStore + 'static,
{
    pub fn new(
        queue: Arc<Q>,
        task_states: Arc<T>,
        config: PrefixScanConfig,
    ) -> Self {
        Self {
            queue,
            task_states,
            config,
        }
    }

    /// A request for `table` seeded with this service's defaults.
    pub fn request(&self, table: impl Into<String>) -> TableScanRequest {
        TableScanRequest::new(table, &self.config)
    }

    /// Register and enqueue the root message of a new scan.
    pub async fn start(&self, request: TableScanRequest) -> Result<ScanId> {
        validate_take_count(request.take_count)?;
        validate_segments(
            request.segments_per_first_prefix,
            request.segments_per_subsequent_prefix,
        )?;

        let scan_id = ScanId::new();
        let step = StepPayload::Start {
            depth: 0,
            take_count: request.take_count,
            prefix: request.prefix.clone(),
            lower_bound: request.lower_bound,
            upper_bound: request.upper_bound,
        };

        let message = TableScanMessage {
            started: Utc::now(),
            scan_id,
            table: request.table,
            strategy: request.strategy,
            select: request.select,
            expand_partition_keys: request.expand_partition_keys,
            segments_per_first_prefix: request.segments_per_first_prefix,
            segments_per_subsequent_prefix: request
                .segments_per_subsequent_prefix,
            driver_parameters: request.driver_parameters,
            step: step.to_value()?,
        };

        let body = message.encode()?;
        let key = TaskStateKey::new(scan_id, message.step_id()?);
        self.task_states.add(&[TaskState::new(key, body.clone())]).await?;
        self.queue.enqueue(body).await?;

        info!(
            scan_id = %scan_id,
            table = %message.table,
            strategy = ?message.strategy,
            prefix = %request.prefix,
            "table scan started"
        );

        Ok(scan_id)
    }

    /// Re-enqueue every outstanding message of `scan_id` that no worker has
    /// started, e.g. after a crash between registering and enqueueing.
    /// Messages still sitting in the queue are delivered twice; the copy
    /// whose task state is already gone is acknowledged without work.
    pub async fn enqueue_unstarted(&self, scan_id: ScanId) -> Result<usize> {
        let bodies: Vec<String> = self
            .task_states
            .unstarted(scan_id)
            .await?
            .into_iter()
            .map(|state| state.message)
            .collect();
        let count = bodies.len();
        if count > 0 {
            self.queue.enqueue_many(bodies).await?;
            info!(scan_id = %scan_id, count, "re-enqueued unstarted table scan messages");
        }
        Ok(count)
    }

    pub async fn is_complete(&self, scan_id: ScanId) -> Result<bool> {
        Ok(self.task_states.count(scan_id).await? == 0)
    }
}
