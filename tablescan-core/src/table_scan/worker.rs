use std::{
    any::type_name,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::processor::{MessageDispatcher, ProcessStatus};
use super::queue::{MessageQueue, QueueMessage};
use crate::config::WorkerConfig;
use crate::error::{Result, ScanError};

/// Totals across every worker task of one [`TableScanWorker::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub completed: usize,
    pub retried: usize,
    pub poisoned: usize,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicUsize,
    retried: AtomicUsize,
    poisoned: AtomicUsize,
}

impl Counters {
    fn report(&self) -> WorkerReport {
        WorkerReport {
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            poisoned: self.poisoned.load(Ordering::Relaxed),
        }
    }
}

/// In-process worker pool draining a message queue.
///
/// Workers stop once the queue has nothing ready and nothing in flight, or
/// when cancelled. Cancellation is only observed between messages.
pub struct TableScanWorker<Q, D>
where
    Q: MessageQueue + 'static,
    D: MessageDispatcher + 'static,
{
    queue: Arc<Q>,
    dispatcher: Arc<D>,
    config: WorkerConfig,
}

impl<Q, D> fmt::Debug for TableScanWorker<Q, D>
where
    Q: MessageQueue + 'static,
    D: MessageDispatcher + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableScanWorker")
            .field("queue", &type_name::<Q>())
            .field("dispatcher", &type_name::<D>())
            .field("config", &self.config)
            .finish()
    }
}

impl<Q, D> TableScanWorker<Q, D>
where
    Q: MessageQueue + 'static,
    D: MessageDispatcher + 'static,
{
    pub fn new(queue: Arc<Q>, dispatcher: Arc<D>, config: WorkerConfig) -> Self {
        Self {
            queue,
            dispatcher,
            config,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<WorkerReport> {
        self.config.validate()?;

        let counters = Arc::new(Counters::default());
        let mut handles = Vec::with_capacity(self.config.workers);

        for worker_id in 0..self.config.workers {
            let queue = Arc::clone(&self.queue);
            let dispatcher = Arc::clone(&self.dispatcher);
            let counters = Arc::clone(&counters);
            let cancel = cancel.clone();
            let config = self.config;
            let span = info_span!("table_scan_worker", worker_id);

            handles.push(tokio::spawn(
                async move {
                    worker_loop(queue, dispatcher, counters, cancel, config)
                        .await
                }
                .instrument(span),
            ));
        }

        for joined in join_all(handles).await {
            match joined {
                Ok(result) => result?,
                Err(err) => {
                    return Err(ScanError::Queue(format!(
                        "worker task failed: {err}"
                    )));
                }
            }
        }

        let report = counters.report();
        info!(
            completed = report.completed,
            retried = report.retried,
            poisoned = report.poisoned,
            "table scan workers stopped"
        );
        Ok(report)
    }
}

async fn worker_loop<Q, D>(
    queue: Arc<Q>,
    dispatcher: Arc<D>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    config: WorkerConfig,
) -> Result<()>
where
    Q: MessageQueue + 'static,
    D: MessageDispatcher + 'static,
{
    loop {
        if cancel.is_cancelled() {
            debug!("worker cancelled");
            return Ok(());
        }

        match queue.dequeue().await? {
            Some(message) => {
                let status = dispatcher.dispatch(&message.body).await;
                settle(queue.as_ref(), &counters, &config, message, status)
                    .await?;
            }
            None => {
                if queue.depth().await?.is_idle() {
                    debug!("queue drained");
                    return Ok(());
                }
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(config.idle_poll()) => {}
                }
            }
        }
    }
}

async fn settle<Q: MessageQueue + ?Sized>(
    queue: &Q,
    counters: &Counters,
    config: &WorkerConfig,
    message: QueueMessage,
    status: ProcessStatus,
) -> Result<()> {
    match status {
        ProcessStatus::Complete => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            queue.complete(message.id).await
        }
        ProcessStatus::Retry { error }
            if message.dequeue_count >= config.max_dequeue_count =>
        {
            warn!(
                message_id = %message.id,
                dequeue_count = message.dequeue_count,
                "retry budget exhausted"
            );
            counters.poisoned.fetch_add(1, Ordering::Relaxed);
            queue.poison(message.id, error).await
        }
        ProcessStatus::Retry { .. } => {
            counters.retried.fetch_add(1, Ordering::Relaxed);
            queue.abandon(message.id).await
        }
        ProcessStatus::Poison { error } => {
            counters.poisoned.fetch_add(1, Ordering::Relaxed);
            queue.poison(message.id, error).await
        }
    }
}
