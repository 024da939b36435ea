//! Queue-driven table scans.
//!
//! A scan is seeded by [`TableScanService::start`] as a single message. Each
//! message performs at most one store-backed expansion, hands terminal rows
//! to a [`SegmentSink`] and enqueues one message per remaining step, so the
//! key space can be enumerated by any number of independent workers.

pub mod message;
pub mod processor;
pub mod queue;
pub mod service;
pub mod sink;
pub mod task_state;
pub mod worker;

pub use message::{ScanId, StepPayload, TableScanMessage, TableScanStrategy};
pub use processor::{MessageDispatcher, ProcessStatus, TableScanMessageProcessor};
pub use queue::{
    InMemoryMessageQueue, MessageQueue, PoisonedMessage, QueueDepth,
    QueueMessage,
};
pub use service::{TableScanRequest, TableScanService};
pub use sink::{CollectingSink, SegmentContext, SegmentSink, TableCopySink};
pub use task_state::{
    InMemoryTaskStateStore, TaskState, TaskStateKey, TaskStateStore,
};
pub use worker::{TableScanWorker, WorkerReport};
