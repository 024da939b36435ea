//! Destinations for scanned rows.
//!
//! Messages may be redelivered, so every sink must tolerate seeing the same
//! segment more than once.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use tablescan_model::{EntityKey, TableRow};
use tokio::sync::Mutex;
use tracing::debug;

use super::message::ScanId;
use crate::error::Result;
use crate::store::TableWriter;

/// Scan-level information handed to a sink with each segment.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentContext {
    pub scan_id: ScanId,
    pub table: String,
    pub driver_parameters: serde_json::Value,
}

#[async_trait]
pub trait SegmentSink: Send + Sync {
    async fn process_segment(
        &self,
        context: &SegmentContext,
        rows: Vec<TableRow>,
    ) -> Result<()>;
}

/// Copies every scanned row into another table.
pub struct TableCopySink {
    destination: Arc<dyn TableWriter>,
}

impl fmt::Debug for TableCopySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCopySink")
            .field("destination", &"TableWriter")
            .finish()
    }
}

impl TableCopySink {
    pub fn new(destination: Arc<dyn TableWriter>) -> Self {
        Self { destination }
    }
}

#[async_trait]
impl SegmentSink for TableCopySink {
    async fn process_segment(
        &self,
        context: &SegmentContext,
        rows: Vec<TableRow>,
    ) -> Result<()> {
        debug!(
            scan_id = %context.scan_id,
            table = %context.table,
            rows = rows.len(),
            "copying segment"
        );
        self.destination.upsert_rows(&rows).await
    }
}

/// Keeps every distinct row it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    inner: Mutex<Collected>,
}

#[derive(Debug, Default)]
struct Collected {
    rows: BTreeMap<EntityKey, TableRow>,
    segments: usize,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct rows in store order.
    pub async fn rows(&self) -> Vec<TableRow> {
        self.inner.lock().await.rows.values().cloned().collect()
    }

    /// Segments received, duplicates included.
    pub async fn segments(&self) -> usize {
        self.inner.lock().await.segments
    }
}

#[async_trait]
impl SegmentSink for CollectingSink {
    async fn process_segment(
        &self,
        _context: &SegmentContext,
        rows: Vec<TableRow>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.segments += 1;
        for row in rows {
            inner.rows.insert(row.key(), row);
        }
        Ok(())
    }
}
