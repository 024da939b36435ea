//! Table store seams consumed by the scan engine.
//!
//! The engine only ever issues filtered, paged queries. A store returns at
//! most `take` rows per page plus an opaque continuation token while more
//! matching rows may remain. A page may be empty and still carry a token.

pub mod memory;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tablescan_model::{EntityKey, TableRow, compare_keys};

use crate::error::Result;

pub use memory::{InMemoryTableService, InMemoryTableStore};

/// Largest page a store will return for a single query.
pub const MAX_TAKE_COUNT: usize = 1000;

/// Row filter understood by every table store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableFilter {
    All,
    /// `PartitionKey == partition_key AND RowKey > row_key_after`.
    PartitionKeyEquals {
        partition_key: String,
        row_key_after: Option<String>,
    },
    /// `PartitionKey > lower_exclusive AND PartitionKey < upper_exclusive`.
    PartitionKeyRange {
        lower_exclusive: String,
        upper_exclusive: String,
    },
}

impl TableFilter {
    pub fn matches(&self, key: &EntityKey) -> bool {
        use std::cmp::Ordering::*;
        match self {
            TableFilter::All => true,
            TableFilter::PartitionKeyEquals {
                partition_key,
                row_key_after,
            } => {
                key.partition_key == *partition_key
                    && row_key_after.as_deref().is_none_or(|after| {
                        compare_keys(&key.row_key, after) == Greater
                    })
            }
            TableFilter::PartitionKeyRange {
                lower_exclusive,
                upper_exclusive,
            } => {
                compare_keys(&key.partition_key, lower_exclusive) == Greater
                    && compare_keys(&key.partition_key, upper_exclusive)
                        == Less
            }
        }
    }

    /// True once `key` sorts beyond every row the filter can match.
    pub fn is_past_end(&self, key: &EntityKey) -> bool {
        use std::cmp::Ordering::*;
        match self {
            TableFilter::All => false,
            TableFilter::PartitionKeyEquals { partition_key, .. } => {
                compare_keys(&key.partition_key, partition_key) == Greater
            }
            TableFilter::PartitionKeyRange {
                upper_exclusive, ..
            } => compare_keys(&key.partition_key, upper_exclusive) != Less,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableQuery {
    pub filter: TableFilter,
    /// Column projection. `None` returns every property.
    pub select: Option<Vec<String>>,
    pub take: usize,
}

impl TableQuery {
    pub fn new(filter: TableFilter, take: usize) -> Self {
        Self {
            filter,
            select: None,
            take,
        }
    }

    pub fn with_select(mut self, select: Option<Vec<String>>) -> Self {
        self.select = select;
        self
    }
}

/// Opaque resume point handed back by a store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationToken(pub String);

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TablePage {
    pub rows: Vec<TableRow>,
    pub continuation: Option<ContinuationToken>,
}

/// Read access to one partitioned table.
#[async_trait]
pub trait TableStore: Send + Sync {
    fn name(&self) -> &str;

    async fn query(
        &self,
        query: &TableQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<TablePage>;
}

/// Maps table names carried in queue messages back to live handles.
#[async_trait]
pub trait TableResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Arc<dyn TableStore>>;
}

/// Idempotent row writes, used by sinks that copy scanned rows elsewhere.
#[async_trait]
pub trait TableWriter: Send + Sync {
    async fn upsert_rows(&self, rows: &[TableRow]) -> Result<()>;
}
