//! In-memory table store.
//!
//! Rows are kept in a `BTreeMap` keyed by [`EntityKey`], whose ordering is
//! UTF-16 code unit order, so range filters and paging behave like a real
//! partitioned table. Continuation tokens are `base64(json(last_key))` and are
//! only issued when more matching rows exist past the page.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::Arc,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use tablescan_model::{EntityKey, TableRow, validate_key};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    ContinuationToken, MAX_TAKE_COUNT, TableFilter, TablePage, TableQuery,
    TableResolver, TableStore, TableWriter,
};
use crate::error::{Result, ScanError};

#[derive(Debug)]
pub struct InMemoryTableStore {
    name: String,
    rows: RwLock<BTreeMap<EntityKey, TableRow>>,
}

impl InMemoryTableStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a store pre-populated with `rows`. Later duplicates win.
    pub fn from_rows(
        name: impl Into<String>,
        rows: impl IntoIterator<Item = TableRow>,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        for row in rows {
            validate_key(&row.partition_key)?;
            validate_key(&row.row_key)?;
            map.insert(row.key(), row);
        }
        Ok(Self {
            name: name.into(),
            rows: RwLock::new(map),
        })
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Snapshot of every row in store order.
    pub async fn rows(&self) -> Vec<TableRow> {
        self.rows.read().await.values().cloned().collect()
    }

    fn encode_token(key: &EntityKey) -> Result<ContinuationToken> {
        let json = serde_json::to_vec(key)?;
        Ok(ContinuationToken(STANDARD.encode(json)))
    }

    fn decode_token(token: &ContinuationToken) -> Result<EntityKey> {
        let bytes = STANDARD.decode(&token.0).map_err(|e| {
            ScanError::InvalidArgument(format!(
                "continuation token is not base64: {e}"
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ScanError::InvalidArgument(format!(
                "continuation token is not a row key: {e}"
            ))
        })
    }

    /// First key the filter could possibly match.
    fn start_bound(filter: &TableFilter) -> Bound<EntityKey> {
        match filter {
            TableFilter::All => Bound::Unbounded,
            TableFilter::PartitionKeyEquals {
                partition_key,
                row_key_after: Some(after),
            } => Bound::Excluded(EntityKey::new(
                partition_key.clone(),
                after.clone(),
            )),
            TableFilter::PartitionKeyEquals { partition_key, .. } => {
                Bound::Included(EntityKey::new(partition_key.clone(), ""))
            }
            TableFilter::PartitionKeyRange {
                lower_exclusive, ..
            } => Bound::Included(EntityKey::new(lower_exclusive.clone(), "")),
        }
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        query: &TableQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<TablePage> {
        if query.take == 0 || query.take > MAX_TAKE_COUNT {
            return Err(ScanError::InvalidArgument(format!(
                "take {} must be between 1 and {MAX_TAKE_COUNT}",
                query.take
            )));
        }

        let filter_start = Self::start_bound(&query.filter);
        let start = match continuation {
            Some(token) => {
                let after = Self::decode_token(token)?;
                let token_is_ahead = match &filter_start {
                    Bound::Included(k) | Bound::Excluded(k) => after >= *k,
                    Bound::Unbounded => true,
                };
                if token_is_ahead {
                    Bound::Excluded(after)
                } else {
                    filter_start
                }
            }
            None => filter_start,
        };

        let rows = self.rows.read().await;
        let mut matching = rows
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| !query.filter.is_past_end(key))
            .filter(|(key, _)| query.filter.matches(key))
            .map(|(_, row)| row);

        let page: Vec<TableRow> = matching
            .by_ref()
            .take(query.take)
            .map(|row| row.project(query.select.as_deref()))
            .collect();

        let continuation = match (matching.next(), page.last()) {
            (Some(_), Some(last)) => Some(Self::encode_token(&last.key())?),
            _ => None,
        };

        debug!(
            table = %self.name,
            filter = ?query.filter,
            rows = page.len(),
            more = continuation.is_some(),
            "in-memory table query"
        );

        Ok(TablePage {
            rows: page,
            continuation,
        })
    }
}

#[async_trait]
impl TableWriter for InMemoryTableStore {
    async fn upsert_rows(&self, rows: &[TableRow]) -> Result<()> {
        for row in rows {
            validate_key(&row.partition_key)?;
            validate_key(&row.row_key)?;
        }
        let mut map = self.rows.write().await;
        for row in rows {
            map.insert(row.key(), row.clone());
        }
        Ok(())
    }
}

/// Named collection of in-memory tables; resolves names for queue messages.
#[derive(Debug, Default)]
pub struct InMemoryTableService {
    tables: RwLock<HashMap<String, Arc<InMemoryTableStore>>>,
}

impl InMemoryTableService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing table when `name` is already registered.
    pub async fn create_table(&self, name: &str) -> Arc<InMemoryTableStore> {
        let mut tables = self.tables.write().await;
        tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryTableStore::new(name)))
            .clone()
    }

    pub async fn insert_table(&self, table: Arc<InMemoryTableStore>) {
        self.tables
            .write()
            .await
            .insert(table.name().to_string(), table);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<InMemoryTableStore>> {
        self.tables.read().await.get(name).cloned()
    }
}

#[async_trait]
impl TableResolver for InMemoryTableService {
    async fn resolve(&self, name: &str) -> Result<Arc<dyn TableStore>> {
        match self.get(name).await {
            Some(table) => Ok(table),
            None => Err(ScanError::TableNotFound(name.to_string())),
        }
    }
}
