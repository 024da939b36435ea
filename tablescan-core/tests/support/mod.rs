#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tablescan_core::store::{
    ContinuationToken, InMemoryTableStore, TablePage, TableQuery, TableStore,
};
use tablescan_core::{Result, ScanError, TableRow};

pub fn rows(keys: &[(&str, &str)]) -> Vec<TableRow> {
    keys.iter().map(|(pk, rk)| TableRow::new(*pk, *rk)).collect()
}

pub fn table(name: &str, rows: Vec<TableRow>) -> Arc<InMemoryTableStore> {
    Arc::new(InMemoryTableStore::from_rows(name, rows).unwrap())
}

/// Rows sorted the way the store sorts them.
pub fn sorted(mut rows: Vec<TableRow>) -> Vec<TableRow> {
    rows.sort_by(|a, b| a.key().cmp(&b.key()));
    rows
}

pub fn render(rows: &[TableRow]) -> Vec<String> {
    rows.iter().map(ToString::to_string).collect()
}

/// Inserts an empty page carrying a token in front of every real page.
#[derive(Debug)]
pub struct EmptyPageStore {
    pub inner: Arc<InMemoryTableStore>,
}

const EMPTY_MARKER: &str = "empty:";

#[async_trait]
impl TableStore for EmptyPageStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn query(
        &self,
        query: &TableQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<TablePage> {
        match continuation {
            Some(token) if token.0.starts_with(EMPTY_MARKER) => {
                let real = &token.0[EMPTY_MARKER.len()..];
                let real = (!real.is_empty())
                    .then(|| ContinuationToken(real.to_string()));
                self.inner.query(query, real.as_ref()).await
            }
            _ => {
                let resume = continuation.map(|t| t.0.as_str()).unwrap_or("");
                Ok(TablePage {
                    rows: Vec::new(),
                    continuation: Some(ContinuationToken(format!(
                        "{EMPTY_MARKER}{resume}"
                    ))),
                })
            }
        }
    }
}

/// Fails the first `failures` queries with a transient store error.
#[derive(Debug)]
pub struct FlakyStore {
    pub inner: Arc<InMemoryTableStore>,
    pub remaining_failures: AtomicUsize,
    pub queries: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryTableStore>, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
            queries: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TableStore for FlakyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn query(
        &self,
        query: &TableQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<TablePage> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok();
        if failed {
            return Err(ScanError::Store("injected timeout".into()));
        }
        self.inner.query(query, continuation).await
    }
}
