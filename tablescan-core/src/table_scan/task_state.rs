//! Fan-out completion tracking.
//!
//! Every outstanding step message owns one task state holding its encoded
//! body. Children are registered before they are enqueued and a message
//! deletes its own state once its work has committed, so a scan is finished
//! exactly when no state remains for its id. States that were never picked up
//! by a worker can be re-enqueued from their stored bodies.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::message::ScanId;
use crate::error::Result;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskStateKey {
    pub scan_id: ScanId,
    pub step_id: String,
}

impl TaskStateKey {
    pub fn new(scan_id: ScanId, step_id: impl Into<String>) -> Self {
        Self {
            scan_id,
            step_id: step_id.into(),
        }
    }
}

/// An outstanding step message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub key: TaskStateKey,
    /// Encoded `TableScanMessage`, enqueued as-is on recovery.
    pub message: String,
    /// Set the first time a worker begins processing the message.
    pub started: Option<DateTime<Utc>>,
}

impl TaskState {
    pub fn new(key: TaskStateKey, message: impl Into<String>) -> Self {
        Self {
            key,
            message: message.into(),
            started: None,
        }
    }
}

#[async_trait]
pub trait TaskStateStore: Send + Sync {
    /// Register states. Existing keys are left untouched.
    async fn add(&self, states: &[TaskState]) -> Result<()>;

    /// Mark a state as started. Returns whether the state exists.
    async fn start(&self, key: &TaskStateKey) -> Result<bool>;

    /// Returns whether the state existed.
    async fn delete(&self, key: &TaskStateKey) -> Result<bool>;

    async fn exists(&self, key: &TaskStateKey) -> Result<bool>;

    async fn count(&self, scan_id: ScanId) -> Result<usize>;

    /// States of `scan_id` no worker has started yet.
    async fn unstarted(&self, scan_id: ScanId) -> Result<Vec<TaskState>>;
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStateStore {
    states: RwLock<HashMap<ScanId, HashMap<String, TaskState>>>,
}

impl InMemoryTaskStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStateStore for InMemoryTaskStateStore {
    async fn add(&self, states: &[TaskState]) -> Result<()> {
        let mut all = self.states.write().await;
        for state in states {
            all.entry(state.key.scan_id)
                .or_default()
                .entry(state.key.step_id.clone())
                .or_insert_with(|| state.clone());
        }
        Ok(())
    }

    async fn start(&self, key: &TaskStateKey) -> Result<bool> {
        let mut all = self.states.write().await;
        let Some(state) = all
            .get_mut(&key.scan_id)
            .and_then(|steps| steps.get_mut(&key.step_id))
        else {
            return Ok(false);
        };
        state.started.get_or_insert_with(Utc::now);
        Ok(true)
    }

    async fn delete(&self, key: &TaskStateKey) -> Result<bool> {
        let mut all = self.states.write().await;
        let Some(steps) = all.get_mut(&key.scan_id) else {
            return Ok(false);
        };
        let removed = steps.remove(&key.step_id).is_some();
        if steps.is_empty() {
            all.remove(&key.scan_id);
        }
        Ok(removed)
    }

    async fn exists(&self, key: &TaskStateKey) -> Result<bool> {
        let all = self.states.read().await;
        Ok(all
            .get(&key.scan_id)
            .is_some_and(|steps| steps.contains_key(&key.step_id)))
    }

    async fn count(&self, scan_id: ScanId) -> Result<usize> {
        let all = self.states.read().await;
        Ok(all.get(&scan_id).map_or(0, HashMap::len))
    }

    async fn unstarted(&self, scan_id: ScanId) -> Result<Vec<TaskState>> {
        let all = self.states.read().await;
        let mut states: Vec<TaskState> = all
            .get(&scan_id)
            .into_iter()
            .flat_map(HashMap::values)
            .filter(|state| state.started.is_none())
            .cloned()
            .collect();
        states.sort_by(|a, b| a.key.step_id.cmp(&b.key.step_id));
        Ok(states)
    }
}
