use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, ScanError};

/// A delivered message. `dequeue_count` includes the current delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: Uuid,
    pub body: String,
    pub dequeue_count: u32,
}

/// Message parked on the poison side channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoisonedMessage {
    pub id: Uuid,
    pub body: String,
    pub dequeue_count: u32,
    pub error: String,
    pub poisoned_at: DateTime<Utc>,
}

/// Counts of messages waiting and being worked on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub ready: usize,
    pub in_flight: usize,
}

impl QueueDepth {
    pub fn is_idle(&self) -> bool {
        self.ready == 0 && self.in_flight == 0
    }
}

/// Abstracts the queue transport carrying scan step messages.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn enqueue(&self, body: String) -> Result<Uuid>;

    async fn dequeue(&self) -> Result<Option<QueueMessage>>;

    async fn complete(&self, id: Uuid) -> Result<()>;

    /// Return an in-flight message for redelivery.
    async fn abandon(&self, id: Uuid) -> Result<()>;

    /// Move an in-flight message to the poison side channel.
    async fn poison(&self, id: Uuid, error: String) -> Result<()>;

    async fn depth(&self) -> Result<QueueDepth>;

    /// Enqueue multiple bodies. Default implementation issues them
    /// one-by-one.
    async fn enqueue_many(&self, bodies: Vec<String>) -> Result<Vec<Uuid>> {
        let mut out = Vec::with_capacity(bodies.len());
        for body in bodies {
            out.push(self.enqueue(body).await?);
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<QueueMessage>,
    in_flight: HashMap<Uuid, QueueMessage>,
    poisoned: Vec<PoisonedMessage>,
}

/// FIFO queue with at-least-once delivery semantics.
#[derive(Debug, Default)]
pub struct InMemoryMessageQueue {
    state: Mutex<QueueState>,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn poisoned(&self) -> Vec<PoisonedMessage> {
        self.state.lock().await.poisoned.clone()
    }

    fn not_in_flight(id: Uuid) -> ScanError {
        ScanError::Queue(format!("message {id} is not in flight"))
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn enqueue(&self, body: String) -> Result<Uuid> {
        let id = Uuid::now_v7();
        self.state.lock().await.ready.push_back(QueueMessage {
            id,
            body,
            dequeue_count: 0,
        });
        Ok(id)
    }

    async fn enqueue_many(&self, bodies: Vec<String>) -> Result<Vec<Uuid>> {
        let mut state = self.state.lock().await;
        let mut ids = Vec::with_capacity(bodies.len());
        for body in bodies {
            let id = Uuid::now_v7();
            state.ready.push_back(QueueMessage {
                id,
                body,
                dequeue_count: 0,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn dequeue(&self) -> Result<Option<QueueMessage>> {
        let mut state = self.state.lock().await;
        let Some(mut message) = state.ready.pop_front() else {
            return Ok(None);
        };
        message.dequeue_count += 1;
        state.in_flight.insert(message.id, message.clone());
        Ok(Some(message))
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Self::not_in_flight(id))
    }

    async fn abandon(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let message = state
            .in_flight
            .remove(&id)
            .ok_or_else(|| Self::not_in_flight(id))?;
        state.ready.push_back(message);
        Ok(())
    }

    async fn poison(&self, id: Uuid, error: String) -> Result<()> {
        let mut state = self.state.lock().await;
        let message = state
            .in_flight
            .remove(&id)
            .ok_or_else(|| Self::not_in_flight(id))?;
        warn!(
            message_id = %id,
            dequeue_count = message.dequeue_count,
            error = %error,
            "message moved to poison queue"
        );
        state.poisoned.push(PoisonedMessage {
            id,
            body: message.body,
            dequeue_count: message.dequeue_count,
            error,
            poisoned_at: Utc::now(),
        });
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let state = self.state.lock().await;
        Ok(QueueDepth {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
        })
    }
}
