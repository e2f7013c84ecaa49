//! Session state store keyed by thread id.
//!
//! Each thread owns its message history, the engine's opaque checkpoint, the
//! interrupts its last run left outstanding, and the decisions recorded so
//! far. Entries are created on first use and live until the process exits.
//! A thread's state sits behind its own mutex, which the driver holds for a
//! whole turn, so the checkpoint is read, handed to the engine and written
//! back by a single writer.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::core::grants::GrantLedger;
use crate::core::interrupt::Interrupt;
use crate::core::message::Message;

/// Engine continuation state. Opaque to everything but the engine that made it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(Value);

impl Checkpoint {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThreadState {
    pub messages: Vec<Message>,
    pub checkpoint: Option<Checkpoint>,
    /// Interrupts raised by the last run and not yet answered.
    pub pending: Vec<Interrupt>,
    pub grants: GrantLedger,
    /// Completed driver runs (initial runs and resumptions).
    pub runs: u64,
}

type ThreadSlot = Arc<Mutex<ThreadState>>;

#[derive(Debug, Default)]
pub struct SessionStore {
    threads: RwLock<HashMap<String, ThreadSlot>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, thread_id: &str) -> ThreadSlot {
        if let Some(slot) = self.threads.read().await.get(thread_id) {
            return Arc::clone(slot);
        }
        let mut threads = self.threads.write().await;
        Arc::clone(threads.entry(thread_id.to_string()).or_default())
    }

    /// Locks a thread for exclusive use, creating it on first access.
    pub async fn lock(&self, thread_id: &str) -> OwnedMutexGuard<ThreadState> {
        self.slot(thread_id).await.lock_owned().await
    }

    /// Copy of a thread's current state, if the thread exists.
    pub async fn snapshot(&self, thread_id: &str) -> Option<ThreadState> {
        let slot = self.threads.read().await.get(thread_id).map(Arc::clone)?;
        let state = slot.lock().await;
        Some(state.clone())
    }

    pub async fn thread_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.threads.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
