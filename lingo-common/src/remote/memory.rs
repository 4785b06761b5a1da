//! In-process implementation of [`RemoteCollectionClient`]
//!
//! Stores JSON documents per collection path and pushes a fresh snapshot to
//! every live subscriber whose query targets the written collection. Used by
//! the test suites and the `lingo-sync` demo binary.
//!
//! Inspection and fault-injection hooks (`subscribe_calls`,
//! `live_subscriptions`, `emit_error`, `fail_next_get`, ...) let tests assert
//! how many real subscriptions a component opened.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use super::{
    Document, Query, RemoteCollectionClient, RemoteError, RemoteEvent, Snapshot,
    SnapshotStream, WriteOp, MAX_BATCH_SIZE,
};

struct Listener {
    query: Query,
    tx: mpsc::UnboundedSender<RemoteEvent>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Value>>,
    listeners: Vec<Listener>,
    next_listener_id: u64,
    subscribe_calls: usize,
    get_calls: usize,
    batch_calls: usize,
    pending_subscribe_failures: VecDeque<RemoteError>,
    pending_get_failures: VecDeque<RemoteError>,
    pending_batch_failures: VecDeque<RemoteError>,
}

impl State {
    fn snapshot_for(&self, query: &Query) -> Snapshot {
        let documents = self
            .collections
            .get(&query.collection)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .map(|(id, data)| Document::new(id.clone(), data.clone()));
        Snapshot::new(query.evaluate(documents))
    }

    /// Drop listeners whose stream was dropped
    fn prune(&mut self) {
        self.listeners.retain(|l| !l.tx.is_closed());
    }

    fn notify(&mut self, collection: &str) {
        self.prune();
        let mut delivered = 0;
        for listener in self.listeners.iter().filter(|l| l.query.collection == collection) {
            let snapshot = self.snapshot_for(&listener.query);
            if listener.tx.send(RemoteEvent::Snapshot(snapshot)).is_ok() {
                delivered += 1;
            }
        }
        trace!(collection, delivered, "Pushed snapshot to listeners");
    }

    fn apply(&mut self, op: WriteOp) -> String {
        match op {
            WriteOp::Set {
                collection,
                id,
                data,
            } => {
                self.collections
                    .entry(collection.clone())
                    .or_default()
                    .insert(id, data);
                collection
            }
            WriteOp::Delete { collection, id } => {
                if let Some(docs) = self.collections.get_mut(&collection) {
                    docs.remove(&id);
                }
                collection
            }
        }
    }
}

/// In-memory document store with real-time listeners
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document and notify listeners
    pub async fn set_document(&self, collection: &str, id: &str, data: Value) {
        let mut state = self.state.lock().await;
        state.apply(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        });
        state.notify(collection);
    }

    /// Remove a document and notify listeners
    pub async fn delete_document(&self, collection: &str, id: &str) {
        let mut state = self.state.lock().await;
        state.apply(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        state.notify(collection);
    }

    /// Push an error event to every live listener on `collection`
    ///
    /// # Returns
    /// Number of listeners that received the error
    pub async fn emit_error(&self, collection: &str, error: RemoteError) -> usize {
        let mut state = self.state.lock().await;
        state.prune();
        state
            .listeners
            .iter()
            .filter(|l| l.query.collection == collection)
            .filter(|l| l.tx.send(RemoteEvent::Error(error.clone())).is_ok())
            .count()
    }

    /// Make the next `subscribe` call fail with `error`
    pub async fn fail_next_subscribe(&self, error: RemoteError) {
        self.state.lock().await.pending_subscribe_failures.push_back(error);
    }

    /// Make the next `get_once` call fail with `error`
    ///
    /// Queued failures are consumed one per call.
    pub async fn fail_next_get(&self, error: RemoteError) {
        self.state.lock().await.pending_get_failures.push_back(error);
    }

    /// Make the next `batch_write` call fail with `error`
    pub async fn fail_next_batch(&self, error: RemoteError) {
        self.state.lock().await.pending_batch_failures.push_back(error);
    }

    /// Total `subscribe` calls received, including failed ones
    pub async fn subscribe_calls(&self) -> usize {
        self.state.lock().await.subscribe_calls
    }

    /// Total `get_once` calls received, including failed ones
    pub async fn get_calls(&self) -> usize {
        self.state.lock().await.get_calls
    }

    /// Total `batch_write` calls received, including failed ones
    pub async fn batch_calls(&self) -> usize {
        self.state.lock().await.batch_calls
    }

    /// Subscriptions on `collection` whose stream is still held by someone
    pub async fn live_subscriptions(&self, collection: &str) -> usize {
        let mut state = self.state.lock().await;
        state.prune();
        state
            .listeners
            .iter()
            .filter(|l| l.query.collection == collection)
            .count()
    }

    pub async fn document_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .await
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl RemoteCollectionClient for InMemoryRemote {
    async fn subscribe(&self, query: &Query) -> Result<SnapshotStream, RemoteError> {
        let mut state = self.state.lock().await;
        state.subscribe_calls += 1;

        if let Some(error) = state.pending_subscribe_failures.pop_front() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // Initial result set, as the database delivers on registration
        let initial = state.snapshot_for(query);
        let _ = tx.send(RemoteEvent::Snapshot(initial));

        let id = state.next_listener_id;
        state.next_listener_id += 1;
        state.listeners.push(Listener {
            query: query.clone(),
            tx,
        });
        debug!(listener_id = id, collection = %query.collection, "Listener registered");

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn get_once(&self, query: &Query) -> Result<Snapshot, RemoteError> {
        let mut state = self.state.lock().await;
        state.get_calls += 1;

        if let Some(error) = state.pending_get_failures.pop_front() {
            return Err(error);
        }
        Ok(state.snapshot_for(query))
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.batch_calls += 1;

        if ops.len() > MAX_BATCH_SIZE {
            return Err(RemoteError::invalid_argument(format!(
                "batch of {} operations exceeds limit of {}",
                ops.len(),
                MAX_BATCH_SIZE
            )));
        }
        if let Some(error) = state.pending_batch_failures.pop_front() {
            return Err(error);
        }

        // Whole batch applied under one lock, then listeners see one snapshot
        // per touched collection
        let mut touched: Vec<String> = Vec::new();
        for op in ops {
            let collection = state.apply(op);
            if !touched.contains(&collection) {
                touched.push(collection);
            }
        }
        for collection in &touched {
            state.notify(collection);
        }
        Ok(())
    }
}
