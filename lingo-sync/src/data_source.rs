//! Shared Subscription Data Source
//!
//! One instance per data domain (history, friends, settings) owns at most one
//! live remote subscription and fans its latest value out to any number of
//! observers through a `tokio::sync::watch` channel (replay-latest).
//!
//! **State machine:**
//! - `Idle` → `Loading` on `start_observing`
//! - `Loading`/`Active` → `Active` on each remote snapshot
//! - `Loading`/`Active` → `ActiveWithError` on a remote error (last good value kept)
//! - any → `Idle` on `stop_observing`
//!
//! **Cancellation:** every published state carries a generation number.
//! Replacing or stopping a subscription bumps the generation inside the watch
//! channel's write lock before the old pump task is cancelled and joined, so
//! an event still in flight on the old stream can never land in the cell.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use lingo_common::events::{EventBus, SyncEvent};
use lingo_common::remote::{
    Query, RemoteCollectionClient, RemoteError, RemoteEvent, Snapshot, SnapshotStream,
};
use lingo_common::{Error, Result};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// A data domain served by a [`SharedDataSource`]
///
/// Maps a user (plus domain parameters) to a remote query and turns remote
/// snapshots into the domain value observers see.
pub trait DataDomain: Send + Sync + 'static {
    /// Domain name used in logs and sync events
    const NAME: &'static str;

    /// Subscription parameters (e.g. a row limit); a change forces a resubscribe
    type Params: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Cached value; `Default` is the empty value before the first snapshot
    type Value: Clone + Default + fmt::Debug + Send + Sync + 'static;

    fn query(&self, user_id: &str, params: &Self::Params) -> Query;

    fn decode(&self, snapshot: &Snapshot) -> Self::Value;
}

/// Lifecycle phase of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// No subscription, defaults cached
    Idle,
    /// Subscription requested, no snapshot yet
    Loading,
    /// Latest snapshot cached
    Active,
    /// Remote error seen; last good value retained
    ActiveWithError,
}

/// Published state of a data source
#[derive(Debug, Clone)]
pub struct DataState<V> {
    pub phase: Phase,
    pub value: V,
    pub loading: bool,
    pub error: Option<RemoteError>,
    generation: u64,
}

impl<V: Default> DataState<V> {
    fn idle(generation: u64) -> Self {
        Self {
            phase: Phase::Idle,
            value: V::default(),
            loading: false,
            error: None,
            generation,
        }
    }
}

impl<V> DataState<V> {
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Public description of the live subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo<P> {
    pub subscription_id: Uuid,
    pub user_id: String,
    pub params: P,
    pub created_at: DateTime<Utc>,
}

struct SubscriptionHandle<P> {
    info: SubscriptionInfo<P>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Slot<P> {
    handle: Option<SubscriptionHandle<P>>,
    /// Owner of the currently cached value
    cached_user: Option<String>,
}

/// Deduplicating real-time data source for one domain
///
/// Construct once per process (see `DataSources`) and share by `Arc`.
pub struct SharedDataSource<D: DataDomain> {
    domain: Arc<D>,
    client: Arc<dyn RemoteCollectionClient>,
    events: EventBus,
    state: Arc<watch::Sender<DataState<D::Value>>>,
    slot: Mutex<Slot<D::Params>>,
}

impl<D: DataDomain> SharedDataSource<D> {
    pub fn new(domain: D, client: Arc<dyn RemoteCollectionClient>, events: EventBus) -> Self {
        let (state, _) = watch::channel(DataState::idle(0));
        Self {
            domain: Arc::new(domain),
            client,
            events,
            state: Arc::new(state),
            slot: Mutex::new(Slot {
                handle: None,
                cached_user: None,
            }),
        }
    }

    pub fn domain(&self) -> &D {
        &self.domain
    }

    /// Ensure a subscription for (`user_id`, `params`) is live
    ///
    /// Reuses a healthy subscription with identical user and parameters.
    /// Otherwise the previous subscription is cancelled and joined before the
    /// new one is registered. Returns once registration is done; the first
    /// value arrives through [`observe`](Self::observe).
    ///
    /// A failed registration is published as an error state, not returned.
    pub async fn start_observing(&self, user_id: &str, params: D::Params) -> Result<()> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(Error::InvalidInput(format!(
                "{}: user id must not be empty",
                D::NAME
            )));
        }

        let mut slot = self.slot.lock().await;

        if let Some(handle) = slot.handle.as_ref() {
            if handle.info.user_id == user_id
                && handle.info.params == params
                && self.is_healthy(handle)
            {
                debug!(
                    domain = D::NAME,
                    user_id,
                    subscription_id = %handle.info.subscription_id,
                    "Reusing active subscription"
                );
                self.events.emit_lossy(SyncEvent::SubscriptionReused {
                    domain: D::NAME.to_string(),
                    user_id: user_id.to_string(),
                    subscription_id: handle.info.subscription_id,
                    timestamp: Utc::now(),
                });
                return Ok(());
            }
        }

        // Same user keeps its stale value visible while reloading
        let keep_value = slot.cached_user.as_deref() == Some(user_id);
        let generation = self.begin_loading(keep_value);

        if let Some(old) = slot.handle.take() {
            self.teardown(old).await;
        }
        slot.cached_user = Some(user_id.to_string());

        let query = self.domain.query(user_id, &params);
        let info = SubscriptionInfo {
            subscription_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            params,
            created_at: Utc::now(),
        };

        match self.client.subscribe(&query).await {
            Ok(stream) => {
                let cancel = CancellationToken::new();
                let task = tokio::spawn(pump(
                    Arc::clone(&self.domain),
                    Arc::clone(&self.state),
                    self.events.clone(),
                    generation,
                    info.subscription_id,
                    stream,
                    cancel.clone(),
                ));

                info!(
                    domain = D::NAME,
                    user_id,
                    subscription_id = %info.subscription_id,
                    collection = %query.collection,
                    params = ?info.params,
                    "Subscription started"
                );
                self.events.emit_lossy(SyncEvent::SubscriptionStarted {
                    domain: D::NAME.to_string(),
                    user_id: user_id.to_string(),
                    subscription_id: info.subscription_id,
                    timestamp: info.created_at,
                });

                slot.handle = Some(SubscriptionHandle { info, cancel, task });
            }
            Err(err) => {
                warn!(
                    domain = D::NAME,
                    user_id,
                    collection = %query.collection,
                    error = %err,
                    "Subscription registration failed"
                );
                apply_error(&self.state, generation, err.clone());
                self.events.emit_lossy(SyncEvent::SubscriptionFailed {
                    domain: D::NAME.to_string(),
                    subscription_id: None,
                    message: err.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        Ok(())
    }

    /// Cancel the active subscription and reset to `Idle` defaults
    ///
    /// Safe to call with no active subscription. The old stream is dropped
    /// before this returns.
    pub async fn stop_observing(&self) {
        let mut slot = self.slot.lock().await;

        self.state
            .send_modify(|state| *state = DataState::idle(state.generation + 1));
        slot.cached_user = None;

        match slot.handle.take() {
            Some(handle) => {
                let subscription_id = handle.info.subscription_id;
                self.teardown(handle).await;
                info!(domain = D::NAME, subscription_id = %subscription_id, "Subscription stopped");
            }
            None => debug!(domain = D::NAME, "stop_observing with no active subscription"),
        }
    }

    /// Continuously updating read-only view of the state
    ///
    /// The receiver starts at the most recently published state.
    pub fn observe(&self) -> watch::Receiver<DataState<D::Value>> {
        self.state.subscribe()
    }

    /// Clone of the most recently published state
    pub fn current(&self) -> DataState<D::Value> {
        self.state.borrow().clone()
    }

    /// Run `f` against the cached value without cloning it
    ///
    /// Never triggers a remote fetch.
    pub fn with_value<R>(&self, f: impl FnOnce(&D::Value) -> R) -> R {
        f(&self.state.borrow().value)
    }

    pub async fn active_subscription(&self) -> Option<SubscriptionInfo<D::Params>> {
        self.slot
            .lock()
            .await
            .handle
            .as_ref()
            .map(|handle| handle.info.clone())
    }

    /// Whether a live subscription exists for `user_id` (trimmed, as in
    /// [`start_observing`](Self::start_observing))
    pub async fn is_active_for(&self, user_id: &str) -> bool {
        let user_id = user_id.trim();
        self.slot
            .lock()
            .await
            .handle
            .as_ref()
            .is_some_and(|handle| handle.info.user_id == user_id)
    }

    fn is_healthy(&self, handle: &SubscriptionHandle<D::Params>) -> bool {
        !handle.task.is_finished() && self.state.borrow().phase != Phase::ActiveWithError
    }

    /// Move to `Loading` under a new generation
    fn begin_loading(&self, keep_value: bool) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|state| {
            state.generation += 1;
            generation = state.generation;
            state.phase = Phase::Loading;
            state.loading = true;
            state.error = None;
            if !keep_value {
                state.value = D::Value::default();
            }
        });
        generation
    }

    async fn teardown(&self, handle: SubscriptionHandle<D::Params>) {
        let subscription_id = handle.info.subscription_id;
        handle.cancel.cancel();

        if let Err(e) = handle.task.await {
            if e.is_panic() {
                error!(
                    domain = D::NAME,
                    subscription_id = %subscription_id,
                    "Subscription task panicked: {}",
                    e
                );
            }
        }

        self.events.emit_lossy(SyncEvent::SubscriptionStopped {
            domain: D::NAME.to_string(),
            subscription_id,
            timestamp: Utc::now(),
        });
    }
}

/// Publish an error for `generation`, keeping the cached value
fn apply_error<V>(state: &watch::Sender<DataState<V>>, generation: u64, err: RemoteError) -> bool {
    state.send_if_modified(|state| {
        if state.generation != generation {
            return false;
        }
        state.phase = Phase::ActiveWithError;
        state.loading = false;
        state.error = Some(err);
        true
    })
}

/// Drain one remote subscription into the state cell
///
/// Exits on cancellation, end of stream, or once its generation is superseded.
async fn pump<D: DataDomain>(
    domain: Arc<D>,
    state: Arc<watch::Sender<DataState<D::Value>>>,
    events: EventBus,
    generation: u64,
    subscription_id: Uuid,
    mut stream: SnapshotStream,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = stream.next() => event,
        };

        match event {
            Some(RemoteEvent::Snapshot(snapshot)) => {
                let document_count = snapshot.len();
                let value = domain.decode(&snapshot);

                let applied = state.send_if_modified(|state| {
                    if state.generation != generation {
                        return false;
                    }
                    state.phase = Phase::Active;
                    state.value = value;
                    state.loading = false;
                    state.error = None;
                    true
                });
                if !applied {
                    break;
                }

                trace!(
                    domain = D::NAME,
                    subscription_id = %subscription_id,
                    document_count,
                    "Snapshot applied"
                );
                events.emit_lossy(SyncEvent::SnapshotApplied {
                    domain: D::NAME.to_string(),
                    subscription_id,
                    document_count,
                    timestamp: Utc::now(),
                });
            }
            Some(RemoteEvent::Error(err)) => {
                let message = err.to_string();
                if !apply_error(&state, generation, err) {
                    break;
                }

                warn!(
                    domain = D::NAME,
                    subscription_id = %subscription_id,
                    error = %message,
                    "Subscription error, keeping last good value"
                );
                events.emit_lossy(SyncEvent::SubscriptionFailed {
                    domain: D::NAME.to_string(),
                    subscription_id: Some(subscription_id),
                    message,
                    timestamp: Utc::now(),
                });
            }
            None => {
                debug!(
                    domain = D::NAME,
                    subscription_id = %subscription_id,
                    "Remote closed subscription stream"
                );
                break;
            }
        }
    }

    trace!(domain = D::NAME, subscription_id = %subscription_id, "Subscription pump exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingo_common::remote::{Direction, InMemoryRemote};
    use serde_json::json;

    /// Minimal domain: the ids of every document, optionally limited
    struct IdsDomain;

    impl DataDomain for IdsDomain {
        const NAME: &'static str = "ids";
        type Params = Option<usize>;
        type Value = Vec<String>;

        fn query(&self, user_id: &str, params: &Option<usize>) -> Query {
            let query = Query::collection(format!("users/{}/items", user_id))
                .order_by("n", Direction::Ascending);
            match params {
                Some(limit) => query.limit(*limit),
                None => query,
            }
        }

        fn decode(&self, snapshot: &Snapshot) -> Vec<String> {
            snapshot.documents.iter().map(|d| d.id.clone()).collect()
        }
    }

    fn setup() -> (Arc<InMemoryRemote>, SharedDataSource<IdsDomain>) {
        let remote = Arc::new(InMemoryRemote::new());
        let source = SharedDataSource::new(IdsDomain, remote.clone(), EventBus::new(64));
        (remote, source)
    }

    async fn wait_active(source: &SharedDataSource<IdsDomain>) -> DataState<Vec<String>> {
        let mut rx = source.observe();
        let state = rx
            .wait_for(|s| s.phase == Phase::Active)
            .await
            .expect("sender alive");
        state.clone()
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let (_remote, source) = setup();
        let state = source.current();
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.value.is_empty());
        assert!(!state.loading);
        assert!(!state.has_error());
    }

    #[tokio::test]
    async fn test_empty_user_rejected() {
        let (remote, source) = setup();
        assert!(matches!(
            source.start_observing("  ", None).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(remote.subscribe_calls().await, 0);
    }

    #[tokio::test]
    async fn test_is_active_for_trims_like_start() {
        let (_remote, source) = setup();
        source.start_observing(" a ", None).await.unwrap();

        assert!(source.is_active_for(" a ").await);
        assert!(source.is_active_for("a").await);
        assert!(!source.is_active_for("b").await);
        assert_eq!(source.active_subscription().await.unwrap().user_id, "a");
    }

    #[tokio::test]
    async fn test_start_is_loading_until_first_snapshot() {
        let (remote, source) = setup();
        remote.set_document("users/a/items", "x", json!({"n": 1})).await;

        source.start_observing("a", None).await.unwrap();
        // start_observing does not wait for data
        let state = source.current();
        assert!(state.phase == Phase::Loading || state.phase == Phase::Active);

        let state = wait_active(&source).await;
        assert_eq!(state.value, vec!["x".to_string()]);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_registration_failure_becomes_error_state() {
        let (remote, source) = setup();
        remote
            .fail_next_subscribe(RemoteError::permission_denied("rules"))
            .await;

        source.start_observing("a", None).await.unwrap();

        let state = source.current();
        assert_eq!(state.phase, Phase::ActiveWithError);
        assert!(!state.loading);
        assert!(source.active_subscription().await.is_none());

        // Explicit retry registers again
        source.start_observing("a", None).await.unwrap();
        assert_eq!(remote.subscribe_calls().await, 2);
        wait_active(&source).await;
    }

    #[tokio::test]
    async fn test_error_event_then_retry_resubscribes() {
        let (remote, source) = setup();
        remote.set_document("users/a/items", "x", json!({"n": 1})).await;
        source.start_observing("a", None).await.unwrap();
        wait_active(&source).await;

        remote
            .emit_error("users/a/items", RemoteError::unavailable("stream reset"))
            .await;
        let mut rx = source.observe();
        rx.wait_for(|s| s.has_error()).await.unwrap();

        // Unhealthy subscription is not reused; stale value survives the reload
        source.start_observing("a", None).await.unwrap();
        assert_eq!(remote.subscribe_calls().await, 2);
        assert_eq!(source.current().value, vec!["x".to_string()]);
        assert_eq!(remote.live_subscriptions("users/a/items").await, 1);
    }

    #[tokio::test]
    async fn test_param_change_resubscribes() {
        let (remote, source) = setup();
        for n in 0..5 {
            remote
                .set_document("users/a/items", &format!("i{}", n), json!({"n": n}))
                .await;
        }

        source.start_observing("a", Some(2)).await.unwrap();
        assert_eq!(wait_active(&source).await.value.len(), 2);

        source.start_observing("a", Some(4)).await.unwrap();
        let mut rx = source.observe();
        let state = rx.wait_for(|s| s.value.len() == 4).await.unwrap().clone();
        assert_eq!(state.phase, Phase::Active);

        assert_eq!(remote.subscribe_calls().await, 2);
        assert_eq!(remote.live_subscriptions("users/a/items").await, 1);
        assert_eq!(source.active_subscription().await.unwrap().params, Some(4));
    }
}
