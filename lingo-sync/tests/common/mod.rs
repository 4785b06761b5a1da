//! Shared helpers for lingo-sync integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lingo_common::events::EventBus;
use lingo_common::remote::InMemoryRemote;
use lingo_common::retry::RetryPolicy;
use lingo_sync::domains::history::history_collection;
use lingo_sync::domains::HistoryDataSource;
use lingo_sync::DataState;
use serde_json::json;
use tokio::sync::watch;

/// Wait (bounded) until the published state satisfies `predicate`
pub async fn wait_for_state<V: Clone>(
    rx: &mut watch::Receiver<DataState<V>>,
    predicate: impl FnMut(&DataState<V>) -> bool,
) -> DataState<V> {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for data source state")
        .expect("data source dropped")
        .clone()
}

/// Fast policy so retry paths finish quickly without paused time
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        growth_factor: 2.0,
    }
}

pub fn history_source(remote: &Arc<InMemoryRemote>, row_limit: usize) -> HistoryDataSource {
    HistoryDataSource::new(remote.clone(), EventBus::new(64), fast_retry(), row_limit)
}

/// Insert a history record `n` (larger n = newer)
pub async fn add_history(remote: &InMemoryRemote, user_id: &str, n: i64, from: &str, to: &str) {
    remote
        .set_document(
            &history_collection(user_id),
            &format!("r{:03}", n),
            json!({
                "sourceText": format!("text {}", n),
                "translatedText": format!("texto {}", n),
                "sourceLanguage": from,
                "targetLanguage": to,
                "timestamp": 1_700_000_000_000i64 + n,
                "favorite": n % 2 == 0,
            }),
        )
        .await;
}
