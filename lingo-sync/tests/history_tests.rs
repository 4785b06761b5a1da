//! Integration tests for the history data source
//!
//! Tests cover:
//! - Language aggregate spans the whole collection, not the display rows
//! - Refresh failures: permanent (no retry), transient (retried), exhausted
//! - stop_observing forgets the aggregate
//! - clear_history chunking and live propagation
//! - Cached-value accessors

mod common;

use std::sync::Arc;

use common::{add_history, history_source, wait_for_state};
use lingo_common::remote::{InMemoryRemote, RemoteError};
use lingo_common::Error;
use lingo_sync::domains::history::history_collection;
use lingo_sync::Phase;

#[tokio::test]
async fn test_language_counts_cover_records_beyond_row_limit() {
    let remote = Arc::new(InMemoryRemote::new());
    for n in 1..=6 {
        add_history(&remote, "user1", n, "en", "es").await;
    }
    for n in 7..=10 {
        add_history(&remote, "user1", n, "fr", "de").await;
    }
    let history = history_source(&remote, 3);
    let mut rx = history.observe();

    history.start_observing("user1").await.unwrap();
    let state = wait_for_state(&mut rx, |s| s.phase == Phase::Active).await;
    assert_eq!(state.value.count, 3, "display rows capped");

    let counts = history.refresh_language_counts("user1").await.unwrap();
    assert_eq!(counts.get("en"), Some(&6));
    assert_eq!(counts.get("es"), Some(&6));
    assert_eq!(counts.get("fr"), Some(&4));
    assert_eq!(counts.get("de"), Some(&4));
    assert_eq!(history.language_counts(), counts);
}

#[tokio::test]
async fn test_language_counts_observable() {
    let remote = Arc::new(InMemoryRemote::new());
    add_history(&remote, "user1", 1, "en", "ja").await;
    let history = history_source(&remote, 200);
    history.start_observing("user1").await.unwrap();
    let mut counts_rx = history.observe_language_counts();
    assert!(counts_rx.borrow().is_empty());

    history.refresh_language_counts("user1").await.unwrap();

    assert!(counts_rx.has_changed().unwrap());
    assert_eq!(counts_rx.borrow_and_update().get("ja"), Some(&1));
}

#[tokio::test]
async fn test_permission_denied_keeps_previous_aggregate() {
    let remote = Arc::new(InMemoryRemote::new());
    add_history(&remote, "user1", 1, "en", "es").await;
    let history = history_source(&remote, 200);
    history.start_observing("user1").await.unwrap();

    let before = history.refresh_language_counts("user1").await.unwrap();
    let calls_before = remote.get_calls().await;

    add_history(&remote, "user1", 2, "en", "it").await;
    remote
        .fail_next_get(RemoteError::permission_denied("rules rejected read"))
        .await;

    let result = history.refresh_language_counts("user1").await;
    assert!(matches!(result, Err(Error::Remote(_))));
    assert_eq!(remote.get_calls().await, calls_before + 1, "not retried");
    assert_eq!(history.language_counts(), before);
    assert!(history.language_counts().get("it").is_none());
}

#[tokio::test]
async fn test_transient_refresh_failure_is_retried() {
    let remote = Arc::new(InMemoryRemote::new());
    add_history(&remote, "user1", 1, "en", "es").await;
    let history = history_source(&remote, 200);

    remote
        .fail_next_get(RemoteError::unavailable("network unreachable"))
        .await;

    let counts = history.refresh_language_counts("user1").await.unwrap();
    assert_eq!(counts.get("es"), Some(&1));
    assert_eq!(remote.get_calls().await, 2);
}

#[tokio::test]
async fn test_exhausted_retries_keep_previous_aggregate() {
    let remote = Arc::new(InMemoryRemote::new());
    add_history(&remote, "user1", 1, "en", "es").await;
    let history = history_source(&remote, 200);
    history.start_observing("user1").await.unwrap();
    let before = history.refresh_language_counts("user1").await.unwrap();

    for _ in 0..3 {
        remote.fail_next_get(RemoteError::unavailable("timeout")).await;
    }

    assert!(history.refresh_language_counts("user1").await.is_err());
    assert_eq!(remote.get_calls().await, 1 + 3);
    assert_eq!(history.language_counts(), before);
}

#[tokio::test]
async fn test_permanent_kind_not_retried_despite_message() {
    let remote = Arc::new(InMemoryRemote::new());
    let history = history_source(&remote, 200);

    remote
        .fail_next_get(RemoteError::permission_denied("region unavailable for this account"))
        .await;

    assert!(history.refresh_language_counts("user1").await.is_err());
    assert_eq!(remote.get_calls().await, 1);
}

#[tokio::test]
async fn test_user_switch_forgets_previous_aggregate() {
    let remote = Arc::new(InMemoryRemote::new());
    add_history(&remote, "alice", 1, "en", "ja").await;
    add_history(&remote, "bob", 2, "de", "fr").await;
    let history = history_source(&remote, 200);

    history.start_observing("alice").await.unwrap();
    history.refresh_language_counts("alice").await.unwrap();
    assert_eq!(history.language_counts().get("ja"), Some(&1));

    history.start_observing("bob").await.unwrap();
    assert!(history.language_counts().is_empty());

    history.refresh_language_counts("bob").await.unwrap();
    let counts = history.language_counts();
    assert_eq!(counts.get("de"), Some(&1));
    assert!(counts.get("ja").is_none());
}

#[tokio::test]
async fn test_limit_change_keeps_aggregate() {
    let remote = Arc::new(InMemoryRemote::new());
    add_history(&remote, "user1", 1, "en", "es").await;
    let history = history_source(&remote, 200);

    history.start_observing("user1").await.unwrap();
    history.refresh_language_counts("user1").await.unwrap();
    history.start_observing_with_limit("user1", 10).await.unwrap();

    assert_eq!(history.language_counts().get("es"), Some(&1));
}

#[tokio::test]
async fn test_refresh_for_other_user_not_published() {
    let remote = Arc::new(InMemoryRemote::new());
    add_history(&remote, "alice", 1, "en", "ja").await;
    add_history(&remote, "bob", 2, "de", "fr").await;
    let history = history_source(&remote, 200);
    history.start_observing("bob").await.unwrap();

    let counts = history.refresh_language_counts("alice").await.unwrap();
    assert_eq!(counts.get("ja"), Some(&1), "caller still gets the counts");
    assert!(history.language_counts().is_empty());

    // Nothing observed at all: nothing published either
    history.stop_observing().await;
    history.refresh_language_counts("bob").await.unwrap();
    assert!(history.language_counts().is_empty());
}

#[tokio::test]
async fn test_empty_user_rejected() {
    let remote = Arc::new(InMemoryRemote::new());
    let history = history_source(&remote, 200);

    assert!(matches!(
        history.refresh_language_counts("  ").await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(history.clear_history("").await, Err(Error::InvalidInput(_))));
    assert_eq!(remote.get_calls().await, 0);
}

#[tokio::test]
async fn test_stop_clears_aggregate() {
    let remote = Arc::new(InMemoryRemote::new());
    add_history(&remote, "user1", 1, "en", "es").await;
    let history = history_source(&remote, 200);

    history.start_observing("user1").await.unwrap();
    history.refresh_language_counts("user1").await.unwrap();
    assert!(!history.language_counts().is_empty());

    history.stop_observing().await;
    assert!(history.language_counts().is_empty());
}

#[tokio::test]
async fn test_clear_history_commits_in_chunks() {
    let remote = Arc::new(InMemoryRemote::new());
    for n in 1..=501 {
        add_history(&remote, "user1", n, "en", "es").await;
    }
    let history = history_source(&remote, 200);
    let mut rx = history.observe();

    history.start_observing("user1").await.unwrap();
    wait_for_state(&mut rx, |s| s.value.count == 200).await;

    let deleted = history.clear_history("user1").await.unwrap();
    assert_eq!(deleted, 501);
    assert_eq!(remote.batch_calls().await, 2, "500 + 1");
    assert_eq!(remote.document_count(&history_collection("user1")).await, 0);

    let state = wait_for_state(&mut rx, |s| s.value.count == 0).await;
    assert_eq!(state.phase, Phase::Active);
}

#[tokio::test]
async fn test_clear_history_retries_failed_batch() {
    let remote = Arc::new(InMemoryRemote::new());
    for n in 1..=3 {
        add_history(&remote, "user1", n, "en", "es").await;
    }
    let history = history_source(&remote, 200);

    remote.fail_next_batch(RemoteError::unavailable("unavailable")).await;

    assert_eq!(history.clear_history("user1").await.unwrap(), 3);
    assert_eq!(remote.batch_calls().await, 2);
    assert_eq!(remote.document_count(&history_collection("user1")).await, 0);
}

#[tokio::test]
async fn test_cached_accessors() {
    let remote = Arc::new(InMemoryRemote::new());
    add_history(&remote, "user1", 1, "en", "es").await;
    add_history(&remote, "user1", 2, "EN", "fr").await;
    add_history(&remote, "user1", 3, "de", "es").await;
    let history = history_source(&remote, 200);
    let mut rx = history.observe();

    history.start_observing("user1").await.unwrap();
    wait_for_state(&mut rx, |s| s.value.count == 3).await;

    assert_eq!(history.count_for_language("en"), 2);
    assert_eq!(history.count_for_language("es"), 2);
    assert_eq!(history.count_for_language("ja"), 0);

    let spanish: Vec<_> = history
        .records_for_language("ES")
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(spanish, vec!["r003", "r001"]);

    let favorites = history.favorites();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].id, "r002");
}
