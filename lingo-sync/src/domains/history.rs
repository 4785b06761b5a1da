//! Translation history domain
//!
//! Live subscription on `users/{uid}/history`, newest first, capped at a
//! display-row limit. Besides the live value the history source keeps a
//! per-language aggregate computed once over the whole collection on demand
//! (`refresh_language_counts`). A failed refresh leaves the previous
//! aggregate in place (stale-but-available). The aggregate belongs to the
//! observed user and is cleared when observation moves to someone else.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use lingo_common::events::{EventBus, SyncEvent};
use lingo_common::remote::{
    commit_chunked, Direction, Query, RemoteCollectionClient, RemoteError, Snapshot, WriteOp,
};
use lingo_common::retry::{with_retry, RetryPolicy};
use lingo_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use super::decode_documents;
use crate::data_source::{DataDomain, DataState, SharedDataSource, SubscriptionInfo};

/// One saved translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRecord {
    /// Document id (filled from the snapshot, not stored in the body)
    #[serde(default, skip_serializing)]
    pub id: String,
    pub source_text: String,
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    #[serde(default)]
    pub favorite: bool,
}

impl TranslationRecord {
    /// Whether `code` is the source or target language (case-insensitive)
    pub fn involves_language(&self, code: &str) -> bool {
        self.source_language.eq_ignore_ascii_case(code)
            || self.target_language.eq_ignore_ascii_case(code)
    }
}

/// Cached history value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryValue {
    /// Newest first
    pub records: Vec<TranslationRecord>,
    pub count: usize,
}

/// Records per language code, over the whole collection
pub type LanguageCounts = BTreeMap<String, usize>;

pub fn history_collection(user_id: &str) -> String {
    format!("users/{}/history", user_id)
}

/// Count each record once under its source and once under its target
/// language (once when both are the same). Codes are lower-cased.
pub fn count_languages<'a>(records: impl IntoIterator<Item = &'a TranslationRecord>) -> LanguageCounts {
    let mut counts = LanguageCounts::new();
    for record in records {
        let source = record.source_language.to_lowercase();
        let target = record.target_language.to_lowercase();
        *counts.entry(source.clone()).or_default() += 1;
        if target != source {
            *counts.entry(target).or_default() += 1;
        }
    }
    counts
}

pub struct HistoryDomain;

impl DataDomain for HistoryDomain {
    const NAME: &'static str = "history";
    /// Display-row limit
    type Params = usize;
    type Value = HistoryValue;

    fn query(&self, user_id: &str, limit: &usize) -> Query {
        Query::collection(history_collection(user_id))
            .order_by("timestamp", Direction::Descending)
            .limit(*limit)
    }

    fn decode(&self, snapshot: &Snapshot) -> HistoryValue {
        let records = decode_records(snapshot);
        HistoryValue {
            count: records.len(),
            records,
        }
    }
}

fn decode_records(snapshot: &Snapshot) -> Vec<TranslationRecord> {
    decode_documents(HistoryDomain::NAME, snapshot, |record: &mut TranslationRecord, id| {
        record.id = id.to_string()
    })
}

/// History data source: live records plus the on-demand language aggregate
pub struct HistoryDataSource {
    source: SharedDataSource<HistoryDomain>,
    client: Arc<dyn RemoteCollectionClient>,
    events: EventBus,
    retry: RetryPolicy,
    row_limit: usize,
    language_counts: watch::Sender<LanguageCounts>,
    /// Bumped on stop so late refreshes for a logged-out user are dropped
    aggregate_epoch: AtomicU64,
}

impl HistoryDataSource {
    /// # Arguments
    /// * `row_limit` - Default display-row cap for `start_observing`
    /// * `retry` - Backoff for one-off remote calls (aggregate refresh, clear)
    pub fn new(
        client: Arc<dyn RemoteCollectionClient>,
        events: EventBus,
        retry: RetryPolicy,
        row_limit: usize,
    ) -> Self {
        let (language_counts, _) = watch::channel(LanguageCounts::new());
        Self {
            source: SharedDataSource::new(HistoryDomain, Arc::clone(&client), events.clone()),
            client,
            events,
            retry,
            row_limit,
            language_counts,
            aggregate_epoch: AtomicU64::new(0),
        }
    }

    /// Observe with the configured row limit
    pub async fn start_observing(&self, user_id: &str) -> Result<()> {
        self.start_observing_with_limit(user_id, self.row_limit).await
    }

    /// Observe with an explicit row limit
    ///
    /// Moving to a different user forgets the previous user's aggregate.
    pub async fn start_observing_with_limit(&self, user_id: &str, limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(Error::InvalidInput(
                "history row limit must be at least 1".to_string(),
            ));
        }
        let user_id = validate_user(user_id)?;

        let switching_user = !self.source.is_active_for(user_id).await;
        if switching_user {
            self.reset_aggregate();
        }
        self.source.start_observing(user_id, limit).await?;
        if switching_user {
            // Refreshes that checked the old user before the switch landed
            self.reset_aggregate();
        }
        Ok(())
    }

    /// Stop the live subscription and forget the aggregate
    pub async fn stop_observing(&self) {
        self.reset_aggregate();
        self.source.stop_observing().await;
    }

    fn reset_aggregate(&self) {
        self.aggregate_epoch.fetch_add(1, Ordering::SeqCst);
        self.language_counts.send_replace(LanguageCounts::new());
    }

    pub fn observe(&self) -> watch::Receiver<DataState<HistoryValue>> {
        self.source.observe()
    }

    pub fn current(&self) -> DataState<HistoryValue> {
        self.source.current()
    }

    pub async fn active_subscription(&self) -> Option<SubscriptionInfo<usize>> {
        self.source.active_subscription().await
    }

    pub async fn is_active_for(&self, user_id: &str) -> bool {
        self.source.is_active_for(user_id).await
    }

    /// Cached records involving language `code`
    pub fn records_for_language(&self, code: &str) -> Vec<TranslationRecord> {
        self.source.with_value(|value| {
            value
                .records
                .iter()
                .filter(|r| r.involves_language(code))
                .cloned()
                .collect()
        })
    }

    /// Number of cached records involving language `code`
    pub fn count_for_language(&self, code: &str) -> usize {
        self.source
            .with_value(|value| value.records.iter().filter(|r| r.involves_language(code)).count())
    }

    /// Cached records marked favorite
    pub fn favorites(&self) -> Vec<TranslationRecord> {
        self.source.with_value(|value| {
            value.records.iter().filter(|r| r.favorite).cloned().collect()
        })
    }

    /// Latest aggregate (empty until the first successful refresh)
    pub fn language_counts(&self) -> LanguageCounts {
        self.language_counts.borrow().clone()
    }

    pub fn observe_language_counts(&self) -> watch::Receiver<LanguageCounts> {
        self.language_counts.subscribe()
    }

    /// Recompute per-language counts over every history record
    ///
    /// Independent of the row limit. The counts are always returned, but the
    /// observable aggregate only takes them when `user_id` is the observed
    /// user and no user switch or stop happened meanwhile. Transient
    /// failures are retried per the configured policy; a final failure leaves
    /// the previous aggregate untouched and is returned.
    pub async fn refresh_language_counts(&self, user_id: &str) -> Result<LanguageCounts> {
        let user_id = validate_user(user_id)?;
        let epoch = self.aggregate_epoch.load(Ordering::SeqCst);
        let publishable = self.source.is_active_for(user_id).await;
        let query = Query::collection(history_collection(user_id));

        let fetched = with_retry(
            &self.retry,
            "history language counts refresh",
            RemoteError::is_retryable,
            || self.client.get_once(&query),
        )
        .await;

        match fetched {
            Ok(snapshot) => {
                let counts = count_languages(&decode_records(&snapshot));

                let applied = publishable
                    && self.language_counts.send_if_modified(|current| {
                        if self.aggregate_epoch.load(Ordering::SeqCst) != epoch {
                            return false;
                        }
                        *current = counts.clone();
                        true
                    });
                if applied {
                    info!(
                        domain = HistoryDomain::NAME,
                        user_id,
                        languages = counts.len(),
                        records = snapshot.len(),
                        "Language counts refreshed"
                    );
                    self.events.emit_lossy(SyncEvent::AggregateRefreshed {
                        domain: HistoryDomain::NAME.to_string(),
                        user_id: user_id.to_string(),
                        key_count: counts.len(),
                        timestamp: Utc::now(),
                    });
                } else {
                    info!(
                        domain = HistoryDomain::NAME,
                        user_id, "Language counts not published, user is not the observed one"
                    );
                }
                Ok(counts)
            }
            Err(err) => {
                warn!(
                    domain = HistoryDomain::NAME,
                    user_id,
                    error = %err,
                    "Language counts refresh failed, keeping previous aggregate"
                );
                self.events.emit_lossy(SyncEvent::AggregateRefreshFailed {
                    domain: HistoryDomain::NAME.to_string(),
                    user_id: user_id.to_string(),
                    message: err.to_string(),
                    timestamp: Utc::now(),
                });
                Err(err.into())
            }
        }
    }

    /// Delete every history record of `user_id`
    ///
    /// Deletes are committed in atomic chunks of at most 500 operations. The
    /// live subscription picks up the change through its normal snapshots.
    ///
    /// # Returns
    /// Number of records deleted
    pub async fn clear_history(&self, user_id: &str) -> Result<usize> {
        let user_id = validate_user(user_id)?;
        let collection = history_collection(user_id);
        let query = Query::collection(collection.clone());

        let snapshot = with_retry(
            &self.retry,
            "history clear (list)",
            RemoteError::is_retryable,
            || self.client.get_once(&query),
        )
        .await?;

        let ops: Vec<WriteOp> = snapshot
            .documents
            .iter()
            .map(|doc| WriteOp::Delete {
                collection: collection.clone(),
                id: doc.id.clone(),
            })
            .collect();
        let deleted = ops.len();

        // Deletes are idempotent, so replaying already-committed chunks is harmless
        let chunks = with_retry(
            &self.retry,
            "history clear (delete)",
            RemoteError::is_retryable,
            || commit_chunked(self.client.as_ref(), ops.clone()),
        )
        .await?;

        info!(
            domain = HistoryDomain::NAME,
            user_id, deleted, chunks, "History cleared"
        );
        Ok(deleted)
    }
}

fn validate_user(user_id: &str) -> Result<&str> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(Error::InvalidInput(
            "history: user id must not be empty".to_string(),
        ));
    }
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingo_common::remote::Document;
    use serde_json::json;

    fn record(source: &str, target: &str) -> TranslationRecord {
        TranslationRecord {
            id: String::new(),
            source_text: "hello".to_string(),
            translated_text: "hola".to_string(),
            source_language: source.to_string(),
            target_language: target.to_string(),
            timestamp: 0,
            favorite: false,
        }
    }

    #[test]
    fn test_count_languages() {
        let records = vec![record("en", "es"), record("EN", "fr"), record("de", "de")];
        let counts = count_languages(&records);

        assert_eq!(counts.get("en"), Some(&2));
        assert_eq!(counts.get("es"), Some(&1));
        assert_eq!(counts.get("fr"), Some(&1));
        assert_eq!(counts.get("de"), Some(&1), "same-language record counted once");
    }

    #[test]
    fn test_decode_skips_malformed_and_fills_id() {
        let snapshot = Snapshot::new(vec![
            Document::new(
                "r1",
                json!({
                    "sourceText": "thank you",
                    "translatedText": "gracias",
                    "sourceLanguage": "en",
                    "targetLanguage": "es",
                    "timestamp": 1700000000000i64,
                }),
            ),
            Document::new("broken", json!({"sourceText": 5})),
        ]);

        let value = HistoryDomain.decode(&snapshot);
        assert_eq!(value.count, 1);
        assert_eq!(value.records[0].id, "r1");
        assert!(!value.records[0].favorite);
    }

    #[test]
    fn test_query_shape() {
        let query = HistoryDomain.query("u1", &200);
        assert_eq!(query.collection, "users/u1/history");
        assert_eq!(query.limit, Some(200));
        assert_eq!(
            query.order_by.map(|o| (o.field, o.direction)),
            Some(("timestamp".to_string(), Direction::Descending))
        );
    }

    #[test]
    fn test_involves_language_is_case_insensitive() {
        assert!(record("en", "es").involves_language("ES"));
        assert!(!record("en", "es").involves_language("fr"));
    }
}
