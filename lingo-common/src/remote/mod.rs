//! Remote collection client abstraction
//!
//! The document database is an external service offering document CRUD,
//! real-time snapshot subscriptions and atomic batched writes. This module
//! defines the value types that cross that boundary and the
//! [`RemoteCollectionClient`] trait the data sources consume.
//!
//! Subscriptions are modelled as a cancellable stream: dropping the
//! [`SnapshotStream`] unsubscribes.

mod memory;

pub use memory::InMemoryRemote;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Maximum number of operations in one atomic batch write
pub const MAX_BATCH_SIZE: usize = 500;

/// Classification of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Connectivity loss or server unavailable
    Unavailable,
    /// Request took longer than its deadline
    DeadlineExceeded,
    /// Missing or expired credentials
    Unauthenticated,
    /// Security rules rejected the request
    PermissionDenied,
    /// Malformed query or write
    InvalidArgument,
    /// Document or collection missing
    NotFound,
    /// Server-side failure
    Internal,
    /// Quota or rate limit hit
    ResourceExhausted,
    /// Request cancelled before completion
    Cancelled,
    /// Anything the transport could not classify
    Unknown,
}

impl RemoteErrorKind {
    /// Human readable name, worded so [`crate::retry::is_retryable_failure`]
    /// recognises it
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::Unavailable => "unavailable",
            RemoteErrorKind::DeadlineExceeded => "deadline exceeded",
            RemoteErrorKind::Unauthenticated => "unauthenticated",
            RemoteErrorKind::PermissionDenied => "permission denied",
            RemoteErrorKind::InvalidArgument => "invalid argument",
            RemoteErrorKind::NotFound => "not found",
            RemoteErrorKind::Internal => "internal",
            RemoteErrorKind::ResourceExhausted => "resource exhausted",
            RemoteErrorKind::Cancelled => "cancelled",
            RemoteErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the remote collection service
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unavailable, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::PermissionDenied, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::InvalidArgument, message)
    }

    /// Classify by kind; the message text is not consulted
    ///
    /// Agrees with [`crate::retry::is_retryable_failure`] applied to the kind
    /// name alone.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            RemoteErrorKind::Unauthenticated
                | RemoteErrorKind::PermissionDenied
                | RemoteErrorKind::InvalidArgument
        )
    }
}

/// One stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Deserialize the document body into a domain record
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.data)
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Complete, point-in-time result set for a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub documents: Vec<Document>,
    pub read_time: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            read_time: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Event pushed on a live subscription
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Snapshot(Snapshot),
    Error(RemoteError),
}

/// Live subscription; dropping it unsubscribes
pub type SnapshotStream = BoxStream<'static, RemoteEvent>;

/// Sort direction for [`OrderBy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Equality filter on a top-level field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

/// Query against one collection
///
/// Mirrors the subset of the document database query language the data
/// sources need: equality filters, a single ordering and a row limit.
/// Documents missing the ordering field are excluded, as the database does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection: path.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Same query without a row limit
    pub fn unlimited(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Whether `doc` passes every filter and carries the ordering field
    pub fn matches(&self, doc: &Document) -> bool {
        let filters_pass = self
            .filters
            .iter()
            .all(|f| doc.field(&f.field) == Some(&f.value));
        let has_order_field = match &self.order_by {
            Some(order) => doc.field(&order.field).is_some(),
            None => true,
        };
        filters_pass && has_order_field
    }

    /// Evaluate the query over an unordered document set
    pub fn evaluate(&self, documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut selected: Vec<Document> = documents
            .into_iter()
            .filter(|doc| self.matches(doc))
            .collect();

        match &self.order_by {
            Some(order) => selected.sort_by(|a, b| {
                let by_field = compare_values(a.field(&order.field), b.field(&order.field));
                let by_field = match order.direction {
                    Direction::Ascending => by_field,
                    Direction::Descending => by_field.reverse(),
                };
                by_field.then_with(|| a.id.cmp(&b.id))
            }),
            None => selected.sort_by(|a, b| a.id.cmp(&b.id)),
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// Ordering across JSON values: null < bool < number < string < other
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// One operation inside an atomic batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Client for the remote document collection service
#[async_trait]
pub trait RemoteCollectionClient: Send + Sync {
    /// Open a real-time subscription
    ///
    /// The stream yields a snapshot on every change (the current result set
    /// first) and error events on push failures, in server order.
    async fn subscribe(&self, query: &Query) -> Result<SnapshotStream, RemoteError>;

    /// Fetch the current result set once
    async fn get_once(&self, query: &Query) -> Result<Snapshot, RemoteError>;

    /// Apply up to [`MAX_BATCH_SIZE`] operations atomically
    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError>;
}

/// Commit an arbitrary number of operations as consecutive atomic chunks
///
/// Chunks are applied in order; the first failing chunk aborts the rest.
/// Chunks committed before the failure stay committed.
///
/// # Returns
/// Number of chunks committed
pub async fn commit_chunked(
    client: &dyn RemoteCollectionClient,
    ops: Vec<WriteOp>,
) -> Result<usize, RemoteError> {
    let total = ops.len();
    let mut committed = 0;

    for chunk in ops.chunks(MAX_BATCH_SIZE) {
        client.batch_write(chunk.to_vec()).await?;
        committed += 1;
        debug!(
            chunk = committed,
            chunk_len = chunk.len(),
            total_ops = total,
            "Committed batch chunk"
        );
    }

    Ok(committed)
}
