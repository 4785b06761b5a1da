//! Remote callable function client abstraction
//!
//! Cloud functions are reached over request/response RPC with JSON payloads.
//! Sibling repositories (translation, quiz generation, ...) call them through
//! [`CallableClient`] and usually wrap the call in [`call_with_retry`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::retry::{with_retry, RetryPolicy};

/// Classified callable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionErrorKind {
    Network,
    Timeout,
    Unauthenticated,
    PermissionDenied,
    InvalidArgument,
    Internal,
    /// Quota exceeded
    ResourceExhausted,
}

impl fmt::Display for FunctionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionErrorKind::Network => "network",
            FunctionErrorKind::Timeout => "timeout",
            FunctionErrorKind::Unauthenticated => "unauthenticated",
            FunctionErrorKind::PermissionDenied => "permission denied",
            FunctionErrorKind::InvalidArgument => "invalid argument",
            FunctionErrorKind::Internal => "internal",
            FunctionErrorKind::ResourceExhausted => "resource exhausted",
        };
        f.write_str(name)
    }
}

/// Failure returned by a callable function
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CallableError {
    pub kind: FunctionErrorKind,
    pub message: String,
}

impl CallableError {
    pub fn new(kind: FunctionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Transient failures (network, timeout, internal, quota) are retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            FunctionErrorKind::Unauthenticated
                | FunctionErrorKind::PermissionDenied
                | FunctionErrorKind::InvalidArgument
        )
    }
}

/// Client for remote callable functions
#[async_trait]
pub trait CallableClient: Send + Sync {
    /// Invoke function `name` with a JSON payload
    async fn call(&self, name: &str, payload: Value) -> Result<Value, CallableError>;
}

/// Invoke a callable function, retrying transient failures per `policy`
///
/// Failures are classified by [`CallableError::is_retryable`], so a permanent
/// kind is never retried whatever its message says.
pub async fn call_with_retry(
    client: &dyn CallableClient,
    policy: &RetryPolicy,
    name: &str,
    payload: Value,
) -> Result<Value, CallableError> {
    let operation_name = format!("callable {}", name);
    with_retry(policy, &operation_name, CallableError::is_retryable, || {
        client.call(name, payload.clone())
    })
    .await
}
