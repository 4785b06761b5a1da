//! # Lingo Common Library
//!
//! Shared code for the Lingo sync core including:
//! - Error types
//! - Configuration loading
//! - Retry executor with exponential backoff and failure classification
//! - Sync event types (SyncEvent enum) and EventBus
//! - Remote collection client abstraction (plus an in-memory implementation)
//! - Remote callable function client abstraction

pub mod config;
pub mod error;
pub mod events;
pub mod functions;
pub mod remote;
pub mod retry;

pub use error::{Error, Result};
pub use retry::{is_retryable_failure, with_retry, RetryPolicy};
