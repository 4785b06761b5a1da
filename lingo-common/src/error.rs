//! Common error types for Lingo

use thiserror::Error;

use crate::functions::CallableError;
use crate::remote::RemoteError;

/// Common result type for Lingo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the Lingo sync core
#[derive(Error, Debug)]
pub enum Error {
    /// Remote collection service error (wraps RemoteError)
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Remote callable function error (wraps CallableError)
    #[error("Function error: {0}")]
    Function(#[from] CallableError),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
