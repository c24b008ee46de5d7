use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Data-level error returned by the server for a non-2xx response.
///
/// This is not a protocol failure: it travels inside an
/// [`Envelope`](crate::Envelope) next to the status it was produced with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchError {
    pub status: u16,
    pub message: String,
    /// Parsed response body, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FetchError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        FetchError {
            status,
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(status: u16, message: impl Into<String>, value: Value) -> Self {
        FetchError {
            status,
            message: message.into(),
            value: Some(value),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for FetchError {}

/// Per-item failure raised by the batched data loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("Aborted")]
    Aborted,
    #[error("Item does not fit in any valid batch")]
    Invalid,
    #[error("Missing result")]
    MissingResult,
}

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The pipeline is misconfigured. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Operation aborted")]
    Aborted,
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("HTTP error {0}")]
    Http(FetchError),
    #[error("Transformer error: {0}")]
    Transformer(String),
}

impl ClientError {
    pub fn config(message: impl Into<String>) -> Self {
        ClientError::Config(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        ClientError::Network(message.into())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        ClientError::Codec(message.into())
    }

    /// True for both a client-side abort and a batch item aborted before dispatch.
    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            ClientError::Aborted | ClientError::Batch(BatchError::Aborted)
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClientError::Http(err) => Some(err.status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Codec(format!("JSON error: {}", err))
    }
}

impl From<FetchError> for ClientError {
    fn from(err: FetchError) -> Self {
        ClientError::Http(err)
    }
}
