//! Error types of the server, one enum per layer.
//!
//! Only [`DispatchError`] ever reaches a client, always as an
//! `ErrorResponse` frame. Everything else is logged where it happens.

use std::path::PathBuf;
use thiserror::Error;

/// Prefix carried by every error message sent to a client.
pub const ERROR_PREFIX: &str = "[ERROR] ";

/// Failures of a single request. The connection always stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Not logged in, already logged in, wrong credentials or a session conflict.
    #[error("{0}")]
    Auth(String),

    /// Unknown hotel, city or user.
    #[error("{0}")]
    NotFound(String),

    /// Malformed registration fields or out-of-range review scores.
    #[error("{0}")]
    Validation(String),

    /// A message kind clients are not allowed to send.
    #[error("unsupported request")]
    Unsupported,
}

impl DispatchError {
    pub fn auth(message: impl Into<String>) -> Self {
        DispatchError::Auth(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        DispatchError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DispatchError::Validation(message.into())
    }

    /// Text placed in the `ErrorResponse` frame.
    pub fn client_message(&self) -> String {
        format!("{}{}", ERROR_PREFIX, self)
    }
}

/// Disk read or write failures of the JSON data files.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("data directory {0} does not exist")]
    MissingDataDir(PathBuf),

    #[error("required data file {0} does not exist")]
    MissingFile(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        PersistenceError::Json {
            path: path.into(),
            source,
        }
    }
}

/// Delivery failure of a directed rank notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("subscriber connection is closed")]
    Closed,

    #[error("subscriber is not reading, {pending} frames already queued")]
    Backlogged { pending: usize },

    #[error("failed to encode notification: {0}")]
    Encode(#[from] shared::ProtocolError),
}

/// Failure scoring one hotel. The rest of the cycle carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RankingError {
    #[error("hotel {hotel_id} produced a non-finite score ({score})")]
    NonFiniteScore { hotel_id: u32, score: f64 },
}

/// Startup and configuration failures.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}
