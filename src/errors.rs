/*!
 * Error types for the subtrans application.
 *
 * Each layer gets its own thiserror enum. The `Display` strings are not just
 * cosmetic: the retry classifier matches on them, so the phrases used here
 * ("not found (404)", "server error", "dead connection", ...) are part of the
 * contract between the remote/database layers and the task pipeline.
 */

use thiserror::Error;

use crate::jobs::Stage;

/// Errors that can occur while decoding subtitle documents
#[derive(Error, Debug)]
pub enum SubtitleError {
    /// No entry could be recovered from the document
    #[error("Failed to parse subtitle document: no entries recovered from {0} bytes")]
    ParseError(usize),
}

/// Errors raised by the remote operations (document fetch, translation, publish)
#[derive(Error, Debug)]
pub enum ProviderError {
    /// 400/401/403/404 - never worth another attempt
    #[error("{}", client_error_message(*status, url))]
    ClientError {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// 429 from the remote side
    #[error("Rate limited (429) by {0}")]
    RateLimited(String),

    /// 5xx from the remote side
    #[error("Server error {status}: {message}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Reason phrase or response excerpt
        message: String,
    },

    /// Any other non-2xx status
    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The connection could not be established or was dropped
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Any other transport failure
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Declared or observed body size above the configured limit
    #[error("Subtitle document too large: {bytes} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Bytes declared or received so far
        bytes: u64,
        /// Configured maximum
        limit: u64,
    },

    /// Zero-byte response body
    #[error("Downloaded subtitle document is empty")]
    EmptyBody,

    /// The translation stream finished without any text fragment
    #[error("No translated content produced by the translation API")]
    EmptyTranslation,

    /// Local file system failure while spooling or reading artifacts
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// All attempts of a wrapped call failed
    #[error("{operation} failed after {attempts} attempts, last error: {last}")]
    Exhausted {
        /// Name of the wrapped operation
        operation: &'static str,
        /// Number of attempts made
        attempts: u32,
        /// Last observed cause
        last: Box<ProviderError>,
    },
}

fn client_error_message(status: u16, url: &str) -> String {
    match status {
        404 => format!("Resource not found (404): {}", url),
        403 => format!("Forbidden (403), no permission to access: {}", url),
        other => format!("Client error {}: {}", other, url),
    }
}

impl ProviderError {
    /// Map a reqwest transport error onto our taxonomy
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() {
            Self::ConnectionError(error.to_string())
        } else if let Some(status) = error.status() {
            Self::UnexpectedStatus {
                status: status.as_u16(),
                url: error.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            Self::NetworkError(error.to_string())
        }
    }

    /// Whether a wrapped call must stop retrying immediately
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ClientError { .. })
    }

    /// HTTP status associated with the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status, .. }
            | Self::ServerError { status, .. }
            | Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::RateLimited(_) => Some(429),
            Self::Exhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }
}

/// Errors raised by the connection pool
#[derive(Error, Debug)]
pub enum PoolError {
    /// Every slot is checked out and the wait timed out
    #[error("Connection pool exhausted: all {capacity} connections in use after waiting {waited_ms} ms")]
    Exhausted {
        /// Pool capacity
        capacity: usize,
        /// How long the caller waited
        waited_ms: u128,
    },

    /// Opening a new connection failed
    #[error("Connection error: failed to open database connection: {0}")]
    Connect(String),

    /// A dead pooled connection could not be replaced
    #[error("Dead connection could not be replaced: {0}")]
    DeadConnection(String),
}

/// Errors raised by the persistence layer
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Busy/locked/unreachable store - retried
    #[error("Database operational error: {0}")]
    Operational(String),

    /// Constraint violation - never retried
    #[error("Database integrity error: {0}")]
    Integrity(String),

    /// Malformed query or unexpected schema - never retried
    #[error("Database query error: {0}")]
    Query(String),

    /// Point update addressed a row that does not exist
    #[error("No task record found for task_id {0}")]
    TaskNotFound(String),

    /// Pool could not hand out a connection
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The blocking worker running the operation panicked or was cancelled
    #[error("Database worker failed: {0}")]
    Worker(String),
}

impl DatabaseError {
    /// Operational and connectivity failures are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Operational(_) | Self::Pool(_))
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(error: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &error {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::OutOfMemory
                | ErrorCode::FileLockingProtocolFailed => Self::Operational(error.to_string()),
                ErrorCode::ConstraintViolation => Self::Integrity(error.to_string()),
                _ => Self::Query(error.to_string()),
            },
            _ => Self::Query(error.to_string()),
        }
    }
}

/// A task pipeline run that stopped at `stage`
#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    /// Stage that was running
    pub stage: Stage,
    /// Underlying cause
    #[source]
    pub source: AppError,
}

impl PipelineError {
    /// Wrap `source` as a failure of `stage`
    pub fn new(stage: Stage, source: impl Into<AppError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a remote operation
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from subtitle processing
    #[error("Subtitle error: {0}")]
    Subtitle(#[from] SubtitleError),

    /// Error from the persistence layer
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
