use http::StatusCode;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::error;

use crate::guard::Verb;
use crate::request::Method;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Every way a gateway or session call can fail.
///
/// Client errors carry a message that names the violated expectation; server
/// errors are logged in full and reported to the caller generically.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request method: expected {expected}, got {actual}")]
    MethodNotAllowed { expected: Method, actual: Method },
    #[error("malformed payload: {0}")]
    PayloadDecode(String),
    #[error("invalid query: only {expected} queries allowed")]
    VerbMismatch { expected: Verb },
    #[error("command text contains more than one statement")]
    MultipleStatements,
    #[error("command text contains no statement")]
    EmptyStatement,
    #[error("sessionId not found in session data")]
    SessionKeyMissing,
    #[error("database connection not initialized")]
    ConnectionUnavailable,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection lock poisoned")]
    Poisoned,
}

impl GatewayError {
    /// HTTP status code for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::PayloadDecode(_)
            | GatewayError::VerbMismatch { .. }
            | GatewayError::MultipleStatements
            | GatewayError::EmptyStatement
            | GatewayError::SessionKeyMissing => StatusCode::BAD_REQUEST,
            GatewayError::ConnectionUnavailable
            | GatewayError::Sqlite(_)
            | GatewayError::Poisoned => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Message safe to hand back to the caller.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::MethodNotAllowed { .. } => "Invalid request method".to_string(),
            GatewayError::PayloadDecode(_) => "Error reading request body".to_string(),
            GatewayError::VerbMismatch { expected } => {
                format!("Invalid query: only {expected} queries allowed")
            }
            GatewayError::MultipleStatements | GatewayError::EmptyStatement => {
                "Invalid query: exactly one statement allowed".to_string()
            }
            GatewayError::SessionKeyMissing => "sessionId not found in session data".to_string(),
            GatewayError::ConnectionUnavailable
            | GatewayError::Sqlite(_)
            | GatewayError::Poisoned => "Internal server error".to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::PayloadDecode(err.to_string())
    }
}

pub fn acquire_lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        error!("connection lock poisoned");
        GatewayError::Poisoned
    })
}
