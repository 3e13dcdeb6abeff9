use reqwest::StatusCode;

use crate::models::ValidationError;

/// Failures reported by a remote adapter
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not your resource: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),
}

/// Discriminant of [`RemoteError`], for display without the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    Network,
    Authorization,
    NotFound,
    Validation,
}

impl RemoteError {
    pub fn kind(&self) -> RemoteErrorKind {
        match self {
            RemoteError::Network(_) => RemoteErrorKind::Network,
            RemoteError::Authorization(_) => RemoteErrorKind::Authorization,
            RemoteError::NotFound(_) => RemoteErrorKind::NotFound,
            RemoteError::Validation(_) => RemoteErrorKind::Validation,
        }
    }

    /// Only transient transport failures are safe to retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }

    /// Maps a non-success HTTP status and its body onto the error taxonomy
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = error_message(body).unwrap_or_else(|| format!("API returned status {}", status));

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                RemoteError::Validation(message)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Authorization(message),
            StatusCode::NOT_FOUND => RemoteError::NotFound(message),
            _ => RemoteError::Network(message),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Network(format!("Malformed response: {}", err))
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

impl From<ValidationError> for RemoteError {
    fn from(err: ValidationError) -> Self {
        RemoteError::Validation(err.0)
    }
}

/// Identity failures
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User already exists")]
    AlreadyExists,

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Maps an identity endpoint's non-success status onto [`AuthError`]
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = error_message(body).unwrap_or_default();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AuthError::InvalidCredentials,
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT
                if message.to_lowercase().contains("exists") =>
            {
                AuthError::AlreadyExists
            }
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => AuthError::InvalidCredentials,
            _ => AuthError::Network(format!("Identity endpoint returned {}: {}", status, message)),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(err.to_string())
    }
}

impl From<RemoteError> for AuthError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Authorization(_) => AuthError::Unauthenticated,
            RemoteError::NotFound(_) => AuthError::InvalidCredentials,
            RemoteError::Validation(message) => AuthError::Validation(message),
            other => AuthError::Network(other.to_string()),
        }
    }
}

/// Errors surfaced by the sync engine to its callers
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Not signed in")]
    Unauthenticated,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not yet confirmed by the server: {0}")]
    Unconfirmed(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SyncError {
    /// Remote error kind, when the failure came from the backend
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            SyncError::Remote(err) => Some(err.kind()),
            _ => None,
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Validation(err.0)
    }
}

/// Pulls `{"error": "..."}` out of a JSON error body
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
}

pub type RemoteResult<T> = Result<T, RemoteError>;
pub type AuthResult<T> = Result<T, AuthError>;
pub type SyncResult<T> = Result<T, SyncError>;
