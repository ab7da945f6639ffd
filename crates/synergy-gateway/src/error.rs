use thiserror::Error;

use synergy_db::StoreError;
use synergy_types::draft::DraftError;
use synergy_types::events::ErrorPayload;

/// Failure taxonomy shared by the HTTP surface and the live channel.
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("{0}")]
    Conflict(String),

    /// Never shown to clients.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MessagingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::InvalidOperation(_) => "INVALID_OPERATION",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Text safe to return to a client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn payload(&self, client_message_id: Option<String>) -> ErrorPayload {
        ErrorPayload {
            message: self.public_message(),
            code: self.code().to_string(),
            client_message_id,
        }
    }
}

impl From<StoreError> for MessagingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            StoreError::Forbidden(msg) => Self::Forbidden(msg),
            StoreError::InvalidOperation(msg) => Self::InvalidOperation(msg),
            StoreError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other @ (StoreError::Sqlite(_) | StoreError::Corrupt { .. } | StoreError::LockPoisoned) => {
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<DraftError> for MessagingError {
    fn from(err: DraftError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MessagingError>;
