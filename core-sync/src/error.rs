use bridge_traits::MediaKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("A transfer is already in progress for {kind}")]
    TransferInProgress { kind: MediaKind },

    #[error("No transfer context registered for {0}")]
    KindNotRegistered(MediaKind),

    #[error("Missing import file: {0}")]
    SourceUnavailable(String),

    #[error("Invalid transfer id: {0}")]
    InvalidJobId(String),

    #[error("Invalid transfer status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Cursor {cursor} is past the end of {len} items")]
    CursorOutOfRange { cursor: usize, len: usize },

    #[error("Unreadable record: {0}")]
    InvalidRecord(String),

    #[error("Snapshot cannot be restored")]
    InvalidSnapshot,

    #[error("Transfer task ended without a report")]
    TaskAborted,

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] core_metadata::MetadataError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
