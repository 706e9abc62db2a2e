use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Cover processing failed: {0}")]
    CoverError(String),

    #[error("Freshness probe timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Updater already running for {0}")]
    AlreadyRunning(String),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),
}

pub type Result<T> = std::result::Result<T, MetadataError>;
