use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bootstrap peer address is required for the p2p backend")]
    MissingBootstrapAddr,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("content node stopped")]
    NodeStopped,

    #[error("content not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
