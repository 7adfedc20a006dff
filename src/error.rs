//! Error types for the smart cart client.

use thiserror::Error;

/// Failures of the detection/feed client
///
/// None of these are fatal: polling loops log them and try again on the
/// next tick.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Camera access denied: {0}")]
    MediaAccessDenied(String),

    #[error("Malformed recognition payload: {0}")]
    RecognitionMalformed(String),

    #[error("Image encoding error: {0}")]
    Encoding(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FeedError::RecognitionMalformed(e.to_string())
        } else {
            FeedError::NetworkUnavailable(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::NetworkUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::RecognitionMalformed(e.to_string())
    }
}

impl From<image::ImageError> for FeedError {
    fn from(e: image::ImageError) -> Self {
        FeedError::Encoding(e.to_string())
    }
}

/// Failures of the key-value store behind persisted state
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage encoding error: {0}")]
    Encoding(String),
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Encoding(e.to_string())
    }
}

/// Failures of the auth store
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Auth request failed: {0}")]
    Request(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Request(e.to_string())
    }
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;
