use crate::store::DownloadStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Failed to get video info: {0}")]
    MetadataFetchFailed(String),

    #[error("Failed to download video: {0}")]
    DownloadFailed(String),

    #[error("Download request not found: {0}")]
    RequestNotFound(String),

    #[error("Invalid request: {0}")]
    ValidationFailed(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Download request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: u64,
        from: DownloadStatus,
        to: DownloadStatus,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable name sent alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedPlatform(_) => "UnsupportedPlatform",
            Self::MetadataFetchFailed(_) => "MetadataFetchFailed",
            Self::DownloadFailed(_) => "DownloadFailed",
            Self::RequestNotFound(_) => "RequestNotFound",
            Self::ValidationFailed(_) => "ValidationFailed",
            Self::FileNotFound(_) => "FileNotFound",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::Internal(_) => "Internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
