// src/error.rs
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode store: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Everything that can end an upload request early.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No image part")]
    MissingImagePart,
    #[error("No selected file")]
    NoSelectedFile,
    #[error("Comment is too long")]
    CommentTooLong,
    #[error("Invalid file type")]
    InvalidFileType,
    #[error(transparent)]
    Multipart(#[from] MultipartError),
    #[error("failed to write upload: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        match self {
            UploadError::MissingImagePart
            | UploadError::NoSelectedFile
            | UploadError::CommentTooLong
            | UploadError::InvalidFileType => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            UploadError::Multipart(err) => (err.status(), err.body_text()).into_response(),
            UploadError::Io(_) | UploadError::Store(_) => {
                tracing::error!(error = %self, "upload failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
