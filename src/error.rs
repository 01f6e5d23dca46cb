use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to resolve or read an input file for one job.
#[derive(Debug, Error)]
pub enum JobIoError {
    #[error("{what} not found: {location}")]
    NotFound { what: String, location: String },

    #[error("{what} at {} could not be read: {reason}", .path.display())]
    Unreadable {
        what: String,
        path: PathBuf,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ParcelError {
    #[error("grids cannot be reconciled: {0}")]
    ShapeMismatch(String),

    #[error("atlas contains no non-background labels")]
    EmptyAtlas,

    #[error("unknown reducer: {0}")]
    UnknownReducer(String),

    #[error("reducer already registered: {0}")]
    DuplicateReducer(String),

    #[error(transparent)]
    JobIo(#[from] JobIoError),
}

/// Serializable tag of an error, as stored in the failure ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ShapeMismatch,
    EmptyAtlas,
    UnknownReducer,
    DuplicateReducer,
    JobIo,
    Panicked,
}

impl ParcelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParcelError::ShapeMismatch(_) => ErrorKind::ShapeMismatch,
            ParcelError::EmptyAtlas => ErrorKind::EmptyAtlas,
            ParcelError::UnknownReducer(_) => ErrorKind::UnknownReducer,
            ParcelError::DuplicateReducer(_) => ErrorKind::DuplicateReducer,
            ParcelError::JobIo(_) => ErrorKind::JobIo,
        }
    }
}

pub type ParcelResult<T> = Result<T, ParcelError>;
