use std::path::PathBuf;

use thiserror::Error;

use crate::fs::FilesystemError;

#[derive(Error, Debug)]
pub enum InjectError {
    #[error("{what} not found: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },

    #[error("Path component '{component}' exists and is not a folder (in '{path}')")]
    PathConflict { component: String, path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read {}: {source}", path.display())]
    ReadHost {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Volume error: {0}")]
    Volume(#[from] FilesystemError),
}

impl InjectError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            InjectError::NotFound { .. } => 2,
            _ => 1,
        }
    }
}
