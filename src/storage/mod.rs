//! Persistent storage
//!
//! This module handles all data persistence for conversations, settings, and model metadata.

pub mod conversations;
pub mod models;
pub mod settings;

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not determine the application data directory")]
    NoDataDir,
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    ProjectDirs::from("com", "loqa", "LoQA")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}
