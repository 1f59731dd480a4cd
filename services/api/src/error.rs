//! services/api/src/error.rs
//!
//! Defines the primary error type for the API service's startup path.

use crate::config::ConfigError;
use mri_core::{InferenceError, StoreError};

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The record store could not be reached or migrated.
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    /// The classifier failed to load. Classification would never work, so the
    /// server refuses to start.
    #[error("Model error: {0}")]
    Model(#[from] InferenceError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
