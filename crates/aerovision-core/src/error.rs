//! AeroVision Error Definitions
//!
//! Defines error types used throughout the client.

use thiserror::Error;

use crate::types::JobId;

/// Core client error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Connection Errors
    // =========================================================================
    #[error("Cannot connect to detection server: {0}")]
    Connection(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("No file selected")]
    NoFileSelected,

    #[error("Validation error: {0}")]
    Validation(String),

    // =========================================================================
    // Upload Errors
    // =========================================================================
    #[error("Upload failed: {0}")]
    Upload(String),

    // =========================================================================
    // Detection Errors
    // =========================================================================
    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Job failed: {0}")]
    Job(String),

    #[error("A job is already active: {0}")]
    JobAlreadyActive(JobId),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core client result type
pub type CoreResult<T> = Result<T, CoreError>;
