//! Cloud provider error types

use thiserror::Error;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("unexpected state '{state}', wanted target {expected:?}")]
    UnexpectedState {
        /// Last observed state label
        state: String,
        /// Target states the wait was looking for
        expected: Vec<String>,
    },

    #[error(
        "timeout while waiting for state to become {expected:?} (last state: '{last_state}', timeout: {timeout:?})"
    )]
    Timeout {
        /// Last observed state label, empty when nothing was observed
        last_state: String,
        /// Target states the wait was looking for
        expected: Vec<String>,
        timeout: std::time::Duration,
    },

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
