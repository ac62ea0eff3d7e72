//! Huawei Cloud provider error types

use thiserror::Error;

/// RDS error codes returned while the instance is busy with another operation
const BUSY_ERROR_CODES: &[&str] = &["DBS.200011", "DBS.200018", "DBS.200019", "DBS.201202"];

#[derive(Error, Debug)]
pub enum HuaweiError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("API error (HTTP {status}) {code}: {message}")]
    ApiError {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Cannot update in place, replacement required: {0}")]
    RequiresReplacement(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The create call succeeded but a later step failed. The resource exists
    /// remotely under `id`.
    #[error("created {id} but it did not become ready")]
    CreateFailed {
        id: String,
        #[source]
        source: Box<HuaweiError>,
    },

    #[error(transparent)]
    CloudError(#[from] hcflow_cloud::CloudError),
}

impl HuaweiError {
    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            HuaweiError::ApiError { status, .. } => Some(*status),
            HuaweiError::HttpError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Wrap an error raised after `id` was created remotely
    pub fn after_create(self, id: &str) -> Self {
        HuaweiError::CreateFailed {
            id: id.to_string(),
            source: Box::new(self),
        }
    }

    /// Remote id of a resource whose create did not finish
    pub fn created_id(&self) -> Option<&str> {
        match self {
            HuaweiError::CreateFailed { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The resource is locked by another in-flight operation
    pub fn is_busy(&self) -> bool {
        match self {
            HuaweiError::ApiError { code, .. } => BUSY_ERROR_CODES.contains(&code.as_str()),
            _ => false,
        }
    }

    /// Transient failure that a caller may retry
    pub fn is_retryable(&self) -> bool {
        if self.is_busy() {
            return true;
        }
        match self {
            HuaweiError::ApiError { status, .. } => {
                matches!(*status, 408 | 409 | 429) || *status >= 500
            }
            HuaweiError::HttpError(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, HuaweiError>;
