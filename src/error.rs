//! Unified error handling for the herald crate
//!
//! Each module owns a domain error (`CampaignError`, `TaskError`,
//! `StorageError`, `LlmError`, `PlatformError`, `ContentError`). This module
//! wraps them in a single [`Error`] so they can cross module boundaries while
//! keeping the detail, and classifies them for callers:
//!
//! - [`HeraldErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification driving retries and HTTP status codes
//! - [`Error`] - Unified error enum
//!
//! # Usage
//!
//! ```rust,ignore
//! use herald::error::{Error, ErrorCategory, HeraldErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Will retry on next run: {}", err.code());
//!     } else {
//!         eprintln!("Fatal error: {}", err);
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::campaign::CampaignError;
pub use crate::content::ContentError;
pub use crate::llm::LlmError;
pub use crate::platforms::PlatformError;
pub use crate::storage::StorageError;
pub use crate::task::TaskError;

/// Common trait for herald error types
pub trait HeraldErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;

    /// Machine-readable error code
    fn code(&self) -> &'static str;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input rejected before any mutation
    Validation,
    /// Duplicate id or concurrent modification
    Conflict,
    /// Unknown campaign or task id
    NotFound,
    /// Content generator or platform adapter failure
    Collaborator,
    /// Storage and I/O errors
    Storage,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Collaborator => "collaborator",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the herald crate
#[derive(Error, Debug)]
pub enum Error {
    /// Campaign validation and lookup errors
    #[error("Campaign error: {0}")]
    Campaign(#[from] CampaignError),

    /// Task state machine errors
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Record store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Content generator errors
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Platform adapter errors
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Generated content storage and parsing errors
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    /// Unknown task id
    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HeraldErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Campaign(_) | Self::Task(_) | Self::TaskNotFound(_) => false,
            Self::Storage(e) => e.is_recoverable(),
            Self::Llm(e) => e.is_recoverable(),
            Self::Platform(e) => e.is_recoverable(),
            Self::Content(e) => e.is_recoverable(),
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Campaign(e) => match e {
                CampaignError::InvalidField { .. } | CampaignError::InvalidRecurrence(_) => {
                    ErrorCategory::Validation
                }
                CampaignError::NotFound(_) => ErrorCategory::NotFound,
                CampaignError::AlreadyExists(_) => ErrorCategory::Conflict,
            },
            Self::Task(e) => match e {
                TaskError::InvalidTransition { .. } => ErrorCategory::Conflict,
                TaskError::UnknownStage(_) => ErrorCategory::Validation,
            },
            Self::TaskNotFound(_) => ErrorCategory::NotFound,
            Self::Storage(e) => match e {
                StorageError::AlreadyExists { .. } | StorageError::Conflict { .. } => {
                    ErrorCategory::Conflict
                }
                StorageError::NotFound { .. } => ErrorCategory::NotFound,
                StorageError::Serialization(_) | StorageError::Io { .. } => ErrorCategory::Storage,
            },
            Self::Llm(_) | Self::Platform(_) => ErrorCategory::Collaborator,
            Self::Content(e) => match e {
                ContentError::UnparseableResponse(_) => ErrorCategory::Collaborator,
                _ => ErrorCategory::Storage,
            },
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Campaign(CampaignError::InvalidField { .. }) => "invalid_campaign",
            Self::Campaign(CampaignError::InvalidRecurrence(_)) => "invalid_recurrence",
            Self::Campaign(CampaignError::NotFound(_)) => "campaign_not_found",
            Self::Campaign(CampaignError::AlreadyExists(_)) => "campaign_exists",
            Self::Task(TaskError::InvalidTransition { .. }) => "invalid_transition",
            Self::Task(TaskError::UnknownStage(_)) => "unknown_stage",
            Self::TaskNotFound(_) => "task_not_found",
            Self::Storage(StorageError::Conflict { .. }) => "conflict",
            Self::Storage(StorageError::AlreadyExists { .. }) => "already_exists",
            Self::Storage(StorageError::NotFound { .. }) => "not_found",
            Self::Storage(_) => "storage_error",
            Self::Llm(_) => "generator_error",
            Self::Platform(_) => "platform_error",
            Self::Content(_) => "content_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "invalid_json",
            Self::Config(_) => "config_error",
            Self::Other { .. } => "internal_error",
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    #[test]
    fn test_error_category() {
        let err: Error = CampaignError::invalid_field("id", "bad").into();
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err: Error = CampaignError::AlreadyExists("launch".into()).into();
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let err = Error::TaskNotFound("launch:d-0".into());
        assert_eq!(err.category(), ErrorCategory::NotFound);

        let err: Error = LlmError::EmptyResponse.into();
        assert_eq!(err.category(), ErrorCategory::Collaborator);
    }

    #[test]
    fn test_is_recoverable() {
        let err: Error = StorageError::conflict("campaign-tasks", "t").into();
        assert!(err.is_recoverable());

        let err: Error = TaskError::InvalidTransition {
            task_id: "t".into(),
            from: TaskStatus::Pending,
            to: TaskStatus::Published,
        }
        .into();
        assert!(!err.is_recoverable());
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing llm.endpoint");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
        assert_eq!(err.code(), "config_error");
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "Something went wrong");
    }
}
