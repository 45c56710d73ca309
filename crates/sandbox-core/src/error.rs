//! Error types for installer operations.
//!
//! Every failure the installer can hit is a variant of [`Error`]. Absence of
//! an entity is deliberately *not* an error: the resolver returns `None` for
//! it so callers can branch on existence.

use crate::types::EntityKind;
use thiserror::Error;

/// Exit code used for any fatal error.
pub const EXIT_FATAL: u8 = 255;

/// Exit code used when the operator interrupts the installer.
pub const EXIT_INTERRUPTED: u8 = 1;

/// Main error type for installer operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A backend command exited with a non-zero status
    #[error("Command `{command}` failed with exit code {code}: {stderr}")]
    CommandFailed {
        /// Command line that was executed
        command: String,
        /// Exit code reported by the process
        code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// A backend command could not be started at all
    #[error("Failed to run `{command}`: {message}")]
    SpawnFailed {
        /// Command line that was attempted
        command: String,
        /// Reason reported by the operating system
        message: String,
    },

    /// A backend response lacked an expected key
    #[error("Malformed backend response for {context}: missing `{key}`")]
    MalformedResponse {
        /// What was being parsed
        context: String,
        /// The missing key
        key: String,
    },

    /// A backend response could not be parsed
    #[error("Failed to parse backend response: {0}")]
    ParseError(String),

    /// An entity reached a failure state while being waited on
    #[error("{kind} {id} reached failure state {state}")]
    EntityFailed {
        /// Kind of entity
        kind: EntityKind,
        /// Entity id
        id: u64,
        /// Name of the state it reached
        state: String,
    },

    /// Ownership reassignment failed for a single entity
    #[error("Failed to change owner of {kind} {id}: {message}")]
    ChownFailed {
        /// Kind of entity
        kind: EntityKind,
        /// Entity id
        id: u64,
        /// Underlying failure
        message: String,
    },

    /// A custom attribute specification could not be parsed
    #[error("Invalid attribute specification `{spec}`: {reason}")]
    InvalidAttributeSpec {
        /// The raw specification string
        spec: String,
        /// Why it was rejected
        reason: String,
    },

    /// A poll loop hit its attempt ceiling
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Entity required but not present
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Remote service is unavailable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Invalid endpoint
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Local filesystem error
    #[error("I/O error: {0}")]
    IoError(String),

    /// Version-control operation failed
    #[error("Git operation failed: {0}")]
    GitError(String),

    /// Operator prompt failed
    #[error("Prompt failed: {0}")]
    PromptError(String),

    /// External service error
    #[error("External service error: {service}: {message}")]
    ExternalServiceError {
        /// Service name that failed
        service: String,
        /// Error message
        message: String,
    },

    /// The operator interrupted the installer
    #[error("Interrupted by operator")]
    Interrupted,
}

/// Specialized result type for installer operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CommandFailed { .. } => "COMMAND_FAILED",
            Self::SpawnFailed { .. } => "SPAWN_FAILED",
            Self::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::EntityFailed { .. } => "ENTITY_FAILED",
            Self::ChownFailed { .. } => "CHOWN_FAILED",
            Self::InvalidAttributeSpec { .. } => "INVALID_ATTRIBUTE_SPEC",
            Self::Timeout(_) => "TIMEOUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::HttpError(_) => "HTTP_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::IoError(_) => "IO_ERROR",
            Self::GitError(_) => "GIT_ERROR",
            Self::PromptError(_) => "PROMPT_ERROR",
            Self::ExternalServiceError { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Interrupted => "INTERRUPTED",
        }
    }

    /// Returns true if this error points at the environment rather than the
    /// operator, and deserves the full context in the log.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse { .. }
                | Self::ParseError(_)
                | Self::ConfigError(_)
                | Self::ExternalServiceError { .. }
        )
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FATAL,
        }
    }

    /// Builds a [`Error::MalformedResponse`].
    #[must_use]
    pub fn malformed(context: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MalformedResponse {
            context: context.into(),
            key: key.into(),
        }
    }
}

// Conversions from external error types
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::ServiceUnavailable(err.to_string())
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationError(err.to_string())
    }
}
