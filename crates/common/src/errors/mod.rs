//! Error types for the booking core
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Error codes for client handling
//! - Client/server classification for logging policy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using BookingError
pub type Result<T> = std::result::Result<T, BookingError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,

    // Authorization errors (2xxx)
    PermissionDenied,

    // Resource errors (3xxx)
    NotFound,
    JobNotFound,
    UserNotFound,

    // Conflict errors (4xxx)
    Conflict,
    JobAlreadyTaken,

    // Transport errors (5xxx)
    TransportError,

    // Internal errors (9xxx)
    StoreError,
    ConfigurationError,
    SerializationError,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,

            // Authz (2xxx)
            ErrorCode::PermissionDenied => 2001,

            // Resources (3xxx)
            ErrorCode::NotFound => 3001,
            ErrorCode::JobNotFound => 3002,
            ErrorCode::UserNotFound => 3003,

            // Conflicts (4xxx)
            ErrorCode::Conflict => 4001,
            ErrorCode::JobAlreadyTaken => 4002,

            // Transport (5xxx)
            ErrorCode::TransportError => 5001,

            // Internal (9xxx)
            ErrorCode::StoreError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::InternalError => 9004,
        }
    }
}

/// Booking core error types
#[derive(Error, Debug)]
pub enum BookingError {
    // Validation errors: malformed or missing booking input.
    // Always user-facing, never logged as a fault.
    #[error("Validation failed on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Authorization: the actor lacks the role for the operation
    #[error("Permission denied: {message}")]
    Permission { message: String },

    // Resource errors
    #[error("Resource not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("User not found: {id}")]
    UserNotFound { id: String },

    // Conflict: already claimed, terminal state, or a failed guard
    #[error("Conflict: {message}")]
    Conflict { message: String },

    // Transport: a push/SMS/email send failed. Caught at the dispatch
    // boundary and logged; never propagated out of a state transition.
    #[error("Transport failure on {channel}: {message}")]
    Transport { channel: String, message: String },

    // Unrecognized enumerated value in caller-supplied data.
    // Fatal to the single operation, not retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Internal errors
    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BookingError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            BookingError::Validation { .. } => ErrorCode::ValidationError,
            BookingError::MissingField { .. } => ErrorCode::MissingField,
            BookingError::Permission { .. } => ErrorCode::PermissionDenied,
            BookingError::NotFound { .. } => ErrorCode::NotFound,
            BookingError::JobNotFound { .. } => ErrorCode::JobNotFound,
            BookingError::UserNotFound { .. } => ErrorCode::UserNotFound,
            BookingError::Conflict { .. } => ErrorCode::Conflict,
            BookingError::Transport { .. } => ErrorCode::TransportError,
            BookingError::Configuration { .. } => ErrorCode::ConfigurationError,
            BookingError::Store { .. } => ErrorCode::StoreError,
            BookingError::Serialization(_) => ErrorCode::SerializationError,
            BookingError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Errors caused by the caller: returned as structured failure
    /// results, logged at warn level at most.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BookingError::Validation { .. }
                | BookingError::MissingField { .. }
                | BookingError::Permission { .. }
                | BookingError::NotFound { .. }
                | BookingError::JobNotFound { .. }
                | BookingError::UserNotFound { .. }
                | BookingError::Conflict { .. }
        )
    }

    /// Errors that indicate a fault in the system or its data
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Shorthand for a validation failure on a named field
    pub fn validation(field: &str, message: &str) -> Self {
        BookingError::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a store-layer failure
    pub fn store(message: impl Into<String>) -> Self {
        BookingError::Store {
            message: message.into(),
        }
    }
}
