//! Error types shared by the study-definition and snapshot engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the relational store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Input that was rejected before any write happened.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Failures while materializing a form snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Template version '{0}' not found")]
    VersionNotFound(String),

    #[error("Form template '{0}' has no active version")]
    NoActiveVersion(String),

    #[error("Field '{field_id}' is malformed: {reason}")]
    MalformedField { field_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Another study already carries this external identifier.
    #[error("Study identifier '{0}' is already in use")]
    IdentityConflict(String),

    /// The external identifier cannot change once subjects are enrolled.
    #[error("Study identifier of '{study_id}' cannot change after {enrolled} subject(s) enrolled")]
    ImmutableIdentifier { study_id: String, enrolled: i64 },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Snapshot build failed: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Audit write failed: {0}")]
    Audit(String),

    #[error("Operation cancelled before commit")]
    Cancelled,

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::InvalidInput(message.into()))
    }

    /// Business-rule violations abort a synchronization outright; everything
    /// else raised inside a nested step is recoverable by savepoint rollback.
    pub fn is_fatal_for_sync(&self) -> bool {
        matches!(
            self,
            Self::IdentityConflict(_) | Self::ImmutableIdentifier { .. } | Self::Cancelled
        )
    }
}
