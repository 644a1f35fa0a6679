/*
    errors.rs - Error types for the store subsystem

    Nothing here is fatal: every error is a local, recoverable outcome.
    Conflicting writes lose silently, unknown types are logged and dropped,
    malformed fields are skipped. The variants exist so tests can observe
    exactly which self-healing path was taken.
*/

use crate::core_store::game_object::ObjectId;
use thiserror::Error;

/// Errors that can occur in the store subsystem
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// An object with this identifier is already registered
    #[error("Object already exists: {0}")]
    AlreadyExists(ObjectId),

    /// The identifier was deleted and its tombstone is still within the
    /// garbage-collection horizon
    #[error("Object is tombstoned: {0}")]
    Tombstoned(ObjectId),

    /// No live object with this identifier
    #[error("Not found: {0}")]
    NotFound(ObjectId),

    /// No constructor registered for this alias
    #[error("Unknown object alias: {0}")]
    UnknownAlias(String),

    /// A remote snapshot carried a reserved field path
    #[error("Reserved field {field:?} on {identifier}")]
    ReservedField { identifier: ObjectId, field: String },

    /// Internal error (lock poisoning and similar)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
