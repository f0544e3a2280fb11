//! # Core Type Definitions
//!
//! This module contains the identity and error types shared by every layer:
//! - Object identity (`ObjId`)
//! - Error types (`ScipionError`)

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// OBJECT IDENTITY
// =============================================================================

/// Identity of a stored object.
///
/// Ids are assigned by the store on first insert (SQLite rowids) and never
/// reused for another object in the same database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjId(pub i64);

impl ObjId {
    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Storage-name prefix shared by every descendant of a top-level object.
    #[must_use]
    pub fn prefix(self) -> String {
        format!("{}.", self.0)
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Scipion store.
///
/// - No silent failures
/// - Use `Result<T, ScipionError>` for fallible operations
/// - The core should never panic; all errors must be recoverable
#[derive(Debug, Error)]
pub enum ScipionError {
    /// The requested object is not stored.
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjId),

    /// A row references a class that is not registered.
    #[error("Unknown class: {0}")]
    UnknownClass(String),

    /// A stored value cannot be parsed for its class.
    #[error("Invalid value for {class}: {value:?}")]
    InvalidValue { class: String, value: String },

    /// A value of the wrong kind was assigned to an object.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A required attribute is absent.
    #[error("Missing attribute: {0}")]
    MissingAttribute(String),

    /// The requested graph node does not exist.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The underlying database failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Project settings are missing or inconsistent.
    #[error("Settings error: {0}")]
    SettingsError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
