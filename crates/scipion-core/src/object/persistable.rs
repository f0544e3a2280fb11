//! Typed views over object trees.

use super::{ClassKind, Object};
use crate::{ClassRegistry, ScipionError};

/// A Rust type that is stored as an [`Object`] tree.
///
/// Implementors own (or can rebuild) the object they map to, so edits made
/// through the typed API keep the dirty tracking of the underlying tree.
pub trait Persistable: Sized {
    /// Class name written to the `classname` column.
    const CLASS_NAME: &'static str;

    /// Storage kind of the class.
    const KIND: ClassKind;

    /// Base class for `select_by_class(.., include_subclasses)` queries.
    const BASE_CLASS: &'static str;

    /// Borrow (or build) the object tree for persistence.
    fn as_object(&self) -> &Object;

    /// Mutable access for the mapper to assign ids and clear flags.
    fn as_object_mut(&mut self) -> &mut Object;

    /// Rebuild the typed view from a loaded tree.
    fn from_object(object: Object) -> Result<Self, ScipionError>;

    /// Register this class in a registry.
    fn register(registry: &mut ClassRegistry) {
        registry.register(Self::CLASS_NAME, Self::KIND, Some(Self::BASE_CLASS));
    }

    /// Check that a loaded object has this class.
    fn check_class(object: &Object) -> Result<(), ScipionError> {
        if object.class_name() == Self::CLASS_NAME {
            Ok(())
        } else {
            Err(ScipionError::TypeMismatch {
                expected: Self::CLASS_NAME.to_string(),
                found: object.class_name().to_string(),
            })
        }
    }
}
