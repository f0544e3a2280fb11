//! # Object Model
//!
//! Every persisted entity is an [`Object`]: a class name, a [`ClassKind`]
//! deciding its storage shape, an optional scalar [`Value`], ordered named
//! attributes and, for lists, ordered items. Attributes and items are
//! themselves objects, so a protocol run with all its parameters and
//! outputs is one object tree.
//!
//! ## Dirty tracking
//!
//! Each object carries a dirty flag meaning "my own row must be rewritten".
//! Structural changes are tracked separately: new children have no id yet
//! and removed children leave their id in the parent's removal list. The
//! mapper uses the three signals to write only what changed.

mod persistable;
mod value;

pub use persistable::Persistable;
pub use value::{ClassKind, Value};

use crate::primitives::{EXTENDED_ATTR, NAME_SEPARATOR, item_key};
use crate::{ObjId, ScipionError};

/// A node of a persistable object tree.
#[derive(Debug, Clone)]
pub struct Object {
    id: Option<ObjId>,
    parent_id: Option<ObjId>,
    name: String,
    class_name: String,
    kind: ClassKind,
    value: Value,
    label: Option<String>,
    comment: Option<String>,
    creation: Option<String>,
    attributes: Vec<(String, Object)>,
    items: Vec<Object>,
    persist: bool,
    dirty: bool,
    removed: Vec<ObjId>,
}

impl Object {
    // =========================================================================
    // CONSTRUCTION
    // =========================================================================

    /// Create an unsaved object of a (possibly user-registered) class.
    #[must_use]
    pub fn with_class(class_name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            id: None,
            parent_id: None,
            name: String::new(),
            class_name: class_name.into(),
            kind,
            value: kind.empty_value(),
            label: None,
            comment: None,
            creation: None,
            attributes: Vec::new(),
            items: Vec::new(),
            persist: true,
            dirty: true,
            removed: Vec::new(),
        }
    }

    /// An empty scalar of the built-in class for `kind`.
    #[must_use]
    pub fn null_of(kind: ClassKind) -> Self {
        Self::with_class(kind.base_class(), kind)
    }

    #[must_use]
    pub fn integer(value: i64) -> Self {
        Self::null_of(ClassKind::Integer).holding(Value::Integer(value))
    }

    #[must_use]
    pub fn float(value: f64) -> Self {
        Self::null_of(ClassKind::Float).holding(Value::Float(value))
    }

    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::null_of(ClassKind::Boolean).holding(Value::Boolean(value))
    }

    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::null_of(ClassKind::String).holding(Value::String(value.into()))
    }

    /// A CsvList of the given scalars.
    ///
    /// Elements are stored joined by `,` and split again on load, so an
    /// element must not contain a comma. Surrounding whitespace is trimmed
    /// on load and a list holding a single empty element reads back empty.
    /// [`Object::set_value`] rejects elements containing a comma.
    #[must_use]
    pub fn csv_list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        let items = values.into_iter().map(|v| v.to_string()).collect();
        Self::null_of(ClassKind::CsvList).holding(Value::CsvList(items))
    }

    /// A pointer to a stored object (or a null pointer).
    #[must_use]
    pub fn pointer(target: Option<ObjId>) -> Self {
        Self::null_of(ClassKind::Pointer).holding(Value::Pointer(target))
    }

    /// An empty list.
    #[must_use]
    pub fn list() -> Self {
        Self::null_of(ClassKind::List)
    }

    /// An empty ordered attribute container.
    #[must_use]
    pub fn ordered() -> Self {
        Self::null_of(ClassKind::Composite)
    }

    /// Builder: add an attribute.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, attr: Object) -> Self {
        self.set_attr(name, attr);
        self
    }

    /// Builder: set the top-level name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    // Constructors only pair a kind with a value that fits it.
    fn holding(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    // =========================================================================
    // IDENTITY & METADATA
    // =========================================================================

    #[must_use]
    pub fn id(&self) -> Option<ObjId> {
        self.id
    }

    #[must_use]
    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<ObjId> {
        self.parent_id
    }

    /// Storage name: the user name for top-level objects, the dotted path
    /// for nested ones.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename a top-level object. Nested names are managed by the mapper.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name != self.name {
            self.name = name;
            self.dirty = true;
        }
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[must_use]
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: Option<String>) {
        if label != self.label {
            self.label = label;
            self.dirty = true;
        }
    }

    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: Option<String>) {
        if comment != self.comment {
            self.comment = comment;
            self.dirty = true;
        }
    }

    /// Creation stamp, set by the mapper on first insert.
    #[must_use]
    pub fn creation(&self) -> Option<&str> {
        self.creation.as_deref()
    }

    /// Whether the mapper stores this object at all.
    #[must_use]
    pub fn persist(&self) -> bool {
        self.persist
    }

    /// Exclude (or re-include) this object from persistence.
    pub fn set_persist(&mut self, persist: bool) {
        self.persist = persist;
    }

    // =========================================================================
    // VALUE
    // =========================================================================

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        !self.value.is_null()
    }

    /// Assign a new value. The value must fit the object's kind.
    pub fn set_value(&mut self, value: Value) -> Result<(), ScipionError> {
        if !value.fits(self.kind) {
            return Err(ScipionError::TypeMismatch {
                expected: self.kind.base_class().to_string(),
                found: value.type_name().to_string(),
            });
        }
        let comma = match &value {
            Value::CsvList(items) => items.iter().find(|item| item.contains(',')),
            _ => None,
        };
        if let Some(bad) = comma {
            return Err(ScipionError::InvalidValue {
                class: self.class_name.clone(),
                value: bad.clone(),
            });
        }
        if value != self.value {
            self.value = value;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn set_int(&mut self, value: i64) -> Result<(), ScipionError> {
        self.set_value(Value::Integer(value))
    }

    pub fn set_float(&mut self, value: f64) -> Result<(), ScipionError> {
        self.set_value(Value::Float(value))
    }

    pub fn set_bool(&mut self, value: bool) -> Result<(), ScipionError> {
        self.set_value(Value::Boolean(value))
    }

    pub fn set_str(&mut self, value: impl Into<String>) -> Result<(), ScipionError> {
        self.set_value(Value::String(value.into()))
    }

    /// Clear the value of a scalar (pointers become null pointers).
    pub fn clear_value(&mut self) -> Result<(), ScipionError> {
        self.set_value(self.kind.empty_value())
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            Value::Integer(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self.value {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Boolean(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_csv(&self) -> Option<&[String]> {
        match &self.value {
            Value::CsvList(v) => Some(v),
            _ => None,
        }
    }

    /// Parse every CsvList element as an integer, skipping malformed ones.
    #[must_use]
    pub fn as_csv_ints(&self) -> Vec<i64> {
        self.as_csv()
            .unwrap_or_default()
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    // =========================================================================
    // POINTER
    // =========================================================================

    #[must_use]
    pub fn pointer_target(&self) -> Option<ObjId> {
        match self.value {
            Value::Pointer(target) => target,
            _ => None,
        }
    }

    pub fn set_pointer_target(&mut self, target: Option<ObjId>) -> Result<(), ScipionError> {
        self.set_value(Value::Pointer(target))
    }

    /// Dotted attribute path followed inside the pointer target.
    #[must_use]
    pub fn extended(&self) -> Option<&str> {
        self.attr(EXTENDED_ATTR)
            .and_then(Object::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Point into an attribute of the target instead of the target itself.
    pub fn set_extended(&mut self, path: impl Into<String>) -> Result<(), ScipionError> {
        if self.kind != ClassKind::Pointer {
            return Err(ScipionError::TypeMismatch {
                expected: ClassKind::Pointer.base_class().to_string(),
                found: self.class_name.clone(),
            });
        }
        let path = path.into();
        match self.attr_mut(EXTENDED_ATTR) {
            Some(ext) => ext.set_str(path),
            None => {
                self.set_attr(EXTENDED_ATTR, Object::string(path));
                Ok(())
            }
        }
    }

    // =========================================================================
    // ATTRIBUTES
    // =========================================================================

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&Object> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, obj)| obj)
    }

    pub fn attr_mut(&mut self, name: &str) -> Option<&mut Object> {
        self.attributes
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, obj)| obj)
    }

    /// Follow a dotted attribute path (`outputs.micrographs`).
    #[must_use]
    pub fn attr_path(&self, path: &str) -> Option<&Object> {
        path.split(NAME_SEPARATOR)
            .filter(|part| !part.is_empty())
            .try_fold(self, |obj, part| obj.attr(part))
    }

    /// Set or replace an attribute. Insertion order is kept; replacing keeps
    /// the original position and schedules the old subtree for deletion.
    pub fn set_attr(&mut self, name: impl Into<String>, attr: Object) {
        let name = name.into();
        if let Some(slot) = self.attributes.iter_mut().find(|(key, _)| *key == name) {
            if let Some(old_id) = slot.1.id.filter(|&id| attr.id != Some(id)) {
                self.removed.push(old_id);
            }
            slot.1 = attr;
        } else {
            self.attributes.push((name, attr));
        }
    }

    /// Remove an attribute, scheduling its stored subtree for deletion.
    pub fn remove_attr(&mut self, name: &str) -> Option<Object> {
        let index = self.attributes.iter().position(|(key, _)| key == name)?;
        let (_, obj) = self.attributes.remove(index);
        if let Some(id) = obj.id {
            self.removed.push(id);
        }
        Some(obj)
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(key, _)| key.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Object)> {
        self.attributes.iter().map(|(key, obj)| (key.as_str(), obj))
    }

    // =========================================================================
    // LIST ITEMS
    // =========================================================================

    fn require_list(&self) -> Result<(), ScipionError> {
        if self.kind == ClassKind::List {
            Ok(())
        } else {
            Err(ScipionError::TypeMismatch {
                expected: ClassKind::List.base_class().to_string(),
                found: self.class_name.clone(),
            })
        }
    }

    pub fn push(&mut self, item: Object) -> Result<(), ScipionError> {
        self.require_list()?;
        self.items.push(item);
        Ok(())
    }

    /// Insert an item; indexes past the end append.
    pub fn insert(&mut self, index: usize, item: Object) -> Result<(), ScipionError> {
        self.require_list()?;
        let index = index.min(self.items.len());
        self.items.insert(index, item);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<Object> {
        if index >= self.items.len() {
            return None;
        }
        let item = self.items.remove(index);
        if let Some(id) = item.id {
            self.removed.push(id);
        }
        Some(item)
    }

    pub fn clear(&mut self) {
        let ids: Vec<ObjId> = self.items.iter().filter_map(|item| item.id).collect();
        self.removed.extend(ids);
        self.items.clear();
    }

    #[must_use]
    pub fn items(&self) -> &[Object] {
        &self.items
    }

    /// Mutable access to items; the list structure itself stays fixed.
    pub fn items_mut(&mut self) -> &mut [Object] {
        &mut self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // =========================================================================
    // TREE-WIDE OPERATIONS
    // =========================================================================

    /// Whether this object's own row must be rewritten.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.id.is_none()
    }

    /// Whether storing this tree would write anything.
    #[must_use]
    pub fn is_dirty_tree(&self) -> bool {
        if !self.persist {
            return false;
        }
        self.is_dirty()
            || !self.removed.is_empty()
            || self.attributes.iter().any(|(_, a)| a.is_dirty_tree())
            || self.items.iter().any(Object::is_dirty_tree)
    }

    /// Number of persisted objects in this tree (including itself).
    #[must_use]
    pub fn tree_len(&self) -> usize {
        if !self.persist {
            return 0;
        }
        1 + self
            .attributes
            .iter()
            .map(|(_, a)| a.tree_len())
            .chain(self.items.iter().map(Object::tree_len))
            .sum::<usize>()
    }

    /// Structural equality ignoring identities, names and stamps.
    #[must_use]
    pub fn equal_attributes(&self, other: &Object) -> bool {
        let mine: Vec<_> = self.attributes.iter().filter(|(_, a)| a.persist).collect();
        let theirs: Vec<_> = other.attributes.iter().filter(|(_, a)| a.persist).collect();

        self.class_name == other.class_name
            && self.value == other.value
            && self.label == other.label
            && self.comment == other.comment
            && mine.len() == theirs.len()
            && mine
                .iter()
                .zip(theirs.iter())
                .all(|((k1, a1), (k2, a2))| k1 == k2 && a1.equal_attributes(a2))
            && self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(other.items.iter())
                .all(|(a, b)| a.equal_attributes(b))
    }

    /// Deep copy with every identity cleared, ready to be inserted as new.
    #[must_use]
    pub fn detached_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.detach();
        copy.name = self.name.clone();
        copy
    }

    fn detach(&mut self) {
        self.id = None;
        self.parent_id = None;
        self.name.clear();
        self.creation = None;
        self.dirty = true;
        self.removed.clear();
        for (_, attr) in &mut self.attributes {
            attr.detach();
        }
        for item in &mut self.items {
            item.detach();
        }
    }

    // =========================================================================
    // MAPPER HOOKS
    // =========================================================================

    /// Build a clean object from a stored row.
    pub(crate) fn from_row(
        id: ObjId,
        parent_id: Option<ObjId>,
        name: String,
        class_name: String,
        kind: ClassKind,
        value: Value,
        label: Option<String>,
        comment: Option<String>,
        creation: Option<String>,
    ) -> Self {
        Self {
            id: Some(id),
            parent_id,
            name,
            class_name,
            kind,
            value,
            label,
            comment,
            creation,
            attributes: Vec::new(),
            items: Vec::new(),
            persist: true,
            dirty: false,
            removed: Vec::new(),
        }
    }

    pub(crate) fn assign_identity(
        &mut self,
        id: ObjId,
        parent_id: Option<ObjId>,
        creation: Option<String>,
    ) {
        self.id = Some(id);
        self.parent_id = parent_id;
        self.creation = creation;
    }

    pub(crate) fn assign_parent(&mut self, parent_id: Option<ObjId>) {
        self.parent_id = parent_id;
    }

    /// Set the storage name; returns whether it changed.
    pub(crate) fn assign_name(&mut self, name: String) -> bool {
        if name == self.name {
            return false;
        }
        self.name = name;
        true
    }

    pub(crate) fn attach_loaded_attr(&mut self, key: String, attr: Object) {
        self.attributes.push((key, attr));
    }

    pub(crate) fn attach_loaded_items(&mut self, items: Vec<Object>) {
        self.items = items;
    }

    pub(crate) fn take_removed(&mut self) -> Vec<ObjId> {
        std::mem::take(&mut self.removed)
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Persisted children with their storage keys, attributes first.
    pub(crate) fn children_mut(&mut self) -> Vec<(String, &mut Object)> {
        let mut children = Vec::with_capacity(self.attributes.len() + self.items.len());
        for (key, attr) in &mut self.attributes {
            if attr.persist {
                children.push((key.clone(), attr));
            }
        }
        for (index, item) in self.items.iter_mut().enumerate() {
            if item.persist {
                children.push((item_key(index), item));
            }
        }
        children
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(mut obj: Object, id: i64) -> Object {
        obj.assign_identity(ObjId(id), None, None);
        obj.mark_clean();
        obj
    }

    #[test]
    fn set_value_rejects_wrong_kind() {
        let mut obj = Object::integer(3);
        let result = obj.set_str("three");
        assert!(matches!(result, Err(ScipionError::TypeMismatch { .. })));
        assert_eq!(obj.as_int(), Some(3));
    }

    #[test]
    fn unchanged_value_stays_clean() {
        let mut obj = stored(Object::integer(3), 1);
        obj.set_int(3).expect("set");
        assert!(!obj.is_dirty());

        obj.set_int(4).expect("set");
        assert!(obj.is_dirty());
    }

    #[test]
    fn attributes_keep_insertion_order() {
        let obj = Object::ordered()
            .with_attr("zeta", Object::integer(1))
            .with_attr("alpha", Object::integer(2))
            .with_attr("mid", Object::integer(3));

        let names: Vec<_> = obj.attr_names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn replacing_stored_attr_schedules_deletion() {
        let mut obj = stored(Object::ordered(), 1);
        obj.attach_loaded_attr("x".to_string(), stored(Object::integer(1), 2));

        obj.set_attr("x", Object::integer(9));

        assert_eq!(obj.take_removed(), vec![ObjId(2)]);
        assert_eq!(obj.attr("x").and_then(Object::as_int), Some(9));
    }

    #[test]
    fn push_on_scalar_fails() {
        let mut obj = Object::string("a");
        assert!(obj.push(Object::integer(1)).is_err());
    }

    #[test]
    fn clear_list_records_all_stored_items() {
        let mut list = stored(Object::list(), 1);
        list.attach_loaded_items(vec![
            stored(Object::integer(1), 2),
            stored(Object::integer(2), 3),
        ]);
        list.push(Object::integer(3)).expect("push");

        list.clear();

        assert!(list.is_empty());
        assert_eq!(list.take_removed(), vec![ObjId(2), ObjId(3)]);
    }

    #[test]
    fn dirty_tree_sees_nested_changes() {
        let mut root = stored(Object::ordered(), 1);
        root.attach_loaded_attr("count".to_string(), stored(Object::integer(1), 2));
        assert!(!root.is_dirty_tree());

        root.attr_mut("count").expect("attr").set_int(2).expect("set");
        assert!(root.is_dirty_tree());
        assert!(!root.is_dirty());
    }

    #[test]
    fn non_persisted_attr_is_ignored() {
        let mut root = stored(Object::ordered(), 1);
        let mut scratch = Object::string("tmp");
        scratch.set_persist(false);
        root.set_attr("scratch", scratch);

        assert!(!root.is_dirty_tree());
        assert_eq!(root.tree_len(), 1);
    }

    #[test]
    fn attr_path_walks_nested_attributes() {
        let obj = Object::ordered().with_attr(
            "outputs",
            Object::ordered().with_attr("volume", Object::string("vol.mrc")),
        );
        assert_eq!(
            obj.attr_path("outputs.volume").and_then(Object::as_str),
            Some("vol.mrc")
        );
        assert!(obj.attr_path("outputs.missing").is_none());
    }

    #[test]
    fn pointer_extended_round_trips_through_attr() {
        let mut ptr = Object::pointer(Some(ObjId(5)));
        ptr.set_extended("outputMicrographs").expect("extend");

        assert_eq!(ptr.pointer_target(), Some(ObjId(5)));
        assert_eq!(ptr.extended(), Some("outputMicrographs"));

        let mut not_ptr = Object::integer(1);
        assert!(not_ptr.set_extended("x").is_err());
    }

    #[test]
    fn detached_copy_clears_identities() {
        let mut root = stored(Object::ordered().named("run"), 1);
        root.attach_loaded_attr("n".to_string(), stored(Object::integer(7), 2));

        let copy = root.detached_copy();

        assert!(copy.id().is_none());
        assert!(copy.attr("n").and_then(Object::id).is_none());
        assert_eq!(copy.name(), "run");
        assert!(copy.equal_attributes(&root));
    }

    #[test]
    fn equal_attributes_detects_value_difference() {
        let a = Object::ordered().with_attr("x", Object::integer(1));
        let b = Object::ordered().with_attr("x", Object::integer(2));
        assert!(!a.equal_attributes(&b));
    }

    #[test]
    fn csv_ints_skip_garbage() {
        let obj = Object::csv_list(["1", "x", "3"]);
        assert_eq!(obj.as_csv_ints(), vec![1, 3]);
    }

    #[test]
    fn csv_elements_with_commas_are_rejected() {
        let mut obj = stored(Object::csv_list(["1", "2"]), 1);

        let result = obj.set_value(Value::CsvList(vec!["3".to_string(), "4,5".to_string()]));
        assert!(matches!(result, Err(ScipionError::InvalidValue { ref value, .. }) if value == "4,5"));
        assert_eq!(obj.as_csv(), Some(&["1".to_string(), "2".to_string()][..]));
        assert!(!obj.is_dirty());
    }

    #[test]
    fn set_attr_with_same_child_schedules_nothing() {
        let mut obj = Object::ordered().with_attr("x", Object::integer(1));
        obj.attributes[0].1.assign_identity(ObjId(5), Some(ObjId(1)), None);

        let same = obj.attr("x").cloned().expect("attr");
        obj.set_attr("x", same);
        assert!(obj.take_removed().is_empty());

        obj.set_attr("x", Object::integer(2));
        assert_eq!(obj.take_removed(), vec![ObjId(5)]);
    }
}
