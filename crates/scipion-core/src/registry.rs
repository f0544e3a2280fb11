//! # Class Registry
//!
//! Maps stored class names to their storage kind and base class. The mapper
//! needs it to decode the `value` column of a row and to answer
//! "this class and all its subclasses" queries.

use crate::object::ClassKind;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ClassInfo {
    kind: ClassKind,
    base: Option<String>,
}

/// Registry of known classes.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    classes: BTreeMap<String, ClassInfo>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    /// A registry holding the built-in classes.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            classes: BTreeMap::new(),
        };
        registry.register("Object", ClassKind::Composite, None);
        registry.register("OrderedObject", ClassKind::Composite, Some("Object"));
        registry.register("Scalar", ClassKind::String, Some("Object"));
        registry.register("Integer", ClassKind::Integer, Some("Scalar"));
        registry.register("Float", ClassKind::Float, Some("Scalar"));
        registry.register("Boolean", ClassKind::Boolean, Some("Scalar"));
        registry.register("String", ClassKind::String, Some("Scalar"));
        registry.register("CsvList", ClassKind::CsvList, Some("Scalar"));
        registry.register("Pointer", ClassKind::Pointer, Some("Object"));
        registry.register("List", ClassKind::List, Some("Object"));
        registry
    }

    /// Register (or re-register) a class.
    pub fn register(&mut self, name: impl Into<String>, kind: ClassKind, base: Option<&str>) {
        self.classes.insert(
            name.into(),
            ClassInfo {
                kind,
                base: base.map(str::to_string),
            },
        );
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<ClassKind> {
        self.classes.get(name).map(|info| info.kind)
    }

    #[must_use]
    pub fn base_of(&self, name: &str) -> Option<&str> {
        self.classes.get(name)?.base.as_deref()
    }

    /// Whether `class` is `base` or derives from it (transitively).
    #[must_use]
    pub fn is_subclass(&self, class: &str, base: &str) -> bool {
        let mut current = Some(class);
        let mut seen = BTreeSet::new();
        while let Some(name) = current {
            if name == base {
                return true;
            }
            if !seen.insert(name) {
                return false;
            }
            current = self.base_of(name);
        }
        false
    }

    /// `base` and every registered class deriving from it, sorted.
    #[must_use]
    pub fn subclasses_of(&self, base: &str) -> Vec<String> {
        self.classes
            .keys()
            .filter(|name| self.is_subclass(name, base))
            .cloned()
            .collect()
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}
