//! Raw table rows and tree assembly.

use super::to_storage_err;
use crate::object::Object;
use crate::primitives::{NAME_SEPARATOR, item_index};
use crate::{ClassRegistry, ObjId, ScipionError};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column list matching [`ObjectRow::from_row`].
pub(crate) const OBJECT_COLUMNS: &str =
    "id, parent_id, name, classname, value, label, comment, creation";

/// Column list matching [`RelationRow::from_row`].
pub(crate) const RELATION_COLUMNS: &str = "id, parent_id, name, classname, object_parent_id, \
     object_child_id, creation, object_parent_extended, object_child_extended";

/// One row of the `Objects` table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRow {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub classname: String,
    pub value: Option<String>,
    pub label: Option<String>,
    pub comment: Option<String>,
    pub creation: Option<String>,
}

impl ObjectRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            name: row.get(2)?,
            classname: row.get(3)?,
            value: row.get(4)?,
            label: row.get(5)?,
            comment: row.get(6)?,
            creation: row.get(7)?,
        })
    }

    /// Decode into a clean object without children.
    pub(crate) fn into_object(self, registry: &ClassRegistry) -> Result<Object, ScipionError> {
        let kind = registry
            .kind_of(&self.classname)
            .ok_or_else(|| ScipionError::UnknownClass(self.classname.clone()))?;
        let value = kind.parse_value(&self.classname, self.value.as_deref())?;
        Ok(Object::from_row(
            ObjId(self.id),
            self.parent_id.map(ObjId),
            self.name,
            self.classname,
            kind,
            value,
            self.label,
            self.comment,
            self.creation,
        ))
    }
}

/// One row of the `Relations` table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationRow {
    pub id: i64,
    /// Object that created the relation (usually a protocol run).
    pub creator: Option<i64>,
    pub name: String,
    pub classname: Option<String>,
    pub parent: Option<i64>,
    pub child: Option<i64>,
    pub creation: Option<String>,
    pub parent_extended: Option<String>,
    pub child_extended: Option<String>,
}

impl RelationRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            creator: row.get(1)?,
            name: row.get(2)?,
            classname: row.get(3)?,
            parent: row.get(4)?,
            child: row.get(5)?,
            creation: row.get(6)?,
            parent_extended: row.get(7)?,
            child_extended: row.get(8)?,
        })
    }
}

/// Prefix of the storage names of `obj`'s children.
pub(crate) fn child_prefix(obj: &Object) -> Option<String> {
    let id = obj.id()?;
    if obj.parent_id().is_none() {
        Some(id.prefix())
    } else {
        Some(format!("{}{}", obj.name(), NAME_SEPARATOR))
    }
}

/// Assemble a root object and its descendant rows (any order) into a tree.
///
/// Rows that do not hang below the root through `parent_id` are ignored.
pub(crate) fn assemble(
    root: ObjectRow,
    descendants: Vec<ObjectRow>,
    registry: &ClassRegistry,
) -> Result<Object, ScipionError> {
    let mut by_parent: BTreeMap<i64, Vec<ObjectRow>> = BTreeMap::new();
    for row in descendants {
        if let Some(parent) = row.parent_id {
            by_parent.entry(parent).or_default().push(row);
        }
    }
    for children in by_parent.values_mut() {
        children.sort_by_key(|row| row.id);
    }

    let root = root.into_object(registry)?;
    attach_children(root, &mut by_parent, registry)
}

fn attach_children(
    mut obj: Object,
    by_parent: &mut BTreeMap<i64, Vec<ObjectRow>>,
    registry: &ClassRegistry,
) -> Result<Object, ScipionError> {
    let (Some(id), Some(prefix)) = (obj.id(), child_prefix(&obj)) else {
        return Ok(obj);
    };
    let rows = by_parent.remove(&id.0).unwrap_or_default();
    let mut items: Vec<(usize, Object)> = Vec::new();

    for row in rows {
        let key = storage_key(&row.name, &prefix);
        let child = attach_children(row.into_object(registry)?, by_parent, registry)?;
        match item_index(&key) {
            Some(index) if obj.kind() == crate::object::ClassKind::List => {
                items.push((index, child));
            }
            _ => obj.attach_loaded_attr(key, child),
        }
    }

    if !items.is_empty() {
        items.sort_by_key(|(index, _)| *index);
        obj.attach_loaded_items(items.into_iter().map(|(_, item)| item).collect());
    }
    Ok(obj)
}

/// The attribute key of a child, given its parent's child prefix.
fn storage_key(name: &str, prefix: &str) -> String {
    match name.strip_prefix(prefix) {
        Some(key) => key.to_string(),
        None => {
            let key = name.rsplit(NAME_SEPARATOR).next().unwrap_or(name);
            tracing::warn!(name, prefix, "child name does not carry its parent prefix");
            key.to_string()
        }
    }
}

/// Map a rusqlite row-collection result into the store error type.
pub(crate) fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, ScipionError> {
    rows.collect::<Result<Vec<_>, _>>().map_err(to_storage_err)
}
