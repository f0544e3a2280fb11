//! Graph node positions.
//!
//! A [`NodeConfig`] is stored as one scalar row whose value is a small JSON
//! document (`{"id":3,"x":250,"y":150,"selected":false,"expanded":true}`).
//! The node list is an ordinary List of those scalars plus an id index.

use crate::object::{ClassKind, Object, Value};
use crate::ScipionError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Class name of a stored node configuration.
pub const NODE_CONFIG_CLASS: &str = "NodeConfig";

/// Class name of the stored node list.
pub const NODE_CONFIG_LIST_CLASS: &str = "NodeConfigList";

/// Position and display state of one node of the runs graph.
///
/// Node id 0 is the project node; other ids are run ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub x: i64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub y: i64,
    #[serde(default)]
    pub selected: bool,
    #[serde(default = "expanded_default")]
    pub expanded: bool,
}

fn expanded_default() -> bool {
    true
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or(0))
}

impl NodeConfig {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self {
            id,
            x: 0,
            y: 0,
            selected: false,
            expanded: true,
        }
    }

    #[must_use]
    pub fn at(mut self, x: i64, y: i64) -> Self {
        self.set_position(x, y);
        self
    }

    #[must_use]
    pub fn position(&self) -> (i64, i64) {
        (self.x, self.y)
    }

    pub fn set_position(&mut self, x: i64, y: i64) {
        self.x = x;
        self.y = y;
    }

    pub fn to_json(&self) -> Result<String, ScipionError> {
        serde_json::to_string(self).map_err(|e| ScipionError::SerializationError(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, ScipionError> {
        serde_json::from_str(text).map_err(|_| ScipionError::InvalidValue {
            class: NODE_CONFIG_CLASS.to_string(),
            value: text.to_string(),
        })
    }

    /// Build the scalar object holding this node.
    pub fn to_object(&self) -> Result<Object, ScipionError> {
        let mut obj = Object::with_class(NODE_CONFIG_CLASS, ClassKind::String);
        obj.set_value(Value::String(self.to_json()?))?;
        Ok(obj)
    }

    /// Read a node back from its scalar object.
    pub fn from_object(obj: &Object) -> Result<Self, ScipionError> {
        let text = obj.as_str().ok_or_else(|| ScipionError::InvalidValue {
            class: NODE_CONFIG_CLASS.to_string(),
            value: obj.value().to_db().unwrap_or_default(),
        })?;
        Self::from_json(text)
    }
}

/// Mutable view over a stored node list and its id index.
///
/// The index maps node ids to item positions; it is rebuilt by
/// [`NodeConfigList::update_dict`] after the list is loaded.
pub struct NodeConfigList<'a> {
    list: &'a mut Object,
    index: &'a mut BTreeMap<i64, usize>,
}

impl<'a> NodeConfigList<'a> {
    pub(crate) fn new(list: &'a mut Object, index: &'a mut BTreeMap<i64, usize>) -> Self {
        Self { list, index }
    }

    /// Configuration of node `id`.
    pub fn node(&self, id: i64) -> Result<Option<NodeConfig>, ScipionError> {
        lookup(self.list, self.index, id)
    }

    /// Append a node; a repeated id shadows the earlier entry in the index.
    pub fn add_node(&mut self, node: NodeConfig) -> Result<(), ScipionError> {
        self.list.push(node.to_object()?)?;
        self.index.insert(node.id, self.list.len().saturating_sub(1));
        Ok(())
    }

    /// Write back a node already in the list; false when the id is unknown.
    pub fn update_node(&mut self, node: &NodeConfig) -> Result<bool, ScipionError> {
        let Some(&position) = self.index.get(&node.id) else {
            return Ok(false);
        };
        let Some(item) = self.list.items_mut().get_mut(position) else {
            return Ok(false);
        };
        item.set_value(Value::String(node.to_json()?))?;
        Ok(true)
    }

    /// Rebuild the id index from the list items.
    pub fn update_dict(&mut self) -> Result<(), ScipionError> {
        *self.index = build_index(self.list)?;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.index.clear();
    }

    /// All nodes in list order.
    pub fn iter(&self) -> impl Iterator<Item = Result<NodeConfig, ScipionError>> + '_ {
        self.list.items().iter().map(NodeConfig::from_object)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

/// Create an empty node list object.
pub(crate) fn empty_list() -> Object {
    Object::with_class(NODE_CONFIG_LIST_CLASS, ClassKind::List)
}

pub(crate) fn lookup(
    list: &Object,
    index: &BTreeMap<i64, usize>,
    id: i64,
) -> Result<Option<NodeConfig>, ScipionError> {
    match index.get(&id).and_then(|&i| list.items().get(i)) {
        Some(item) => NodeConfig::from_object(item).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn build_index(list: &Object) -> Result<BTreeMap<i64, usize>, ScipionError> {
    let mut index = BTreeMap::new();
    for (position, item) in list.items().iter().enumerate() {
        index.insert(NodeConfig::from_object(item)?.id, position);
    }
    Ok(index)
}
