//! # Store Primitives
//!
//! Fixed constants of the storage layout. These are part of the on-disk
//! format: changing any of them makes existing project databases unreadable.

/// Table holding every persisted object, one row per object.
pub const OBJECTS_TABLE: &str = "Objects";

/// Table holding named relations between stored objects.
pub const RELATIONS_TABLE: &str = "Relations";

/// Key prefix of list items. Items are stored as `__item__000001`, ...
pub const ITEM_PREFIX: &str = "__item__";

/// Attribute name holding the extended path of a Pointer.
pub const EXTENDED_ATTR: &str = "_extended";

/// Separator between storage-name components.
pub const NAME_SEPARATOR: char = '.';

/// Format of the `creation` column.
pub const CREATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Node id reserved for the project node in the runs graph.
pub const PROJECT_NODE_ID: i64 = 0;

/// Name of the root node of the runs graph.
pub const PROJECT_NODE_NAME: &str = "PROJECT";

/// Base class of every protocol run.
pub const PROTOCOL_CLASS: &str = "Protocol";

/// Magic bytes for the canonical export format.
pub const MAGIC_BYTES: &[u8; 4] = b"SCPX";

/// Current canonical export format version.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum length of a dotted `_extended` path.
pub const MAX_EXTENDED_DEPTH: usize = 32;

// =============================================================================
// LAYOUT
// =============================================================================

/// Horizontal distance between runs-graph levels.
pub const LAYOUT_X_STEP: i64 = 200;

/// Vertical distance between sibling nodes of one level.
pub const LAYOUT_Y_STEP: i64 = 100;

/// Offset of the first level / first sibling.
pub const LAYOUT_MARGIN: i64 = 50;

/// Format the storage key of the list item at `index` (0-based).
#[must_use]
pub fn item_key(index: usize) -> String {
    format!("{}{:06}", ITEM_PREFIX, index.saturating_add(1))
}

/// Parse the 0-based index back out of a list item key.
#[must_use]
pub fn item_index(key: &str) -> Option<usize> {
    key.strip_prefix(ITEM_PREFIX)?
        .parse::<usize>()
        .ok()?
        .checked_sub(1)
}
