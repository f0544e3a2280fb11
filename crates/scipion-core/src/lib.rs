//! # scipion-core
//!
//! The object store of Scipion projects.
//!
//! Protocol runs, their parameters and their outputs are trees of typed
//! objects. This crate defines that object model and persists it into
//! SQLite, one row per object, together with the per-project settings and
//! the node graph the runs form.
//!
//! ## Architectural Constraints
//!
//! - Layered: mapper <-> object model <-> settings / graph / project
//! - Deterministic: rows are always read ordered by id, maps are `BTreeMap`
//! - Has NO async, NO network dependencies (pure Rust)
//! - Never panics on bad input; every failure is a [`ScipionError`]

// =============================================================================
// MODULES
// =============================================================================

pub mod export;
pub mod graph;
pub mod mapper;
pub mod object;
pub mod primitives;
pub mod project;
pub mod registry;
pub mod settings;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{ObjId, ScipionError};

pub use object::{ClassKind, Object, Persistable, Value};
pub use registry::ClassRegistry;

// =============================================================================
// RE-EXPORTS: Store
// =============================================================================

pub use mapper::{ObjectIter, ObjectRow, Relation, RelationRow, SqliteMapper};

pub use export::{
    CanonicalHeader, CanonicalStore, canonical_checksum, export_canonical, import_canonical,
    restore_canonical, verify_canonical,
};

#[cfg(feature = "crypto-hash")]
pub use export::canonical_crypto_hash;

// =============================================================================
// RE-EXPORTS: Project
// =============================================================================

pub use graph::{Graph, GraphNode};
pub use project::{PROJECT_DB, Project, SETTINGS_DB};
pub use settings::{
    NodeConfig, NodeConfigList, ProjectConfig, ProjectSettings, load_settings, settings_registry,
};
