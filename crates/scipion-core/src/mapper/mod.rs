//! # SQLite Object Mapper
//!
//! Persists [`Object`] trees into two tables:
//! - `Objects`: one row per object (top-level objects and every nested
//!   attribute / list item), linked through `parent_id`
//! - `Relations`: named, creator-owned links between stored objects
//!
//! ## Storage names
//!
//! A top-level object keeps its user name. Its children are stored as
//! `<id>.<key>`, grandchildren as `<id>.<key>.<key>` and so on; list items
//! use `__item__000001`-style keys. Every descendant of a top-level object
//! therefore shares the `<id>.` prefix, which lets a whole tree be read
//! back with a single query.
//!
//! ## Writes
//!
//! Every mutating call runs in one SQLite transaction. `store` writes only
//! rows that are new, dirty or renamed and deletes children removed since
//! the last store, so storing an unchanged tree touches nothing.

mod relations;
mod rows;
mod schema;

pub use relations::Relation;
pub use rows::{ObjectRow, RelationRow};

use crate::object::{ClassKind, Object, Persistable};
use crate::primitives::CREATION_FORMAT;
use crate::{ClassRegistry, ObjId, ScipionError};
use rows::{OBJECT_COLUMNS, RELATION_COLUMNS, assemble, child_prefix, collect_rows};
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Convert a rusqlite error into the store error type.
pub(crate) fn to_storage_err(e: rusqlite::Error) -> ScipionError {
    ScipionError::StorageError(e.to_string())
}

/// Object-relational mapper over one SQLite database.
pub struct SqliteMapper {
    conn: Connection,
    registry: ClassRegistry,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMapper")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteMapper {
    // =========================================================================
    // OPEN
    // =========================================================================

    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>, registry: ClassRegistry) -> Result<Self, ScipionError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(to_storage_err)?;
        let mapper = Self::init(conn, registry, Some(path.to_path_buf()))?;
        tracing::debug!(path = %path.display(), "opened object store");
        Ok(mapper)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory(registry: ClassRegistry) -> Result<Self, ScipionError> {
        let conn = Connection::open_in_memory().map_err(to_storage_err)?;
        Self::init(conn, registry, None)
    }

    fn init(
        conn: Connection,
        registry: ClassRegistry,
        path: Option<PathBuf>,
    ) -> Result<Self, ScipionError> {
        schema::apply_pragmas(&conn)?;
        let added = schema::ensure_schema(&conn)?;
        if !added.is_empty() {
            tracing::info!(columns = ?added, "upgraded Objects table with missing columns");
        }
        Ok(Self {
            conn,
            registry,
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ClassRegistry {
        &mut self.registry
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    pub fn table_names(&self) -> Result<Vec<String>, ScipionError> {
        schema::table_names(&self.conn)
    }

    pub fn has_table(&self, table: &str) -> Result<bool, ScipionError> {
        Ok(self.table_names()?.iter().any(|t| t == table))
    }

    pub fn column_names(&self, table: &str) -> Result<Vec<String>, ScipionError> {
        schema::column_names(&self.conn, table)
    }

    /// Total number of object rows (all depths).
    pub fn count(&self) -> Result<usize, ScipionError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM Objects", [], |row| row.get(0))
            .map_err(to_storage_err)?;
        Ok(n as usize)
    }

    /// Number of top-level objects.
    pub fn count_top_level(&self) -> Result<usize, ScipionError> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM Objects WHERE parent_id IS NULL",
                [],
                |row| row.get(0),
            )
            .map_err(to_storage_err)?;
        Ok(n as usize)
    }

    pub fn exists(&self, id: ObjId) -> Result<bool, ScipionError> {
        Ok(self.fetch_row(id)?.is_some())
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Insert a new object tree; every node receives an id.
    pub fn insert(&mut self, obj: &mut Object) -> Result<ObjId, ScipionError> {
        if let Some(id) = obj.id() {
            return Err(ScipionError::StorageError(format!(
                "object {} is already stored",
                id
            )));
        }
        self.store(obj)?;
        obj.id()
            .ok_or_else(|| ScipionError::StorageError("object was not persisted".to_string()))
    }

    /// Insert a new tree or write the changes of a stored one.
    ///
    /// Returns the number of rows inserted, updated or deleted.
    pub fn store(&mut self, obj: &mut Object) -> Result<usize, ScipionError> {
        self.write(obj, false)
    }

    /// Rewrite every row of an already stored tree.
    pub fn update(&mut self, obj: &mut Object) -> Result<usize, ScipionError> {
        let id = obj
            .id()
            .ok_or_else(|| ScipionError::StorageError("cannot update an unsaved object".into()))?;
        if !self.exists(id)? {
            return Err(ScipionError::ObjectNotFound(id));
        }
        self.write(obj, true)
    }

    fn write(&mut self, obj: &mut Object, force: bool) -> Result<usize, ScipionError> {
        if !obj.persist() {
            return Ok(0);
        }
        let now = chrono::Local::now().format(CREATION_FORMAT).to_string();
        // Ids, names, clean marks and drained removals are only kept once the
        // transaction commits.
        let snapshot = obj.clone();
        let tx = self.conn.transaction().map_err(to_storage_err)?;
        match commit_tree(tx, obj, force, &now) {
            Ok(written) => {
                tracing::debug!(id = ?obj.id(), rows = written, force, "stored object tree");
                Ok(written)
            }
            Err(e) => {
                *obj = snapshot;
                tracing::warn!(id = ?obj.id(), error = %e, "store rolled back");
                Err(e)
            }
        }
    }

    /// Delete a stored object with all its descendants and relations.
    pub fn delete(&mut self, obj: &Object) -> Result<usize, ScipionError> {
        let id = obj
            .id()
            .ok_or_else(|| ScipionError::StorageError("cannot delete an unsaved object".into()))?;
        self.delete_by_id(id)
    }

    /// Delete by id; returns the number of object rows removed.
    pub fn delete_by_id(&mut self, id: ObjId) -> Result<usize, ScipionError> {
        let tx = self.conn.transaction().map_err(to_storage_err)?;
        let removed = delete_subtree(&tx, id)?;
        tx.commit().map_err(to_storage_err)?;
        if removed == 0 {
            return Err(ScipionError::ObjectNotFound(id));
        }
        tracing::debug!(id = %id, rows = removed, "deleted object tree");
        Ok(removed)
    }

    /// Remove every object and relation.
    pub fn delete_all(&mut self) -> Result<(), ScipionError> {
        let tx = self.conn.transaction().map_err(to_storage_err)?;
        tx.execute_batch("DELETE FROM Relations; DELETE FROM Objects;")
            .map_err(to_storage_err)?;
        tx.commit().map_err(to_storage_err)?;
        Ok(())
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Load one object (any depth) with its full subtree.
    pub fn select_by_id(&self, id: ObjId) -> Result<Option<Object>, ScipionError> {
        match self.fetch_row(id)? {
            Some(row) => self.load_tree(row).map(Some),
            None => Ok(None),
        }
    }

    /// All objects of `class` (optionally including subclasses), any depth.
    pub fn select_by_class(
        &self,
        class: &str,
        include_subclasses: bool,
    ) -> Result<Vec<Object>, ScipionError> {
        let classes = if include_subclasses {
            self.registry.subclasses_of(class)
        } else {
            vec![class.to_string()]
        };
        if classes.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; classes.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM Objects WHERE classname IN ({}) ORDER BY id",
            OBJECT_COLUMNS, placeholders
        );
        let rows = self.query_rows(&sql, params_from_iter(classes.iter()))?;
        rows.into_iter().map(|row| self.load_tree(row)).collect()
    }

    /// Top-level objects with the given name.
    pub fn select_by_name(&self, name: &str) -> Result<Vec<Object>, ScipionError> {
        let sql = format!(
            "SELECT {} FROM Objects WHERE parent_id IS NULL AND name = ?1 ORDER BY id",
            OBJECT_COLUMNS
        );
        let rows = self.query_rows(&sql, params![name])?;
        rows.into_iter().map(|row| self.load_tree(row)).collect()
    }

    /// All top-level objects, ordered by id.
    pub fn select_all(&self) -> Result<Vec<Object>, ScipionError> {
        let sql = format!(
            "SELECT {} FROM Objects WHERE parent_id IS NULL ORDER BY id",
            OBJECT_COLUMNS
        );
        let rows = self.query_rows(&sql, [])?;
        rows.into_iter().map(|row| self.load_tree(row)).collect()
    }

    /// The first top-level object, if any.
    pub fn select_first(&self) -> Result<Option<Object>, ScipionError> {
        let sql = format!(
            "SELECT {} FROM Objects WHERE parent_id IS NULL ORDER BY id LIMIT 1",
            OBJECT_COLUMNS
        );
        match self.query_rows(&sql, [])?.into_iter().next() {
            Some(row) => self.load_tree(row).map(Some),
            None => Ok(None),
        }
    }

    /// Lazily iterate top-level objects; each tree is read when reached.
    pub fn iter_all(&self) -> Result<ObjectIter<'_>, ScipionError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM Objects WHERE parent_id IS NULL ORDER BY id")
            .map_err(to_storage_err)?;
        let ids = collect_rows(
            stmt.query_map([], |row| row.get::<_, i64>(0).map(ObjId))
                .map_err(to_storage_err)?,
        )?;
        Ok(ObjectIter {
            mapper: self,
            ids: ids.into_iter(),
        })
    }

    /// Resolve a pointer to the object it references.
    ///
    /// With an `_extended` path the referenced attribute is returned instead
    /// of the whole target. A null pointer or a vanished target gives `None`.
    pub fn dereference(&self, pointer: &Object) -> Result<Option<Object>, ScipionError> {
        if pointer.kind() != ClassKind::Pointer {
            return Err(ScipionError::TypeMismatch {
                expected: ClassKind::Pointer.base_class().to_string(),
                found: pointer.class_name().to_string(),
            });
        }
        let Some(target_id) = pointer.pointer_target() else {
            return Ok(None);
        };
        let Some(target) = self.select_by_id(target_id)? else {
            tracing::warn!(target = %target_id, "pointer target no longer exists");
            return Ok(None);
        };
        match pointer.extended() {
            None => Ok(Some(target)),
            Some(path) => {
                if path.split('.').count() > crate::primitives::MAX_EXTENDED_DEPTH {
                    return Err(ScipionError::MissingAttribute(path.to_string()));
                }
                target
                    .attr_path(path)
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| ScipionError::MissingAttribute(path.to_string()))
            }
        }
    }

    // =========================================================================
    // TYPED ACCESS
    // =========================================================================

    /// Store a typed view.
    pub fn store_typed<T: Persistable>(&mut self, value: &mut T) -> Result<usize, ScipionError> {
        self.store(value.as_object_mut())
    }

    /// Load every stored instance of `T`.
    pub fn select_typed<T: Persistable>(&self) -> Result<Vec<T>, ScipionError> {
        self.select_by_class(T::CLASS_NAME, false)?
            .into_iter()
            .map(T::from_object)
            .collect()
    }

    // =========================================================================
    // RAW ROWS (canonical export)
    // =========================================================================

    /// Every object and relation row, ordered by id.
    pub fn dump_rows(&self) -> Result<(Vec<ObjectRow>, Vec<RelationRow>), ScipionError> {
        let objects = self.query_rows(
            &format!("SELECT {} FROM Objects ORDER BY id", OBJECT_COLUMNS),
            [],
        )?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM Relations ORDER BY id",
                RELATION_COLUMNS
            ))
            .map_err(to_storage_err)?;
        let relations = collect_rows(
            stmt.query_map([], RelationRow::from_row)
                .map_err(to_storage_err)?,
        )?;
        Ok((objects, relations))
    }

    /// Load rows into an empty store, keeping their ids.
    pub fn restore_rows(
        &mut self,
        objects: &[ObjectRow],
        relations: &[RelationRow],
    ) -> Result<(), ScipionError> {
        if self.count()? > 0 {
            return Err(ScipionError::StorageError(
                "restore requires an empty store".to_string(),
            ));
        }
        let tx = self.conn.transaction().map_err(to_storage_err)?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")
            .map_err(to_storage_err)?;
        for row in objects {
            tx.execute(
                "INSERT INTO Objects (id, parent_id, name, classname, value, label, comment, creation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.id,
                    row.parent_id,
                    row.name,
                    row.classname,
                    row.value,
                    row.label,
                    row.comment,
                    row.creation
                ],
            )
            .map_err(to_storage_err)?;
        }
        for rel in relations {
            tx.execute(
                "INSERT INTO Relations (id, parent_id, name, classname, object_parent_id,
                     object_child_id, creation, object_parent_extended, object_child_extended)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    rel.id,
                    rel.creator,
                    rel.name,
                    rel.classname,
                    rel.parent,
                    rel.child,
                    rel.creation,
                    rel.parent_extended,
                    rel.child_extended
                ],
            )
            .map_err(to_storage_err)?;
        }
        tx.commit().map_err(to_storage_err)?;
        tracing::info!(
            objects = objects.len(),
            relations = relations.len(),
            "restored store rows"
        );
        Ok(())
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn fetch_row(&self, id: ObjId) -> Result<Option<ObjectRow>, ScipionError> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM Objects WHERE id = ?1", OBJECT_COLUMNS),
                params![id.0],
                ObjectRow::from_row,
            )
            .optional()
            .map_err(to_storage_err)
    }

    fn query_rows<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<ObjectRow>, ScipionError> {
        let mut stmt = self.conn.prepare(sql).map_err(to_storage_err)?;
        collect_rows(
            stmt.query_map(params, ObjectRow::from_row)
                .map_err(to_storage_err)?,
        )
    }

    /// Read the descendants of `root` and assemble the tree.
    fn load_tree(&self, root: ObjectRow) -> Result<Object, ScipionError> {
        let prefix = if root.parent_id.is_none() {
            ObjId(root.id).prefix()
        } else {
            format!("{}.", root.name)
        };
        let sql = format!(
            "SELECT {} FROM Objects
             WHERE parent_id IS NOT NULL AND substr(name, 1, ?1) = ?2
             ORDER BY id",
            OBJECT_COLUMNS
        );
        let descendants = self.query_rows(&sql, params![prefix.chars().count() as i64, prefix])?;
        assemble(root, descendants, &self.registry)
    }
}

// =============================================================================
// LAZY ITERATION
// =============================================================================

/// Iterator over top-level objects, loading one tree per step.
pub struct ObjectIter<'a> {
    mapper: &'a SqliteMapper,
    ids: std::vec::IntoIter<ObjId>,
}

impl Iterator for ObjectIter<'_> {
    type Item = Result<Object, ScipionError>;

    fn next(&mut self) -> Option<Self::Item> {
        for id in self.ids.by_ref() {
            match self.mapper.select_by_id(id) {
                Ok(Some(obj)) => return Some(Ok(obj)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len()))
    }
}

// =============================================================================
// TREE WRITER
// =============================================================================

/// Write a whole tree, then drop the children it no longer holds, and commit.
fn commit_tree(
    tx: Transaction<'_>,
    obj: &mut Object,
    force: bool,
    now: &str,
) -> Result<usize, ScipionError> {
    let mut live = BTreeSet::new();
    live_ids(obj, &mut live);

    let parent_id = obj.parent_id();
    let mut removed = Vec::new();
    let mut written = write_tree(&tx, obj, parent_id, None, force, now, &mut removed)?;

    // A removed child that is still reachable was moved or re-attached and
    // has just been rewritten in place.
    for (owner, id) in removed {
        if !live.contains(&id) {
            written = written.saturating_add(delete_removed(&tx, owner, id)?);
        }
    }
    tx.commit().map_err(to_storage_err)?;
    Ok(written)
}

/// Ids of every persisted node of the tree.
fn live_ids(obj: &Object, ids: &mut BTreeSet<ObjId>) {
    if !obj.persist() {
        return;
    }
    if let Some(id) = obj.id() {
        ids.insert(id);
    }
    for (_, attr) in obj.attributes() {
        live_ids(attr, ids);
    }
    for item in obj.items() {
        live_ids(item, ids);
    }
}

/// Write `obj` and its persisted descendants; returns rows touched.
///
/// Children removed since the last store are collected into `removed` as
/// `(owner, child)` pairs instead of being deleted here.
fn write_tree(
    tx: &Transaction<'_>,
    obj: &mut Object,
    parent_id: Option<ObjId>,
    storage_name: Option<String>,
    force: bool,
    now: &str,
    removed: &mut Vec<(Option<ObjId>, ObjId)>,
) -> Result<usize, ScipionError> {
    if !obj.persist() {
        return Ok(0);
    }
    let mut written = 0usize;
    let renamed = storage_name.is_some_and(|name| obj.assign_name(name));
    let moved = obj.id().is_some() && obj.parent_id() != parent_id;

    let owner = obj.id();
    removed.extend(obj.take_removed().into_iter().map(|id| (owner, id)));

    let value = obj.value().to_db();
    match obj.id() {
        None => {
            tx.execute(
                "INSERT INTO Objects (parent_id, name, classname, value, label, comment, creation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    parent_id.map(|p| p.0),
                    obj.name(),
                    obj.class_name(),
                    value,
                    obj.label(),
                    obj.comment(),
                    now
                ],
            )
            .map_err(to_storage_err)?;
            let id = ObjId(tx.last_insert_rowid());
            obj.assign_identity(id, parent_id, Some(now.to_string()));
            written = written.saturating_add(1);
        }
        Some(id) if force || renamed || moved || obj.is_dirty() => {
            let changed = tx
                .execute(
                    "UPDATE Objects SET parent_id = ?1, name = ?2, classname = ?3,
                         value = ?4, label = ?5, comment = ?6
                     WHERE id = ?7",
                    params![
                        parent_id.map(|p| p.0),
                        obj.name(),
                        obj.class_name(),
                        value,
                        obj.label(),
                        obj.comment(),
                        id.0
                    ],
                )
                .map_err(to_storage_err)?;
            if changed == 0 {
                return Err(ScipionError::ObjectNotFound(id));
            }
            obj.assign_parent(parent_id);
            written = written.saturating_add(1);
        }
        Some(_) => {}
    }
    obj.mark_clean();

    let id = obj.id();
    let prefix = child_prefix(obj).unwrap_or_default();
    for (key, child) in obj.children_mut() {
        written = written.saturating_add(write_tree(
            tx,
            child,
            id,
            Some(format!("{}{}", prefix, key)),
            force,
            now,
            removed,
        )?);
    }
    Ok(written)
}

/// Delete a removed child unless it now hangs under another parent.
fn delete_removed(
    tx: &Transaction<'_>,
    owner: Option<ObjId>,
    id: ObjId,
) -> Result<usize, ScipionError> {
    let parent: Option<Option<i64>> = tx
        .query_row(
            "SELECT parent_id FROM Objects WHERE id = ?1",
            params![id.0],
            |row| row.get(0),
        )
        .optional()
        .map_err(to_storage_err)?;
    match (parent, owner) {
        (None, _) => Ok(0),
        (Some(parent), Some(owner)) if parent != Some(owner.0) => Ok(0),
        _ => delete_subtree(tx, id),
    }
}

/// Delete an object row, its descendants and relations touching them.
fn delete_subtree(tx: &Transaction<'_>, id: ObjId) -> Result<usize, ScipionError> {
    const SUBTREE: &str = "WITH RECURSIVE subtree(id) AS (
            SELECT id FROM Objects WHERE id = ?1
            UNION ALL
            SELECT o.id FROM Objects o JOIN subtree s ON o.parent_id = s.id
        )";
    tx.execute(
        &format!(
            "{} DELETE FROM Relations WHERE parent_id IN subtree
                 OR object_parent_id IN subtree OR object_child_id IN subtree",
            SUBTREE
        ),
        params![id.0],
    )
    .map_err(to_storage_err)?;
    tx.execute(
        &format!("{} DELETE FROM Objects WHERE id IN subtree", SUBTREE),
        params![id.0],
    )
    .map_err(to_storage_err)
}

// =============================================================================
// TESTS
// =============================================================================
