//! Named relations between stored objects.
//!
//! A relation links a parent object to a child object under a name and is
//! owned by a creator (usually the protocol run that produced the link).
//! Either end may point into an attribute of the object through an
//! extended path, just like a Pointer.

use super::rows::{RELATION_COLUMNS, RelationRow, collect_rows};
use super::{SqliteMapper, to_storage_err};
use crate::object::Object;
use crate::primitives::CREATION_FORMAT;
use crate::{ObjId, ScipionError};
use rusqlite::params;

/// A stored relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub id: i64,
    pub name: String,
    pub creator: ObjId,
    pub parent: ObjId,
    pub child: ObjId,
    pub parent_extended: Option<String>,
    pub child_extended: Option<String>,
    pub creation: Option<String>,
}

impl Relation {
    fn from_row(row: RelationRow) -> Result<Self, ScipionError> {
        let id = row.id;
        let missing =
            |end: &str| ScipionError::StorageError(format!("relation {} has no {}", id, end));
        Ok(Self {
            creator: row.creator.map(ObjId).ok_or_else(|| missing("creator"))?,
            parent: row.parent.map(ObjId).ok_or_else(|| missing("parent"))?,
            child: row.child.map(ObjId).ok_or_else(|| missing("child"))?,
            id,
            name: row.name,
            parent_extended: row.parent_extended,
            child_extended: row.child_extended,
            creation: row.creation,
        })
    }
}

impl SqliteMapper {
    /// Record a relation `parent -> child` owned by `creator`.
    ///
    /// The relation class is the class of the creator.
    pub fn insert_relation(
        &mut self,
        name: &str,
        creator: ObjId,
        parent: ObjId,
        child: ObjId,
        parent_extended: Option<&str>,
        child_extended: Option<&str>,
    ) -> Result<i64, ScipionError> {
        for id in [creator, parent, child] {
            if !self.exists(id)? {
                return Err(ScipionError::ObjectNotFound(id));
            }
        }
        let now = chrono::Local::now().format(CREATION_FORMAT).to_string();
        let tx = self.conn.transaction().map_err(to_storage_err)?;
        tx.execute(
            "INSERT INTO Relations (parent_id, name, classname, object_parent_id,
                 object_child_id, creation, object_parent_extended, object_child_extended)
             VALUES (?1, ?2, (SELECT classname FROM Objects WHERE id = ?1), ?3, ?4, ?5, ?6, ?7)",
            params![
                creator.0,
                name,
                parent.0,
                child.0,
                now,
                parent_extended,
                child_extended
            ],
        )
        .map_err(to_storage_err)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(to_storage_err)?;
        tracing::debug!(relation = name, %parent, %child, %creator, "inserted relation");
        Ok(id)
    }

    /// Objects linked below `parent` by relation `name`.
    ///
    /// A child extended path returns the referenced attribute instead.
    pub fn relation_children(
        &self,
        name: &str,
        parent: ObjId,
    ) -> Result<Vec<Object>, ScipionError> {
        let rows = self.relation_rows(
            "WHERE name = ?1 AND object_parent_id = ?2",
            params![name, parent.0],
        )?;
        self.resolve_ends(rows.iter().map(|r| (r.child, r.child_extended.as_deref())))
    }

    /// Objects linked above `child` by relation `name`.
    pub fn relation_parents(&self, name: &str, child: ObjId) -> Result<Vec<Object>, ScipionError> {
        let rows = self.relation_rows(
            "WHERE name = ?1 AND object_child_id = ?2",
            params![name, child.0],
        )?;
        self.resolve_ends(rows.iter().map(|r| (r.parent, r.parent_extended.as_deref())))
    }

    /// Every relation created by `creator`, ordered by id.
    pub fn relations_by_creator(&self, creator: ObjId) -> Result<Vec<Relation>, ScipionError> {
        self.relation_rows("WHERE parent_id = ?1", params![creator.0])?
            .into_iter()
            .map(Relation::from_row)
            .collect()
    }

    /// Delete the relations created by `creator`; returns how many.
    pub fn delete_relations(&mut self, creator: ObjId) -> Result<usize, ScipionError> {
        let tx = self.conn.transaction().map_err(to_storage_err)?;
        let removed = tx
            .execute("DELETE FROM Relations WHERE parent_id = ?1", params![creator.0])
            .map_err(to_storage_err)?;
        tx.commit().map_err(to_storage_err)?;
        Ok(removed)
    }

    fn relation_rows<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> Result<Vec<RelationRow>, ScipionError> {
        let sql = format!(
            "SELECT {} FROM Relations {} ORDER BY id",
            RELATION_COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql).map_err(to_storage_err)?;
        collect_rows(
            stmt.query_map(params, RelationRow::from_row)
                .map_err(to_storage_err)?,
        )
    }

    fn resolve_ends<'r>(
        &self,
        ends: impl Iterator<Item = (Option<i64>, Option<&'r str>)>,
    ) -> Result<Vec<Object>, ScipionError> {
        let mut objects = Vec::new();
        for (id, extended) in ends {
            let Some(id) = id.map(ObjId) else { continue };
            let Some(obj) = self.select_by_id(id)? else {
                tracing::warn!(id = %id, "relation end no longer exists");
                continue;
            };
            match extended.filter(|p| !p.is_empty()) {
                None => objects.push(obj),
                Some(path) => objects.push(
                    obj.attr_path(path)
                        .cloned()
                        .ok_or_else(|| ScipionError::MissingAttribute(path.to_string()))?,
                ),
            }
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use crate::{ClassKind, ClassRegistry, Object, ScipionError, SqliteMapper};

    fn setup() -> (SqliteMapper, [crate::ObjId; 3]) {
        let mut registry = ClassRegistry::new();
        registry.register("Protocol", ClassKind::Composite, Some("OrderedObject"));
        let mut m = SqliteMapper::open_in_memory(registry).expect("open");
        let mut run = Object::with_class("Protocol", ClassKind::Composite);
        let mut movies = Object::ordered().with_attr("size", Object::integer(10));
        let mut mics = Object::string("mics");
        let run = m.insert(&mut run).expect("run");
        let movies = m.insert(&mut movies).expect("movies");
        let mics = m.insert(&mut mics).expect("mics");
        (m, [run, movies, mics])
    }

    #[test]
    fn children_and_parents_resolve_objects() {
        let (mut m, [run, movies, mics]) = setup();
        m.insert_relation("source", run, movies, mics, None, None)
            .expect("relation");

        let children = m.relation_children("source", movies).expect("children");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].as_str(), Some("mics"));

        let parents = m.relation_parents("source", mics).expect("parents");
        assert_eq!(parents[0].id(), Some(movies));
    }

    #[test]
    fn extended_end_returns_attribute() {
        let (mut m, [run, movies, mics]) = setup();
        m.insert_relation("source", run, movies, mics, Some("size"), None)
            .expect("relation");

        let parents = m.relation_parents("source", mics).expect("parents");
        assert_eq!(parents[0].as_int(), Some(10));
    }

    #[test]
    fn relation_class_is_creator_class() {
        let (mut m, [run, movies, mics]) = setup();
        m.insert_relation("source", run, movies, mics, None, None)
            .expect("relation");

        let (_, rows) = m.dump_rows().expect("dump");
        assert_eq!(rows[0].classname.as_deref(), Some("Protocol"));
        assert_eq!(m.relations_by_creator(run).expect("by creator").len(), 1);
    }

    #[test]
    fn deleting_an_end_drops_the_relation() {
        let (mut m, [run, movies, mics]) = setup();
        m.insert_relation("source", run, movies, mics, None, None)
            .expect("relation");

        m.delete_by_id(mics).expect("delete");

        assert!(m.relations_by_creator(run).expect("by creator").is_empty());
    }

    #[test]
    fn delete_relations_by_creator() {
        let (mut m, [run, movies, mics]) = setup();
        m.insert_relation("a", run, movies, mics, None, None)
            .expect("relation");
        m.insert_relation("b", run, mics, movies, None, None)
            .expect("relation");

        assert_eq!(m.delete_relations(run).expect("delete"), 2);
        assert!(m.relation_children("a", movies).expect("children").is_empty());
    }

    #[test]
    fn relation_to_missing_object_fails() {
        let (mut m, [run, movies, _]) = setup();
        let result = m.insert_relation("x", run, movies, crate::ObjId(999), None, None);
        assert!(matches!(result, Err(ScipionError::ObjectNotFound(_))));
    }
}
