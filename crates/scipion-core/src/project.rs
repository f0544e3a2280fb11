//! # Project Session
//!
//! A project directory holds two stores:
//! - `project.sqlite`: protocol runs with their parameters and outputs
//! - `settings.sqlite`: the single [`ProjectSettings`] tree
//!
//! Runs are top-level objects whose class derives from `Protocol`. The runs
//! graph links a run to every run it takes input from, found through the
//! pointers inside its tree.

use crate::graph::Graph;
use crate::object::{ClassKind, Object};
use crate::primitives::{NAME_SEPARATOR, PROJECT_NODE_NAME, PROTOCOL_CLASS};
use crate::settings::{self, ProjectSettings};
use crate::{ClassRegistry, ObjId, ScipionError, SqliteMapper};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// File name of the runs database inside a project directory.
pub const PROJECT_DB: &str = "project.sqlite";

/// File name of the settings database inside a project directory.
pub const SETTINGS_DB: &str = "settings.sqlite";

/// An open project.
#[derive(Debug)]
pub struct Project {
    path: PathBuf,
    mapper: SqliteMapper,
    settings: ProjectSettings,
    settings_mapper: SqliteMapper,
}

impl Project {
    /// Create a new project in `dir` (created if missing).
    pub fn create(dir: impl AsRef<Path>, registry: ClassRegistry) -> Result<Self, ScipionError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| ScipionError::IoError(e.to_string()))?;
        let db = dir.join(PROJECT_DB);
        if db.exists() {
            return Err(ScipionError::IoError(format!(
                "project already exists: {}",
                dir.display()
            )));
        }
        let mapper = SqliteMapper::open(&db, with_protocol(registry))?;
        let mut settings = ProjectSettings::new();
        let settings_mapper = settings.write_to(dir.join(SETTINGS_DB))?;
        tracing::info!(path = %dir.display(), "created project");
        Ok(Self {
            path: dir.to_path_buf(),
            mapper,
            settings,
            settings_mapper,
        })
    }

    /// Open an existing project.
    pub fn open(dir: impl AsRef<Path>, registry: ClassRegistry) -> Result<Self, ScipionError> {
        let dir = dir.as_ref();
        let db = dir.join(PROJECT_DB);
        if !db.is_file() {
            return Err(ScipionError::IoError(format!(
                "not a project directory: {}",
                dir.display()
            )));
        }
        let mapper = SqliteMapper::open(&db, with_protocol(registry))?;
        let (settings, settings_mapper) = settings::load_settings(dir.join(SETTINGS_DB))?;
        tracing::debug!(path = %dir.display(), "opened project");
        Ok(Self {
            path: dir.to_path_buf(),
            mapper,
            settings,
            settings_mapper,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn mapper(&self) -> &SqliteMapper {
        &self.mapper
    }

    pub fn mapper_mut(&mut self) -> &mut SqliteMapper {
        &mut self.mapper
    }

    // =========================================================================
    // RUNS
    // =========================================================================

    /// Store a new run.
    pub fn add_run(&mut self, run: &mut Object) -> Result<ObjId, ScipionError> {
        self.check_protocol(run)?;
        let id = self.mapper.insert(run)?;
        tracing::info!(run = %id, class = run.class_name(), "added run");
        Ok(id)
    }

    /// Store the changes of a run.
    pub fn save_run(&mut self, run: &mut Object) -> Result<usize, ScipionError> {
        self.check_protocol(run)?;
        self.mapper.store(run)
    }

    /// Every run, ordered by id.
    pub fn runs(&self) -> Result<Vec<Object>, ScipionError> {
        Ok(self
            .mapper
            .select_by_class(PROTOCOL_CLASS, true)?
            .into_iter()
            .filter(|run| run.parent_id().is_none())
            .collect())
    }

    pub fn run(&self, id: ObjId) -> Result<Object, ScipionError> {
        let run = self
            .mapper
            .select_by_id(id)?
            .ok_or(ScipionError::ObjectNotFound(id))?;
        self.check_protocol(&run)?;
        Ok(run)
    }

    /// Change the label of a stored run.
    pub fn label_run(&mut self, id: ObjId, label: Option<String>) -> Result<(), ScipionError> {
        let mut run = self.run(id)?;
        run.set_label(label);
        self.mapper.store(&mut run)?;
        Ok(())
    }

    /// Delete a run with its tree and relations.
    pub fn delete_run(&mut self, id: ObjId) -> Result<usize, ScipionError> {
        self.run(id)?;
        let removed = self.mapper.delete_by_id(id)?;
        let selection: Vec<i64> = self
            .settings
            .run_selection()
            .into_iter()
            .filter(|&selected| selected != id.value())
            .collect();
        self.settings.set_run_selection(&selection)?;
        self.save_settings()?;
        tracing::info!(run = %id, rows = removed, "deleted run");
        Ok(removed)
    }

    fn check_protocol(&self, run: &Object) -> Result<(), ScipionError> {
        if self
            .mapper
            .registry()
            .is_subclass(run.class_name(), PROTOCOL_CLASS)
        {
            Ok(())
        } else {
            Err(ScipionError::TypeMismatch {
                expected: PROTOCOL_CLASS.to_string(),
                found: run.class_name().to_string(),
            })
        }
    }

    // =========================================================================
    // RUNS GRAPH
    // =========================================================================

    /// Build the dependency graph of the runs.
    ///
    /// Node names are run ids; a run without inputs hangs from the
    /// `PROJECT` root.
    pub fn runs_graph(&self) -> Result<Graph, ScipionError> {
        let runs = self.runs()?;
        let mut graph = Graph::new(PROJECT_NODE_NAME);
        let mut owner: BTreeMap<ObjId, ObjId> = BTreeMap::new();

        for run in &runs {
            let Some(id) = run.id() else { continue };
            let label = run.label().unwrap_or(run.class_name()).to_string();
            graph.create_node(&id.to_string(), Some(&label)).set_run(Some(id));
            let mut ids = Vec::new();
            collect_ids(run, &mut ids);
            owner.extend(ids.into_iter().map(|obj| (obj, id)));
        }

        for run in &runs {
            let Some(id) = run.id() else { continue };
            let mut targets = Vec::new();
            collect_pointers(run, &mut targets);
            let mut parents = BTreeSet::new();
            for target in targets {
                let parent = match owner.get(&target) {
                    Some(&parent) => Some(parent),
                    None => self.owner_by_name(target)?,
                };
                if let Some(parent) = parent.filter(|p| *p != id && owner.contains_key(p)) {
                    parents.insert(parent);
                }
            }
            if parents.is_empty() {
                graph.add_child(PROJECT_NODE_NAME, &id.to_string())?;
            }
            for parent in parents {
                graph.add_child(&parent.to_string(), &id.to_string())?;
            }
        }
        Ok(graph)
    }

    /// Top-level owner of a nested object, read from its `<id>.` name prefix.
    fn owner_by_name(&self, target: ObjId) -> Result<Option<ObjId>, ScipionError> {
        let Some(obj) = self.mapper.select_by_id(target)? else {
            tracing::warn!(target = %target, "pointer to a missing object");
            return Ok(None);
        };
        if obj.parent_id().is_none() {
            return Ok(Some(target));
        }
        Ok(obj
            .name()
            .split(NAME_SEPARATOR)
            .next()
            .and_then(|prefix| prefix.parse::<i64>().ok())
            .map(ObjId))
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    #[must_use]
    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ProjectSettings {
        &mut self.settings
    }

    /// Store settings changes; returns rows written.
    pub fn save_settings(&mut self) -> Result<usize, ScipionError> {
        self.settings.save(&mut self.settings_mapper)
    }

    /// Place graph nodes lacking a position and save the settings.
    pub fn sync_layout(&mut self) -> Result<usize, ScipionError> {
        let graph = self.runs_graph()?;
        let added = settings::layout(&mut self.settings, &graph)?;
        if added > 0 {
            self.save_settings()?;
        }
        Ok(added)
    }
}

/// Registry extended with the `Protocol` base class.
fn with_protocol(mut registry: ClassRegistry) -> ClassRegistry {
    if !registry.contains(PROTOCOL_CLASS) {
        registry.register(PROTOCOL_CLASS, ClassKind::Composite, Some("OrderedObject"));
    }
    registry
}

fn collect_ids(obj: &Object, out: &mut Vec<ObjId>) {
    out.extend(obj.id());
    for (_, attr) in obj.attributes() {
        collect_ids(attr, out);
    }
    for item in obj.items() {
        collect_ids(item, out);
    }
}

fn collect_pointers(obj: &Object, out: &mut Vec<ObjId>) {
    if obj.kind() == ClassKind::Pointer {
        out.extend(obj.pointer_target());
    }
    for (_, attr) in obj.attributes() {
        collect_pointers(attr, out);
    }
    for item in obj.items() {
        collect_pointers(item, out);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::NodeConfig;

    fn registry() -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        registry.register("Protocol", ClassKind::Composite, Some("OrderedObject"));
        registry.register("ProtImport", ClassKind::Composite, Some("Protocol"));
        registry.register("ProtAlign", ClassKind::Composite, Some("Protocol"));
        registry
    }

    fn import_run() -> Object {
        Object::with_class("ProtImport", ClassKind::Composite).with_attr(
            "outputMovies",
            Object::ordered().with_attr("size", Object::integer(12)),
        )
    }

    fn align_run(input: ObjId, extended: Option<&str>) -> Object {
        let mut pointer = Object::pointer(Some(input));
        if let Some(path) = extended {
            pointer.set_extended(path).expect("extend");
        }
        Object::with_class("ProtAlign", ClassKind::Composite).with_attr("inputMovies", pointer)
    }

    #[test]
    fn create_then_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut project = Project::create(dir.path(), registry()).expect("create");
        project.add_run(&mut import_run()).expect("run");
        drop(project);

        let project = Project::open(dir.path(), registry()).expect("open");
        assert_eq!(project.runs().expect("runs").len(), 1);
        assert!(Project::create(dir.path(), registry()).is_err());
    }

    #[test]
    fn open_missing_project_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            Project::open(dir.path(), registry()),
            Err(ScipionError::IoError(_))
        ));
    }

    #[test]
    fn non_protocol_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut project = Project::create(dir.path(), registry()).expect("create");
        let result = project.add_run(&mut Object::ordered());
        assert!(matches!(result, Err(ScipionError::TypeMismatch { .. })));
    }

    #[test]
    fn graph_links_runs_through_pointers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut project = Project::create(dir.path(), registry()).expect("create");
        let mut import = import_run();
        let import_id = project.add_run(&mut import).expect("import");
        let output = import.attr("outputMovies").and_then(Object::id).expect("output id");
        let align_id = project
            .add_run(&mut align_run(output, Some("size")))
            .expect("align");
        let direct_id = project
            .add_run(&mut align_run(import_id, None))
            .expect("direct");

        let graph = project.runs_graph().expect("graph");

        let roots: Vec<_> = graph.children(PROJECT_NODE_NAME).expect("roots").iter().map(|n| n.name().to_string()).collect();
        assert_eq!(roots, vec![import_id.to_string()]);
        let children: Vec<_> = graph
            .children(&import_id.to_string())
            .expect("children")
            .iter()
            .map(|n| n.run())
            .collect();
        assert_eq!(children, vec![Some(align_id), Some(direct_id)]);
    }

    #[test]
    fn sync_layout_persists_positions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut project = Project::create(dir.path(), registry()).expect("create");
        let import_id = project.add_run(&mut import_run()).expect("import");

        assert_eq!(project.sync_layout().expect("layout"), 2);
        drop(project);

        let project = Project::open(dir.path(), registry()).expect("open");
        let node = project
            .settings()
            .node_by_id(import_id.value())
            .expect("node");
        assert_eq!(node.map(|n: NodeConfig| n.position()), Some((250, 50)));
    }

    #[test]
    fn delete_run_clears_selection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut project = Project::create(dir.path(), registry()).expect("create");
        let id = project.add_run(&mut import_run()).expect("import");
        project
            .settings_mut()
            .set_run_selection(&[id.value()])
            .expect("select");

        project.delete_run(id).expect("delete");

        assert!(project.runs().expect("runs").is_empty());
        assert!(project.settings().run_selection().is_empty());
        assert!(project.delete_run(id).is_err());
    }

    #[test]
    fn label_run_is_stored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut project = Project::create(dir.path(), registry()).expect("create");
        let id = project.add_run(&mut import_run()).expect("import");

        project
            .label_run(id, Some("import movies".to_string()))
            .expect("label");

        assert_eq!(project.run(id).expect("run").label(), Some("import movies"));
    }
}
