//! # Project Settings
//!
//! Per-project state kept in its own settings database: display
//! configuration, the selected protocol view, graph node positions, run
//! selection and project lifetime limits.
//!
//! A settings database holds exactly one `ProjectSettings` tree.

mod layout;
mod node;

pub use layout::layout;
pub use node::{NODE_CONFIG_CLASS, NODE_CONFIG_LIST_CLASS, NodeConfig, NodeConfigList};

use crate::object::{ClassKind, Object, Persistable, Value};
use crate::primitives::CREATION_FORMAT;
use crate::{ClassRegistry, ScipionError, SqliteMapper};
use std::collections::BTreeMap;
use std::path::Path;

pub const PROJECT_SETTINGS_CLASS: &str = "ProjectSettings";
pub const PROJECT_CONFIG_CLASS: &str = "ProjectConfig";

pub const DEFAULT_ICON: &str = "scipion_bn.xbm";
pub const DEFAULT_LOGO: &str = "scipion_logo_small.png";

/// Runs view showing the dependency graph.
pub const RUNS_VIEW_GRAPH: i64 = 1;

const CONFIG: &str = "config";
const PROTOCOL_VIEW: &str = "currentProtocolsView";
const NODE_LIST: &str = "nodeList";
const RUNS_VIEW: &str = "runsView";
const READ_ONLY: &str = "readOnly";
const RUN_SELECTION: &str = "runSelection";
const CREATION_TIME: &str = "creationTime";
const LIFE_TIME: &str = "lifeTime";
const DISK_QUOTA: &str = "diskQuota";

/// Register every settings class.
pub fn register_classes(registry: &mut ClassRegistry) {
    ProjectSettings::register(registry);
    registry.register(PROJECT_CONFIG_CLASS, ClassKind::Composite, Some("OrderedObject"));
    registry.register(NODE_CONFIG_CLASS, ClassKind::String, Some("Scalar"));
    registry.register(NODE_CONFIG_LIST_CLASS, ClassKind::List, Some("List"));
}

/// A registry with the built-in and settings classes.
#[must_use]
pub fn settings_registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    register_classes(&mut registry);
    registry
}

// =============================================================================
// PROJECT CONFIG
// =============================================================================

/// Display configuration of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub icon: String,
    pub logo: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            icon: DEFAULT_ICON.to_string(),
            logo: DEFAULT_LOGO.to_string(),
        }
    }
}

impl ProjectConfig {
    fn to_object(&self) -> Object {
        Object::with_class(PROJECT_CONFIG_CLASS, ClassKind::Composite)
            .with_attr("icon", Object::string(&self.icon))
            .with_attr("logo", Object::string(&self.logo))
    }

    fn from_object(obj: &Object) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: String| {
            obj.attr(key)
                .and_then(Object::as_str)
                .map(str::to_string)
                .unwrap_or(fallback)
        };
        Self {
            icon: read("icon", defaults.icon),
            logo: read("logo", defaults.logo),
        }
    }
}

// =============================================================================
// PROJECT SETTINGS
// =============================================================================

/// Settings of one project, backed by an object tree.
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    object: Object,
    node_index: BTreeMap<i64, usize>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectSettings {
    /// Fresh settings with every default in place.
    #[must_use]
    pub fn new() -> Self {
        let mut object = Object::with_class(PROJECT_SETTINGS_CLASS, ClassKind::Composite)
            .named(PROJECT_SETTINGS_CLASS);
        fill_defaults(&mut object);
        Self {
            object,
            node_index: BTreeMap::new(),
        }
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Load the single settings tree stored in `mapper`.
    pub fn load(mapper: &SqliteMapper) -> Result<Self, ScipionError> {
        let mut found = mapper.select_by_class(PROJECT_SETTINGS_CLASS, false)?;
        match found.len() {
            1 => found
                .pop()
                .ok_or_else(|| ScipionError::SettingsError("settings vanished".to_string()))
                .and_then(Self::from_object),
            0 => Err(ScipionError::SettingsError(
                "no ProjectSettings stored".to_string(),
            )),
            n => Err(ScipionError::SettingsError(format!(
                "{} ProjectSettings stored, expected exactly one",
                n
            ))),
        }
    }

    /// Replace the whole database content with these settings.
    pub fn write(&mut self, mapper: &mut SqliteMapper) -> Result<(), ScipionError> {
        self.object.set_name(PROJECT_SETTINGS_CLASS);
        mapper.delete_all()?;
        if self.object.has_id() {
            self.object = self.object.detached_copy();
        }
        mapper.insert(&mut self.object)?;
        tracing::debug!(rows = self.object.tree_len(), "wrote project settings");
        Ok(())
    }

    /// Create (or overwrite) a settings database at `path`.
    pub fn write_to(&mut self, path: impl AsRef<Path>) -> Result<SqliteMapper, ScipionError> {
        let mut mapper = SqliteMapper::open(path, settings_registry())?;
        self.write(&mut mapper)?;
        Ok(mapper)
    }

    /// Store only what changed since the last load or save.
    pub fn save(&mut self, mapper: &mut SqliteMapper) -> Result<usize, ScipionError> {
        mapper.store(&mut self.object)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.object.is_dirty_tree()
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn config(&self) -> ProjectConfig {
        self.object
            .attr(CONFIG)
            .map(ProjectConfig::from_object)
            .unwrap_or_default()
    }

    pub fn set_config(&mut self, config: &ProjectConfig) -> Result<(), ScipionError> {
        let obj = self.attr_mut(CONFIG)?;
        for (key, value) in [("icon", &config.icon), ("logo", &config.logo)] {
            match obj.attr_mut(key) {
                Some(attr) => attr.set_str(value.as_str())?,
                None => obj.set_attr(key, Object::string(value.as_str())),
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn protocol_view(&self) -> Option<&str> {
        self.object.attr(PROTOCOL_VIEW).and_then(Object::as_str)
    }

    pub fn set_protocol_view(&mut self, view: &str) -> Result<(), ScipionError> {
        self.attr_mut(PROTOCOL_VIEW)?.set_str(view)
    }

    #[must_use]
    pub fn runs_view(&self) -> i64 {
        self.int(RUNS_VIEW).unwrap_or(RUNS_VIEW_GRAPH)
    }

    pub fn set_runs_view(&mut self, view: i64) -> Result<(), ScipionError> {
        self.attr_mut(RUNS_VIEW)?.set_int(view)
    }

    #[must_use]
    pub fn read_only(&self) -> bool {
        self.object
            .attr(READ_ONLY)
            .and_then(Object::as_bool)
            .unwrap_or(false)
    }

    pub fn set_read_only(&mut self, read_only: bool) -> Result<(), ScipionError> {
        self.attr_mut(READ_ONLY)?.set_bool(read_only)
    }

    /// Ids of the selected runs.
    #[must_use]
    pub fn run_selection(&self) -> Vec<i64> {
        self.object
            .attr(RUN_SELECTION)
            .map(Object::as_csv_ints)
            .unwrap_or_default()
    }

    pub fn set_run_selection(&mut self, runs: &[i64]) -> Result<(), ScipionError> {
        let values = runs.iter().map(i64::to_string).collect();
        self.attr_mut(RUN_SELECTION)?
            .set_value(Value::CsvList(values))
    }

    #[must_use]
    pub fn creation_time(&self) -> Option<&str> {
        self.object.attr(CREATION_TIME).and_then(Object::as_str)
    }

    pub fn set_creation_time(&mut self, time: &str) -> Result<(), ScipionError> {
        self.attr_mut(CREATION_TIME)?.set_str(time)
    }

    /// Days the project stays active; `None` never expires.
    #[must_use]
    pub fn life_time(&self) -> Option<i64> {
        self.int(LIFE_TIME)
    }

    pub fn set_life_time(&mut self, days: Option<i64>) -> Result<(), ScipionError> {
        self.set_optional_int(LIFE_TIME, days)
    }

    /// Disk quota in GB; `None` is unlimited.
    #[must_use]
    pub fn disk_quota(&self) -> Option<i64> {
        self.int(DISK_QUOTA)
    }

    pub fn set_disk_quota(&mut self, gigabytes: Option<i64>) -> Result<(), ScipionError> {
        self.set_optional_int(DISK_QUOTA, gigabytes)
    }

    // =========================================================================
    // NODES
    // =========================================================================

    /// Mutable view of the node list.
    pub fn node_list(&mut self) -> Result<NodeConfigList<'_>, ScipionError> {
        let list = self
            .object
            .attr_mut(NODE_LIST)
            .ok_or_else(|| ScipionError::MissingAttribute(NODE_LIST.to_string()))?;
        Ok(NodeConfigList::new(list, &mut self.node_index))
    }

    /// Every stored node configuration, in list order.
    pub fn nodes(&self) -> Result<Vec<NodeConfig>, ScipionError> {
        self.object
            .attr(NODE_LIST)
            .map(|list| list.items().iter().map(NodeConfig::from_object).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    pub fn node_by_id(&self, id: i64) -> Result<Option<NodeConfig>, ScipionError> {
        match self.object.attr(NODE_LIST) {
            Some(list) => node::lookup(list, &self.node_index, id),
            None => Ok(None),
        }
    }

    pub fn add_node(&mut self, node: NodeConfig) -> Result<(), ScipionError> {
        self.node_list()?.add_node(node)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn int(&self, key: &str) -> Option<i64> {
        self.object.attr(key).and_then(Object::as_int)
    }

    fn set_optional_int(&mut self, key: &str, value: Option<i64>) -> Result<(), ScipionError> {
        let attr = self.attr_mut(key)?;
        match value {
            Some(v) => attr.set_int(v),
            None => attr.clear_value(),
        }
    }

    fn attr_mut(&mut self, key: &str) -> Result<&mut Object, ScipionError> {
        self.object
            .attr_mut(key)
            .ok_or_else(|| ScipionError::MissingAttribute(key.to_string()))
    }
}

impl Persistable for ProjectSettings {
    const CLASS_NAME: &'static str = PROJECT_SETTINGS_CLASS;
    const KIND: ClassKind = ClassKind::Composite;
    const BASE_CLASS: &'static str = "OrderedObject";

    fn as_object(&self) -> &Object {
        &self.object
    }

    fn as_object_mut(&mut self) -> &mut Object {
        &mut self.object
    }

    /// Attributes missing from older databases are added with defaults
    /// and written on the next save.
    fn from_object(mut object: Object) -> Result<Self, ScipionError> {
        Self::check_class(&object)?;
        let added = fill_defaults(&mut object);
        if added > 0 {
            tracing::info!(added, "completed settings with default attributes");
        }
        let node_index = match object.attr(NODE_LIST) {
            Some(list) => node::build_index(list)?,
            None => BTreeMap::new(),
        };
        Ok(Self { object, node_index })
    }
}

/// Add every missing settings attribute; returns how many were added.
fn fill_defaults(object: &mut Object) -> usize {
    let now = chrono::Local::now().format(CREATION_FORMAT).to_string();
    let defaults: [(&str, fn(&str) -> Object); 9] = [
        (CONFIG, |_| ProjectConfig::default().to_object()),
        (PROTOCOL_VIEW, |_| Object::null_of(ClassKind::String)),
        (NODE_LIST, |_| node::empty_list()),
        (RUNS_VIEW, |_| Object::integer(RUNS_VIEW_GRAPH)),
        (READ_ONLY, |_| Object::boolean(false)),
        (RUN_SELECTION, |_| Object::csv_list(Vec::<i64>::new())),
        (CREATION_TIME, |now| Object::string(now)),
        (LIFE_TIME, |_| Object::null_of(ClassKind::Integer)),
        (DISK_QUOTA, |_| Object::null_of(ClassKind::Integer)),
    ];
    let mut added = 0usize;
    for (key, make) in defaults {
        if object.attr(key).is_none() {
            object.set_attr(key, make(&now));
            added = added.saturating_add(1);
        }
    }
    added
}

/// Open the settings database at `path` and load its settings.
pub fn load_settings(
    path: impl AsRef<Path>,
) -> Result<(ProjectSettings, SqliteMapper), ScipionError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ScipionError::SettingsError(format!(
            "settings database not found: {}",
            path.display()
        )));
    }
    let mapper = SqliteMapper::open(path, settings_registry())?;
    let settings = ProjectSettings::load(&mapper)?;
    Ok((settings, mapper))
}

// =============================================================================
// TESTS
// =============================================================================
