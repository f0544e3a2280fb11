//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use scipion_core::primitives::PROJECT_NODE_ID;
use scipion_core::{
    CanonicalStore, ClassKind, ClassRegistry, NodeConfig, ObjId, Object, PROJECT_DB, Project,
    SETTINGS_DB, ScipionError, canonical_checksum, canonical_crypto_hash, export_canonical,
    import_canonical,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for import (500 MB).
///
/// Canonical exports of large projects stay well below this.
pub const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), ScipionError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ScipionError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(ScipionError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate an input file path.
///
/// Canonicalizes the path (resolving symlinks and "..") and requires a
/// regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, ScipionError> {
    let canonical = path.canonicalize().map_err(|e| {
        ScipionError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(ScipionError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Validate an output path: its parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, ScipionError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        ScipionError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(ScipionError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| ScipionError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// CONTEXT
// =============================================================================

/// What every command needs: where the project is and how to read it.
#[derive(Debug, Clone)]
pub struct Context {
    pub project: PathBuf,
    pub registry: ClassRegistry,
    pub json_mode: bool,
}

impl Context {
    #[must_use]
    pub fn new(project: impl Into<PathBuf>, registry: ClassRegistry, json_mode: bool) -> Self {
        Self {
            project: project.into(),
            registry,
            json_mode,
        }
    }

    fn open(&self) -> Result<Project, ScipionError> {
        Project::open(&self.project, self.registry.clone())
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create a new project.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), ScipionError> {
    let db = ctx.project.join(PROJECT_DB);
    if db.exists() {
        if !force {
            return Err(ScipionError::IoError(
                "Project already exists. Use --force to overwrite.".to_string(),
            ));
        }
        let files = [PROJECT_DB, SETTINGS_DB]
            .into_iter()
            .flat_map(|db| ["", "-wal", "-shm"].map(|suffix| format!("{}{}", db, suffix)));
        for file in files {
            let path = ctx.project.join(file);
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| {
                    ScipionError::IoError(format!("Remove '{}': {}", path.display(), e))
                })?;
            }
        }
        tracing::warn!(path = %ctx.project.display(), "replacing existing project");
    }

    let project = Project::create(&ctx.project, ctx.registry.clone())?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "project": project.path().to_string_lossy(),
            "created": project.settings().creation_time(),
        }));
    } else {
        println!("Initialized new project at {:?}", project.path());
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show project status.
pub fn cmd_status(ctx: &Context) -> Result<(), ScipionError> {
    let project = ctx.open()?;
    let runs = project.runs()?;
    let objects = project.mapper().count()?;
    let settings = project.settings();
    let nodes = settings.nodes()?;
    let config = settings.config();

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "project": project.path().to_string_lossy(),
            "run_count": runs.len(),
            "object_count": objects,
            "node_count": nodes.len(),
            "runs_view": settings.runs_view(),
            "read_only": settings.read_only(),
            "run_selection": settings.run_selection(),
            "creation_time": settings.creation_time(),
            "life_time": settings.life_time(),
            "disk_quota": settings.disk_quota(),
            "icon": config.icon,
            "logo": config.logo
        }));
        return Ok(());
    }

    println!("Scipion Project Status");
    println!("======================");
    println!("Project:  {:?}", project.path());
    println!("Created:  {}", settings.creation_time().unwrap_or("-"));
    println!();
    println!("Runs:      {}", runs.len());
    println!("Objects:   {}", objects);
    println!("Nodes:     {}", nodes.len());
    println!("Runs view: {}", settings.runs_view());
    println!("Read only: {}", settings.read_only());
    println!("Selected:  {:?}", settings.run_selection());

    Ok(())
}

// =============================================================================
// LIST / SHOW COMMANDS
// =============================================================================

/// List runs, or every object of `class`.
pub fn cmd_list(ctx: &Context, class: Option<&str>, subclasses: bool) -> Result<(), ScipionError> {
    let project = ctx.open()?;
    let objects = match class {
        None => project.runs()?,
        Some(class) => {
            if !project.mapper().registry().contains(class) {
                return Err(ScipionError::UnknownClass(class.to_string()));
            }
            project.mapper().select_by_class(class, subclasses)?
        }
    };

    if ctx.json_mode {
        let rows: Vec<serde_json::Value> = objects
            .iter()
            .map(|obj| {
                serde_json::json!({
                    "id": obj.id().map(ObjId::value),
                    "name": obj.name(),
                    "class": obj.class_name(),
                    "label": obj.label()
                })
            })
            .collect();
        print_json(&serde_json::Value::Array(rows));
        return Ok(());
    }

    for obj in &objects {
        println!(
            "{:>6}  {:<24} {:<20} {}",
            obj.id().map(|id| id.to_string()).unwrap_or_default(),
            obj.class_name(),
            obj.name(),
            obj.label().unwrap_or("")
        );
    }
    println!("{} object(s)", objects.len());

    Ok(())
}

/// Print a stored object tree.
pub fn cmd_show(ctx: &Context, id: i64) -> Result<(), ScipionError> {
    let project = ctx.open()?;
    let id = ObjId(id);
    let obj = project
        .mapper()
        .select_by_id(id)?
        .ok_or(ScipionError::ObjectNotFound(id))?;

    if ctx.json_mode {
        print_json(&object_json(&obj));
        return Ok(());
    }

    print_tree(&obj, obj.name(), 0);
    Ok(())
}

/// JSON rendering of an object and its descendants.
pub fn object_json(obj: &Object) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    out.insert("id".into(), obj.id().map(ObjId::value).into());
    out.insert("name".into(), obj.name().into());
    out.insert("class".into(), obj.class_name().into());
    if let Some(label) = obj.label() {
        out.insert("label".into(), label.into());
    }
    if obj.kind().has_value() {
        out.insert("value".into(), obj.value().to_db().into());
    }
    let attributes: serde_json::Map<String, serde_json::Value> = obj
        .attributes()
        .map(|(key, attr)| (key.to_string(), object_json(attr)))
        .collect();
    if !attributes.is_empty() {
        out.insert("attributes".into(), attributes.into());
    }
    if obj.kind() == ClassKind::List {
        let items: Vec<serde_json::Value> = obj.items().iter().map(object_json).collect();
        out.insert("items".into(), items.into());
    }
    serde_json::Value::Object(out)
}

fn print_tree(obj: &Object, key: &str, depth: usize) {
    let indent = "  ".repeat(depth);
    let id = obj.id().map(|id| id.to_string()).unwrap_or_default();
    match obj.value().to_db() {
        Some(value) if obj.kind().has_value() => {
            println!("{}{} [{}] ({}) = {}", indent, key, id, obj.class_name(), value);
        }
        _ => println!("{}{} [{}] ({})", indent, key, id, obj.class_name()),
    }
    for (name, attr) in obj.attributes() {
        print_tree(attr, name, depth.saturating_add(1));
    }
    for (index, item) in obj.items().iter().enumerate() {
        print_tree(item, &format!("[{}]", index), depth.saturating_add(1));
    }
}

// =============================================================================
// GRAPH COMMANDS
// =============================================================================

/// Print the runs graph.
pub fn cmd_graph(ctx: &Context, dot: bool) -> Result<(), ScipionError> {
    let project = ctx.open()?;
    let graph = project.runs_graph()?;

    if dot {
        print!("{}", graph.to_dot());
        return Ok(());
    }

    let levels = graph.levels();
    if ctx.json_mode {
        let nodes: Vec<serde_json::Value> = levels
            .iter()
            .filter_map(|(name, depth)| graph.get_node(name).map(|node| (node, depth)))
            .map(|(node, depth)| {
                serde_json::json!({
                    "name": node.name(),
                    "label": node.label(),
                    "run": node.run().map(ObjId::value),
                    "level": depth,
                    "children": node.child_names().collect::<Vec<_>>()
                })
            })
            .collect();
        print_json(&serde_json::Value::Array(nodes));
        return Ok(());
    }

    for (name, depth) in &levels {
        let label = graph.get_node(name).map_or(*name, |node| node.label());
        println!("{}{} {}", "  ".repeat(*depth), name, label);
    }

    Ok(())
}

/// Place nodes without a stored position.
pub fn cmd_layout(ctx: &Context) -> Result<(), ScipionError> {
    let mut project = ctx.open()?;
    let added = project.sync_layout()?;

    if ctx.json_mode {
        print_json(&serde_json::json!({ "placed": added }));
    } else {
        println!("Placed {} node(s)", added);
    }
    Ok(())
}

/// Edit or create the configuration of one graph node.
pub fn cmd_node(
    ctx: &Context,
    id: i64,
    x: Option<i64>,
    y: Option<i64>,
    selected: Option<bool>,
) -> Result<(), ScipionError> {
    let mut project = ctx.open()?;
    if id != PROJECT_NODE_ID {
        project.run(ObjId(id))?;
    }

    let settings = project.settings_mut();
    let existing = settings.node_by_id(id)?;
    let mut node = existing.unwrap_or_else(|| NodeConfig::new(id));
    let (old_x, old_y) = node.position();
    node.set_position(x.unwrap_or(old_x), y.unwrap_or(old_y));
    if let Some(selected) = selected {
        node.selected = selected;
    }

    if existing.is_some() {
        settings.node_list()?.update_node(&node)?;
    } else {
        settings.add_node(node)?;
    }
    project.save_settings()?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "id": node.id,
            "x": node.x,
            "y": node.y,
            "selected": node.selected,
            "expanded": node.expanded
        }));
    } else {
        println!("Node {} at ({}, {})", node.id, node.x, node.y);
    }
    Ok(())
}

// =============================================================================
// RUN COMMANDS
// =============================================================================

/// Set or clear a run label.
pub fn cmd_label(ctx: &Context, id: i64, label: Option<String>) -> Result<(), ScipionError> {
    let mut project = ctx.open()?;
    project.label_run(ObjId(id), label.clone())?;

    if ctx.json_mode {
        print_json(&serde_json::json!({ "id": id, "label": label }));
    } else {
        match label {
            Some(label) => println!("Run {} labelled {:?}", id, label),
            None => println!("Run {} label cleared", id),
        }
    }
    Ok(())
}

/// Delete a run.
pub fn cmd_delete(ctx: &Context, id: i64) -> Result<(), ScipionError> {
    let mut project = ctx.open()?;
    let removed = project.delete_run(ObjId(id))?;

    if ctx.json_mode {
        print_json(&serde_json::json!({ "id": id, "rows_removed": removed }));
    } else {
        println!("Deleted run {} ({} rows)", id, removed);
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT / HASH COMMANDS
// =============================================================================

/// Export the project store in canonical format.
pub fn cmd_export(ctx: &Context, output: &Path) -> Result<(), ScipionError> {
    let validated_output = validate_output_path(output)?;

    let project = ctx.open()?;
    let data = export_canonical(project.mapper())?;
    let checksum = canonical_checksum(project.mapper())?;

    std::fs::write(&validated_output, &data)
        .map_err(|e| ScipionError::IoError(format!("Write file: {}", e)))?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "output": validated_output.to_string_lossy(),
            "bytes": data.len(),
            "checksum": checksum
        }));
    } else {
        println!("Checksum: {}", checksum);
        println!("Exported {} bytes to {:?}", data.len(), validated_output);
    }
    Ok(())
}

/// Import a canonical export into the (empty) project store.
pub fn cmd_import(ctx: &Context, input: &Path) -> Result<(), ScipionError> {
    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;

    let data = std::fs::read(&validated_path)
        .map_err(|e| ScipionError::IoError(format!("Read file: {}", e)))?;

    // Header and checksum are checked before touching the project.
    let store = import_canonical(&data)?;
    let mut project = ctx.open()?;
    project
        .mapper_mut()
        .restore_rows(&store.objects, &store.relations)?;
    let restored = store.objects.len();
    if CanonicalStore::from_mapper(project.mapper())? != store {
        return Err(ScipionError::SerializationError(format!(
            "Imported store does not match the export; the project at {} now holds the \
             imported rows and should be re-initialised",
            ctx.project.display()
        )));
    }

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "objects": restored,
            "relations": store.relations.len()
        }));
    } else {
        println!(
            "Imported {} objects, {} relations",
            restored,
            store.relations.len()
        );
    }
    Ok(())
}

/// Print the canonical checksum and BLAKE3 hash of the project store.
pub fn cmd_hash(ctx: &Context) -> Result<(), ScipionError> {
    let project = ctx.open()?;
    let checksum = canonical_checksum(project.mapper())?;
    let hash = canonical_crypto_hash(project.mapper())?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "checksum": checksum,
            "blake3": hash
        }));
    } else {
        println!("Checksum: {}", checksum);
        println!("BLAKE3:   {}", hash);
    }
    Ok(())
}
