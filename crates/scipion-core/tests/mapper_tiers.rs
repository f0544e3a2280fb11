//! # Store Validation Tiers (T0-T3)
//!
//! ## Tiers
//! - T0: Value codec
//! - T1: Tree persistence
//! - T2: Incremental writes
//! - T3: On-disk projects and settings

use scipion_core::{
    ClassKind, ClassRegistry, Object, ObjId, ScipionError, SqliteMapper, Value,
};

fn mapper() -> SqliteMapper {
    SqliteMapper::open_in_memory(ClassRegistry::new()).expect("open")
}

// =============================================================================
// TIER T0: VALUE CODEC
// =============================================================================

mod t0_value_codec {
    use super::*;

    /// T0.1: Every scalar kind survives a store/load cycle.
    #[test]
    fn scalars_round_trip() {
        let mut m = mapper();
        let mut obj = Object::ordered()
            .with_attr("i", Object::integer(-42))
            .with_attr("f", Object::float(1.5))
            .with_attr("b", Object::boolean(true))
            .with_attr("s", Object::string("a, b"))
            .with_attr("csv", Object::csv_list([1, 2, 3]))
            .with_attr("none", Object::null_of(ClassKind::Integer));
        let id = m.insert(&mut obj).expect("insert");

        let loaded = m.select_by_id(id).expect("select").expect("present");

        assert_eq!(loaded.attr("i").and_then(Object::as_int), Some(-42));
        assert_eq!(loaded.attr("f").map(|o| o.value().clone()), Some(Value::Float(1.5)));
        assert_eq!(loaded.attr("b").and_then(Object::as_bool), Some(true));
        assert_eq!(loaded.attr("s").and_then(Object::as_str), Some("a, b"));
        assert_eq!(loaded.attr("csv").map(Object::as_csv_ints), Some(vec![1, 2, 3]));
        assert!(loaded.attr("none").is_some_and(|o| !o.has_value()));
    }

    /// T0.2: Empty strings are kept apart from null.
    #[test]
    fn empty_string_is_not_null() {
        let mut m = mapper();
        let mut obj = Object::ordered()
            .with_attr("empty", Object::string(""))
            .with_attr("null", Object::null_of(ClassKind::String));
        let id = m.insert(&mut obj).expect("insert");

        let loaded = m.select_by_id(id).expect("select").expect("present");

        assert_eq!(loaded.attr("empty").and_then(Object::as_str), Some(""));
        assert!(loaded.attr("null").is_some_and(|o| !o.has_value()));
    }

    /// T0.4: CsvList elements are trimmed on load; an empty element is lost.
    #[test]
    fn csv_list_elements_are_normalised() {
        let mut m = mapper();
        let mut obj = Object::ordered()
            .with_attr("padded", Object::csv_list([" a ", "b"]))
            .with_attr("blank", Object::csv_list([""]));
        let id = m.insert(&mut obj).expect("insert");

        let loaded = m.select_by_id(id).expect("select").expect("present");

        let padded = loaded.attr("padded").and_then(Object::as_csv).expect("csv");
        assert_eq!(padded, ["a".to_string(), "b".to_string()]);
        assert_eq!(loaded.attr("blank").and_then(Object::as_csv).map(<[String]>::len), Some(0));
    }

    /// T0.3: A malformed stored value is reported, not guessed.
    #[test]
    fn malformed_value_is_invalid() {
        let result = ClassKind::Integer.parse_value("Integer", Some("twelve"));
        assert!(matches!(result, Err(ScipionError::InvalidValue { .. })));
    }
}

// =============================================================================
// TIER T1: TREE PERSISTENCE
// =============================================================================

mod t1_tree_persistence {
    use super::*;

    fn nested() -> Object {
        let mut movies = Object::list();
        for i in 0..12 {
            movies
                .push(Object::ordered().with_attr("index", Object::integer(i)))
                .expect("push");
        }
        Object::ordered()
            .named("set")
            .with_attr("movies", movies)
            .with_attr(
                "acquisition",
                Object::ordered()
                    .with_attr("voltage", Object::float(300.0))
                    .with_attr("magnification", Object::integer(50000)),
            )
    }

    /// T1.1: Deep trees load back structurally equal.
    #[test]
    fn nested_tree_round_trips() {
        let mut m = mapper();
        let mut obj = nested();
        let id = m.insert(&mut obj).expect("insert");

        let loaded = m.select_by_id(id).expect("select").expect("present");

        assert!(loaded.equal_attributes(&obj));
        assert_eq!(m.count().expect("count"), obj.tree_len());
    }

    /// T1.2: List order survives more than nine items.
    #[test]
    fn list_order_is_preserved() {
        let mut m = mapper();
        let id = m.insert(&mut nested()).expect("insert");

        let loaded = m.select_by_id(id).expect("select").expect("present");
        let order: Vec<_> = loaded
            .attr("movies")
            .expect("movies")
            .items()
            .iter()
            .filter_map(|item| item.attr("index").and_then(Object::as_int))
            .collect();

        assert_eq!(order, (0..12).collect::<Vec<_>>());
    }

    /// T1.3: Nested objects are reachable by id with their own subtree.
    #[test]
    fn nested_object_selects_its_subtree() {
        let mut m = mapper();
        let mut obj = nested();
        m.insert(&mut obj).expect("insert");
        let acq_id = obj.attr("acquisition").and_then(Object::id).expect("id");

        let acq = m.select_by_id(acq_id).expect("select").expect("present");

        assert_eq!(acq.attr("magnification").and_then(Object::as_int), Some(50000));
        assert_eq!(acq.attr_names().count(), 2);
    }

    /// T1.4: Siblings with shared name prefixes do not leak into each other.
    #[test]
    fn prefix_does_not_match_longer_ids() {
        let mut m = mapper();
        let mut first = Object::ordered().with_attr("x", Object::integer(1));
        m.insert(&mut first).expect("insert");
        // Fill ids so a later top-level object gets id 1x.
        for _ in 0..8 {
            m.insert(&mut Object::integer(0)).expect("filler");
        }
        let mut later = Object::ordered().with_attr("y", Object::integer(2));
        let later_id = m.insert(&mut later).expect("insert");
        assert!(later_id.value() >= 10);

        let loaded = m.select_by_id(ObjId(1)).expect("select").expect("present");
        assert_eq!(loaded.attr_names().collect::<Vec<_>>(), vec!["x"]);
    }

    /// T1.5: Subclass queries see registered subclasses only when asked.
    #[test]
    fn select_by_class_with_subclasses() {
        let mut registry = ClassRegistry::new();
        registry.register("Protocol", ClassKind::Composite, Some("OrderedObject"));
        registry.register("ProtImport", ClassKind::Composite, Some("Protocol"));
        let mut m = SqliteMapper::open_in_memory(registry).expect("open");
        m.insert(&mut Object::with_class("Protocol", ClassKind::Composite))
            .expect("insert");
        m.insert(&mut Object::with_class("ProtImport", ClassKind::Composite))
            .expect("insert");

        assert_eq!(m.select_by_class("Protocol", false).expect("select").len(), 1);
        assert_eq!(m.select_by_class("Protocol", true).expect("select").len(), 2);
    }
}

// =============================================================================
// TIER T2: INCREMENTAL WRITES
// =============================================================================

mod t2_incremental_writes {
    use super::*;

    /// T2.1: Only changed rows are written.
    #[test]
    fn dirty_rows_only() {
        let mut m = mapper();
        let mut obj = Object::ordered()
            .with_attr("a", Object::integer(1))
            .with_attr("b", Object::integer(2))
            .with_attr("c", Object::integer(3));
        m.insert(&mut obj).expect("insert");

        obj.attr_mut("b").expect("b").set_int(20).expect("set");
        obj.attr_mut("c").expect("c").set_int(3).expect("same value");

        assert!(obj.is_dirty_tree());
        assert_eq!(m.store(&mut obj).expect("store"), 1);
        assert!(!obj.is_dirty_tree());
    }

    /// T2.2: New attributes are inserted into an existing tree.
    #[test]
    fn added_attribute_is_inserted() {
        let mut m = mapper();
        let mut obj = Object::ordered().with_attr("a", Object::integer(1));
        let id = m.insert(&mut obj).expect("insert");

        obj.set_attr("b", Object::string("new"));
        assert_eq!(m.store(&mut obj).expect("store"), 1);

        let loaded = m.select_by_id(id).expect("select").expect("present");
        assert_eq!(loaded.attr_names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    /// T2.3: Removed and replaced attributes delete their old subtree.
    #[test]
    fn removed_attribute_is_deleted() {
        let mut m = mapper();
        let mut obj = Object::ordered()
            .with_attr("keep", Object::integer(1))
            .with_attr("drop", Object::ordered().with_attr("deep", Object::integer(2)))
            .with_attr("swap", Object::integer(3));
        m.insert(&mut obj).expect("insert");
        assert_eq!(m.count().expect("count"), 5);

        obj.remove_attr("drop");
        obj.set_attr("swap", Object::string("three"));
        m.store(&mut obj).expect("store");

        assert_eq!(m.count().expect("count"), 3);
        let loaded = m
            .select_by_id(obj.id().expect("id"))
            .expect("select")
            .expect("present");
        assert_eq!(loaded.attr("swap").and_then(Object::as_str), Some("three"));
    }

    /// T2.4: Labels and comments are metadata changes of their own row.
    #[test]
    fn metadata_changes_are_stored() {
        let mut m = mapper();
        let mut obj = Object::integer(1);
        let id = m.insert(&mut obj).expect("insert");

        obj.set_label(Some("run 1".to_string()));
        obj.set_comment(Some("first try".to_string()));
        assert_eq!(m.store(&mut obj).expect("store"), 1);

        let loaded = m.select_by_id(id).expect("select").expect("present");
        assert_eq!(loaded.label(), Some("run 1"));
        assert_eq!(loaded.comment(), Some("first try"));
    }

    /// T2.5: A detached copy is inserted as a brand new tree.
    #[test]
    fn detached_copy_inserts_new_rows() {
        let mut m = mapper();
        let mut obj = Object::ordered().named("run").with_attr("n", Object::integer(1));
        let first = m.insert(&mut obj).expect("insert");

        let mut copy = obj.detached_copy();
        let second = m.insert(&mut copy).expect("insert copy");

        assert_ne!(first, second);
        assert_eq!(m.count().expect("count"), 4);
        assert_eq!(m.select_by_name("run").expect("select").len(), 2);
    }

    /// T2.6: Updating an object whose row is gone fails.
    #[test]
    fn update_of_deleted_object_fails() {
        let mut m = mapper();
        let mut obj = Object::integer(1);
        let id = m.insert(&mut obj).expect("insert");
        m.delete_by_id(id).expect("delete");

        assert!(matches!(
            m.update(&mut obj),
            Err(ScipionError::ObjectNotFound(_))
        ));
    }

    /// T2.7: A store failing halfway leaves both the database and the tree
    /// as they were.
    #[test]
    fn failed_store_rolls_back_rows_and_tree() {
        let mut m = mapper();
        let mut obj = Object::ordered()
            .with_attr("a", Object::integer(1))
            .with_attr("b", Object::integer(2))
            .with_attr("c", Object::integer(3));
        let id = m.insert(&mut obj).expect("insert");
        let c_id = obj.attr("c").and_then(Object::id).expect("c id");
        m.delete_by_id(c_id).expect("delete c");

        obj.set_attr("a", Object::integer(10));
        obj.attr_mut("b").expect("b").set_int(20).expect("set");
        obj.attr_mut("c").expect("c").set_int(30).expect("set");

        assert!(matches!(m.store(&mut obj), Err(ScipionError::ObjectNotFound(missing)) if missing == c_id));
        assert!(obj.attr("a").expect("a").id().is_none());
        assert!(obj.attr("b").expect("b").is_dirty());
        assert_eq!(m.count().expect("count"), 3);
        let loaded = m.select_by_id(id).expect("select").expect("present");
        assert_eq!(loaded.attr("a").and_then(Object::as_int), Some(1));
        assert_eq!(loaded.attr("b").and_then(Object::as_int), Some(2));

        // The same tree can be stored once the missing child is dropped.
        obj.remove_attr("c");
        m.store(&mut obj).expect("store");
        assert!(!obj.is_dirty_tree());
        assert_eq!(m.count().expect("count"), 3);
        let loaded = m.select_by_id(id).expect("select").expect("present");
        assert_eq!(loaded.attr("a").and_then(Object::as_int), Some(10));
        assert_eq!(loaded.attr("b").and_then(Object::as_int), Some(20));
        assert!(loaded.attr("c").is_none());
    }

    /// T2.8: Stored children can be re-attached and reordered.
    #[test]
    fn reattached_and_reordered_children_are_kept() {
        let mut m = mapper();
        let mut list = Object::list();
        for v in [1, 2, 3] {
            list.push(Object::integer(v)).expect("push");
        }
        let mut obj = Object::ordered()
            .with_attr("x", Object::integer(7))
            .with_attr("list", list);
        let id = m.insert(&mut obj).expect("insert");

        let x = obj.attr("x").cloned().expect("x");
        obj.set_attr("x", x);
        let list = obj.attr_mut("list").expect("list");
        let last = list.remove(2).expect("item");
        list.insert(0, last).expect("insert");
        m.store(&mut obj).expect("store");

        let loaded = m.select_by_id(id).expect("select").expect("present");
        assert_eq!(loaded.attr("x").and_then(Object::as_int), Some(7));
        let ints: Vec<_> = loaded
            .attr("list")
            .expect("list")
            .items()
            .iter()
            .filter_map(Object::as_int)
            .collect();
        assert_eq!(ints, vec![3, 1, 2]);
        assert_eq!(m.count().expect("count"), 6);
    }
}

// =============================================================================
// TIER T3: ON-DISK PROJECTS AND SETTINGS
// =============================================================================

mod t3_on_disk {
    use super::*;
    use scipion_core::{NodeConfig, Project, ProjectSettings, load_settings};

    /// T3.1: A store reopened from disk sees the same rows.
    #[test]
    fn reopen_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("objects.sqlite");
        let id = {
            let mut m = SqliteMapper::open(&path, ClassRegistry::new()).expect("open");
            m.insert(&mut Object::string("persisted")).expect("insert")
        };

        let m = SqliteMapper::open(&path, ClassRegistry::new()).expect("reopen");
        let obj = m.select_by_id(id).expect("select").expect("present");
        assert_eq!(obj.as_str(), Some("persisted"));
        assert_eq!(m.path(), Some(path.as_path()));
    }

    /// T3.2: Settings written to a path load back with their nodes.
    #[test]
    fn settings_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.sqlite");
        let mut settings = ProjectSettings::new();
        settings.add_node(NodeConfig::new(0).at(10, 20)).expect("node");
        settings.set_disk_quota(Some(100)).expect("quota");
        drop(settings.write_to(&path).expect("write"));

        let (loaded, _) = load_settings(&path).expect("load");
        assert_eq!(loaded.disk_quota(), Some(100));
        assert_eq!(loaded.nodes().expect("nodes"), vec![NodeConfig::new(0).at(10, 20)]);
    }

    /// T3.3: A project graph and its layout survive reopening.
    #[test]
    fn project_graph_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = ClassRegistry::new();
        registry.register("ProtImport", ClassKind::Composite, Some("Protocol"));
        registry.register("Protocol", ClassKind::Composite, Some("OrderedObject"));

        let import_id = {
            let mut project = Project::create(dir.path(), registry.clone()).expect("create");
            let mut import = Object::with_class("ProtImport", ClassKind::Composite);
            let import_id = project.add_run(&mut import).expect("import");
            let mut next = Object::with_class("ProtImport", ClassKind::Composite)
                .with_attr("input", Object::pointer(Some(import_id)));
            project.add_run(&mut next).expect("next");
            project.sync_layout().expect("layout");
            import_id
        };

        let project = Project::open(dir.path(), registry).expect("open");
        let graph = project.runs_graph().expect("graph");
        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.children(&import_id.to_string()).expect("children").len(),
            1
        );
        assert_eq!(project.settings().nodes().expect("nodes").len(), 3);
    }
}
