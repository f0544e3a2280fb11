//! Initial positions for runs-graph nodes.

use super::{NodeConfig, ProjectSettings};
use crate::ScipionError;
use crate::graph::Graph;
use crate::primitives::{LAYOUT_MARGIN, LAYOUT_X_STEP, LAYOUT_Y_STEP, PROJECT_NODE_ID};
use std::collections::BTreeMap;

/// Give every graph node without a stored position one.
///
/// Nodes are placed by breadth-first level: the level picks the column,
/// the order within the level picks the row. The root maps to the project
/// node (id 0); other nodes need a run id. Existing positions are kept.
/// Returns the number of nodes added.
pub fn layout(settings: &mut ProjectSettings, graph: &Graph) -> Result<usize, ScipionError> {
    let mut rows: BTreeMap<usize, i64> = BTreeMap::new();
    let mut added = 0usize;

    for (name, depth) in graph.levels() {
        let row = rows.entry(depth).or_insert(0);
        let slot = *row;
        *row = row.saturating_add(1);

        let id = if graph.is_root(name) {
            PROJECT_NODE_ID
        } else {
            match graph.get_node(name).and_then(|node| node.run()) {
                Some(run) => run.value(),
                None => continue,
            }
        };
        if settings.node_by_id(id)?.is_some() {
            continue;
        }

        let x = LAYOUT_MARGIN.saturating_add(LAYOUT_X_STEP.saturating_mul(depth as i64));
        let y = LAYOUT_MARGIN.saturating_add(LAYOUT_Y_STEP.saturating_mul(slot));
        settings.add_node(NodeConfig::new(id).at(x, y))?;
        added = added.saturating_add(1);
    }

    if added > 0 {
        tracing::debug!(added, "laid out graph nodes");
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjId;

    fn graph() -> Graph {
        let mut g = Graph::new("PROJECT");
        for (name, run) in [("import", 2), ("align", 5), ("ctf", 9)] {
            g.create_node(name, None).set_run(Some(ObjId(run)));
        }
        g.add_child("PROJECT", "import").expect("edge");
        g.add_child("import", "align").expect("edge");
        g.add_child("import", "ctf").expect("edge");
        g
    }

    #[test]
    fn places_nodes_by_level() {
        let mut settings = ProjectSettings::new();
        let added = layout(&mut settings, &graph()).expect("layout");

        assert_eq!(added, 4);
        let pos = |id| {
            settings
                .node_by_id(id)
                .expect("node")
                .map(|n| n.position())
        };
        assert_eq!(pos(0), Some((50, 50)));
        assert_eq!(pos(2), Some((250, 50)));
        assert_eq!(pos(5), Some((450, 50)));
        assert_eq!(pos(9), Some((450, 150)));
    }

    #[test]
    fn existing_positions_are_kept() {
        let mut settings = ProjectSettings::new();
        settings
            .add_node(NodeConfig::new(5).at(7, 7))
            .expect("node");

        let added = layout(&mut settings, &graph()).expect("layout");

        assert_eq!(added, 3);
        assert_eq!(
            settings.node_by_id(5).expect("node").map(|n| n.position()),
            Some((7, 7))
        );
        assert_eq!(layout(&mut settings, &graph()).expect("again"), 0);
    }
}
