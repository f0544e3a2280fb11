//! # Node Graph
//!
//! A small directed graph of named nodes with a single root, used for the
//! protocol dependency graph of a project and its layout.
//!
//! Nodes are kept in a `BTreeMap` keyed by name plus an insertion-order list,
//! so iteration and traversal are deterministic.

use crate::{ObjId, ScipionError};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write as _;

/// A graph node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    name: String,
    label: Option<String>,
    run: Option<ObjId>,
    children: Vec<String>,
    parents: Vec<String>,
}

impl GraphNode {
    fn new(name: &str, label: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            label: label.map(str::to_string),
            run: None,
            children: Vec::new(),
            parents: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display label; falls back to the name.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    /// Stored run this node stands for, if any.
    #[must_use]
    pub fn run(&self) -> Option<ObjId> {
        self.run
    }

    pub fn set_run(&mut self, run: Option<ObjId>) {
        self.run = run;
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    pub fn parent_names(&self) -> impl Iterator<Item = &str> {
        self.parents.iter().map(String::as_str)
    }
}

/// Directed graph with a root node.
#[derive(Debug, Clone)]
pub struct Graph {
    root: String,
    nodes: BTreeMap<String, GraphNode>,
    order: Vec<String>,
    aliases: BTreeMap<String, String>,
}

impl Graph {
    /// Create a graph holding only its root.
    #[must_use]
    pub fn new(root: &str) -> Self {
        let mut graph = Self {
            root: root.to_string(),
            nodes: BTreeMap::new(),
            order: Vec::new(),
            aliases: BTreeMap::new(),
        };
        graph.create_node(root, None);
        graph
    }

    #[must_use]
    pub fn root(&self) -> &GraphNode {
        // The root is created in `new` and nodes are never removed.
        &self.nodes[&self.root]
    }

    #[must_use]
    pub fn is_root(&self, name: &str) -> bool {
        self.resolve(name) == Some(self.root.as_str())
    }

    /// Create a node, or relabel it if the name already exists.
    pub fn create_node(&mut self, name: &str, label: Option<&str>) -> &mut GraphNode {
        if !self.nodes.contains_key(name) {
            self.order.push(name.to_string());
        }
        let node = self
            .nodes
            .entry(name.to_string())
            .or_insert_with(|| GraphNode::new(name, label));
        if label.is_some() {
            node.label = label.map(str::to_string);
        }
        node
    }

    /// Make `alias` resolve to `node`.
    pub fn alias_node(&mut self, node: &str, alias: &str) -> Result<(), ScipionError> {
        let target = self.require(node)?.to_string();
        self.aliases.insert(alias.to_string(), target);
        Ok(())
    }

    /// Look up a node by name or alias.
    #[must_use]
    pub fn get_node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(self.resolve(name)?)
    }

    pub fn get_node_mut(&mut self, name: &str) -> Option<&mut GraphNode> {
        let key = self.resolve(name)?.to_string();
        self.nodes.get_mut(&key)
    }

    /// Add the edge `parent -> child`; repeated edges are ignored.
    pub fn add_child(&mut self, parent: &str, child: &str) -> Result<(), ScipionError> {
        let parent = self.require(parent)?.to_string();
        let child = self.require(child)?.to_string();
        if let Some(node) = self.nodes.get_mut(&parent) {
            if node.children.contains(&child) {
                return Ok(());
            }
            node.children.push(child.clone());
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parents.push(parent);
        }
        Ok(())
    }

    pub fn children(&self, name: &str) -> Result<Vec<&GraphNode>, ScipionError> {
        let node = &self.nodes[self.require(name)?];
        Ok(node
            .children
            .iter()
            .filter_map(|c| self.nodes.get(c))
            .collect())
    }

    pub fn parents(&self, name: &str) -> Result<Vec<&GraphNode>, ScipionError> {
        let node = &self.nodes[self.require(name)?];
        Ok(node
            .parents
            .iter()
            .filter_map(|p| self.nodes.get(p))
            .collect())
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root exists from construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Breadth-first order from the root; unreachable nodes are left out.
    #[must_use]
    pub fn bfs(&self) -> Vec<&GraphNode> {
        self.levels()
            .into_iter()
            .filter_map(|(name, _)| self.nodes.get(name))
            .collect()
    }

    /// Every reachable node with its depth, in breadth-first order.
    #[must_use]
    pub fn levels(&self) -> Vec<(&str, usize)> {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        let mut out = Vec::new();
        visited.insert(self.root.as_str());
        queue.push_back((self.root.as_str(), 0usize));

        while let Some((name, depth)) = queue.pop_front() {
            out.push((name, depth));
            let Some(node) = self.nodes.get(name) else {
                continue;
            };
            for child in &node.children {
                if visited.insert(child.as_str()) {
                    queue.push_back((child.as_str(), depth.saturating_add(1)));
                }
            }
        }
        out
    }

    /// Render in Graphviz DOT.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph {\n");
        for node in self.nodes() {
            let _ = writeln!(
                dot,
                "    \"{}\" [label=\"{}\"];",
                escape(&node.name),
                escape(node.label())
            );
        }
        for node in self.nodes() {
            for child in &node.children {
                let _ = writeln!(dot, "    \"{}\" -> \"{}\";", escape(&node.name), escape(child));
            }
        }
        dot.push_str("}\n");
        dot
    }

    fn resolve<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if let Some((key, _)) = self.nodes.get_key_value(name) {
            return Some(key.as_str());
        }
        self.aliases.get(name).map(String::as_str)
    }

    fn require<'a>(&'a self, name: &'a str) -> Result<&'a str, ScipionError> {
        self.resolve(name)
            .ok_or_else(|| ScipionError::NodeNotFound(name.to_string()))
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

// =============================================================================
// TESTS
// =============================================================================
