//! In-memory test tree.
//!
//! Nodes live in an id-keyed index; parent and child links are ids, so a
//! lookup by id and the tree shape can never disagree. Children keep insertion
//! order.

use crate::package::DetectedPackage;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use turbotest_util::text::Position;

/// Separator between a parent id and a child's local name.
pub const ID_SEPARATOR: char = '/';

/// Kind of test node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Package,
    File,
    Suite,
    Case,
}

impl NodeKind {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::File => "file",
            Self::Suite => "suite",
            Self::Case => "case",
        }
    }
}

/// Package routing data carried by package and file nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageMeta {
    pub package_name: String,
    pub package_path: PathBuf,
}

impl From<&DetectedPackage> for PackageMeta {
    fn from(pkg: &DetectedPackage) -> Self {
        Self {
            package_name: pkg.name.clone(),
            package_path: pkg.path.clone(),
        }
    }
}

/// One entry of the test hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    /// Package directory for packages, the owning file for everything else.
    pub location: PathBuf,
    /// Declaration position for suites and cases.
    pub position: Option<Position>,
    pub meta: Option<PackageMeta>,
    parent: Option<String>,
    children: Vec<String>,
}

impl TestNode {
    fn new(id: String, kind: NodeKind, label: String, location: PathBuf) -> Self {
        Self {
            id,
            kind,
            label,
            location,
            position: None,
            meta: None,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Root node for a package: id `package:<name>`.
    #[must_use]
    pub fn package(pkg: &DetectedPackage) -> Self {
        let mut node = Self::new(
            package_id(&pkg.name),
            NodeKind::Package,
            pkg.name.clone(),
            pkg.path.clone(),
        );
        node.meta = Some(PackageMeta::from(pkg));
        node
    }

    /// File node: id `file:<workspace-relative path>`.
    #[must_use]
    pub fn file(relative: &str, path: &Path, pkg: &DetectedPackage) -> Self {
        let mut node = Self::new(
            format!("file:{relative}"),
            NodeKind::File,
            turbotest_util::fs::file_name_lossy(path),
            path.to_path_buf(),
        );
        node.meta = Some(PackageMeta::from(pkg));
        node
    }

    /// Suite or case declared in `file`, child of `parent_id`.
    #[must_use]
    pub fn declaration(
        kind: NodeKind,
        parent_id: &str,
        name: &str,
        file: &Path,
        position: Position,
    ) -> Self {
        let mut node = Self::new(
            child_id(parent_id, name),
            kind,
            name.to_string(),
            file.to_path_buf(),
        );
        node.position = Some(position);
        node
    }

    /// Parent id, if this node is attached below another.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Child ids in insertion order.
    #[must_use]
    pub fn children(&self) -> &[String] {
        &self.children
    }
}

/// Id of a package root node.
#[must_use]
pub fn package_id(name: &str) -> String {
    format!("package:{name}")
}

/// Id of a child node.
#[must_use]
pub fn child_id(parent_id: &str, local_name: &str) -> String {
    format!("{parent_id}{ID_SEPARATOR}{local_name}")
}

/// Final id segment, used to name tests for the runner.
#[must_use]
pub fn leaf_name(id: &str) -> &str {
    id.rsplit(ID_SEPARATOR).next().unwrap_or(id)
}

/// Test tree with its id index.
#[derive(Debug, Default)]
pub struct TestTree {
    nodes: HashMap<String, TestNode>,
    roots: Vec<String>,
}

impl TestTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TestNode> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Root ids in insertion order.
    #[must_use]
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Add a top-level node. Returns `false` if the id is already taken.
    pub fn insert_root(&mut self, mut node: TestNode) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        node.parent = None;
        self.roots.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Append `node` under `parent_id`.
    ///
    /// Returns `false` without inserting when the parent is unknown or the id
    /// is already taken.
    pub fn insert_child(&mut self, parent_id: &str, mut node: TestNode) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        let Some(parent) = self.nodes.get_mut(parent_id) else {
            return false;
        };
        parent.children.push(node.id.clone());
        node.parent = Some(parent_id.to_string());
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Remove a node and its whole subtree.
    ///
    /// Returns the removed ids, the node itself first.
    pub fn remove(&mut self, id: &str) -> Vec<String> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };

        match node.parent.clone() {
            Some(parent_id) => {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.retain(|c| c != id);
                }
            }
            None => self.roots.retain(|r| r != id),
        }

        let removed = self.subtree_ids(id);
        for removed_id in &removed {
            self.nodes.remove(removed_id);
        }
        removed
    }

    /// Ids of `id` and all its descendants, pre-order.
    #[must_use]
    pub fn subtree_ids(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev().cloned());
                out.push(current);
            }
        }
        out
    }

    /// Every node in pre-order, roots in insertion order.
    #[must_use]
    pub fn preorder(&self) -> Vec<&TestNode> {
        self.roots
            .iter()
            .flat_map(|root| self.subtree_ids(root))
            .filter_map(|id| self.nodes.get(&id))
            .collect()
    }

    /// Find the file node at `path`.
    #[must_use]
    pub fn find_file(&self, path: &Path) -> Option<&TestNode> {
        self.nodes
            .values()
            .find(|n| n.kind == NodeKind::File && n.location == path)
    }

    /// First suite or case within `scope` answering to `name`.
    ///
    /// Labels are tried over the whole subtree before full names, each in
    /// pre-order. Ids in `claimed` are passed over, so repeated names resolve
    /// to successive declarations.
    #[must_use]
    pub fn find_declaration(
        &self,
        scope: &str,
        name: &str,
        claimed: &HashSet<String>,
    ) -> Option<&TestNode> {
        let candidates: Vec<&TestNode> = self
            .subtree_ids(scope)
            .iter()
            .filter(|id| !claimed.contains(*id))
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| matches!(n.kind, NodeKind::Suite | NodeKind::Case))
            .collect();

        candidates
            .iter()
            .find(|n| n.label == name)
            .or_else(|| {
                candidates
                    .iter()
                    .find(|n| self.full_name(&n.id).as_deref() == Some(name))
            })
            .copied()
    }

    /// Ancestors of `id`, nearest first.
    fn ancestors(&self, id: &str) -> impl Iterator<Item = &TestNode> {
        let mut next = self.nodes.get(id).and_then(|n| n.parent.as_deref());
        std::iter::from_fn(move || {
            let node = self.nodes.get(next?)?;
            next = node.parent.as_deref();
            Some(node)
        })
    }

    /// Package metadata for `id`, from the node or its nearest ancestor.
    #[must_use]
    pub fn package_of(&self, id: &str) -> Option<&PackageMeta> {
        let node = self.nodes.get(id)?;
        node.meta
            .as_ref()
            .or_else(|| self.ancestors(id).find_map(|a| a.meta.as_ref()))
    }

    /// Id of the package root above (or at) `id`.
    #[must_use]
    pub fn package_root_of(&self, id: &str) -> Option<&str> {
        let node = self.nodes.get(id)?;
        if node.kind == NodeKind::Package {
            return Some(node.id.as_str());
        }
        self.ancestors(id)
            .find(|a| a.kind == NodeKind::Package)
            .map(|a| a.id.as_str())
    }

    /// Enclosing suite titles plus the node's own label, space-joined.
    #[must_use]
    pub fn full_name(&self, id: &str) -> Option<String> {
        let node = self.nodes.get(id)?;
        let mut parts: Vec<&str> = self
            .ancestors(id)
            .take_while(|a| a.kind == NodeKind::Suite)
            .map(|a| a.label.as_str())
            .collect();
        parts.reverse();
        parts.push(&node.label);
        Some(parts.join(" "))
    }

    /// Nested, serializable snapshot of the tree.
    #[must_use]
    pub fn to_view(&self) -> Vec<NodeView> {
        self.roots.iter().filter_map(|id| self.view_of(id)).collect()
    }

    fn view_of(&self, id: &str) -> Option<NodeView> {
        let node = self.nodes.get(id)?;
        Some(NodeView {
            id: node.id.clone(),
            kind: node.kind,
            label: node.label.clone(),
            location: node.location.clone(),
            line: node.position.map(|p| p.line),
            column: node.position.map(|p| p.character),
            children: node
                .children
                .iter()
                .filter_map(|c| self.view_of(c))
                .collect(),
        })
    }
}

/// Serializable view of a node and its subtree.
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub location: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub children: Vec<NodeView>,
}
