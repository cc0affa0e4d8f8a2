//! Hierarchical configuration tree
//!
//! [`DataNode`] is one node of a configuration or state document; children
//! are kept in document order, which is also the order list entries take
//! under "ordered-by user" semantics. [`ConfigTree`] wraps a root node with
//! the snapshot version counter.
//!
//! Three logical instances exist at runtime: the authoritative (running)
//! tree owned by the config store, candidate trees owned by editing
//! sessions, and operational result trees built by the walk engine. All are
//! plain values; duplication is a deep copy.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::errors::{Result, TrellisError};
use crate::model::path::{Path, PathSegment};
use crate::model::value::DataValue;

/// One node of a configuration or state document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNode {
    pub name: String,
    /// List-entry keys; empty for containers, leaves, and keyless entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<(String, String)>,
    /// Scalar payload; present for leaves and leaf-list entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<DataValue>,
    /// Children in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DataNode>,
}

impl DataNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
            value: None,
            children: Vec::new(),
        }
    }

    pub fn new_leaf(name: impl Into<String>, value: DataValue) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
            value: Some(value),
            children: Vec::new(),
        }
    }

    pub fn new_list_entry(name: impl Into<String>, keys: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            keys,
            value: None,
            children: Vec::new(),
        }
    }

    /// Whether this node is addressed by the given segment.
    ///
    /// Entries are matched by key set; the `.` pseudo-key matches a
    /// leaf-list entry by value.
    pub fn matches_segment(&self, seg: &PathSegment) -> bool {
        if self.name != seg.name {
            return false;
        }
        if let [(dot, wanted)] = seg.keys.as_slice() {
            if dot == "." {
                return self.value.as_ref().map(|v| v.to_string()).as_deref()
                    == Some(wanted.as_str());
            }
        }
        if seg.keys.is_empty() {
            self.keys.is_empty()
        } else {
            seg.same_keys(&self.keys)
        }
    }

    /// The path segment that addresses this node under its parent
    pub fn segment(&self) -> PathSegment {
        PathSegment::with_keys(self.name.clone(), self.keys.clone())
    }

    pub fn find_child(&self, seg: &PathSegment) -> Option<&DataNode> {
        self.children.iter().find(|c| c.matches_segment(seg))
    }

    pub fn find_child_mut(&mut self, seg: &PathSegment) -> Option<&mut DataNode> {
        self.children.iter_mut().find(|c| c.matches_segment(seg))
    }

    /// Resolve a descendant by path, relative to this node
    pub fn find(&self, path: &Path) -> Option<&DataNode> {
        let mut node = self;
        for seg in &path.segments {
            node = node.find_child(seg)?;
        }
        Some(node)
    }

    pub fn find_mut(&mut self, path: &Path) -> Option<&mut DataNode> {
        let mut node = self;
        for seg in &path.segments {
            node = node.find_child_mut(seg)?;
        }
        Some(node)
    }

    /// Resolve a descendant, creating missing nodes along the way.
    ///
    /// Created entry nodes take their keys from the path segment; a `.`
    /// predicate creates a leaf-list entry holding that value.
    pub fn ensure(&mut self, path: &Path) -> &mut DataNode {
        let mut node = self;
        for seg in &path.segments {
            let idx = match node.children.iter().position(|c| c.matches_segment(seg)) {
                Some(idx) => idx,
                None => {
                    let child = match seg.keys.as_slice() {
                        [(dot, v)] if dot == "." => {
                            DataNode::new_leaf(seg.name.clone(), DataValue::from(v.as_str()))
                        }
                        keys => DataNode::new_list_entry(seg.name.clone(), keys.to_vec()),
                    };
                    node.children.push(child);
                    node.children.len() - 1
                }
            };
            node = &mut node.children[idx];
        }
        node
    }

    /// Remove a descendant subtree; returns the detached node if present
    pub fn remove(&mut self, path: &Path) -> Option<DataNode> {
        let (last, parent_path) = match (path.last(), path.parent()) {
            (Some(last), Some(parent)) => (last, parent),
            _ => return None,
        };
        let parent = self.find_mut(&parent_path)?;
        let idx = parent.children.iter().position(|c| c.matches_segment(last))?;
        Some(parent.children.remove(idx))
    }

    /// Merge `other` into this node: matching leaves take the incoming
    /// value, matching containers/entries merge recursively, unmatched
    /// children are appended in document order.
    pub fn merge(&mut self, other: &DataNode) {
        if other.value.is_some() {
            self.value = other.value.clone();
        }
        for incoming in &other.children {
            let seg = incoming.segment();
            match self.find_child_mut(&seg) {
                Some(existing) => existing.merge(incoming),
                None => self.children.push(incoming.clone()),
            }
        }
    }

    /// Visit every descendant in document (depth-first pre-) order
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&Path, &'a DataNode)) {
        fn walk<'a>(
            node: &'a DataNode,
            path: &mut Path,
            f: &mut impl FnMut(&Path, &'a DataNode),
        ) {
            for child in &node.children {
                path.segments.push(child.segment());
                f(path, child);
                walk(child, path, f);
                path.segments.pop();
            }
        }
        let mut path = Path::root();
        walk(self, &mut path, f);
    }
}

/// A versioned configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigTree {
    root: DataNode,
    version: u64,
}

impl ConfigTree {
    /// Create an empty configuration at version 0
    pub fn new() -> Self {
        Self {
            root: DataNode::new(""),
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> &DataNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut DataNode {
        &mut self.root
    }

    /// Deep copy, preserving the version
    pub fn dup(&self) -> Self {
        self.clone()
    }

    pub fn find(&self, path: &Path) -> Option<&DataNode> {
        self.root.find(path)
    }

    pub fn find_mut(&mut self, path: &Path) -> Option<&mut DataNode> {
        self.root.find_mut(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }

    /// Typed scalar read at a path
    pub fn get_value(&self, path: &Path) -> Option<&DataValue> {
        self.find(path).and_then(|n| n.value.as_ref())
    }

    pub fn ensure(&mut self, path: &Path) -> &mut DataNode {
        self.root.ensure(path)
    }

    /// Set a leaf value, creating the node if needed
    pub fn set_leaf(&mut self, path: &Path, value: DataValue) {
        self.root.ensure(path).value = Some(value);
    }

    pub fn remove(&mut self, path: &Path) -> Option<DataNode> {
        self.root.remove(path)
    }

    /// Merge another tree's contents into this one
    pub fn merge_from(&mut self, other: &ConfigTree) {
        self.root.merge(&other.root);
    }

    /// Adopt `candidate`'s contents as the new snapshot at `version + 1`.
    ///
    /// This is the only operation that advances the version counter.
    pub fn replace_with(&mut self, candidate: ConfigTree) {
        self.root = candidate.root;
        self.version += 1;
    }

    /// Render the tree as JSON text (the collaborator-facing serialization)
    ///
    /// # Errors
    ///
    /// Returns `Internal` if serialization fails, which would indicate a
    /// corrupted tree.
    pub fn to_json_text(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.root).map_err(|e| TrellisError::Internal {
            message: format!("failed to serialize tree: {}", e),
        })
    }

    /// Content digest over the canonical serialized form.
    ///
    /// Two trees with equal digests hold identical data regardless of
    /// version; used as the no-changes fast path during commit preparation.
    pub fn content_digest(&self) -> String {
        let canonical = serde_json::to_string(&self.root).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::new()
    }
}
