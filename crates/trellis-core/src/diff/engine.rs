//! Tree diff computation and replay
//!
//! [`compute_changes`] walks two configuration trees in parallel and
//! classifies every divergent config-bearing data node as create, modify,
//! destroy, or move. Sequence numbers follow tree-walk (document) order;
//! consumers sort once by (priority, sequence) via [`ChangeSet`].
//!
//! Classification rules:
//! - present only in the incremental tree: one create entry per created
//!   node, recursing through the new subtree;
//! - present only in the reference tree: a single destroy entry for the
//!   topmost removed node (the dispatcher recurse-destroys descendants);
//! - present in both with differing leaf value: modify;
//! - list-entry identity is its key set (value, for leaf-lists), so a key
//!   change surfaces as destroy-old + create-new, never modify;
//! - same entries of an ordered-by-user list in a different order: move
//!   entries for the off-LCS entries, anchored to their new predecessor.
//!
//! [`apply_changes`] replays a change set onto a tree in discovery order;
//! it backs candidate rebasing and the diff round-trip property.

use std::collections::HashSet;

use crate::diff::model::{ChangeEntry, ChangeOp, ChangeSet, InsertPosition};
use crate::errors::{Result, TrellisError};
use crate::model::path::{Path, PathSegment};
use crate::model::tree::{ConfigTree, DataNode};
use crate::schema::{SchemaNodeKind, SchemaRegistry};

/// Compute the ordered change set that transforms `reference` into
/// `incremental`.
///
/// Operational-only schema positions never produce entries.
///
/// # Errors
///
/// Returns `Inconsistency` if a data node has no corresponding schema node.
pub fn compute_changes(
    registry: &SchemaRegistry,
    reference: &ConfigTree,
    incremental: &ConfigTree,
) -> Result<ChangeSet> {
    let mut ctx = DiffContext {
        registry,
        changes: ChangeSet::new(),
        seq: 0,
    };
    ctx.diff_children(reference.root(), incremental.root(), &Path::root())?;
    Ok(ctx.changes)
}

struct DiffContext<'a> {
    registry: &'a SchemaRegistry,
    changes: ChangeSet,
    seq: u32,
}

impl<'a> DiffContext<'a> {
    fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn diff_children(
        &mut self,
        ref_parent: &DataNode,
        inc_parent: &DataNode,
        parent_path: &Path,
    ) -> Result<()> {
        // Off-LCS entries of user-ordered lists present in both trees
        let moved = self.moved_entries(ref_parent, inc_parent, parent_path)?;

        let mut prev_sibling: Option<PathSegment> = None;
        for inc_child in &inc_parent.children {
            let leaf_list = self.is_leaf_list(parent_path, inc_child)?;
            let seg = identity_segment(inc_child, leaf_list);
            let child_path = parent_path.join(seg.clone());
            let schema = self.schema_for(&child_path)?;

            if !schema.config {
                prev_sibling = Some(seg);
                continue;
            }

            match find_matching(ref_parent, inc_child, leaf_list) {
                None => {
                    let position = match &prev_sibling {
                        Some(prev) => InsertPosition::After(prev.clone()),
                        None => InsertPosition::First,
                    };
                    self.emit_created(inc_child, &child_path, Some(position))?;
                }
                Some(ref_child) => {
                    if moved.contains(&seg) {
                        let position = match &prev_sibling {
                            Some(prev) => InsertPosition::After(prev.clone()),
                            None => InsertPosition::First,
                        };
                        let seq = self.next_seq();
                        self.changes.insert(
                            ChangeEntry::new(
                                ChangeOp::Move,
                                seq,
                                schema.clone(),
                                child_path.clone(),
                            )
                            .with_position(position),
                        );
                    }
                    if schema.kind == SchemaNodeKind::Leaf && ref_child.value != inc_child.value
                    {
                        let seq = self.next_seq();
                        let mut entry = ChangeEntry::new(
                            ChangeOp::Modify,
                            seq,
                            schema.clone(),
                            child_path.clone(),
                        );
                        if let Some(value) = &inc_child.value {
                            entry = entry.with_value(value.clone());
                        }
                        self.changes.insert(entry);
                    }
                    self.diff_children(ref_child, inc_child, &child_path)?;
                }
            }
            prev_sibling = Some(seg);
        }

        for ref_child in &ref_parent.children {
            let leaf_list = self.is_leaf_list(parent_path, ref_child)?;
            let seg = identity_segment(ref_child, leaf_list);
            let child_path = parent_path.join(seg);
            let schema = self.schema_for(&child_path)?;
            if !schema.config {
                continue;
            }
            if find_matching(inc_parent, ref_child, leaf_list).is_none() {
                let seq = self.next_seq();
                self.changes
                    .insert(ChangeEntry::new(ChangeOp::Destroy, seq, schema, child_path));
            }
        }

        Ok(())
    }

    /// One create entry per node of a created subtree, in document order
    fn emit_created(
        &mut self,
        node: &DataNode,
        path: &Path,
        position: Option<InsertPosition>,
    ) -> Result<()> {
        let schema = self.schema_for(path)?;
        if !schema.config {
            return Ok(());
        }
        let seq = self.next_seq();
        let mut entry = ChangeEntry::new(ChangeOp::Create, seq, schema, path.clone());
        if let Some(value) = &node.value {
            entry = entry.with_value(value.clone());
        }
        if let Some(position) = position {
            entry = entry.with_position(position);
        }
        self.changes.insert(entry);

        for child in &node.children {
            let leaf_list = self.is_leaf_list(path, child)?;
            let child_path = path.join(identity_segment(child, leaf_list));
            self.emit_created(child, &child_path, None)?;
        }
        Ok(())
    }

    /// Identity segments of matched entries that left the longest common
    /// subsequence of a user-ordered list's ordering
    fn moved_entries(
        &mut self,
        ref_parent: &DataNode,
        inc_parent: &DataNode,
        parent_path: &Path,
    ) -> Result<HashSet<PathSegment>> {
        let mut moved = HashSet::new();
        let mut seen_names: HashSet<&str> = HashSet::new();

        for inc_child in &inc_parent.children {
            if !seen_names.insert(inc_child.name.as_str()) {
                continue;
            }
            let schema_path = parent_path.join(PathSegment::new(inc_child.name.clone()));
            let schema = match self.registry.find(&schema_path) {
                Some(s) => s,
                None => continue,
            };
            if !schema.ordered_by_user || !schema.is_list() {
                continue;
            }
            let leaf_list = schema.kind == SchemaNodeKind::LeafList;

            let in_both = |node: &DataNode, other: &DataNode| {
                node.name == inc_child.name && find_matching(other, node, leaf_list).is_some()
            };
            let ref_order: Vec<PathSegment> = ref_parent
                .children
                .iter()
                .filter(|c| in_both(c, inc_parent))
                .map(|c| identity_segment(c, leaf_list))
                .collect();
            let inc_order: Vec<PathSegment> = inc_parent
                .children
                .iter()
                .filter(|c| in_both(c, ref_parent))
                .map(|c| identity_segment(c, leaf_list))
                .collect();

            if ref_order == inc_order {
                continue;
            }
            let stable = longest_common_subsequence(&ref_order, &inc_order);
            for seg in inc_order {
                if !stable.contains(&seg) {
                    moved.insert(seg);
                }
            }
        }
        Ok(moved)
    }

    fn schema_for(&self, path: &Path) -> Result<std::sync::Arc<crate::schema::SchemaNode>> {
        self.registry
            .find(path)
            .ok_or_else(|| TrellisError::Inconsistency {
                path: path.to_string(),
                message: "data node has no schema node".to_string(),
            })
    }

    fn is_leaf_list(&self, parent_path: &Path, child: &DataNode) -> Result<bool> {
        let schema_path = parent_path.join(PathSegment::new(child.name.clone()));
        Ok(self
            .schema_for(&schema_path)?
            .kind
            == SchemaNodeKind::LeafList)
    }
}

/// Identity of a node under its parent: keys for list entries, value for
/// leaf-list entries, bare name otherwise
fn identity_segment(node: &DataNode, leaf_list: bool) -> PathSegment {
    if leaf_list {
        let value = node.value.as_ref().map(|v| v.to_string()).unwrap_or_default();
        PathSegment::with_keys(node.name.clone(), vec![(".".to_string(), value)])
    } else {
        node.segment()
    }
}

fn find_matching<'a>(
    parent: &'a DataNode,
    child: &DataNode,
    leaf_list: bool,
) -> Option<&'a DataNode> {
    parent.children.iter().find(|c| {
        if c.name != child.name {
            return false;
        }
        if leaf_list {
            c.value == child.value
        } else {
            c.keys.len() == child.keys.len() && child.keys.iter().all(|k| c.keys.contains(k))
        }
    })
}

fn longest_common_subsequence(a: &[PathSegment], b: &[PathSegment]) -> HashSet<PathSegment> {
    let n = a.len();
    let m = b.len();
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }
    let mut result = HashSet::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            result.insert(a[i].clone());
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    result
}

/// Replay a change set onto a tree, in discovery (document) order.
///
/// This is the candidate-rebase mechanism: replaying the candidate's own
/// edits on top of a fresh duplicate of the running tree makes the
/// candidate win every conflicting field by construction.
///
/// # Errors
///
/// Returns `NotFound` if a move targets a node that does not exist.
pub fn apply_changes(tree: &mut ConfigTree, changes: &ChangeSet) -> Result<()> {
    for entry in changes.iter_seq() {
        match entry.op {
            ChangeOp::Create => {
                let node = tree.ensure(&entry.path);
                if let Some(value) = &entry.value {
                    node.value = Some(value.clone());
                }
                if let Some(position) = &entry.position {
                    reposition(tree, &entry.path, position)?;
                }
            }
            ChangeOp::Modify => {
                if let Some(value) = &entry.value {
                    tree.set_leaf(&entry.path, value.clone());
                } else {
                    tree.ensure(&entry.path).value = None;
                }
            }
            ChangeOp::Destroy => {
                // Removing the topmost node covers its descendants
                tree.remove(&entry.path);
            }
            ChangeOp::Move => {
                let position = entry.position.as_ref().ok_or_else(|| {
                    TrellisError::Inconsistency {
                        path: entry.path.to_string(),
                        message: "move entry without a position".to_string(),
                    }
                })?;
                reposition(tree, &entry.path, position)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn reposition(tree: &mut ConfigTree, path: &Path, position: &InsertPosition) -> Result<()> {
    let (last, parent_path) = match (path.last().cloned(), path.parent()) {
        (Some(last), Some(parent)) => (last, parent),
        _ => {
            return Err(TrellisError::InvalidPath {
                path: path.to_string(),
                message: "cannot reposition the root".to_string(),
            })
        }
    };
    let parent = tree
        .find_mut(&parent_path)
        .ok_or_else(|| TrellisError::NotFound {
            path: parent_path.to_string(),
        })?;
    let idx = parent
        .children
        .iter()
        .position(|c| c.matches_segment(&last))
        .ok_or_else(|| TrellisError::NotFound {
            path: path.to_string(),
        })?;
    let node = parent.children.remove(idx);
    let insert_at = match position {
        InsertPosition::First => 0,
        InsertPosition::After(pred) => parent
            .children
            .iter()
            .position(|c| c.matches_segment(pred))
            .map(|i| i + 1)
            .unwrap_or(parent.children.len()),
    };
    parent.children.insert(insert_at, node);
    Ok(())
}

/// Human-readable one-line-per-entry rendering of a change set
pub fn summarize(changes: &ChangeSet) -> Vec<String> {
    changes
        .iter()
        .map(|entry| match (&entry.op, &entry.value) {
            (ChangeOp::Modify, Some(value)) | (ChangeOp::Create, Some(value)) => {
                format!("{} {} = {}", entry.op, entry.path, value)
            }
            _ => format!("{} {}", entry.op, entry.path),
        })
        .collect()
}
