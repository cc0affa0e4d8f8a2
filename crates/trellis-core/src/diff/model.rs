//! Change-set model: the ordered unit of difference between two trees
//!
//! Entries are totally ordered by (schema priority, sequence number). The
//! sequence number records diff-discovery (document) order and only breaks
//! priority ties, so "order discovered" stays separate from "order applied".
//! The ordered-map container is a `BTreeMap` keyed by that pair.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::path::{Path, PathSegment};
use crate::model::value::DataValue;
use crate::schema::{Resource, SchemaNode};

/// The four change operations a diff can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Create,
    Modify,
    Destroy,
    Move,
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChangeOp::Create => "create",
            ChangeOp::Modify => "modify",
            ChangeOp::Destroy => "destroy",
            ChangeOp::Move => "move",
        };
        write!(f, "{}", name)
    }
}

/// Where a created or moved node lands among its siblings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertPosition {
    First,
    /// Directly after the sibling addressed by this segment
    After(PathSegment),
}

/// One unit of difference between two configuration trees
pub struct ChangeEntry {
    pub op: ChangeOp,
    /// Discovery order within the diff; tie-breaker under equal priority
    pub seq: u32,
    pub schema: Arc<SchemaNode>,
    /// Data path of the affected node
    pub path: Path,
    /// New value, for leaf creates and modifies
    pub value: Option<DataValue>,
    /// Sibling position, for creates and moves
    pub position: Option<InsertPosition>,
    /// Resource allocated by the prepare callback, released or consumed by
    /// abort/apply. Never shared across transactions.
    pub resource: Option<Resource>,
    /// Set once the prepare callback succeeded for this entry
    pub prepared: bool,
}

impl ChangeEntry {
    pub fn new(op: ChangeOp, seq: u32, schema: Arc<SchemaNode>, path: Path) -> Self {
        Self {
            op,
            seq,
            schema,
            path,
            value: None,
            position: None,
            resource: None,
            prepared: false,
        }
    }

    pub fn with_value(mut self, value: DataValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_position(mut self, position: InsertPosition) -> Self {
        self.position = Some(position);
        self
    }
}

impl std::fmt::Debug for ChangeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeEntry")
            .field("op", &self.op)
            .field("seq", &self.seq)
            .field("priority", &self.schema.priority)
            .field("path", &self.path.to_string())
            .field("value", &self.value)
            .field("prepared", &self.prepared)
            .finish_non_exhaustive()
    }
}

/// An ordered set of changes, keyed by (priority, sequence)
#[derive(Debug, Default)]
pub struct ChangeSet {
    entries: BTreeMap<(u32, u32), ChangeEntry>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ChangeEntry) {
        self.entries
            .insert((entry.schema.priority, entry.seq), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in dispatch order: (priority ascending, sequence ascending)
    pub fn iter(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChangeEntry> {
        self.entries.values_mut()
    }

    /// Entries in discovery (document) order, for tree replay
    pub fn iter_seq(&self) -> impl Iterator<Item = &ChangeEntry> {
        let mut refs: Vec<&ChangeEntry> = self.entries.values().collect();
        refs.sort_by_key(|e| e.seq);
        refs.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::node::{SchemaNodeKind, DEFAULT_PRIORITY};

    fn schema_node(path: &str, priority: u32) -> Arc<SchemaNode> {
        Arc::new(SchemaNode {
            path: path.to_string(),
            kind: SchemaNodeKind::Leaf,
            config: true,
            priority,
            keys: Vec::new(),
            ordered_by_user: false,
            config_only: true,
            keyless_list: false,
            ignore_config_callbacks: false,
            has_bulk_get: false,
            parent: None,
            parent_list: None,
            children: Vec::new(),
            handler: None,
        })
    }

    #[test]
    fn test_ordering_priority_then_sequence() {
        let mut set = ChangeSet::new();
        let low = schema_node("/low", 5);
        let high = schema_node("/high", DEFAULT_PRIORITY);

        set.insert(ChangeEntry::new(
            ChangeOp::Create,
            0,
            high.clone(),
            Path::parse("/high").unwrap(),
        ));
        set.insert(ChangeEntry::new(
            ChangeOp::Modify,
            1,
            low.clone(),
            Path::parse("/low").unwrap(),
        ));

        // Lower priority dispatches first despite later discovery
        let order: Vec<u32> = set.iter().map(|e| e.seq).collect();
        assert_eq!(order, vec![1, 0]);

        // Discovery order is preserved for replay
        let replay: Vec<u32> = set.iter_seq().map(|e| e.seq).collect();
        assert_eq!(replay, vec![0, 1]);
    }

    #[test]
    fn test_equal_priority_breaks_ties_by_sequence() {
        let mut set = ChangeSet::new();
        let node = schema_node("/n", 10);
        for seq in [2u32, 0, 1] {
            set.insert(ChangeEntry::new(
                ChangeOp::Create,
                seq,
                node.clone(),
                Path::parse("/n").unwrap(),
            ));
        }
        let order: Vec<u32> = set.iter().map(|e| e.seq).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
