//! Candidate edit operations
//!
//! Front-ends submit edits as (path, operation, value) triples against a
//! session's candidate tree. Operation semantics follow RFC 8072 §2.5
//! edit operations: exclusive create errors on an existing node, merge
//! creates or updates, remove is idempotent while delete errors on
//! absence, replace swaps the whole subtree, and move repositions an
//! entry of a user-ordered list.
//!
//! Edits mutate only the candidate; nothing here touches the running
//! configuration or dispatches callbacks; that is the commit engine's job.

use crate::diff::engine::reposition;
use crate::diff::model::InsertPosition;
use crate::errors::{Result, TrellisError};
use crate::lock::Candidate;
use crate::model::path::Path;
use crate::model::value::DataValue;
use crate::schema::{SchemaNode, SchemaNodeKind, SchemaRegistry};

/// RFC-8072-style edit operations exposed to configuration editors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    /// "create": error if the node already exists
    CreateExclusive,
    /// "merge": create the node or merge into an existing one
    CreateMerge,
    /// "merge" on a leaf value
    Modify,
    /// "remove": delete if present, no error when absent
    Destroy,
    /// "delete": error when absent
    Delete,
    /// "replace": swap the entire subtree
    Replace,
    /// "move": reposition an entry of a user-ordered list
    Move,
}

impl std::fmt::Display for EditOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EditOp::CreateExclusive => "create",
            EditOp::CreateMerge => "merge",
            EditOp::Modify => "modify",
            EditOp::Destroy => "remove",
            EditOp::Delete => "delete",
            EditOp::Replace => "replace",
            EditOp::Move => "move",
        };
        write!(f, "{}", name)
    }
}

/// One edit request from a front-end
#[derive(Debug, Clone)]
pub struct ConfigEdit {
    pub path: String,
    pub operation: EditOp,
    pub value: Option<DataValue>,
    /// Destination, for move edits
    pub position: Option<InsertPosition>,
}

impl ConfigEdit {
    pub fn new(path: &str, operation: EditOp) -> Self {
        Self {
            path: path.to_string(),
            operation,
            value: None,
            position: None,
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

/// Check whether an edit operation is applicable to a schema node
pub fn operation_allowed(schema: &SchemaNode, operation: EditOp) -> Result<()> {
    let not_allowed = || TrellisError::OperationNotAllowed {
        operation: operation.to_string(),
        path: schema.path.clone(),
    };

    if !schema.config {
        return Err(not_allowed());
    }
    match operation {
        EditOp::Modify => {
            if schema.kind != SchemaNodeKind::Leaf {
                return Err(not_allowed());
            }
        }
        EditOp::Move => {
            if !schema.is_list() || !schema.ordered_by_user {
                return Err(not_allowed());
            }
        }
        EditOp::CreateExclusive
        | EditOp::CreateMerge
        | EditOp::Destroy
        | EditOp::Delete
        | EditOp::Replace => {
            if matches!(
                schema.kind,
                SchemaNodeKind::Rpc | SchemaNodeKind::Notification
            ) {
                return Err(not_allowed());
            }
        }
    }
    Ok(())
}

/// Apply one edit to a candidate tree.
///
/// # Errors
///
/// - `NotFound`: unknown schema path, or delete/move of a missing node
/// - `AlreadyExists`: exclusive create of an existing node
/// - `OperationNotAllowed`: operation inapplicable to the node kind
pub fn candidate_edit(
    registry: &SchemaRegistry,
    candidate: &mut Candidate,
    operation: EditOp,
    path: &Path,
    value: Option<DataValue>,
    position: Option<InsertPosition>,
) -> Result<()> {
    let schema = registry.find(path).ok_or_else(|| TrellisError::NotFound {
        path: path.to_string(),
    })?;
    operation_allowed(&schema, operation)?;

    match operation {
        EditOp::CreateExclusive => {
            if candidate.tree.contains(path) {
                return Err(TrellisError::AlreadyExists {
                    path: path.to_string(),
                });
            }
            let node = candidate.tree.ensure(path);
            if let Some(value) = value {
                node.value = Some(value);
            }
        }
        EditOp::CreateMerge | EditOp::Modify => {
            let node = candidate.tree.ensure(path);
            if let Some(value) = value {
                node.value = Some(value);
            }
        }
        EditOp::Destroy => {
            candidate.tree.remove(path);
        }
        EditOp::Delete => {
            if candidate.tree.remove(path).is_none() {
                return Err(TrellisError::NotFound {
                    path: path.to_string(),
                });
            }
        }
        EditOp::Replace => {
            candidate.tree.remove(path);
            let node = candidate.tree.ensure(path);
            if let Some(value) = value {
                node.value = Some(value);
            }
        }
        EditOp::Move => {
            if !candidate.tree.contains(path) {
                return Err(TrellisError::NotFound {
                    path: path.to_string(),
                });
            }
            let position = position.unwrap_or(InsertPosition::First);
            reposition(&mut candidate.tree, path, &position)?;
        }
    }
    Ok(())
}

/// Apply a batch of edits to a candidate, stopping at the first failure.
///
/// The returned error carries the offending path and a human-readable
/// message for the front-end to surface.
pub fn edit_config_changes(
    registry: &SchemaRegistry,
    candidate: &mut Candidate,
    edits: &[ConfigEdit],
) -> Result<()> {
    for edit in edits {
        let path = Path::parse(&edit.path)?;
        candidate_edit(
            registry,
            candidate,
            edit.operation,
            &path,
            edit.value.clone(),
            edit.position.clone(),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::path::PathSegment;
    use crate::schema::{SchemaDef, SchemaNodeDef};
    use crate::transaction::ConfigStore;

    fn p(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::build(
            SchemaDef::new(vec![
                SchemaNodeDef::container("/system"),
                SchemaNodeDef::leaf("/system/hostname"),
                SchemaNodeDef::leaf("/system/uptime").operational(),
                SchemaNodeDef::list("/policy", &["seq"]).ordered_by_user(),
                SchemaNodeDef::leaf("/policy/action"),
            ]),
            Vec::new(),
        )
        .unwrap()
    }

    fn fresh_candidate() -> Candidate {
        Candidate::from_store(&ConfigStore::new())
    }

    #[test]
    fn test_create_exclusive_errors_on_existing() {
        let registry = registry();
        let mut candidate = fresh_candidate();

        candidate_edit(
            &registry,
            &mut candidate,
            EditOp::CreateExclusive,
            &p("/system/hostname"),
            Some(DataValue::from("r1")),
            None,
        )
        .unwrap();

        let err = candidate_edit(
            &registry,
            &mut candidate,
            EditOp::CreateExclusive,
            &p("/system/hostname"),
            Some(DataValue::from("r2")),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TrellisError::AlreadyExists { .. }));
    }

    #[test]
    fn test_merge_creates_or_updates() {
        let registry = registry();
        let mut candidate = fresh_candidate();

        candidate_edit(
            &registry,
            &mut candidate,
            EditOp::CreateMerge,
            &p("/system/hostname"),
            Some(DataValue::from("r1")),
            None,
        )
        .unwrap();
        candidate_edit(
            &registry,
            &mut candidate,
            EditOp::Modify,
            &p("/system/hostname"),
            Some(DataValue::from("r2")),
            None,
        )
        .unwrap();
        assert_eq!(
            candidate.tree.get_value(&p("/system/hostname")),
            Some(&DataValue::String("r2".to_string()))
        );
    }

    #[test]
    fn test_destroy_idempotent_delete_strict() {
        let registry = registry();
        let mut candidate = fresh_candidate();

        // remove of a missing node succeeds
        candidate_edit(
            &registry,
            &mut candidate,
            EditOp::Destroy,
            &p("/system/hostname"),
            None,
            None,
        )
        .unwrap();

        // delete of a missing node errors
        let err = candidate_edit(
            &registry,
            &mut candidate,
            EditOp::Delete,
            &p("/system/hostname"),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TrellisError::NotFound { .. }));
    }

    #[test]
    fn test_replace_swaps_subtree() {
        let registry = registry();
        let mut candidate = fresh_candidate();
        candidate
            .tree
            .set_leaf(&p("/policy[seq='10']/action"), DataValue::from("permit"));

        candidate_edit(
            &registry,
            &mut candidate,
            EditOp::Replace,
            &p("/policy[seq='10']"),
            None,
            None,
        )
        .unwrap();

        // Old children are gone; the entry itself remains
        assert!(candidate.tree.contains(&p("/policy[seq='10']")));
        assert!(!candidate.tree.contains(&p("/policy[seq='10']/action")));
    }

    #[test]
    fn test_move_requires_user_ordered_list() {
        let registry = registry();
        let mut candidate = fresh_candidate();
        candidate.tree.ensure(&p("/policy[seq='10']"));
        candidate.tree.ensure(&p("/policy[seq='20']"));

        candidate_edit(
            &registry,
            &mut candidate,
            EditOp::Move,
            &p("/policy[seq='20']"),
            None,
            Some(InsertPosition::First),
        )
        .unwrap();
        let root = candidate.tree.root();
        assert_eq!(root.children[0].keys[0].1, "20");

        // Moving a leaf is rejected
        let err = candidate_edit(
            &registry,
            &mut candidate,
            EditOp::Move,
            &p("/system/hostname"),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TrellisError::OperationNotAllowed { .. }));
    }

    #[test]
    fn test_edits_rejected_on_operational_nodes() {
        let registry = registry();
        let mut candidate = fresh_candidate();
        let err = candidate_edit(
            &registry,
            &mut candidate,
            EditOp::CreateMerge,
            &p("/system/uptime"),
            Some(DataValue::from(10i64)),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TrellisError::OperationNotAllowed { .. }));
    }

    #[test]
    fn test_batch_edit_stops_at_first_failure() {
        let registry = registry();
        let mut candidate = fresh_candidate();

        let edits = vec![
            ConfigEdit::new("/system/hostname", EditOp::CreateMerge)
                .with_value(DataValue::from("r1")),
            ConfigEdit::new("/system/bogus", EditOp::CreateMerge),
            ConfigEdit::new("/system/hostname", EditOp::Modify)
                .with_value(DataValue::from("r2")),
        ];
        let err = edit_config_changes(&registry, &mut candidate, &edits).unwrap_err();
        assert!(matches!(err, TrellisError::NotFound { .. }));

        // First edit landed, third never ran
        assert_eq!(
            candidate.tree.get_value(&p("/system/hostname")),
            Some(&DataValue::String("r1".to_string()))
        );
    }

    #[test]
    fn test_move_after_named_entry() {
        let registry = registry();
        let mut candidate = fresh_candidate();
        for seq in ["10", "20", "30"] {
            candidate
                .tree
                .ensure(&p(&format!("/policy[seq='{}']", seq)));
        }

        candidate_edit(
            &registry,
            &mut candidate,
            EditOp::Move,
            &p("/policy[seq='10']"),
            None,
            Some(InsertPosition::After(PathSegment::with_keys(
                "policy",
                vec![("seq".to_string(), "30".to_string())],
            ))),
        )
        .unwrap();

        let order: Vec<String> = candidate
            .tree
            .root()
            .children
            .iter()
            .map(|c| c.keys[0].1.clone())
            .collect();
        assert_eq!(order, vec!["20", "30", "10"]);
    }
}
