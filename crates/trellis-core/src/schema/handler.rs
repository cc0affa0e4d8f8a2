//! Node callback interface
//!
//! Per-protocol integrations plug their behavior into the engine by
//! implementing [`NodeHandler`] for the schema positions they own. A handler
//! declares the capabilities it implements; the dispatcher calls only those
//! present. Default bodies signal an inconsistency so that a misdeclared
//! capability surfaces instead of silently no-oping.
//!
//! Contract (see the transaction machine for the phase protocol):
//! - `Validate` dispatch must be side-effect-free and must not allocate.
//! - A resource allocated during `Prepare` is handed back to the same
//!   callback during `Abort` or `Apply`, exactly one of the two.
//! - `Apply` dispatch must not fail the transaction; errors are logged.

use std::any::Any;

use crate::errors::{Result, TrellisError};
use crate::model::path::Path;
use crate::model::tree::DataNode;
use crate::model::value::DataValue;
use crate::transaction::TxContext;

/// Transaction phase passed to configuration callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Verify the change is valid and applicable; read-only
    Validate,
    /// Allocate every resource required to apply the change
    Prepare,
    /// The transaction failed; release resources allocated in prepare
    Abort,
    /// Apply the change; errors are logged and ignored at this point
    Apply,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Event::Validate => "validate",
            Event::Prepare => "prepare",
            Event::Abort => "abort",
            Event::Apply => "apply",
        };
        write!(f, "{}", name)
    }
}

/// A capability a handler may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Create,
    Modify,
    Destroy,
    Move,
    PreValidate,
    ApplyFinish,
    GetElem,
    GetNext,
    GetKeys,
    LookupEntry,
    ListEntryDone,
    GetTree,
    Rpc,
    Notify,
}

/// Opaque per-change resource allocated in prepare and consumed in
/// apply or abort. Owned by exactly one change entry for the lifetime of
/// one transaction.
pub type Resource = Box<dyn Any + Send>;

/// Opaque handle to a backend list entry.
///
/// Minted by a handler from `get_next`/`lookup_entry`; valid from the
/// producing call until the matching `list_entry_done`. The engine threads
/// handles through the walk without interpreting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(pub u64);

/// Arguments for the four configuration callbacks
pub struct ConfigArgs<'a> {
    pub event: Event,
    pub context: &'a TxContext,
    /// Data path of the node being changed
    pub path: &'a Path,
    /// New value, for leaf creates and modifies
    pub value: Option<&'a DataValue>,
    /// Per-change resource slot; `None` and untouched during validate
    pub resource: &'a mut Option<Resource>,
}

/// Callback set for one schema position.
///
/// All methods have defaults so an implementation only writes what it
/// declares in [`NodeHandler::capabilities`].
pub trait NodeHandler: Send + Sync {
    /// The capabilities this handler implements
    fn capabilities(&self) -> &[Capability];

    /// A node is being created (presence container, list entry, leaf-list
    /// entry, or leaf of type empty)
    fn create(&self, args: ConfigArgs<'_>) -> Result<()> {
        Err(undeclared("create", args.path))
    }

    /// The value of a leaf is being modified. List key leaves never receive
    /// this: a key change is represented as destroy-old + create-new.
    fn modify(&self, args: ConfigArgs<'_>) -> Result<()> {
        Err(undeclared("modify", args.path))
    }

    /// A node is being deleted, together with its entire subtree
    fn destroy(&self, args: ConfigArgs<'_>) -> Result<()> {
        Err(undeclared("destroy", args.path))
    }

    /// A user-ordered (leaf-)list entry is being repositioned
    fn move_entry(&self, args: ConfigArgs<'_>) -> Result<()> {
        Err(undeclared("move", args.path))
    }

    /// Validate a whole subtree before its per-node callbacks run
    fn pre_validate(&self, _context: &TxContext, _path: &Path) -> Result<()> {
        Ok(())
    }

    /// Called once per touched subtree after all per-entry applies
    fn apply_finish(&self, _context: &TxContext, _path: &Path) {}

    /// Operational: the value of a state leaf, or None for absence
    fn get_elem(&self, _path: &Path, _list_entry: Option<EntryHandle>) -> Option<DataValue> {
        None
    }

    /// Operational: next (leaf-)list entry. `prev` is None on the first
    /// call; a None return signals the end of the list.
    fn get_next(
        &self,
        _parent: Option<EntryHandle>,
        _prev: Option<EntryHandle>,
    ) -> Option<EntryHandle> {
        None
    }

    /// Operational: the key leaves of a list entry
    fn get_keys(&self, entry: EntryHandle) -> Result<Vec<(String, String)>> {
        Err(TrellisError::Inconsistency {
            path: String::new(),
            message: format!("get_keys not implemented for entry {:?}", entry),
        })
    }

    /// Operational: resolve a list entry from its keys
    fn lookup_entry(
        &self,
        _parent: Option<EntryHandle>,
        _keys: &[(String, String)],
    ) -> Option<EntryHandle> {
        None
    }

    /// Release any backend resources held by a list entry handle. Invoked
    /// when the engine is done with a handle, including when a walk aborts
    /// before reaching the end of the list.
    fn list_entry_done(&self, _parent: Option<EntryHandle>, _entry: EntryHandle) {}

    /// Operational: materialize this subtree in one call (bulk get)
    fn get_tree(&self, path: &Path) -> Result<DataNode> {
        Err(TrellisError::Inconsistency {
            path: path.to_string(),
            message: "get_tree not implemented".to_string(),
        })
    }

    /// Execute an RPC or action, producing its output tree
    fn rpc(&self, path: &Path, _input: &DataNode) -> Result<DataNode> {
        Err(TrellisError::Inconsistency {
            path: path.to_string(),
            message: "rpc not implemented".to_string(),
        })
    }

    /// A notification for this schema position was received
    fn notify(&self, _path: &Path, _tree: &DataNode) {}
}

fn undeclared(op: &str, path: &Path) -> TrellisError {
    TrellisError::Inconsistency {
        path: path.to_string(),
        message: format!("{} callback invoked but not implemented", op),
    }
}

/// Handler with no capabilities; useful for schema positions whose behavior
/// lives entirely in an ancestor (and in tests)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl NodeHandler for NoopHandler {
    fn capabilities(&self) -> &[Capability] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_handler_declares_nothing() {
        let handler = NoopHandler;
        assert!(handler.capabilities().is_empty());
    }

    #[test]
    fn test_undeclared_callback_is_inconsistency() {
        let handler = NoopHandler;
        let path = Path::parse("/system/hostname").unwrap();
        let ctx = TxContext::default();
        let mut slot = None;
        let result = handler.create(ConfigArgs {
            event: Event::Validate,
            context: &ctx,
            path: &path,
            value: None,
            resource: &mut slot,
        });
        assert!(matches!(
            result,
            Err(TrellisError::Inconsistency { .. })
        ));
    }
}
