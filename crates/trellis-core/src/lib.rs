//! Trellis Core - configuration-transaction engine for a routing-daemon
//! management plane
//!
//! This crate provides the control logic layered above a hierarchical,
//! schema-typed configuration tree:
//! - Schema-node registry with per-node callback sets and priorities
//! - Ordered diff computation between configuration snapshots
//! - Multi-phase commit protocol (validate/prepare/abort/apply) with
//!   per-node callback dispatch and exactly-once resource release
//! - Single-writer locking and candidate rebasing onto newer running
//!   configurations
//! - Cooperative, cancellable operational-state walks
//! - Selector-based notification filtering

pub mod diff;
pub mod edit;
pub mod errors;
pub mod lock;
pub mod logging_facility;
pub mod model;
pub mod notif;
pub mod schema;
pub mod transaction;
pub mod walk;

// Re-export commonly used types
pub use diff::{apply_changes, compute_changes, ChangeEntry, ChangeOp, ChangeSet};
pub use errors::{Result, TrellisError};
pub use lock::{Candidate, LockManager, LockOwner};
pub use model::{ConfigTree, DataNode, DataValue, Path, PathSegment};
pub use schema::{
    Capability, EntryHandle, Event, HandlerRegistration, NodeHandler, SchemaDef, SchemaNode,
    SchemaNodeDef, SchemaNodeKind, SchemaRegistry,
};
pub use transaction::{
    ClientKind, CommitEngine, CommitOptions, ConfigStore, Phase, Transaction, TxContext,
};
pub use walk::{OperWalk, WalkEvent, WalkFlags, WalkHandle, WalkStatus};
