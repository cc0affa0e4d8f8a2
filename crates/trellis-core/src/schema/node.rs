//! Schema nodes: immutable descriptors for every position in the compiled
//! configuration/state schema
//!
//! One [`SchemaNode`] exists per schema position, created once at registry
//! build time and shared read-only (`Arc`) across all transactions and
//! walks for the life of the process.

use std::sync::Arc;

use crate::schema::handler::{Capability, NodeHandler};

/// Default callback priority; lower priorities are processed first
pub const DEFAULT_PRIORITY: u32 = u32::MAX / 2;

/// The role of a schema position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaNodeKind {
    Container,
    List,
    Leaf,
    LeafList,
    Rpc,
    Notification,
}

impl std::fmt::Display for SchemaNodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchemaNodeKind::Container => "container",
            SchemaNodeKind::List => "list",
            SchemaNodeKind::Leaf => "leaf",
            SchemaNodeKind::LeafList => "leaf-list",
            SchemaNodeKind::Rpc => "rpc",
            SchemaNodeKind::Notification => "notification",
        };
        write!(f, "{}", name)
    }
}

/// One immutable schema position with its registered callback set
pub struct SchemaNode {
    /// Canonical schema path (no predicates), e.g. `/routing/rib/route`
    pub path: String,
    pub kind: SchemaNodeKind,
    /// Whether this position bears configuration data
    pub config: bool,
    /// Processing priority; lower values are dispatched first
    pub priority: u32,
    /// Declared list keys, in key order; empty for keyless lists
    pub keys: Vec<String>,
    /// List entries keep user-assigned ordering (moves are meaningful)
    pub ordered_by_user: bool,
    /// The subtree under this node contains only configuration data
    pub config_only: bool,
    /// List without key leaves
    pub keyless_list: bool,
    /// Skip config-callback dispatch for this node (entries still drive
    /// tree replay)
    pub ignore_config_callbacks: bool,
    /// An ancestor-or-self handler materializes this subtree in bulk
    pub has_bulk_get: bool,
    /// Schema path of the logical parent, if any
    pub parent: Option<String>,
    /// Schema path of the nearest ancestor list, if any
    pub parent_list: Option<String>,
    /// Child schema paths, in schema order
    pub children: Vec<String>,
    /// Registered callback implementation, if any
    pub handler: Option<Arc<dyn NodeHandler>>,
}

impl SchemaNode {
    /// Whether the registered handler declares the given capability
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.handler
            .as_ref()
            .map(|h| h.capabilities().contains(&cap))
            .unwrap_or(false)
    }

    /// Whether this node's changes go through config-callback dispatch
    pub fn dispatches_config_callbacks(&self) -> bool {
        self.config && !self.ignore_config_callbacks
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, SchemaNodeKind::List | SchemaNodeKind::LeafList)
    }

    pub fn is_leafy(&self) -> bool {
        matches!(self.kind, SchemaNodeKind::Leaf | SchemaNodeKind::LeafList)
    }
}

impl std::fmt::Debug for SchemaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaNode")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("priority", &self.priority)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

/// Declarative input for one schema position, consumed by registry build
#[derive(Debug, Clone)]
pub struct SchemaNodeDef {
    pub path: String,
    pub kind: SchemaNodeKind,
    pub config: bool,
    pub keys: Vec<String>,
    pub ordered_by_user: bool,
    pub ignore_config_callbacks: bool,
}

impl SchemaNodeDef {
    pub fn container(path: &str) -> Self {
        Self::new(path, SchemaNodeKind::Container)
    }

    pub fn list(path: &str, keys: &[&str]) -> Self {
        let mut def = Self::new(path, SchemaNodeKind::List);
        def.keys = keys.iter().map(|k| k.to_string()).collect();
        def
    }

    pub fn leaf(path: &str) -> Self {
        Self::new(path, SchemaNodeKind::Leaf)
    }

    pub fn leaf_list(path: &str) -> Self {
        Self::new(path, SchemaNodeKind::LeafList)
    }

    pub fn rpc(path: &str) -> Self {
        let mut def = Self::new(path, SchemaNodeKind::Rpc);
        def.config = false;
        def
    }

    pub fn notification(path: &str) -> Self {
        let mut def = Self::new(path, SchemaNodeKind::Notification);
        def.config = false;
        def
    }

    fn new(path: &str, kind: SchemaNodeKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
            config: true,
            keys: Vec::new(),
            ordered_by_user: false,
            ignore_config_callbacks: false,
        }
    }

    /// Mark the position operational-only (no configuration data)
    pub fn operational(mut self) -> Self {
        self.config = false;
        self
    }

    /// Mark list entries as keeping user-assigned ordering
    pub fn ordered_by_user(mut self) -> Self {
        self.ordered_by_user = true;
        self
    }

    /// Skip config-callback dispatch for this position
    pub fn ignore_config_callbacks(mut self) -> Self {
        self.ignore_config_callbacks = true;
        self
    }
}

/// The full compiled schema, in document order (parents before children)
#[derive(Debug, Clone, Default)]
pub struct SchemaDef {
    pub nodes: Vec<SchemaNodeDef>,
}

impl SchemaDef {
    pub fn new(nodes: Vec<SchemaNodeDef>) -> Self {
        Self { nodes }
    }
}
