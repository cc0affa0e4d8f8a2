//! Node registry: the static map from schema positions to callback sets,
//! priorities, and dependency links
//!
//! Built once at startup from the full compiled schema plus the handler
//! registrations contributed by per-protocol integrations; immutable and
//! shared read-only afterwards. Dependencies between nodes live in a side
//! table so the nodes themselves stay frozen.

pub mod handler;
pub mod node;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::errors::{Result, TrellisError};
use crate::model::path::Path;
pub use handler::{
    Capability, ConfigArgs, EntryHandle, Event, NodeHandler, NoopHandler, Resource,
};
pub use node::{SchemaDef, SchemaNode, SchemaNodeDef, SchemaNodeKind, DEFAULT_PRIORITY};

/// A handler registration contributed by a protocol integration
pub struct HandlerRegistration {
    /// Schema path the handler is bound to
    pub path: String,
    /// Processing priority; defaults to [`DEFAULT_PRIORITY`]
    pub priority: u32,
    pub handler: Arc<dyn NodeHandler>,
}

impl HandlerRegistration {
    pub fn new(path: &str, handler: Arc<dyn NodeHandler>) -> Self {
        Self {
            path: path.to_string(),
            priority: DEFAULT_PRIORITY,
            handler,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Resolver pair for a declared node dependency
pub struct DependencyResolvers {
    /// Map a dependant data path to the data path it depends on
    pub dependency_path: Box<dyn Fn(&Path) -> Path + Send + Sync>,
    /// Map a dependency data path to the dependant data path
    pub dependant_path: Box<dyn Fn(&Path) -> Path + Send + Sync>,
}

/// A dependency link between two schema positions
pub struct Dependency {
    pub dependency_schema_path: String,
    pub resolvers: DependencyResolvers,
}

/// The static schema-node registry
pub struct SchemaRegistry {
    nodes: HashMap<String, Arc<SchemaNode>>,
    /// Schema paths in declaration (document) order
    order: Vec<String>,
    /// Dependencies keyed by dependant schema path
    dependencies: HashMap<String, Dependency>,
}

impl SchemaRegistry {
    /// Build the registry by walking the full compiled schema.
    ///
    /// Definitions must list parents before children. Handler registrations
    /// bind by schema path; a registration for an unknown path is an error.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for malformed definition paths, `Inconsistency`
    /// for an orphaned definition or duplicate path, and `NotFound` for a
    /// registration naming an unknown schema position.
    pub fn build(def: SchemaDef, registrations: Vec<HandlerRegistration>) -> Result<Self> {
        struct Building {
            def: SchemaNodeDef,
            parent: Option<String>,
            parent_list: Option<String>,
            children: Vec<String>,
            priority: u32,
            handler: Option<Arc<dyn NodeHandler>>,
        }

        let mut building: HashMap<String, Building> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for node_def in def.nodes {
            let parsed = Path::parse(&node_def.path)?;
            let canonical = parsed.schema_string();
            if parsed.is_root() || building.contains_key(&canonical) {
                return Err(TrellisError::Inconsistency {
                    path: canonical,
                    message: "duplicate or empty schema path".to_string(),
                });
            }
            let parent_path = parsed
                .parent()
                .filter(|p| !p.is_root())
                .map(|p| p.schema_string());
            let (parent, parent_list) = match parent_path {
                Some(pp) => {
                    let parent_entry =
                        building
                            .get(&pp)
                            .ok_or_else(|| TrellisError::Inconsistency {
                                path: canonical.clone(),
                                message: format!("parent {} not declared before child", pp),
                            })?;
                    let parent_list = if parent_entry.def.kind == SchemaNodeKind::List {
                        Some(pp.clone())
                    } else {
                        parent_entry.parent_list.clone()
                    };
                    (Some(pp), parent_list)
                }
                None => (None, None),
            };
            if let Some(ref pp) = parent {
                if let Some(parent_entry) = building.get_mut(pp) {
                    parent_entry.children.push(canonical.clone());
                }
            }
            order.push(canonical.clone());
            building.insert(
                canonical,
                Building {
                    def: node_def,
                    parent,
                    parent_list,
                    children: Vec::new(),
                    priority: DEFAULT_PRIORITY,
                    handler: None,
                },
            );
        }

        for registration in registrations {
            let parsed = Path::parse(&registration.path)?;
            let canonical = parsed.schema_string();
            let entry = building
                .get_mut(&canonical)
                .ok_or_else(|| TrellisError::NotFound {
                    path: canonical.clone(),
                })?;
            entry.priority = registration.priority;
            entry.handler = Some(registration.handler);
        }

        // config_only holds when a node and its whole subtree bear config;
        // children appear after parents in `order`, so compute in reverse.
        let mut config_only: HashMap<String, bool> = HashMap::new();
        for path in order.iter().rev() {
            let entry = &building[path];
            let own = entry.def.config;
            let subtree = own
                && entry
                    .children
                    .iter()
                    .all(|c| *config_only.get(c).unwrap_or(&false));
            config_only.insert(path.clone(), subtree);
        }

        // bulk-get propagates downward from the declaring handler
        let mut has_bulk_get: HashMap<String, bool> = HashMap::new();
        for path in &order {
            let entry = &building[path];
            let own = entry
                .handler
                .as_ref()
                .map(|h| h.capabilities().contains(&Capability::GetTree))
                .unwrap_or(false);
            let inherited = entry
                .parent
                .as_ref()
                .map(|p| *has_bulk_get.get(p).unwrap_or(&false))
                .unwrap_or(false);
            has_bulk_get.insert(path.clone(), own || inherited);
        }

        let mut nodes: HashMap<String, Arc<SchemaNode>> = HashMap::new();
        for path in &order {
            let Some(entry) = building.remove(path) else {
                continue;
            };
            let keyless_list =
                entry.def.kind == SchemaNodeKind::List && entry.def.keys.is_empty();
            nodes.insert(
                path.clone(),
                Arc::new(SchemaNode {
                    path: path.clone(),
                    kind: entry.def.kind,
                    config: entry.def.config,
                    priority: entry.priority,
                    keys: entry.def.keys,
                    ordered_by_user: entry.def.ordered_by_user,
                    config_only: config_only[path],
                    keyless_list,
                    ignore_config_callbacks: entry.def.ignore_config_callbacks,
                    has_bulk_get: has_bulk_get[path],
                    parent: entry.parent,
                    parent_list: entry.parent_list,
                    children: entry.children,
                    handler: entry.handler,
                }),
            );
        }

        Ok(Self {
            nodes,
            order,
            dependencies: HashMap::new(),
        })
    }

    /// Find the schema node for a data or schema path (predicates stripped)
    pub fn find(&self, path: &Path) -> Option<Arc<SchemaNode>> {
        self.nodes.get(&path.schema_string()).cloned()
    }

    /// Find by schema-path string
    pub fn find_str(&self, schema_path: &str) -> Option<Arc<SchemaNode>> {
        self.nodes.get(schema_path).cloned()
    }

    /// All schema nodes matching a pattern (`*` wildcards allowed), in
    /// schema order
    pub fn find_all(&self, pattern: &Path) -> Vec<Arc<SchemaNode>> {
        self.order
            .iter()
            .filter_map(|p| {
                let node = self.nodes.get(p)?;
                let schema_path = Path::parse(p).ok()?;
                schema_path.matches_pattern(pattern).then(|| node.clone())
            })
            .collect()
    }

    /// All schema nodes in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SchemaNode>> {
        self.order.iter().filter_map(|p| self.nodes.get(p))
    }

    /// Child schema nodes of a position, in schema order
    pub fn children_of(&self, node: &SchemaNode) -> Vec<Arc<SchemaNode>> {
        node.children
            .iter()
            .filter_map(|c| self.nodes.get(c).cloned())
            .collect()
    }

    /// Declare that `dependant_path` depends on the existence of
    /// `dependency_path`, with resolvers mapping data paths both ways.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if either schema path is unknown.
    pub fn set_dependency(
        &mut self,
        dependency_path: &str,
        dependant_path: &str,
        resolvers: DependencyResolvers,
    ) -> Result<()> {
        for p in [dependency_path, dependant_path] {
            let canonical = Path::parse(p)?.schema_string();
            if !self.nodes.contains_key(&canonical) {
                return Err(TrellisError::NotFound { path: canonical });
            }
        }
        let dependency_schema_path = Path::parse(dependency_path)?.schema_string();
        let dependant = Path::parse(dependant_path)?.schema_string();
        self.dependencies.insert(
            dependant,
            Dependency {
                dependency_schema_path,
                resolvers,
            },
        );
        Ok(())
    }

    /// The dependency declared for a schema position, if any
    pub fn dependency_for(&self, node: &SchemaNode) -> Option<&Dependency> {
        self.dependencies.get(&node.path)
    }

    pub fn has_dependency(&self, node: &SchemaNode) -> bool {
        self.dependencies.contains_key(&node.path)
    }

    /// Invoke the RPC or action registered at a schema position.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown path and `OperationNotAllowed`
    /// when the position is not an rpc or lacks the capability.
    pub fn invoke_rpc(
        &self,
        path: &Path,
        input: &crate::model::tree::DataNode,
    ) -> Result<crate::model::tree::DataNode> {
        let node = self.find(path).ok_or_else(|| TrellisError::NotFound {
            path: path.to_string(),
        })?;
        if node.kind != SchemaNodeKind::Rpc || !node.has_capability(Capability::Rpc) {
            return Err(TrellisError::OperationNotAllowed {
                operation: "rpc".to_string(),
                path: node.path.clone(),
            });
        }
        match &node.handler {
            Some(handler) => handler.rpc(path, input),
            None => Err(TrellisError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Deliver a received notification to the handler registered at its
    /// schema position, if any declares the capability.
    pub fn deliver_notification(&self, path: &Path, tree: &crate::model::tree::DataNode) {
        if let Some(node) = self.find(path) {
            if node.has_capability(Capability::Notify) {
                if let Some(handler) = &node.handler {
                    handler.notify(path, tree);
                }
            }
        }
    }

    /// Verify every schema node carries its mandatory callbacks.
    ///
    /// Config nodes need create/destroy (leaves: modify); state leaves need
    /// get-element unless a bulk-get ancestor covers them; state lists need
    /// iteration (and key support unless keyless). Superfluous callbacks
    /// (e.g. move on a non-user-ordered node) are logged and tolerated.
    ///
    /// # Errors
    ///
    /// Returns `Inconsistency` naming every missing mandatory callback.
    pub fn validate_all(&self) -> Result<()> {
        let mut missing: Vec<String> = Vec::new();

        for node in self.iter() {
            if node.has_capability(Capability::Move) && !node.ordered_by_user {
                warn!(
                    xpath = node.path.as_str(),
                    "superfluous move callback on non-user-ordered node"
                );
            }

            match (node.config && !node.ignore_config_callbacks, node.kind) {
                (true, SchemaNodeKind::Leaf) => {
                    if !node.has_capability(Capability::Modify) {
                        missing.push(format!("{}: modify", node.path));
                    }
                }
                (true, SchemaNodeKind::Container)
                | (true, SchemaNodeKind::List)
                | (true, SchemaNodeKind::LeafList) => {
                    if !node.has_capability(Capability::Create) {
                        missing.push(format!("{}: create", node.path));
                    }
                    if !node.has_capability(Capability::Destroy) {
                        missing.push(format!("{}: destroy", node.path));
                    }
                }
                _ => {}
            }

            if !node.config && !node.has_bulk_get {
                match node.kind {
                    SchemaNodeKind::Leaf => {
                        if !node.has_capability(Capability::GetElem) {
                            missing.push(format!("{}: get_elem", node.path));
                        }
                    }
                    SchemaNodeKind::List | SchemaNodeKind::LeafList => {
                        if !node.has_capability(Capability::GetNext) {
                            missing.push(format!("{}: get_next", node.path));
                        }
                        if node.kind == SchemaNodeKind::List && !node.keyless_list {
                            if !node.has_capability(Capability::GetKeys) {
                                missing.push(format!("{}: get_keys", node.path));
                            }
                            if !node.has_capability(Capability::LookupEntry) {
                                missing.push(format!("{}: lookup_entry", node.path));
                            }
                        }
                    }
                    _ => {}
                }
            }

            if node.kind == SchemaNodeKind::Rpc && !node.has_capability(Capability::Rpc) {
                missing.push(format!("{}: rpc", node.path));
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(TrellisError::Inconsistency {
                path: "/".to_string(),
                message: format!("missing mandatory callbacks: {}", missing.join(", ")),
            })
        }
    }
}
