//! Operational-state walk engine
//!
//! A schema-driven, cancellable, batchable traversal collecting live state
//! through each node's operational callbacks: `get_next` iterates
//! (leaf-)list entries, `get_keys`/`lookup_entry` support keyed positions,
//! and `get_elem`/`get_tree` materialize values. The walk is an explicit
//! state machine holding its own frame stack, so a suspended walk is just a
//! value waiting for the next [`OperWalk::run`] call.
//!
//! Cooperative contract:
//! - with batching, the walk suspends after a bounded amount of work and
//!   invokes `on_finish` with the partial tree and a yielded status; the
//!   caller resumes by calling `run` again, or abandons the walk;
//! - cancellation is requested through a [`WalkHandle`] (safe from outside
//!   the walk's call stack) and takes effect at the next step boundary,
//!   never mid-callback; a cancelled walk never calls `on_finish` and
//!   issues no further `get_next`, but still invokes `list_entry_done`
//!   for every open list level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::errors::{Result, TrellisError};
use crate::model::path::{Path, PathSegment};
use crate::model::tree::DataNode;
use crate::model::value::DataValue;
use crate::schema::{Capability, EntryHandle, SchemaNode, SchemaNodeKind, SchemaRegistry};

/// Traversal flags
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkFlags {
    /// Visit only the immediate children of the starting path
    pub norecurse: bool,
}

/// How a `run` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStatus {
    /// Traversal complete; `on_finish` received the full result
    Finished,
    /// Batch budget exhausted; call `run` again to resume
    Yielded,
    /// Cancelled via [`WalkHandle::cancel`]; `on_finish` was never called
    Cancelled,
}

/// Status delivered to `on_finish`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEvent<'a> {
    /// Partial result at a batch boundary
    Yielded,
    /// Complete result at natural termination
    Done,
    /// The walk failed, or a yield was refused; final cleanup call
    Failed(&'a TrellisError),
}

/// Cancellation handle for an in-progress walk; clonable and safe to use
/// from outside the walk's own call stack
#[derive(Debug, Clone)]
pub struct WalkHandle {
    cancelled: Arc<AtomicBool>,
}

impl WalkHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct NodeFrame {
    /// Child schema positions still to visit, relative to `data_path`
    children: Vec<Arc<SchemaNode>>,
    next_child: usize,
    data_path: Path,
    parent_entry: Option<EntryHandle>,
}

struct ListFrame {
    schema: Arc<SchemaNode>,
    /// Path of the list position (no entry keys)
    data_path: Path,
    parent_entry: Option<EntryHandle>,
    current: Option<EntryHandle>,
}

enum Frame {
    Node(NodeFrame),
    List(ListFrame),
}

/// A resumable operational-state traversal
pub struct OperWalk<'cb> {
    registry: Arc<SchemaRegistry>,
    flags: WalkFlags,
    /// Work units per slice; `None` disables batching
    batch: Option<usize>,
    cancelled: Arc<AtomicBool>,
    stack: Vec<Frame>,
    /// Entries opened while resolving the pattern prefix, released on
    /// teardown (innermost last)
    opened_prefix: Vec<(Arc<SchemaNode>, Option<EntryHandle>, EntryHandle)>,
    result: DataNode,
    work: usize,
    done: bool,
    on_data: Box<dyn FnMut(&Path, &DataValue) + 'cb>,
    on_finish: Box<dyn FnMut(&DataNode, WalkEvent<'_>) -> Result<()> + 'cb>,
}

impl<'cb> OperWalk<'cb> {
    /// Start a walk over the schema positions under `pattern` (the whole
    /// tree when `None`).
    ///
    /// Intermediate list segments of the pattern must carry keys, which are
    /// resolved through `lookup_entry`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the pattern names an unknown schema position or a
    ///   list entry the backend cannot resolve
    /// - `InvalidPath`: the pattern descends through a leaf, or through a
    ///   list without keys
    pub fn new(
        registry: Arc<SchemaRegistry>,
        pattern: Option<&Path>,
        flags: WalkFlags,
        batch: Option<usize>,
        on_data: impl FnMut(&Path, &DataValue) + 'cb,
        on_finish: impl FnMut(&DataNode, WalkEvent<'_>) -> Result<()> + 'cb,
    ) -> Result<Self> {
        let mut walk = Self {
            registry,
            flags,
            batch,
            cancelled: Arc::new(AtomicBool::new(false)),
            stack: Vec::new(),
            opened_prefix: Vec::new(),
            result: DataNode::new(""),
            work: 0,
            done: false,
            on_data: Box::new(on_data),
            on_finish: Box::new(on_finish),
        };
        walk.resolve_start(pattern)?;
        Ok(walk)
    }

    /// Cancellation handle for this walk
    pub fn handle(&self) -> WalkHandle {
        WalkHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    fn resolve_start(&mut self, pattern: Option<&Path>) -> Result<()> {
        let roots: Vec<Arc<SchemaNode>> = self
            .registry
            .iter()
            .filter(|n| n.parent.is_none())
            .cloned()
            .collect();

        let pattern = match pattern {
            None => {
                self.stack.push(Frame::Node(NodeFrame {
                    children: roots,
                    next_child: 0,
                    data_path: Path::root(),
                    parent_entry: None,
                }));
                return Ok(());
            }
            Some(p) if p.is_root() => {
                self.stack.push(Frame::Node(NodeFrame {
                    children: roots,
                    next_child: 0,
                    data_path: Path::root(),
                    parent_entry: None,
                }));
                return Ok(());
            }
            Some(p) => p,
        };

        let mut data_path = Path::root();
        let mut parent_entry: Option<EntryHandle> = None;

        for (idx, seg) in pattern.segments.iter().enumerate() {
            let prefix = Path {
                segments: pattern.segments[..idx + 1].to_vec(),
            };
            let schema = self
                .registry
                .find(&prefix)
                .ok_or_else(|| TrellisError::NotFound {
                    path: prefix.to_string(),
                })?;
            let last = idx == pattern.segments.len() - 1;

            if last {
                match schema.kind {
                    SchemaNodeKind::Container => {
                        let children = self.registry.children_of(&schema);
                        self.stack.push(Frame::Node(NodeFrame {
                            children,
                            next_child: 0,
                            data_path: data_path.join(seg.clone()),
                            parent_entry,
                        }));
                    }
                    SchemaNodeKind::List if !seg.keys.is_empty() => {
                        let entry = self.lookup_prefix_entry(&schema, parent_entry, seg)?;
                        let children = self.registry.children_of(&schema);
                        self.stack.push(Frame::Node(NodeFrame {
                            children,
                            next_child: 0,
                            data_path: data_path.join(seg.clone()),
                            parent_entry: Some(entry),
                        }));
                    }
                    SchemaNodeKind::List | SchemaNodeKind::LeafList => {
                        self.stack.push(Frame::List(ListFrame {
                            schema,
                            data_path: data_path.join(PathSegment::new(seg.name.clone())),
                            parent_entry,
                            current: None,
                        }));
                    }
                    SchemaNodeKind::Leaf => {
                        self.stack.push(Frame::Node(NodeFrame {
                            children: vec![schema],
                            next_child: 0,
                            data_path,
                            parent_entry,
                        }));
                    }
                    SchemaNodeKind::Rpc | SchemaNodeKind::Notification => {
                        return Err(TrellisError::InvalidPath {
                            path: pattern.to_string(),
                            message: "cannot walk an rpc or notification".to_string(),
                        });
                    }
                }
                return Ok(());
            }

            match schema.kind {
                SchemaNodeKind::Container => {
                    data_path = data_path.join(seg.clone());
                }
                SchemaNodeKind::List => {
                    if seg.keys.is_empty() {
                        return Err(TrellisError::InvalidPath {
                            path: pattern.to_string(),
                            message: format!(
                                "intermediate list segment {} requires keys",
                                seg.name
                            ),
                        });
                    }
                    let entry = self.lookup_prefix_entry(&schema, parent_entry, seg)?;
                    parent_entry = Some(entry);
                    data_path = data_path.join(seg.clone());
                }
                _ => {
                    return Err(TrellisError::InvalidPath {
                        path: pattern.to_string(),
                        message: format!("cannot descend through {}", schema.kind),
                    });
                }
            }
        }
        Ok(())
    }

    fn lookup_prefix_entry(
        &mut self,
        schema: &Arc<SchemaNode>,
        parent_entry: Option<EntryHandle>,
        seg: &PathSegment,
    ) -> Result<EntryHandle> {
        let handler = schema
            .handler
            .as_ref()
            .ok_or_else(|| TrellisError::NotFound {
                path: schema.path.clone(),
            })?;
        let entry = handler
            .lookup_entry(parent_entry, &seg.keys)
            .ok_or_else(|| TrellisError::NotFound {
                path: format!("{}{}", schema.path, render_keys(&seg.keys)),
            })?;
        self.opened_prefix
            .push((schema.clone(), parent_entry, entry));
        Ok(entry)
    }

    /// Drive the walk until it finishes, yields, or observes cancellation.
    ///
    /// # Errors
    ///
    /// Callback failures and a refused yield terminate the walk; the error
    /// is delivered to `on_finish` (as `WalkEvent::Failed`) and returned.
    pub fn run(&mut self) -> Result<WalkStatus> {
        if self.done {
            return Err(TrellisError::Internal {
                message: "walk already finished".to_string(),
            });
        }

        loop {
            // The only suspension/cancellation points are step boundaries.
            if self.cancelled.load(Ordering::Acquire) {
                self.teardown();
                self.done = true;
                debug!("walk cancelled");
                return Ok(WalkStatus::Cancelled);
            }

            if self.stack.is_empty() {
                self.release_prefix();
                self.done = true;
                let status = (self.on_finish)(&self.result, WalkEvent::Done);
                if let Err(err) = status {
                    return Err(err);
                }
                return Ok(WalkStatus::Finished);
            }

            if let Some(budget) = self.batch {
                if self.work >= budget {
                    self.work = 0;
                    if let Err(err) = (self.on_finish)(&self.result, WalkEvent::Yielded) {
                        // A refused yield aborts the remainder; one final
                        // call lets the consumer clean up.
                        let _ = (self.on_finish)(&self.result, WalkEvent::Failed(&err));
                        self.teardown();
                        self.done = true;
                        return Err(err);
                    }
                    return Ok(WalkStatus::Yielded);
                }
            }

            if let Err(err) = self.step() {
                let _ = (self.on_finish)(&self.result, WalkEvent::Failed(&err));
                self.teardown();
                self.done = true;
                return Err(err);
            }
        }
    }

    /// Process one unit of traversal
    fn step(&mut self) -> Result<()> {
        let frame = match self.stack.last_mut() {
            Some(frame) => frame,
            None => return Ok(()),
        };

        match frame {
            Frame::Node(node_frame) => {
                if node_frame.next_child >= node_frame.children.len() {
                    self.stack.pop();
                    return Ok(());
                }
                let child = node_frame.children[node_frame.next_child].clone();
                node_frame.next_child += 1;
                let data_path = node_frame.data_path.clone();
                let parent_entry = node_frame.parent_entry;
                self.visit_child(&child, &data_path, parent_entry)
            }
            Frame::List(list_frame) => {
                let schema = list_frame.schema.clone();
                let handler =
                    schema
                        .handler
                        .as_ref()
                        .ok_or_else(|| TrellisError::Inconsistency {
                            path: schema.path.clone(),
                            message: "list has no handler for iteration".to_string(),
                        })?;
                let next = handler.get_next(list_frame.parent_entry, list_frame.current);
                match next {
                    None => {
                        self.stack.pop();
                        Ok(())
                    }
                    Some(entry) => {
                        list_frame.current = Some(entry);
                        let data_path = list_frame.data_path.clone();
                        let parent_entry = list_frame.parent_entry;
                        self.work += 1;
                        if schema.kind == SchemaNodeKind::LeafList {
                            self.visit_leaf_list_entry(&schema, &data_path, entry)
                        } else {
                            self.visit_list_entry(&schema, &data_path, parent_entry, entry)
                        }
                    }
                }
            }
        }
    }

    fn visit_child(
        &mut self,
        child: &Arc<SchemaNode>,
        data_path: &Path,
        parent_entry: Option<EntryHandle>,
    ) -> Result<()> {
        // Config-only subtrees hold no operational state
        if child.config_only {
            return Ok(());
        }
        let name = child
            .path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let child_path = data_path.join(PathSegment::new(name));

        match child.kind {
            SchemaNodeKind::Leaf => {
                if child.config {
                    return Ok(());
                }
                if let Some(handler) = &child.handler {
                    if let Some(value) = handler.get_elem(&child_path, parent_entry) {
                        let node = self.result.ensure(&child_path);
                        node.value = Some(value.clone());
                        (self.on_data)(&child_path, &value);
                        self.work += 1;
                    }
                }
                Ok(())
            }
            SchemaNodeKind::Container => {
                // The starting path is always a frame, so any container
                // reached here is below an immediate child.
                if self.flags.norecurse {
                    return Ok(());
                }
                if child.has_capability(Capability::GetTree) {
                    return self.graft_subtree(child, &child_path);
                }
                let children = self.registry.children_of(child);
                self.stack.push(Frame::Node(NodeFrame {
                    children,
                    next_child: 0,
                    data_path: child_path,
                    parent_entry,
                }));
                Ok(())
            }
            SchemaNodeKind::List | SchemaNodeKind::LeafList => {
                if self.flags.norecurse {
                    return Ok(());
                }
                if child.has_capability(Capability::GetTree) {
                    return self.graft_subtree(child, &child_path);
                }
                self.stack.push(Frame::List(ListFrame {
                    schema: child.clone(),
                    data_path: child_path,
                    parent_entry,
                    current: None,
                }));
                Ok(())
            }
            SchemaNodeKind::Rpc | SchemaNodeKind::Notification => Ok(()),
        }
    }

    fn visit_list_entry(
        &mut self,
        schema: &Arc<SchemaNode>,
        list_path: &Path,
        _parent_entry: Option<EntryHandle>,
        entry: EntryHandle,
    ) -> Result<()> {
        let handler = schema
            .handler
            .as_ref()
            .ok_or_else(|| TrellisError::Inconsistency {
                path: schema.path.clone(),
                message: "list has no handler".to_string(),
            })?;

        let keys = if schema.keyless_list {
            Vec::new()
        } else {
            handler.get_keys(entry)?
        };
        let mut entry_path = list_path.parent().unwrap_or_default();
        let list_name = list_path
            .last()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        entry_path = entry_path.join(PathSegment::with_keys(list_name, keys.clone()));

        // Materialize the entry with its key leaves
        let node = self.result.ensure(&entry_path);
        for (key, value) in &keys {
            if node.children.iter().all(|c| &c.name != key) {
                node.children
                    .push(DataNode::new_leaf(key.clone(), DataValue::from(value.as_str())));
            }
        }

        let children = self.registry.children_of(schema);
        // Key leaves are identity, not state; visiting them again through
        // get_elem is the handler's choice to decline.
        self.stack.push(Frame::Node(NodeFrame {
            children,
            next_child: 0,
            data_path: entry_path,
            parent_entry: Some(entry),
        }));
        Ok(())
    }

    fn visit_leaf_list_entry(
        &mut self,
        schema: &Arc<SchemaNode>,
        list_path: &Path,
        entry: EntryHandle,
    ) -> Result<()> {
        if let Some(handler) = &schema.handler {
            if let Some(value) = handler.get_elem(list_path, Some(entry)) {
                let entry_path = {
                    let parent = list_path.parent().unwrap_or_default();
                    let name = list_path
                        .last()
                        .map(|s| s.name.clone())
                        .unwrap_or_default();
                    parent.join(PathSegment::with_keys(
                        name,
                        vec![(".".to_string(), value.to_string())],
                    ))
                };
                self.result.ensure(&entry_path);
                (self.on_data)(&entry_path, &value);
            }
        }
        Ok(())
    }

    fn graft_subtree(&mut self, schema: &Arc<SchemaNode>, data_path: &Path) -> Result<()> {
        let handler = schema
            .handler
            .as_ref()
            .ok_or_else(|| TrellisError::Inconsistency {
                path: schema.path.clone(),
                message: "bulk-get node has no handler".to_string(),
            })?;
        let subtree = handler.get_tree(data_path)?;
        let parent_path = data_path.parent().unwrap_or_default();
        let parent = self.result.ensure(&parent_path);
        parent.children.push(subtree);
        self.work += 1;
        Ok(())
    }

    /// Release every open list level without touching `on_finish`
    fn teardown(&mut self) {
        while let Some(frame) = self.stack.pop() {
            if let Frame::List(list_frame) = frame {
                if let Some(entry) = list_frame.current {
                    if let Some(handler) = &list_frame.schema.handler {
                        handler.list_entry_done(list_frame.parent_entry, entry);
                    }
                }
            }
        }
        self.release_prefix();
    }

    fn release_prefix(&mut self) {
        while let Some((schema, parent_entry, entry)) = self.opened_prefix.pop() {
            if let Some(handler) = &schema.handler {
                handler.list_entry_done(parent_entry, entry);
            }
        }
    }
}

fn render_keys(keys: &[(String, String)]) -> String {
    keys.iter()
        .map(|(k, v)| format!("[{}='{}']", k, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{HandlerRegistration, NodeHandler, SchemaDef, SchemaNodeDef};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Backend exposing `count` neighbor entries with an `address` key and
    /// a `state` leaf, recording every callback
    struct NeighborBackend {
        count: u64,
        get_next_calls: AtomicUsize,
        done_calls: Mutex<Vec<u64>>,
    }

    impl NeighborBackend {
        fn new(count: u64) -> Self {
            Self {
                count,
                get_next_calls: AtomicUsize::new(0),
                done_calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl NodeHandler for NeighborBackend {
        fn capabilities(&self) -> &[Capability] {
            &[
                Capability::GetNext,
                Capability::GetKeys,
                Capability::LookupEntry,
                Capability::ListEntryDone,
                Capability::GetElem,
            ]
        }

        fn get_next(
            &self,
            _parent: Option<EntryHandle>,
            prev: Option<EntryHandle>,
        ) -> Option<EntryHandle> {
            self.get_next_calls.fetch_add(1, Ordering::SeqCst);
            let next = match prev {
                None => 1,
                Some(EntryHandle(n)) => n + 1,
            };
            (next <= self.count).then_some(EntryHandle(next))
        }

        fn get_keys(&self, entry: EntryHandle) -> crate::errors::Result<Vec<(String, String)>> {
            Ok(vec![("address".to_string(), format!("10.0.0.{}", entry.0))])
        }

        fn lookup_entry(
            &self,
            _parent: Option<EntryHandle>,
            keys: &[(String, String)],
        ) -> Option<EntryHandle> {
            let address = keys.iter().find(|(k, _)| k == "address")?.1.clone();
            let suffix: u64 = address.rsplit('.').next()?.parse().ok()?;
            (suffix >= 1 && suffix <= self.count).then_some(EntryHandle(suffix))
        }

        fn list_entry_done(&self, _parent: Option<EntryHandle>, entry: EntryHandle) {
            self.done_calls.lock().unwrap().push(entry.0);
        }

        fn get_elem(&self, path: &Path, list_entry: Option<EntryHandle>) -> Option<DataValue> {
            let entry = list_entry?;
            path.to_string()
                .ends_with("/state")
                .then(|| DataValue::from(format!("up-{}", entry.0)))
        }
    }

    struct StateLeafHandler;
    impl NodeHandler for StateLeafHandler {
        fn capabilities(&self) -> &[Capability] {
            &[Capability::GetElem]
        }
        fn get_elem(&self, _path: &Path, _entry: Option<EntryHandle>) -> Option<DataValue> {
            Some(DataValue::from(42i64))
        }
    }

    fn neighbor_schema() -> SchemaDef {
        SchemaDef::new(vec![
            SchemaNodeDef::container("/bgp"),
            SchemaNodeDef::list("/bgp/neighbor", &["address"]).operational(),
            SchemaNodeDef::leaf("/bgp/neighbor/state").operational(),
            SchemaNodeDef::leaf("/bgp/uptime").operational(),
        ])
    }

    fn build(
        backend: Arc<NeighborBackend>,
    ) -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::build(
                neighbor_schema(),
                vec![
                    HandlerRegistration::new("/bgp/neighbor", backend.clone()),
                    HandlerRegistration::new("/bgp/neighbor/state", backend),
                    HandlerRegistration::new("/bgp/uptime", Arc::new(StateLeafHandler)),
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_full_walk_collects_all_entries() {
        let backend = Arc::new(NeighborBackend::new(3));
        let registry = build(backend);

        let data = Rc::new(RefCell::new(Vec::new()));
        let finished = Rc::new(RefCell::new(0usize));
        let data_ref = data.clone();
        let finished_ref = finished.clone();

        let mut walk = OperWalk::new(
            registry,
            None,
            WalkFlags::default(),
            None,
            move |path, value| {
                data_ref.borrow_mut().push(format!("{} = {}", path, value));
            },
            move |_tree, event| {
                assert!(matches!(event, WalkEvent::Done));
                *finished_ref.borrow_mut() += 1;
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(walk.run().unwrap(), WalkStatus::Finished);
        assert_eq!(*finished.borrow(), 1);

        let collected = data.borrow();
        assert_eq!(collected.len(), 4); // 3 neighbor states + uptime
        assert!(collected
            .contains(&"/bgp/neighbor[address='10.0.0.1']/state = up-1".to_string()));
        assert!(collected.contains(&"/bgp/uptime = 42".to_string()));
    }

    #[test]
    fn test_cancellation_stops_iteration_without_finish() {
        let backend = Arc::new(NeighborBackend::new(100));
        let registry = build(backend.clone());

        let data_count = Rc::new(RefCell::new(0usize));
        let finish_count = Rc::new(RefCell::new(0usize));
        let handle_slot: Rc<RefCell<Option<WalkHandle>>> = Rc::new(RefCell::new(None));

        let data_ref = data_count.clone();
        let handle_ref = handle_slot.clone();
        let finish_ref = finish_count.clone();

        let mut walk = OperWalk::new(
            registry,
            Some(&Path::parse("/bgp/neighbor").unwrap()),
            WalkFlags::default(),
            None,
            move |_path, _value| {
                let mut count = data_ref.borrow_mut();
                *count += 1;
                if *count == 10 {
                    handle_ref.borrow().as_ref().unwrap().cancel();
                }
            },
            move |_tree, _event| {
                *finish_ref.borrow_mut() += 1;
                Ok(())
            },
        )
        .unwrap();
        *handle_slot.borrow_mut() = Some(walk.handle());

        let calls_before_run = backend.get_next_calls.load(Ordering::SeqCst);
        assert_eq!(calls_before_run, 0);
        assert_eq!(walk.run().unwrap(), WalkStatus::Cancelled);

        // Cancelled after the 10th on_data: on_finish never ran, and no
        // get_next was issued past the cancellation point.
        assert_eq!(*data_count.borrow(), 10);
        assert_eq!(*finish_count.borrow(), 0);
        assert_eq!(backend.get_next_calls.load(Ordering::SeqCst), 10);

        // The open list level was released
        assert_eq!(*backend.done_calls.lock().unwrap(), vec![10]);
    }

    #[test]
    fn test_batched_walk_yields_and_resumes() {
        let backend = Arc::new(NeighborBackend::new(6));
        let registry = build(backend);

        let yields = Rc::new(RefCell::new(0usize));
        let dones = Rc::new(RefCell::new(0usize));
        let yields_ref = yields.clone();
        let dones_ref = dones.clone();

        let mut walk = OperWalk::new(
            registry,
            Some(&Path::parse("/bgp/neighbor").unwrap()),
            WalkFlags::default(),
            Some(4),
            |_path, _value| {},
            move |_tree, event| {
                match event {
                    WalkEvent::Yielded => *yields_ref.borrow_mut() += 1,
                    WalkEvent::Done => *dones_ref.borrow_mut() += 1,
                    WalkEvent::Failed(_) => panic!("unexpected failure"),
                }
                Ok(())
            },
        )
        .unwrap();

        let mut statuses = Vec::new();
        loop {
            let status = walk.run().unwrap();
            statuses.push(status);
            if status == WalkStatus::Finished {
                break;
            }
        }
        assert!(statuses.contains(&WalkStatus::Yielded));
        assert_eq!(*statuses.last().unwrap(), WalkStatus::Finished);
        assert!(*yields.borrow() >= 1);
        assert_eq!(*dones.borrow(), 1);
    }

    #[test]
    fn test_refused_yield_aborts_with_final_finish() {
        let backend = Arc::new(NeighborBackend::new(10));
        let registry = build(backend);

        let events = Rc::new(RefCell::new(Vec::new()));
        let events_ref = events.clone();

        let mut walk = OperWalk::new(
            registry,
            Some(&Path::parse("/bgp/neighbor").unwrap()),
            WalkFlags::default(),
            Some(2),
            |_path, _value| {},
            move |_tree, event| {
                match event {
                    WalkEvent::Yielded => {
                        events_ref.borrow_mut().push("yield".to_string());
                        Err(TrellisError::Internal {
                            message: "stop".to_string(),
                        })
                    }
                    WalkEvent::Done => {
                        events_ref.borrow_mut().push("done".to_string());
                        Ok(())
                    }
                    WalkEvent::Failed(err) => {
                        events_ref.borrow_mut().push(format!("failed {}", err.code()));
                        Ok(())
                    }
                }
            },
        )
        .unwrap();

        assert!(walk.run().is_err());
        assert_eq!(
            *events.borrow(),
            vec!["yield".to_string(), "failed ERR_INTERNAL".to_string()]
        );
    }

    #[test]
    fn test_pattern_with_keys_walks_single_entry() {
        let backend = Arc::new(NeighborBackend::new(5));
        let registry = build(backend.clone());

        let data = Rc::new(RefCell::new(Vec::new()));
        let data_ref = data.clone();

        let mut walk = OperWalk::new(
            registry,
            Some(&Path::parse("/bgp/neighbor[address='10.0.0.3']").unwrap()),
            WalkFlags::default(),
            None,
            move |path, value| {
                data_ref.borrow_mut().push(format!("{} = {}", path, value));
            },
            |_tree, _event| Ok(()),
        )
        .unwrap();
        assert_eq!(walk.run().unwrap(), WalkStatus::Finished);

        let collected = data.borrow();
        assert_eq!(collected.len(), 1);
        assert!(collected[0].contains("up-3"));

        // The entry resolved through lookup_entry was released
        assert_eq!(*backend.done_calls.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_norecurse_limits_depth() {
        let backend = Arc::new(NeighborBackend::new(3));
        let registry = build(backend.clone());

        let data = Rc::new(RefCell::new(Vec::new()));
        let data_ref = data.clone();

        let mut walk = OperWalk::new(
            registry,
            Some(&Path::parse("/bgp").unwrap()),
            WalkFlags { norecurse: true },
            None,
            move |path, value| {
                data_ref.borrow_mut().push(format!("{} = {}", path, value));
            },
            |_tree, _event| Ok(()),
        )
        .unwrap();
        assert_eq!(walk.run().unwrap(), WalkStatus::Finished);

        // Immediate leaf children only: uptime, but no neighbor descent
        let collected = data.borrow();
        assert_eq!(collected.len(), 1);
        assert!(collected[0].contains("uptime"));
        assert_eq!(backend.get_next_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_pattern_rejected() {
        let backend = Arc::new(NeighborBackend::new(1));
        let registry = build(backend);
        let result = OperWalk::new(
            registry,
            Some(&Path::parse("/nonexistent").unwrap()),
            WalkFlags::default(),
            None,
            |_path, _value| {},
            |_tree, _event| Ok(()),
        );
        assert!(matches!(result, Err(TrellisError::NotFound { .. })));
    }
}
