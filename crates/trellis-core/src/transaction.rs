//! Configuration transaction state machine
//!
//! This module provides the multi-phase commit protocol over an ordered
//! change set: `pending → validating → preparing → {applying | aborting} →
//! {applied | aborted}`.
//!
//! ## Atomicity Contract
//!
//! - **Validate is read-only**: any validation error discards the
//!   transaction before a single side effect occurs; the running tree and
//!   its version are untouched.
//! - **Prepare is reversible**: a failure at entry k re-invokes every
//!   already-prepared entry (1..k-1, same ascending order) with
//!   `Event::Abort` so each can release its resource.
//! - **Apply cannot fail the transaction**: rollback after real side
//!   effects is unsafe, so apply-phase callback errors are logged and
//!   absorbed. Callers must treat prepare as the reliable predictor of
//!   apply success.
//!
//! Only one transaction may sit in the prepare/apply pipeline against a
//! [`ConfigStore`] at a time; the store latch enforces this independently
//! of the session-level lock in [`crate::lock`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error};
use trellis_core_types::RequestContext;
use uuid::Uuid;

use crate::diff::engine::compute_changes;
use crate::diff::model::{ChangeOp, ChangeSet};
use crate::errors::{Result, TrellisError};
use crate::model::path::Path;
use crate::model::tree::{ConfigTree, DataNode};
use crate::model::value::DataValue;
use crate::schema::{Capability, ConfigArgs, Event, Resource, SchemaNode, SchemaRegistry};

/// The management-plane client that initiated a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientKind {
    #[default]
    None,
    Cli,
    Grpc,
    Netconf,
    Backend,
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientKind::None => "none",
            ClientKind::Cli => "cli",
            ClientKind::Grpc => "grpc",
            ClientKind::Netconf => "netconf",
            ClientKind::Backend => "backend",
        };
        write!(f, "{}", name)
    }
}

/// Context of a configuration transaction
#[derive(Debug, Clone, Default)]
pub struct TxContext {
    pub client: ClientKind,
    pub request: Option<RequestContext>,
}

impl TxContext {
    pub fn new(client: ClientKind) -> Self {
        Self {
            client,
            request: None,
        }
    }

    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = Some(request);
        self
    }
}

/// Transaction lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Validating,
    Preparing,
    Applying,
    Aborting,
    Applied,
    Aborted,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Pending => "pending",
            Phase::Validating => "validating",
            Phase::Preparing => "preparing",
            Phase::Applying => "applying",
            Phase::Aborting => "aborting",
            Phase::Applied => "applied",
            Phase::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// Commit knobs, mirroring the submit surface offered to front-ends
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Skip the validate phase (the candidate was validated separately)
    pub skip_validate: bool,
    /// Proceed even when the candidate equals the running configuration
    pub ignore_zero_changes: bool,
}

/// The explicitly-owned authoritative configuration.
///
/// One process-wide instance is constructed at startup and injected into
/// the lock manager and commit engine.
#[derive(Debug, Default)]
pub struct ConfigStore {
    running: ConfigTree,
    txn_in_progress: bool,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_running(running: ConfigTree) -> Self {
        Self {
            running,
            txn_in_progress: false,
        }
    }

    /// The in-force configuration snapshot
    pub fn running(&self) -> &ConfigTree {
        &self.running
    }

    /// Whether a transaction currently occupies the prepare/apply pipeline
    pub fn transaction_in_progress(&self) -> bool {
        self.txn_in_progress
    }
}

/// An in-flight configuration transaction.
///
/// Produced by a successful [`CommitEngine::prepare`]; must be resolved by
/// exactly one of [`CommitEngine::apply`] or [`CommitEngine::abort`], which
/// consume it and release the store latch.
#[derive(Debug)]
pub struct Transaction {
    pub id: Uuid,
    pub context: TxContext,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    candidate: ConfigTree,
    changes: ChangeSet,
    phase: Phase,
}

impl Transaction {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }
}

/// Drives transactions through the phase protocol
pub struct CommitEngine {
    registry: Arc<SchemaRegistry>,
}

impl CommitEngine {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Validate a candidate and prepare all resources required to apply it.
    ///
    /// The diff against the running configuration is computed here; use
    /// [`CommitEngine::prepare_with_changes`] when the change set was
    /// precomputed.
    ///
    /// # Errors
    ///
    /// - `Locked`: another transaction occupies the pipeline
    /// - `NoChanges`: candidate equals running (unless ignored via options)
    /// - `Validation` / `Resource` / `Inconsistency`: callback failures;
    ///   the running tree is untouched and prepared entries were aborted
    pub fn prepare(
        &self,
        store: &mut ConfigStore,
        context: TxContext,
        candidate: ConfigTree,
        comment: Option<String>,
        options: CommitOptions,
    ) -> Result<Transaction> {
        let changes = if store.running.content_digest() == candidate.content_digest() {
            ChangeSet::new()
        } else {
            compute_changes(&self.registry, &store.running, &candidate)?
        };
        self.prepare_with_changes(store, context, candidate, changes, comment, options)
    }

    /// Validate and prepare a candidate with a precomputed change set
    pub fn prepare_with_changes(
        &self,
        store: &mut ConfigStore,
        context: TxContext,
        candidate: ConfigTree,
        changes: ChangeSet,
        comment: Option<String>,
        options: CommitOptions,
    ) -> Result<Transaction> {
        if store.txn_in_progress {
            return Err(TrellisError::Locked {
                message: "another transaction is in progress".to_string(),
            });
        }
        if changes.is_empty() && !options.ignore_zero_changes {
            return Err(TrellisError::NoChanges);
        }

        store.txn_in_progress = true;
        let mut txn = Transaction {
            id: Uuid::now_v7(),
            context,
            comment,
            created_at: Utc::now(),
            candidate,
            changes,
            phase: Phase::Pending,
        };

        txn.phase = Phase::Validating;
        if !options.skip_validate {
            if let Err(err) = self.validate_changes(
                &txn.context,
                &store.running,
                &txn.candidate,
                &txn.changes,
            ) {
                store.txn_in_progress = false;
                txn.phase = Phase::Aborted;
                return Err(err);
            }
        }

        txn.phase = Phase::Preparing;
        if let Err(err) = self.prepare_changes(store, &mut txn) {
            store.txn_in_progress = false;
            txn.phase = Phase::Aborted;
            return Err(err);
        }

        debug!(
            txn_id = %txn.id,
            client = %txn.context.client,
            change_count = txn.changes.len(),
            "transaction prepared"
        );
        Ok(txn)
    }

    /// Run the validate phase: distinct pre-validate subtrees first, then
    /// every entry in (priority, sequence) order. Strictly read-only.
    pub fn validate_changes(
        &self,
        context: &TxContext,
        reference: &ConfigTree,
        candidate: &ConfigTree,
        changes: &ChangeSet,
    ) -> Result<()> {
        for (schema, path) in self
            .collect_subtree_callbacks(changes, Capability::PreValidate)
            .into_values()
        {
            if let Some(handler) = &schema.handler {
                handler.pre_validate(context, &path)?;
            }
        }

        for entry in changes.iter() {
            // A declared dependency must exist in the candidate before the
            // dependant node can be created.
            if entry.op == ChangeOp::Create {
                if let Some(dep) = self.registry.dependency_for(&entry.schema) {
                    let dep_path = (dep.resolvers.dependency_path)(&entry.path);
                    if !candidate.contains(&dep_path) {
                        return Err(TrellisError::Validation {
                            path: entry.path.to_string(),
                            message: format!("depends on missing node {}", dep_path),
                        });
                    }
                }
            }
            let mut scratch = None;
            self.dispatch_config(
                context,
                reference,
                entry.op,
                &entry.schema,
                &entry.path,
                entry.value.as_ref(),
                Event::Validate,
                &mut scratch,
            )?;
        }
        Ok(())
    }

    fn prepare_changes(&self, store: &ConfigStore, txn: &mut Transaction) -> Result<()> {
        let mut failure: Option<TrellisError> = None;
        for entry in txn.changes.iter_mut() {
            let mut slot = entry.resource.take();
            let outcome = self.dispatch_config(
                &txn.context,
                &store.running,
                entry.op,
                &entry.schema,
                &entry.path,
                entry.value.as_ref(),
                Event::Prepare,
                &mut slot,
            );
            entry.resource = slot;
            match outcome {
                Ok(()) => entry.prepared = true,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            // Abort cascade: every already-prepared entry, ascending order
            self.abort_prepared(&txn.context, &store.running, &mut txn.changes);
            return Err(err);
        }
        Ok(())
    }

    /// Apply a successfully prepared transaction.
    ///
    /// Per-entry apply errors are logged, never propagated. After all
    /// entries, `apply_finish` fires once per distinct touched subtree,
    /// then the running tree is replaced by the candidate at version + 1.
    pub fn apply(&self, store: &mut ConfigStore, mut txn: Transaction) -> Result<u64> {
        txn.phase = Phase::Applying;

        for entry in txn.changes.iter_mut() {
            let mut slot = entry.resource.take();
            let outcome = self.dispatch_config(
                &txn.context,
                &store.running,
                entry.op,
                &entry.schema,
                &entry.path,
                entry.value.as_ref(),
                Event::Apply,
                &mut slot,
            );
            entry.resource = slot;
            if let Err(err) = outcome {
                // Rollback after real side effects is unsafe; log and move on.
                error!(
                    component = module_path!(),
                    op = "apply_change",
                    xpath = %entry.path,
                    err.code = err.code(),
                    err.message = %err,
                    "apply-phase callback failed"
                );
            }
        }

        for (schema, path) in self
            .collect_subtree_callbacks(&txn.changes, Capability::ApplyFinish)
            .into_values()
        {
            if let Some(handler) = &schema.handler {
                handler.apply_finish(&txn.context, &path);
            }
        }

        store.running.replace_with(txn.candidate);
        store.txn_in_progress = false;
        txn.phase = Phase::Applied;
        debug!(version = store.running.version(), "transaction applied");
        Ok(store.running.version())
    }

    /// Abort a prepared transaction: every prepared entry receives
    /// `Event::Abort` exactly once; the running tree is untouched.
    pub fn abort(&self, store: &mut ConfigStore, mut txn: Transaction) {
        txn.phase = Phase::Aborting;
        self.abort_prepared(&txn.context, &store.running, &mut txn.changes);
        store.txn_in_progress = false;
        txn.phase = Phase::Aborted;
        debug!(client = %txn.context.client, "transaction aborted");
    }

    /// Prepare and immediately apply; returns the new running version
    pub fn commit(
        &self,
        store: &mut ConfigStore,
        context: TxContext,
        candidate: ConfigTree,
        comment: Option<String>,
        options: CommitOptions,
    ) -> Result<u64> {
        let txn = self.prepare(store, context, candidate, comment, options)?;
        self.apply(store, txn)
    }

    fn abort_prepared(
        &self,
        context: &TxContext,
        reference: &ConfigTree,
        changes: &mut ChangeSet,
    ) {
        for entry in changes.iter_mut() {
            if !entry.prepared {
                continue;
            }
            let mut slot = entry.resource.take();
            let outcome = self.dispatch_config(
                context,
                reference,
                entry.op,
                &entry.schema,
                &entry.path,
                entry.value.as_ref(),
                Event::Abort,
                &mut slot,
            );
            entry.resource = slot;
            entry.prepared = false;
            if let Err(err) = outcome {
                error!(
                    component = module_path!(),
                    op = "abort_change",
                    xpath = %entry.path,
                    err.code = err.code(),
                    "abort callback failed"
                );
            }
        }
    }

    /// Dispatch one configuration callback.
    ///
    /// Destroy entries recurse bottom-up through the reference subtree so a
    /// single change entry covers every descendant; other operations
    /// dispatch to their own node only. Nodes flagged
    /// `ignore_config_callbacks`, and capabilities the handler does not
    /// declare, are skipped.
    #[allow(clippy::too_many_arguments)]
    fn dispatch_config(
        &self,
        context: &TxContext,
        reference: &ConfigTree,
        op: ChangeOp,
        schema: &Arc<SchemaNode>,
        path: &Path,
        value: Option<&DataValue>,
        event: Event,
        resource: &mut Option<Resource>,
    ) -> Result<()> {
        if op == ChangeOp::Destroy {
            let node = match reference.find(path) {
                Some(node) => node,
                // Already absent in the reference; nothing to unwind
                None => return Ok(()),
            };
            return self.dispatch_destroy_recursive(context, node, schema, path, event);
        }

        if !schema.dispatches_config_callbacks() {
            return Ok(());
        }
        let handler = match &schema.handler {
            Some(h) => h,
            None => return Ok(()),
        };

        let cap = match op {
            ChangeOp::Create => Capability::Create,
            ChangeOp::Modify => Capability::Modify,
            ChangeOp::Move => Capability::Move,
            ChangeOp::Destroy => unreachable!("handled above"),
        };
        if !handler.capabilities().contains(&cap) {
            return Ok(());
        }

        let args = ConfigArgs {
            event,
            context,
            path,
            value,
            resource,
        };
        match op {
            ChangeOp::Create => handler.create(args),
            ChangeOp::Modify => handler.modify(args),
            ChangeOp::Move => handler.move_entry(args),
            ChangeOp::Destroy => unreachable!("handled above"),
        }
    }

    /// Recurse-destroy: visit the reference subtree post-order (children
    /// before parents) so state unwinds inside-out. Destroy callbacks do
    /// not allocate, so each invocation receives an empty scratch slot.
    fn dispatch_destroy_recursive(
        &self,
        context: &TxContext,
        node: &DataNode,
        schema: &Arc<SchemaNode>,
        path: &Path,
        event: Event,
    ) -> Result<()> {
        for child in &node.children {
            let child_path = path.join(child.segment());
            if let Some(child_schema) = self.registry.find(&child_path) {
                self.dispatch_destroy_recursive(context, child, &child_schema, &child_path, event)?;
            }
        }
        if schema.dispatches_config_callbacks() {
            if let Some(handler) = &schema.handler {
                if handler.capabilities().contains(&Capability::Destroy) {
                    let mut scratch = None;
                    handler.destroy(ConfigArgs {
                        event,
                        context,
                        path,
                        value: node.value.as_ref(),
                        resource: &mut scratch,
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Subtree-level callbacks (pre-validate / apply-finish) for a change
    /// set, deduplicated by data path: multiple changes under one subtree
    /// coalesce into a single invocation.
    fn collect_subtree_callbacks(
        &self,
        changes: &ChangeSet,
        cap: Capability,
    ) -> BTreeMap<String, (Arc<SchemaNode>, Path)> {
        let mut collected = BTreeMap::new();
        for entry in changes.iter() {
            // A destroyed node no longer exists; only its ancestors count
            // as "descendant touched".
            let depth_limit = match entry.op {
                ChangeOp::Destroy => entry.path.len().saturating_sub(1),
                _ => entry.path.len(),
            };
            for depth in 1..=depth_limit {
                let prefix = Path {
                    segments: entry.path.segments[..depth].to_vec(),
                };
                if let Some(schema) = self.registry.find(&prefix) {
                    if schema.has_capability(cap) {
                        collected
                            .entry(prefix.to_string())
                            .or_insert((schema, prefix));
                    }
                }
            }
        }
        collected
    }
}
