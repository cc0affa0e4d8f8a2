//! Single-writer lock and candidate-update management
//!
//! The lock is a single exclusive token over the authoritative
//! configuration, tagged with the holder's client identity and an opaque
//! user reference. It is held across an entire edit session, independent of
//! any individual transaction; callers must hold it before submitting a
//! transaction (the commit engine's pipeline latch is a separate,
//! per-transaction guard).
//!
//! A [`Candidate`] is an editable working copy plus the running snapshot it
//! was derived from. When the authoritative tree advances underneath it,
//! [`Candidate::update`] rebases: the candidate's own edits are replayed on
//! top of the newest running tree, winning every conflicting field by
//! construction.

use tracing::{debug, error};

use crate::diff::engine::{apply_changes, compute_changes};
use crate::errors::{Result, TrellisError};
use crate::model::tree::ConfigTree;
use crate::schema::SchemaRegistry;
use crate::transaction::{ClientKind, ConfigStore};

/// Identity of a lock holder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub client: ClientKind,
    /// Opaque reference supplied by the front-end (e.g. a session id)
    pub user_ref: Option<String>,
}

impl std::fmt::Display for LockOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.user_ref {
            Some(user) => write!(f, "{}:{}", self.client, user),
            None => write!(f, "{}", self.client),
        }
    }
}

/// The exclusive configuration lock
#[derive(Debug, Default)]
pub struct LockManager {
    holder: Option<LockOwner>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock.
    ///
    /// # Errors
    ///
    /// Returns `Locked` while the lock is held, including by the same
    /// holder; the lock is not re-entrant.
    pub fn lock(&mut self, client: ClientKind, user_ref: Option<String>) -> Result<()> {
        if let Some(holder) = &self.holder {
            return Err(TrellisError::Locked {
                message: format!("configuration locked by {}", holder),
            });
        }
        let owner = LockOwner { client, user_ref };
        debug!(client = %owner, "configuration locked");
        self.holder = Some(owner);
        Ok(())
    }

    /// Release the lock.
    ///
    /// Unlocking an unlocked configuration, or one held by a different
    /// holder, is logged as an error and leaves the state unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Locked` describing the mismatch in both failure cases.
    pub fn unlock(&mut self, client: ClientKind, user_ref: Option<String>) -> Result<()> {
        let requester = LockOwner { client, user_ref };
        match &self.holder {
            None => {
                error!(client = %requester, "unlock of unlocked configuration");
                Err(TrellisError::Locked {
                    message: "configuration is not locked".to_string(),
                })
            }
            Some(holder) if *holder != requester => {
                error!(
                    client = %requester,
                    holder = %holder,
                    "unlock attempted by non-holder"
                );
                Err(TrellisError::Locked {
                    message: format!("configuration locked by {}", holder),
                })
            }
            Some(_) => {
                debug!(client = %requester, "configuration unlocked");
                self.holder = None;
                Ok(())
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.holder.is_some()
    }

    pub fn holder(&self) -> Option<&LockOwner> {
        self.holder.as_ref()
    }
}

/// An editable working copy of the configuration, with its derivation basis
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The working tree being edited
    pub tree: ConfigTree,
    /// Snapshot of the running tree the candidate was derived from
    base: ConfigTree,
}

impl Candidate {
    /// Derive a fresh candidate from the current running configuration
    pub fn from_store(store: &ConfigStore) -> Self {
        Self {
            tree: store.running().dup(),
            base: store.running().dup(),
        }
    }

    /// The running version this candidate was derived from
    pub fn base_version(&self) -> u64 {
        self.base.version()
    }

    /// Whether the authoritative tree advanced since this candidate was
    /// derived
    pub fn needs_update(&self, store: &ConfigStore) -> bool {
        store.running().version() > self.base.version()
    }

    /// Rebase the candidate onto the newest running tree.
    ///
    /// The candidate's own edits (diff of basis vs working tree) are
    /// replayed on top of a duplicate of the running configuration, so
    /// candidate edits win on every conflicting field. The basis is reset
    /// to the new running snapshot.
    ///
    /// # Errors
    ///
    /// Propagates diff/replay errors; the candidate is unchanged on error.
    pub fn update(&mut self, registry: &SchemaRegistry, store: &ConfigStore) -> Result<()> {
        let own_edits = compute_changes(registry, &self.base, &self.tree)?;
        let mut rebased = store.running().dup();
        apply_changes(&mut rebased, &own_edits)?;
        debug!(
            base_version = self.base.version(),
            running_version = store.running().version(),
            change_count = own_edits.len(),
            "candidate rebased"
        );
        self.tree = rebased;
        self.base = store.running().dup();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::path::Path;
    use crate::model::value::DataValue;
    use crate::schema::{SchemaDef, SchemaNodeDef};
    use crate::transaction::{CommitEngine, CommitOptions, TxContext};
    use std::sync::Arc;

    fn p(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::build(
                SchemaDef::new(vec![
                    SchemaNodeDef::container("/system"),
                    SchemaNodeDef::leaf("/system/hostname"),
                    SchemaNodeDef::leaf("/system/domain"),
                ]),
                Vec::new(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_lock_discipline() {
        let mut locks = LockManager::new();

        // A locks; B cannot lock
        locks.lock(ClientKind::Cli, Some("a".to_string())).unwrap();
        let err = locks
            .lock(ClientKind::Grpc, Some("b".to_string()))
            .unwrap_err();
        assert!(matches!(err, TrellisError::Locked { .. }));

        // B cannot unlock; state unchanged
        assert!(locks
            .unlock(ClientKind::Grpc, Some("b".to_string()))
            .is_err());
        assert!(locks.is_locked());

        // A unlocks; B can now lock
        locks
            .unlock(ClientKind::Cli, Some("a".to_string()))
            .unwrap();
        locks.lock(ClientKind::Grpc, Some("b".to_string())).unwrap();
        assert_eq!(
            locks.holder().unwrap().user_ref.as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_lock_not_reentrant() {
        let mut locks = LockManager::new();
        locks.lock(ClientKind::Cli, Some("a".to_string())).unwrap();
        let err = locks
            .lock(ClientKind::Cli, Some("a".to_string()))
            .unwrap_err();
        assert!(matches!(err, TrellisError::Locked { .. }));
    }

    #[test]
    fn test_unlock_unlocked_is_error_noop() {
        let mut locks = LockManager::new();
        assert!(locks.unlock(ClientKind::Cli, None).is_err());
        assert!(!locks.is_locked());
    }

    #[test]
    fn test_candidate_needs_update_tracks_version() {
        let registry = registry();
        let engine = CommitEngine::new(registry.clone());
        let mut store = ConfigStore::new();

        let candidate = Candidate::from_store(&store);
        assert!(!candidate.needs_update(&store));

        // A concurrent commit advances the running configuration
        let mut other = store.running().dup();
        other.set_leaf(&p("/system/domain"), DataValue::from("lab"));
        engine
            .commit(
                &mut store,
                TxContext::default(),
                other,
                None,
                CommitOptions::default(),
            )
            .unwrap();

        assert!(candidate.needs_update(&store));
    }

    #[test]
    fn test_candidate_rebase_keeps_own_edits_and_concurrent_changes() {
        let registry = registry();
        let engine = CommitEngine::new(registry.clone());
        let mut store = ConfigStore::new();

        // Session edits the hostname in its candidate
        let mut candidate = Candidate::from_store(&store);
        candidate
            .tree
            .set_leaf(&p("/system/hostname"), DataValue::from("mine"));

        // Meanwhile another session commits a domain and a conflicting
        // hostname
        let mut other = store.running().dup();
        other.set_leaf(&p("/system/hostname"), DataValue::from("theirs"));
        other.set_leaf(&p("/system/domain"), DataValue::from("lab"));
        engine
            .commit(
                &mut store,
                TxContext::default(),
                other,
                None,
                CommitOptions::default(),
            )
            .unwrap();

        candidate.update(&registry, &store).unwrap();

        // Candidate edits win the conflict; non-conflicting concurrent
        // changes are picked up
        assert_eq!(
            candidate.tree.get_value(&p("/system/hostname")),
            Some(&DataValue::String("mine".to_string()))
        );
        assert_eq!(
            candidate.tree.get_value(&p("/system/domain")),
            Some(&DataValue::String("lab".to_string()))
        );
        assert!(!candidate.needs_update(&store));
    }
}
