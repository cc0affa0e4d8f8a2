//! Notification filter: selector-based gating of outbound state-change
//! events, plus the one-shot get-state query surface
//!
//! The filter is single-threaded by default; plain ownership is the
//! unsynchronized mode, and `matches` stays allocation- and lock-free.
//! Surfaces that genuinely share the filter across threads opt in through
//! [`NotificationFilter::into_multi_thread`], which trades the zero-cost
//! access for an `RwLock`.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::errors::Result;
use crate::model::path::Path;
use crate::model::tree::DataNode;
use crate::schema::SchemaRegistry;
use crate::walk::{OperWalk, WalkFlags};

/// Result of a one-shot operational-state query, tagged for correlation
#[derive(Debug, Clone)]
pub struct StateResponse {
    /// Opaque id supplied by the caller to match the asynchronous reply
    pub refer_id: u64,
    pub tree: DataNode,
}

/// Selector set gating outbound notifications
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    selectors: Vec<Path>,
}

impl NotificationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install selectors: replace the set atomically, or append
    pub fn set_filters(&mut self, selectors: Vec<Path>, replace: bool) {
        if replace {
            self.selectors = selectors;
        } else {
            self.selectors.extend(selectors);
        }
        debug!(selector_count = self.selectors.len(), "notification filters set");
    }

    pub fn clear(&mut self) {
        self.selectors.clear();
    }

    pub fn selectors(&self) -> &[Path] {
        &self.selectors
    }

    /// Whether a notification path passes the filter.
    ///
    /// An empty selector set passes everything; otherwise a prefix match
    /// against any selector admits the path.
    pub fn matches(&self, path: &Path) -> bool {
        if self.selectors.is_empty() {
            return true;
        }
        self.selectors.iter().any(|s| s.is_prefix_of(path))
    }

    /// Run a one-shot operational walk restricted to the given selectors
    /// and tag the merged result with `refer_id`.
    ///
    /// # Errors
    ///
    /// Propagates walk errors (unknown selector paths, callback failures).
    pub fn get_state(
        registry: &Arc<SchemaRegistry>,
        selectors: &[Path],
        refer_id: u64,
    ) -> Result<StateResponse> {
        let mut merged = DataNode::new("");
        for selector in selectors {
            let collected = std::cell::RefCell::new(DataNode::new(""));
            {
                let mut walk = OperWalk::new(
                    registry.clone(),
                    Some(selector),
                    WalkFlags::default(),
                    None,
                    |_path, _value| {},
                    |tree, _event| {
                        *collected.borrow_mut() = tree.clone();
                        Ok(())
                    },
                )?;
                walk.run()?;
            }
            merged.merge(&collected.into_inner());
        }
        Ok(StateResponse {
            refer_id,
            tree: merged,
        })
    }

    /// Switch to lock-protected access for concurrent surfaces
    pub fn into_multi_thread(self) -> SyncNotificationFilter {
        SyncNotificationFilter {
            inner: Arc::new(RwLock::new(self)),
        }
    }
}

/// Lock-protected filter handle for multi-threaded notification surfaces
#[derive(Debug, Clone)]
pub struct SyncNotificationFilter {
    inner: Arc<RwLock<NotificationFilter>>,
}

impl SyncNotificationFilter {
    pub fn set_filters(&self, selectors: Vec<Path>, replace: bool) {
        if let Ok(mut filter) = self.inner.write() {
            filter.set_filters(selectors, replace);
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.inner
            .read()
            .map(|filter| filter.matches(path))
            .unwrap_or(false)
    }
}
