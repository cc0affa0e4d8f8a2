//! Diff engine: ordered change computation between configuration trees

pub mod engine;
pub mod model;

pub use engine::{apply_changes, compute_changes, summarize};
pub use model::{ChangeEntry, ChangeOp, ChangeSet, InsertPosition};
