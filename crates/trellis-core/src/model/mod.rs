//! Data model: typed values, paths, and the hierarchical configuration tree

pub mod path;
pub mod tree;
pub mod value;

pub use path::{Path, PathSegment};
pub use tree::{ConfigTree, DataNode};
pub use value::DataValue;
