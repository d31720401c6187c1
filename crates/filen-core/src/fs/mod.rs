//! The path/metadata layer: nodes, canonical paths, and the cache-backed
//! resolver that maps human paths into the backend's identifier space.

pub mod node;
pub mod path;
pub mod resolver;

pub use node::{FileAttrs, Node, NodeId, NodeKind};
pub use path::RemotePath;
pub use resolver::{Resolved, Resolver, CACHE_CAPACITY, CACHE_TTL};
