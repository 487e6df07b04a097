//! Metadata caching layer
//!
//! Caches object metadata and child-name lookups so path resolution only
//! goes to the remote store on a miss.

pub mod metadata;

pub use metadata::{Generation, MetadataCache};
