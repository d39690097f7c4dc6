//! Capability-oriented abstraction over an object store.
//!
//! The process owns two named instances ("external" for inbound drops,
//! "internal" for verified copies and reports), each optionally rooted
//! under a key prefix. `FsStore` backs the abstraction with a directory
//! tree; `MemoryStore` backs it with a map for tests. A vendor-SDK store
//! implements the same trait out of tree.

mod fs;
mod memory;
mod store;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use store::{
    normalize_prefix, BlobStore, ListPage, ObjectInfo, ObjectReader, ObjectWriter, StoreError,
    UserMetadata, DEFAULT_PRESIGN_TTL, MAX_LIST_PAGE,
};
