//! Query and storage abstraction over a document database.
//!
//! Documents are schema-light string→value maps (`models::Document`).
//! Queries are built from a closed-form filter algebra; a restricted
//! OData-style string grammar translates into the same algebra before any
//! I/O happens. The `DocumentStore` trait is the seam a driver-backed
//! implementation slots into; `MemoryStore` is the in-process one.

mod filter;
mod memory;
mod odata;
mod query;
mod service;
mod store;

pub use filter::{CompareOp, Filter, TextMatch};
pub use memory::MemoryStore;
pub use odata::{parse_filter, parse_order_by, parse_select};
pub use query::{QueryParameters, QueryResult, SortKey, SortOrder};
pub use service::{ODataQuery, QueryService};
pub use store::{DocumentStore, QueryError, StoreError};
