//! TraceVault Cassandra - column-family storage backend
//!
//! Index stores for service and operation names layered over a driver
//! [`Session`]. Writes go through a TTL dedup cache so that hot names do not
//! hit the backend on every span.

pub mod operation_names;
pub mod service_names;
pub mod session;
pub mod table;

#[cfg(test)]
mod testing;

pub use operation_names::{OperationNamesStorage, SchemaVersion};
pub use service_names::ServiceNamesStorage;
pub use session::{BackendError, Query, Row, RowIter, Session, Value};
pub use table::TableWriter;
