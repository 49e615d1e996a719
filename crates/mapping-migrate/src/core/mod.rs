//! Core abstractions for store-agnostic migration.
//!
//! - [`value`]: SQL value representation shared by readers, coercion and writers
//! - [`traits`]: Connector and dialect traits implemented by `drivers`

pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use traits::{Dialect, StoreConnector};
pub use value::{Batch, RowRecord, SqlValue};
