//! Batch operations
//!
//! Sub-calls can be collected with [`SubCalls`] and executed together through
//! [`PlatformClient::batch`](crate::api::PlatformClient::batch).

pub mod batch;
pub mod operation;
pub mod operations;

pub use batch::{BatchOptions, BatchResultSet};
pub use operation::{BatchItem, SubCall};
pub use operations::SubCalls;
