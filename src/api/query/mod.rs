//! List fetching
//!
//! Two strategies share this module: [`list`] pages by offset and merges the
//! pages in one halting batch, [`fast_list`] pipelines ID cursors through a
//! batch and streams the records.

pub mod cursor;
pub mod fast_list;
pub mod list;
pub mod registry;

pub use cursor::{ListCursor, Observation};
pub use fast_list::FastListOptions;
pub use list::{ListOptions, next_params};
pub use registry::{Capability, MethodRegistry, OrderRule};
