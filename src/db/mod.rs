//! Persistence: an embedded-schema sqlite store for capabilities, their
//! dependency graph, the integrity lockfile, and execution traces.

mod pool;
mod queries;
mod schema;

pub use pool::connect;
pub use queries::{capabilities, lockfile, threshold, traces};
