//! Cloud Catalog Client (ambient, spec §4.H/§6): the core's only window
//! onto the out-of-scope cloud catalog collaborator. A thin `reqwest`
//! wrapper, constructed once per [`crate::PmlContext`] and shared by the
//! capability loader, the routing-table refresher, and the trace syncer.

mod client;

pub use client::{CatalogClient, ProcedureDescriptor, RouteKind};
