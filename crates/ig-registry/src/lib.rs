//! Integration registry and capability dispatch
//!
//! Components:
//! - **ServiceRegistry**: descriptors stored under expiring leases (`service:<name>`)
//! - **LeaseKeeper**: integration-side background task that keeps a lease alive
//! - **Dispatcher**: snapshots live descriptors and answers "who may receive
//!   this request class", including table ownership

pub mod dispatcher;
pub mod lease;
pub mod registry;

pub use dispatcher::{DispatchRefusal, DispatchSnapshot, Dispatcher, OwnershipConflict, RouteMatch};
pub use lease::{LeaseConfig, LeaseKeeper};
pub use registry::{Lease, ServiceRegistry};

pub use ig_common::Result;
