//! Manba ingress controller indexing.
//!
//! Watches the controller's input resources (ManbaIngress, ManbaCluster,
//! Services, Endpoints, Secrets), keeps a class-filtered in-memory cache of
//! them, and projects point-in-time snapshots of that cache into the desired
//! gateway model.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod class;
mod index;
pub mod parser;
pub mod ring;
pub mod validation;

#[cfg(test)]
mod tests;

pub use self::class::IngressClass;
pub use self::index::{Index, ResourceId, SharedIndex, Snapshot};
pub use self::parser::{DesiredApi, DesiredCluster, DesiredRouting, DesiredState};
