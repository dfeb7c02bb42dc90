//! Manba ingress controller core.
//!
//! The gateway-facing half of the controller: the entity model mirrored from
//! the Manba admin API, an indexed in-memory state store, the diff engine
//! that turns a (current, target) state pair into an ordered event stream,
//! and the solver that applies those events through an [`client::AdminApi`].

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod check;
pub mod client;
pub mod diff;
pub mod dump;
pub mod fake;
pub mod id;
pub mod model;
pub mod solver;
pub mod state;

pub use self::{
    client::{AdminApi, GatewayError},
    model::{Api, Bind, Cluster, DispatchNode, Routing, Server},
    state::ManbaState,
};
