//! The gateway admin API, seen from the reconciler's side.

use crate::model::{Api, Bind, Cluster, Routing, Server};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("gateway rejected the request (code {code}): {message}")]
    Rejected { code: i32, message: String },
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Typed operations against the remote gateway admin API.
///
/// `put_*` creates the entity when its id is zero (returning the assigned
/// id) and fully replaces it otherwise. List calls iterate server-side
/// pagination internally; callers always see the complete set. The client is
/// shared across solver workers and must be safe for concurrent use.
#[async_trait::async_trait]
pub trait AdminApi: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<Server>>;

    async fn list_clusters(&self) -> Result<Vec<Cluster>>;

    async fn list_apis(&self) -> Result<Vec<Api>>;

    async fn list_routings(&self) -> Result<Vec<Routing>>;

    /// Ids of the servers currently bound to a cluster.
    async fn cluster_bind_servers(&self, cluster_id: u64) -> Result<Vec<u64>>;

    async fn put_server(&self, server: &Server) -> Result<u64>;

    async fn put_cluster(&self, cluster: &Cluster) -> Result<u64>;

    async fn put_api(&self, api: &Api) -> Result<u64>;

    async fn put_routing(&self, routing: &Routing) -> Result<u64>;

    async fn remove_server(&self, id: u64) -> Result<()>;

    async fn remove_cluster(&self, id: u64) -> Result<()>;

    async fn remove_api(&self, id: u64) -> Result<()>;

    async fn remove_routing(&self, id: u64) -> Result<()>;

    async fn add_bind(&self, bind: &Bind) -> Result<()>;

    async fn remove_bind(&self, bind: &Bind) -> Result<()>;
}
