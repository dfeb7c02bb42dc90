//! An in-memory gateway used by tests.

use crate::client::{AdminApi, GatewayError, Result};
use crate::model::{Api, Bind, Cluster, Routing, Server};
use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Implements [`AdminApi`] over plain maps, assigning sequential ids to
/// created entities the way the real gateway does.
#[derive(Debug, Default)]
pub struct FakeAdminApi {
    next_id: AtomicU64,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    servers: HashMap<u64, Server>,
    clusters: HashMap<u64, Cluster>,
    apis: HashMap<u64, Api>,
    routings: HashMap<u64, Routing>,
    binds: Vec<Bind>,
}

impl FakeAdminApi {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    fn assign(&self, id: u64) -> u64 {
        if id != 0 {
            return id;
        }
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn bind_count(&self) -> usize {
        self.inner.lock().binds.len()
    }
}

macro_rules! put {
    ($self:ident, $entity:expr, $table:ident) => {{
        let mut entity = $entity.clone();
        let id = $self.assign(entity.id);
        entity.id = id;
        $self.inner.lock().$table.insert(id, entity);
        Ok(id)
    }};
}

macro_rules! remove {
    ($self:ident, $id:expr, $table:ident, $kind:literal) => {{
        match $self.inner.lock().$table.remove(&$id) {
            Some(_) => Ok(()),
            None => Err(GatewayError::Rejected {
                code: 404,
                message: format!(concat!($kind, " {} not found"), $id),
            }),
        }
    }};
}

#[async_trait::async_trait]
impl AdminApi for FakeAdminApi {
    async fn list_servers(&self) -> Result<Vec<Server>> {
        Ok(self.inner.lock().servers.values().cloned().collect())
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        Ok(self.inner.lock().clusters.values().cloned().collect())
    }

    async fn list_apis(&self) -> Result<Vec<Api>> {
        Ok(self.inner.lock().apis.values().cloned().collect())
    }

    async fn list_routings(&self) -> Result<Vec<Routing>> {
        Ok(self.inner.lock().routings.values().cloned().collect())
    }

    async fn cluster_bind_servers(&self, cluster_id: u64) -> Result<Vec<u64>> {
        Ok(self
            .inner
            .lock()
            .binds
            .iter()
            .filter(|b| b.cluster_id == cluster_id)
            .map(|b| b.server_id)
            .collect())
    }

    async fn put_server(&self, server: &Server) -> Result<u64> {
        put!(self, server, servers)
    }

    async fn put_cluster(&self, cluster: &Cluster) -> Result<u64> {
        put!(self, cluster, clusters)
    }

    async fn put_api(&self, api: &Api) -> Result<u64> {
        put!(self, api, apis)
    }

    async fn put_routing(&self, routing: &Routing) -> Result<u64> {
        put!(self, routing, routings)
    }

    async fn remove_server(&self, id: u64) -> Result<()> {
        remove!(self, id, servers, "server")
    }

    async fn remove_cluster(&self, id: u64) -> Result<()> {
        remove!(self, id, clusters, "cluster")
    }

    async fn remove_api(&self, id: u64) -> Result<()> {
        remove!(self, id, apis, "api")
    }

    async fn remove_routing(&self, id: u64) -> Result<()> {
        remove!(self, id, routings, "routing")
    }

    async fn add_bind(&self, bind: &Bind) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.binds.contains(bind) {
            inner.binds.push(bind.clone());
        }
        Ok(())
    }

    async fn remove_bind(&self, bind: &Bind) -> Result<()> {
        self.inner.lock().binds.retain(|b| b != bind);
        Ok(())
    }
}
