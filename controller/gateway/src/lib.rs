//! HTTP implementation of the Manba admin API client.
//!
//! The admin API wraps every response in a `{code, data}` envelope; a
//! non-zero code is a rejection. List endpoints paginate with `after`/`limit`
//! cursors; this client iterates them internally so callers always see the
//! complete set.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use manba_ingress_controller_core::client::{AdminApi, GatewayError, Result};
use manba_ingress_controller_core::model::{Api, Bind, Cluster, Routing, Server};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

const LIST_PAGE_SIZE: u64 = 64;

#[derive(Clone, Debug)]
pub struct HttpAdminApi {
    base: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: u64,
}

impl HttpAdminApi {
    /// `addr` is the admin API base, e.g. `http://manba-api:9092`.
    pub fn new(addr: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base: addr.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn unwrap_envelope<T>(rsp: reqwest::Response) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let envelope: Envelope<T> = rsp
            .error_for_status()
            .map_err(|e| GatewayError::Transport(e.into()))?
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.into()))?;
        if envelope.code != 0 {
            return Err(GatewayError::Rejected {
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(envelope.data)
    }

    /// Drains a paginated list endpoint.
    async fn list_all<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + HasId,
    {
        let mut all = Vec::new();
        let mut after = 0u64;
        loop {
            let rsp = self
                .http
                .get(self.url(path))
                .query(&[("after", after), ("limit", LIST_PAGE_SIZE)])
                .send()
                .await
                .map_err(|e| GatewayError::Transport(e.into()))?;
            let page: Vec<T> = Self::unwrap_envelope(rsp).await?.unwrap_or_default();
            let full_page = page.len() as u64 == LIST_PAGE_SIZE;
            if let Some(last) = page.last() {
                after = last.id();
            }
            all.extend(page);
            if !full_page {
                return Ok(all);
            }
        }
    }

    async fn put<T>(&self, path: &str, entity: &T, id: u64) -> Result<u64>
    where
        T: Serialize + Sync,
    {
        let rsp = self
            .http
            .put(self.url(path))
            .json(entity)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.into()))?;
        let created: Option<CreatedId> = Self::unwrap_envelope(rsp).await?;
        // Creates return the assigned id; updates echo nothing useful.
        Ok(created.map(|c| c.id).unwrap_or(id))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let rsp = self
            .http
            .delete(self.url(path))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.into()))?;
        Self::unwrap_envelope::<serde_json::Value>(rsp).await?;
        Ok(())
    }
}

trait HasId {
    fn id(&self) -> u64;
}

impl HasId for Server {
    fn id(&self) -> u64 {
        self.id
    }
}

impl HasId for Cluster {
    fn id(&self) -> u64 {
        self.id
    }
}

impl HasId for Api {
    fn id(&self) -> u64 {
        self.id
    }
}

impl HasId for Routing {
    fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait::async_trait]
impl AdminApi for HttpAdminApi {
    async fn list_servers(&self) -> Result<Vec<Server>> {
        self.list_all("/v1/servers").await
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        self.list_all("/v1/clusters").await
    }

    async fn list_apis(&self) -> Result<Vec<Api>> {
        self.list_all("/v1/apis").await
    }

    async fn list_routings(&self) -> Result<Vec<Routing>> {
        self.list_all("/v1/routings").await
    }

    async fn cluster_bind_servers(&self, cluster_id: u64) -> Result<Vec<u64>> {
        let rsp = self
            .http
            .get(self.url(&format!("/v1/clusters/{cluster_id}/binds")))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.into()))?;
        Ok(Self::unwrap_envelope(rsp).await?.unwrap_or_default())
    }

    async fn put_server(&self, server: &Server) -> Result<u64> {
        self.put("/v1/servers", server, server.id).await
    }

    async fn put_cluster(&self, cluster: &Cluster) -> Result<u64> {
        self.put("/v1/clusters", cluster, cluster.id).await
    }

    async fn put_api(&self, api: &Api) -> Result<u64> {
        self.put("/v1/apis", api, api.id).await
    }

    async fn put_routing(&self, routing: &Routing) -> Result<u64> {
        self.put("/v1/routings", routing, routing.id).await
    }

    async fn remove_server(&self, id: u64) -> Result<()> {
        self.delete(&format!("/v1/servers/{id}")).await
    }

    async fn remove_cluster(&self, id: u64) -> Result<()> {
        self.delete(&format!("/v1/clusters/{id}")).await
    }

    async fn remove_api(&self, id: u64) -> Result<()> {
        self.delete(&format!("/v1/apis/{id}")).await
    }

    async fn remove_routing(&self, id: u64) -> Result<()> {
        self.delete(&format!("/v1/routings/{id}")).await
    }

    async fn add_bind(&self, bind: &Bind) -> Result<()> {
        let rsp = self
            .http
            .put(self.url("/v1/binds"))
            .json(bind)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.into()))?;
        Self::unwrap_envelope::<serde_json::Value>(rsp).await?;
        Ok(())
    }

    async fn remove_bind(&self, bind: &Bind) -> Result<()> {
        let rsp = self
            .http
            .delete(self.url("/v1/binds"))
            .json(bind)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.into()))?;
        Self::unwrap_envelope::<serde_json::Value>(rsp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalised() {
        let api = HttpAdminApi::new("http://manba:9092/", Duration::from_secs(1)).unwrap();
        assert_eq!(api.url("/v1/apis"), "http://manba:9092/v1/apis");
    }

    #[test]
    fn envelope_rejections_carry_code_and_message() {
        let body = r#"{"code": 400, "message": "cluster name required"}"#;
        let envelope: Envelope<serde_json::Value> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.code, 400);
        assert_eq!(envelope.message, "cluster name required");
        assert!(envelope.data.is_none());
    }
}
