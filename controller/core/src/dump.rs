//! Loads the full current gateway state into a raw snapshot.

use crate::client::{AdminApi, Result};
use crate::model::{Api, Bind, Cluster, Routing, Server};
use crate::state::ManbaState;

/// The gateway's configuration as listed, before indexing.
#[derive(Debug, Default)]
pub struct RawState {
    pub servers: Vec<Server>,
    pub clusters: Vec<Cluster>,
    pub apis: Vec<Api>,
    pub routings: Vec<Routing>,
    pub binds: Vec<Bind>,
}

/// Lists every entity kind; binds are materialised by querying each
/// cluster's bound server ids.
pub async fn fetch(client: &dyn AdminApi) -> Result<RawState> {
    let mut raw = RawState {
        apis: client.list_apis().await?,
        routings: client.list_routings().await?,
        clusters: client.list_clusters().await?,
        servers: client.list_servers().await?,
        ..Default::default()
    };

    for cluster in &raw.clusters {
        for server_id in client.cluster_bind_servers(cluster.id).await? {
            raw.binds.push(Bind {
                cluster_id: cluster.id,
                server_id,
            });
        }
    }

    Ok(raw)
}

impl RawState {
    /// Indexes the snapshot into a [`ManbaState`]. Entries the store rejects
    /// are skipped with a warning; the gateway may hold entities this
    /// controller never created.
    pub fn into_state(self) -> ManbaState {
        let state = ManbaState::new();
        for server in self.servers {
            if let Err(error) = state.servers.add(server.clone()) {
                tracing::warn!(%error, addr = %server.addr, "skipping dumped server");
            }
        }
        for cluster in self.clusters {
            if let Err(error) = state.clusters.add(cluster.clone()) {
                tracing::warn!(%error, name = %cluster.name, "skipping dumped cluster");
            }
        }
        for bind in self.binds {
            if let Err(error) = state.binds.add(bind.clone()) {
                tracing::warn!(%error, cluster_id = bind.cluster_id, server_id = bind.server_id, "skipping dumped bind");
            }
        }
        for api in self.apis {
            if let Err(error) = state.apis.add(api.clone()) {
                tracing::warn!(%error, name = %api.name, "skipping dumped api");
            }
        }
        for routing in self.routings {
            if let Err(error) = state.routings.add(routing.clone()) {
                tracing::warn!(%error, name = %routing.name, "skipping dumped routing");
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeAdminApi;

    #[tokio::test]
    async fn fetch_materialises_binds_per_cluster() {
        let gw = FakeAdminApi::new();
        let cluster_id = gw
            .put_cluster(&Cluster {
                name: "web".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let server_id = gw
            .put_server(&Server {
                addr: "1.1.1.1:80".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        gw.add_bind(&Bind {
            cluster_id,
            server_id,
        })
        .await
        .unwrap();

        let raw = fetch(&gw).await.unwrap();
        assert_eq!(raw.clusters.len(), 1);
        assert_eq!(raw.servers.len(), 1);
        assert_eq!(
            raw.binds,
            vec![Bind {
                cluster_id,
                server_id
            }]
        );

        let state = raw.into_state();
        assert_eq!(state.clusters.get("web").unwrap().id, cluster_id);
        assert!(state
            .binds
            .get(&format!("{cluster_id}-{server_id}"))
            .is_ok());
    }
}
