//! Publishes the controller's reachable addresses to the status subresource
//! of every selected ManbaIngress, so external tooling (kubectl, DNS
//! controllers) can discover where traffic enters.

use crate::index::SharedIndex;
use crate::k8s::{Api, ManbaIngress, Patch, PatchParams, ResourceExt, Service};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::LoadBalancerIngress;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration};

const RESYNC: Duration = Duration::from_secs(60);
const FIELD_MANAGER: &str = "manba-ingress-controller";

pub struct StatusSyncer {
    client: kube::Client,
    index: SharedIndex,
    claims: watch::Receiver<Arc<kubert::lease::Claim>>,
    claimant: String,
    publish_service: Option<String>,
    publish_status_address: Option<String>,
}

impl StatusSyncer {
    pub fn new(
        client: kube::Client,
        index: SharedIndex,
        claims: watch::Receiver<Arc<kubert::lease::Claim>>,
        claimant: String,
        publish_service: Option<String>,
        publish_status_address: Option<String>,
    ) -> Self {
        Self {
            client,
            index,
            claims,
            claimant,
            publish_service,
            publish_status_address,
        }
    }

    pub async fn run(mut self, drain: drain::Watch) {
        let mut resync = time::interval(RESYNC);
        resync.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let shutdown = drain.signaled();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown signaled, stopping status syncer");
                    return;
                }
                _ = resync.tick() => {}
                res = self.claims.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
            }

            if !self.claims.borrow().is_current_for(&self.claimant) {
                continue;
            }
            if let Err(error) = self.publish().await {
                tracing::warn!(%error, "failed to publish ingress status");
            }
        }
    }

    async fn publish(&self) -> Result<()> {
        let ingress_points = self.ingress_points().await?;
        let patch = serde_json::json!({
            "status": {
                "loadBalancer": { "ingress": ingress_points },
            },
        });

        let targets: Vec<(String, String)> = self
            .index
            .read()
            .snapshot()
            .ingresses()
            .iter()
            .map(|ing| (ing.namespace().unwrap_or_default(), ing.name_unchecked()))
            .collect();

        let params = PatchParams::apply(FIELD_MANAGER);
        for (namespace, name) in targets {
            let api = Api::<ManbaIngress>::namespaced(self.client.clone(), &namespace);
            if let Err(error) = api
                .patch_status(&name, &params, &Patch::Merge(patch.clone()))
                .await
            {
                tracing::warn!(%namespace, %name, %error, "failed to patch ManbaIngress status");
            }
        }
        Ok(())
    }

    /// The addresses to publish: the literal --publish-status-address, or
    /// the publish Service's load-balancer ingress points (falling back to
    /// its cluster IP).
    async fn ingress_points(&self) -> Result<Vec<LoadBalancerIngress>> {
        if let Some(address) = &self.publish_status_address {
            return Ok(vec![to_ingress_point(address)]);
        }

        let reference = self
            .publish_service
            .as_ref()
            .context("neither publish-service nor publish-status-address is set")?;
        let (namespace, name) = reference
            .split_once('/')
            .context("publish-service must be in namespace/name form")?;

        let service = Api::<Service>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .with_context(|| format!("fetching publish service {reference}"))?;

        let mut points: Vec<LoadBalancerIngress> = service
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.clone())
            .unwrap_or_default();

        if points.is_empty() {
            if let Some(cluster_ip) = service
                .spec
                .as_ref()
                .and_then(|s| s.cluster_ip.as_deref())
                .filter(|ip| !ip.is_empty() && *ip != "None")
            {
                points.push(to_ingress_point(cluster_ip));
            }
        }

        anyhow::ensure!(
            !points.is_empty(),
            "publish service {reference} has no reachable address",
        );
        Ok(points)
    }
}

fn to_ingress_point(address: &str) -> LoadBalancerIngress {
    if address.parse::<IpAddr>().is_ok() {
        LoadBalancerIngress {
            ip: Some(address.to_string()),
            ..Default::default()
        }
    } else {
        LoadBalancerIngress {
            hostname: Some(address.to_string()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_split_into_ip_and_hostname() {
        assert_eq!(to_ingress_point("10.0.0.1").ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(
            to_ingress_point("lb.example.com").hostname.as_deref(),
            Some("lb.example.com")
        );
    }
}
