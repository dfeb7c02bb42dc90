use crate::k8s::{self, ObjectMeta};
use anyhow::Result;
use k8s_openapi::api::coordination::v1 as coordv1;
use kube::api::PatchParams;
use std::sync::Arc;
use tokio::{sync::watch, time};

const LEASE_DURATION: time::Duration = time::Duration::from_secs(30);
const RENEW_GRACE_PERIOD: time::Duration = time::Duration::from_secs(1);

/// Creates the election Lease (if it does not already exist) and spawns the
/// claim task. The returned receiver publishes the current claim; a replica
/// syncs only while the claim names it.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    election_id: &str,
    claimant: &str,
) -> Result<watch::Receiver<Arc<kubert::lease::Claim>>> {
    let lease_name = format!("{election_id}-ingress-controller");

    let lease = coordv1::Lease {
        metadata: ObjectMeta {
            name: Some(lease_name.clone()),
            namespace: Some(ns.to_string()),
            // Specifying a resource version of "0" means that we will only
            // create the Lease if it does not already exist.
            resource_version: Some("0".to_string()),
            labels: Some(
                [(
                    "app.kubernetes.io/part-of".to_string(),
                    "manba-ingress".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    };
    let api = k8s::Api::<coordv1::Lease>::namespaced(runtime.client(), ns);
    match api
        .patch(
            &lease_name,
            &PatchParams {
                field_manager: Some("manba-ingress-controller".to_string()),
                ..Default::default()
            },
            &kube::api::Patch::Apply(lease),
        )
        .await
    {
        Ok(lease) => tracing::info!(?lease, "Created Lease resource"),
        Err(k8s::Error::Api(_)) => tracing::debug!("Lease already exists, no need to create it"),
        Err(error) => {
            return Err(error.into());
        }
    };

    let params = kubert::lease::ClaimParams {
        lease_duration: LEASE_DURATION,
        renew_grace_period: RENEW_GRACE_PERIOD,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, lease_name)
        .await?
        .spawn(claimant, params)
        .await?;
    Ok(claims)
}
