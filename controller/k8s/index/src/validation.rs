//! Admission-time pre-checks for ManbaIngress resources.

use crate::index::Snapshot;
use manba_ingress_controller_k8s_api::{ManbaHttpRouteCluster, ManbaIngressSpec};

/// Checks that every referenced cluster/subset exists in the namespace and
/// that every route-match predicate compiles as a regular expression.
/// Returns the denial message on failure.
pub fn validate_ingress(
    snapshot: &Snapshot,
    namespace: &str,
    spec: &ManbaIngressSpec,
) -> Result<(), String> {
    let mut clusters: Vec<&ManbaHttpRouteCluster> = Vec::new();

    for rule in &spec.http {
        for route in &rule.route {
            clusters.push(&route.cluster);

            if let Some(m) = &route.match_ {
                for expression in m.expressions() {
                    if regex::Regex::new(expression).is_err() {
                        return Err(
                            "manba http route match value must conform to the regular expression rule"
                                .to_string(),
                        );
                    }
                }
            }
        }
        for mirror in &rule.mirror {
            clusters.push(&mirror.cluster);
        }
        for split in &rule.split {
            clusters.push(&split.cluster);
        }
    }

    for cluster in clusters {
        let found = snapshot
            .cluster(namespace, &cluster.name)
            .map(|c| c.spec.subset(&cluster.subset).is_some())
            .unwrap_or(false);
        if !found {
            return Err(format!(
                "manba cluster {namespace}/{} not found",
                cluster.name
            ));
        }
    }

    Ok(())
}
