//! The ManbaCluster custom resource: service-to-backend groupings.

use kube::CustomResource;
use manba_ingress_controller_core::model;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "configuration.manba.io",
    version = "v1beta1",
    kind = "ManbaCluster",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManbaClusterSpec {
    pub traffic_policy: Option<TrafficPolicy>,
    pub subsets: Vec<ManbaClusterSubset>,
}

/// A label-selected partition of the namespace's Services.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaClusterSubset {
    /// Subset name, e.g. `v1`.
    pub name: String,
    /// Selects the Services backing this subset.
    pub labels: BTreeMap<String, String>,
    /// Overrides the cluster-level policy. With `n` backing servers, each
    /// server receives `maxQPS / n`.
    pub traffic_policy: Option<TrafficPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct TrafficPolicy {
    pub load_balancer: Option<String>,
    pub max_qps: u64,
    pub circuit_breaker: Option<model::CircuitBreaker>,
    pub rate_limit_option: Option<String>,
}

impl ManbaClusterSpec {
    /// The subset's effective policy: its own, or the cluster default.
    pub fn subset_policy<'a>(&'a self, subset: &'a ManbaClusterSubset) -> Option<&'a TrafficPolicy> {
        subset
            .traffic_policy
            .as_ref()
            .or(self.traffic_policy.as_ref())
    }

    pub fn subset(&self, name: &str) -> Option<&ManbaClusterSubset> {
        self.subsets.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_policy_falls_back_to_cluster_default() {
        let spec = ManbaClusterSpec {
            traffic_policy: Some(TrafficPolicy {
                max_qps: 500,
                ..Default::default()
            }),
            subsets: vec![
                ManbaClusterSubset {
                    name: "v1".to_string(),
                    ..Default::default()
                },
                ManbaClusterSubset {
                    name: "v2".to_string(),
                    traffic_policy: Some(TrafficPolicy {
                        max_qps: 100,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ],
        };

        let v1 = spec.subset("v1").unwrap();
        assert_eq!(spec.subset_policy(v1).unwrap().max_qps, 500);
        let v2 = spec.subset("v2").unwrap();
        assert_eq!(spec.subset_policy(v2).unwrap().max_qps, 100);
        assert!(spec.subset("v3").is_none());
    }
}
