//! The ManbaIngress custom resource: declarative HTTP routing intent.

use super::cluster::TrafficPolicy;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use manba_ingress_controller_core::model;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Routing rules projected onto the gateway: matches become APIs, routes
/// become dispatch nodes, mirrors and splits become routings.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "configuration.manba.io",
    version = "v1beta1",
    kind = "ManbaIngress",
    status = "ManbaIngressStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManbaIngressSpec {
    #[serde(default)]
    pub http: Vec<ManbaHttpRule>,
}

/// Mirrors the core Ingress status shape so kubectl prints the published
/// addresses.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaIngressStatus {
    pub load_balancer: Option<k8s_openapi::api::core::v1::LoadBalancerStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaHttpRule {
    #[serde(rename = "match")]
    pub match_: Vec<ManbaHttpMatch>,
    pub rewrite: Option<ManbaHttpUriRewrite>,
    #[serde(rename = "accessControl")]
    pub ip_access_control: Option<model::IpAccessControl>,
    #[serde(rename = "retries")]
    pub retry: Option<model::RetryStrategy>,
    pub default_value: Option<model::HttpResult>,
    pub render_template: Option<model::RenderTemplate>,
    pub auth_filter: Option<String>,
    pub traffic_policy: Option<TrafficPolicy>,
    pub route: Vec<ManbaHttpRoute>,
    pub mirror: Vec<ManbaHttpRouting>,
    pub split: Vec<ManbaHttpRouting>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaHttpMatch {
    pub host: String,
    pub rules: Vec<ManbaHttpMatchRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaHttpMatchRule {
    pub uri: ManbaHttpUriMatch,
    pub method: Option<String>,
    #[serde(rename = "match_type", alias = "matchType")]
    pub match_type: MatchType,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    All,
    Any,
}

impl From<MatchType> for model::MatchRule {
    fn from(m: MatchType) -> Self {
        match m {
            MatchType::All => model::MatchRule::All,
            MatchType::Any => model::MatchRule::Any,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaHttpUriMatch {
    pub pattern: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaHttpUriRewrite {
    pub uri: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaHttpRoute {
    pub cluster: ManbaHttpRouteCluster,
    pub rewrite: Option<ManbaHttpUriRewrite>,
    pub attr_name: String,
    #[serde(rename = "match")]
    pub match_: Option<ManbaHttpRouteMatch>,
    pub cache: Option<model::Cache>,
    pub batch_index: i32,
    #[serde(rename = "default_value")]
    pub default_value: Option<model::HttpResult>,
    pub read_timeout: i64,
    pub write_timeout: i64,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaHttpRouteCluster {
    pub name: String,
    pub subset: String,
    pub port: IntOrString,
}

impl Default for ManbaHttpRouteCluster {
    fn default() -> Self {
        Self {
            name: String::new(),
            subset: String::new(),
            port: IntOrString::Int(0),
        }
    }
}

/// Per-source regex predicates. Keys are parameter names; values must
/// compile as regular expressions. BTreeMaps keep validation emission
/// deterministic.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaHttpRouteMatch {
    pub cookie: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub json_body: BTreeMap<String, String>,
    pub header: BTreeMap<String, String>,
    pub path_value: BTreeMap<String, String>,
    pub form_data: BTreeMap<String, String>,
}

impl ManbaHttpRouteMatch {
    /// Projects the predicates into gateway validations, one per key, sorted
    /// by `(source, name)` so repeated parses are byte-identical.
    pub fn to_validations(&self) -> Vec<model::Validation> {
        fn emit(
            out: &mut Vec<model::Validation>,
            source: model::Source,
            data: &BTreeMap<String, String>,
        ) {
            for (name, expression) in data {
                out.push(model::Validation {
                    parameter: model::Parameter {
                        name: name.clone(),
                        source,
                    },
                    required: true,
                    rules: vec![model::ValidationRule {
                        rule_type: model::RuleType::Regexp,
                        expression: expression.clone(),
                    }],
                });
            }
        }

        let mut validations = Vec::new();
        emit(&mut validations, model::Source::Cookie, &self.cookie);
        emit(&mut validations, model::Source::FormData, &self.form_data);
        emit(&mut validations, model::Source::Header, &self.header);
        emit(&mut validations, model::Source::JsonBody, &self.json_body);
        emit(&mut validations, model::Source::QueryString, &self.query);
        emit(&mut validations, model::Source::PathValue, &self.path_value);
        validations.sort_by(|a, b| {
            (a.parameter.source, &a.parameter.name).cmp(&(b.parameter.source, &b.parameter.name))
        });
        validations
    }

    /// All predicate expressions, for validation.
    pub fn expressions(&self) -> impl Iterator<Item = &String> {
        self.cookie
            .values()
            .chain(self.query.values())
            .chain(self.json_body.values())
            .chain(self.header.values())
            .chain(self.path_value.values())
            .chain(self.form_data.values())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ManbaHttpRouting {
    pub cluster: ManbaHttpRouteCluster,
    pub rate: Option<i32>,
    pub conditions: Vec<model::Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_round_trips_from_yaml() {
        let yaml = r#"
http:
  - match:
      - host: test
        rules:
          - uri:
              pattern: /
            method: POST
            match_type: all
    route:
      - cluster:
          name: test-cls
          subset: v1
          port: 8080
    mirror:
      - cluster:
          name: test-cls
          subset: v1
          port: 8080
        rate: 20
"#;
        let spec: ManbaIngressSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.http.len(), 1);
        let rule = &spec.http[0];
        assert_eq!(rule.match_[0].host, "test");
        assert_eq!(rule.match_[0].rules[0].method.as_deref(), Some("POST"));
        assert_eq!(rule.match_[0].rules[0].match_type, MatchType::All);
        assert_eq!(rule.route[0].cluster.port, IntOrString::Int(8080));
        assert_eq!(rule.mirror[0].rate, Some(20));
    }

    #[test]
    fn validations_sort_by_source_then_name() {
        let match_ = ManbaHttpRouteMatch {
            query: [("b".to_string(), ".*".to_string())].into_iter().collect(),
            cookie: [("z".to_string(), ".+".to_string())].into_iter().collect(),
            header: [
                ("x-a".to_string(), "\\d+".to_string()),
                ("x-b".to_string(), "\\w+".to_string()),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };

        let validations = match_.to_validations();
        let order: Vec<(model::Source, &str)> = validations
            .iter()
            .map(|v| (v.parameter.source, v.parameter.name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (model::Source::Cookie, "z"),
                (model::Source::Header, "x-a"),
                (model::Source::Header, "x-b"),
                (model::Source::QueryString, "b"),
            ]
        );
        assert!(validations.iter().all(|v| v.required));
    }
}
