//! Gateway entity model.
//!
//! Five first-class entities live on the gateway: servers, clusters, binds,
//! APIs and routings. Each carries a gateway-assigned 64-bit id and, except
//! for binds, a human name that serves as its natural key. The structs here
//! are plain values; derived `PartialEq` is the equality the diff engine
//! uses, so every field below is a persisted field.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A backend endpoint, addressed as `host:port`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Server {
    pub id: u64,
    pub addr: String,
    pub max_qps: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreaker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heath_check: Option<HealthCheck>,
}

/// A named group of servers with a load-balancing policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Cluster {
    pub id: u64,
    pub name: String,
    pub load_balance: LoadBalance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreaker>,
}

/// An edge from a cluster to a server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Bind {
    pub cluster_id: u64,
    pub server_id: u64,
}

/// An HTTP route.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Api {
    pub id: u64,
    pub name: String,
    pub domain: String,
    pub url_pattern: String,
    pub method: String,
    pub match_rule: MatchRule,
    pub position: u32,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<HttpResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_access_control: Option<IpAccessControl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_template: Option<RenderTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_filter: Option<String>,
    pub nodes: Vec<DispatchNode>,
}

/// Per-route backend reference inside an [`Api`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchNode {
    pub cluster_id: u64,
    pub url_rewrite: String,
    pub attr_name: String,
    pub validations: Vec<Validation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<Cache>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<HttpResult>,
    pub use_default: bool,
    pub batch_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_strategy: Option<RetryStrategy>,
    pub read_timeout: i64,
    pub write_timeout: i64,
}

/// A traffic-splitting or mirroring rule attached to an API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Routing {
    pub id: u64,
    pub name: String,
    pub api_id: u64,
    pub cluster_id: u64,
    pub strategy: RoutingStrategy,
    pub traffic_rate: i32,
    pub conditions: Vec<Condition>,
    pub status: Status,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LoadBalance {
    #[default]
    RoundRobin,
    IpHash,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum MatchRule {
    #[default]
    All,
    Any,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Status {
    #[default]
    Up,
    Down,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RoutingStrategy {
    #[default]
    Copy,
    Split,
}

/// Where a request parameter is read from. The declaration order here is the
/// sort order for validations on a dispatch node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum Source {
    #[default]
    Cookie,
    FormData,
    Header,
    JsonBody,
    QueryString,
    PathValue,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Parameter {
    pub name: String,
    pub source: Source,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Validation {
    pub parameter: Parameter,
    pub required: bool,
    pub rules: Vec<ValidationRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationRule {
    pub rule_type: RuleType,
    pub expression: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RuleType {
    #[default]
    Regexp,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Cmp {
    #[default]
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Match,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Condition {
    pub parameter: Parameter,
    pub cmp: Cmp,
    pub expect: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreaker {
    pub close_timeout: i64,
    pub half_traffic_rate: i32,
    pub rate_check_period: i64,
    pub failure_rate_to_close: i32,
    pub succeed_rate_to_open: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheck {
    pub path: String,
    pub body: String,
    pub check_interval: i64,
    pub timeout: i64,
}

/// A canned HTTP response, used as an API or dispatch-node default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpResult {
    pub code: i32,
    pub body: String,
    pub headers: BTreeMap<String, String>,
    pub cookies: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct IpAccessControl {
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderTemplate {
    pub objects: Vec<RenderObject>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderObject {
    pub name: String,
    pub attrs: Vec<RenderAttr>,
    pub flat_attrs: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderAttr {
    pub name: String,
    pub extract_exp: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryStrategy {
    pub interval: i64,
    pub max_times: i32,
    pub codes: Vec<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Cache {
    pub keys: Vec<Parameter>,
    pub deadline: u64,
    pub conditions: Vec<Condition>,
}
