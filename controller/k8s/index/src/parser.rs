//! Projects a cluster snapshot into the desired gateway model.
//!
//! One ManbaIngress HTTP rule fans out into: one API per match rule, one
//! dispatch node per route, one routing per mirror/split entry, and one
//! cluster (plus its backing servers) per distinct
//! `{ns}.{cluster}.{subset}.{port}.svc` reference. Lookups that fail are
//! logged and skipped; the parser always returns a (possibly partial) model.

use crate::index::Snapshot;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use manba_ingress_controller_core::model::{
    Api, Cluster, DispatchNode, LoadBalance, Routing, RoutingStrategy, Server, Status,
};
use manba_ingress_controller_k8s_api::{
    IntOrString, ManbaClusterSubset, ManbaHttpRouteCluster, ResourceExt, Service, ServicePort,
    TrafficPolicy,
};
use serde::Serialize;

/// An API plus the cluster key each of its dispatch nodes targets; numeric
/// ids are resolved later against the current gateway state.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredApi {
    pub api: Api,
    pub node_clusters: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DesiredCluster {
    pub cluster: Cluster,
    pub server_addrs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DesiredRouting {
    pub routing: Routing,
    pub api_name: String,
    pub cluster_name: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DesiredState {
    pub apis: Vec<DesiredApi>,
    pub clusters: Vec<DesiredCluster>,
    pub servers: Vec<Server>,
    pub routings: Vec<DesiredRouting>,
}

/// The stable projection that gets hashed: every list sorted by natural key,
/// with symbolic cluster/api references included so that retargeting a route
/// changes the digest even before ids are assigned.
#[derive(Debug, Serialize)]
pub struct RawTarget {
    apis: Vec<RawApi>,
    clusters: Vec<RawCluster>,
    servers: Vec<Server>,
    routings: Vec<RawRouting>,
}

#[derive(Debug, Serialize)]
struct RawApi {
    api: Api,
    node_clusters: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RawCluster {
    cluster: Cluster,
    servers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RawRouting {
    routing: Routing,
    api: String,
    cluster: String,
}

impl DesiredState {
    pub fn to_raw(&self) -> RawTarget {
        let mut apis: Vec<RawApi> = self
            .apis
            .iter()
            .map(|a| RawApi {
                api: a.api.clone(),
                node_clusters: a.node_clusters.clone(),
            })
            .collect();
        apis.sort_by(|a, b| a.api.name.cmp(&b.api.name));

        let mut clusters: Vec<RawCluster> = self
            .clusters
            .iter()
            .map(|c| {
                let mut servers = c.server_addrs.clone();
                servers.sort();
                RawCluster {
                    cluster: c.cluster.clone(),
                    servers,
                }
            })
            .collect();
        clusters.sort_by(|a, b| a.cluster.name.cmp(&b.cluster.name));

        let mut servers = self.servers.clone();
        servers.sort_by(|a, b| a.addr.cmp(&b.addr));

        let mut routings: Vec<RawRouting> = self
            .routings
            .iter()
            .map(|r| RawRouting {
                routing: r.routing.clone(),
                api: r.api_name.clone(),
                cluster: r.cluster_name.clone(),
            })
            .collect();
        routings.sort_by(|a, b| a.routing.name.cmp(&b.routing.name));

        RawTarget {
            apis,
            clusters,
            servers,
            routings,
        }
    }
}

/// The synthetic service key doubles as the gateway cluster name.
fn service_key(namespace: &str, cluster: &ManbaHttpRouteCluster) -> String {
    format!(
        "{}.{}.{}.{}.svc",
        namespace,
        cluster.name,
        cluster.subset,
        format_port(&cluster.port)
    )
}

fn format_port(port: &IntOrString) -> String {
    match port {
        IntOrString::Int(i) => i.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}

struct ServiceEntry {
    key: String,
    namespace: String,
    subset: ManbaClusterSubset,
    policy: Option<TrafficPolicy>,
    port: IntOrString,
}

/// Builds the desired model from a snapshot. Deterministic: the snapshot's
/// ingress order is fixed, and every intermediate container iterates in a
/// stable order.
pub fn build(snapshot: &Snapshot) -> DesiredState {
    let mut entries: Vec<ServiceEntry> = Vec::new();
    let mut entry_keys: HashSet<String> = HashSet::new();
    let mut apis: Vec<DesiredApi> = Vec::new();
    let mut routings: Vec<DesiredRouting> = Vec::new();

    for ingress in snapshot.ingresses() {
        let namespace = ingress.namespace().unwrap_or_default();
        let ingress_name = ingress.name_unchecked();

        for (rule_idx, rule) in ingress.spec.http.iter().enumerate() {
            let mut rule_apis: Vec<Api> = Vec::new();
            for (match_idx, m) in rule.match_.iter().enumerate() {
                for (inner_idx, r) in m.rules.iter().enumerate() {
                    let url_pattern = if r.uri.pattern.is_empty() {
                        "/".to_string()
                    } else {
                        r.uri.pattern.clone()
                    };
                    rule_apis.push(Api {
                        id: 0,
                        name: format!(
                            "{namespace}.{ingress_name}.{rule_idx}{match_idx}{inner_idx:02}"
                        ),
                        domain: m.host.clone(),
                        url_pattern,
                        method: r.method.clone().unwrap_or_else(|| "*".to_string()),
                        match_rule: r.match_type.into(),
                        position: (inner_idx + 1) as u32,
                        status: Status::Up,
                        default_value: rule.default_value.clone(),
                        ip_access_control: rule.ip_access_control.clone(),
                        render_template: rule.render_template.clone(),
                        auth_filter: rule.auth_filter.clone(),
                        nodes: Vec::new(),
                    });
                }
            }

            let mut nodes: Vec<(String, DispatchNode)> = Vec::new();
            for route in &rule.route {
                let Some(key) = resolve_entry(
                    snapshot,
                    &namespace,
                    &route.cluster,
                    &mut entries,
                    &mut entry_keys,
                ) else {
                    continue;
                };

                let url_rewrite = route
                    .rewrite
                    .as_ref()
                    .or(rule.rewrite.as_ref())
                    .map(|r| r.uri.clone())
                    .unwrap_or_default();

                nodes.push((
                    key,
                    DispatchNode {
                        cluster_id: 0,
                        url_rewrite,
                        attr_name: route.attr_name.clone(),
                        validations: route
                            .match_
                            .as_ref()
                            .map(|m| m.to_validations())
                            .unwrap_or_default(),
                        cache: route.cache.clone(),
                        default_value: route.default_value.clone(),
                        use_default: route.default_value.is_some(),
                        batch_index: route.batch_index,
                        retry_strategy: rule.retry.clone(),
                        read_timeout: route.read_timeout,
                        write_timeout: route.write_timeout,
                    },
                ));
            }

            let rule_apis: Vec<DesiredApi> = rule_apis
                .into_iter()
                .map(|mut api| {
                    api.nodes = nodes.iter().map(|(_, n)| n.clone()).collect();
                    DesiredApi {
                        api,
                        node_clusters: nodes.iter().map(|(k, _)| k.clone()).collect(),
                    }
                })
                .collect();

            for (i, mirror) in rule.mirror.iter().enumerate() {
                let Some(key) = resolve_entry(
                    snapshot,
                    &namespace,
                    &mirror.cluster,
                    &mut entries,
                    &mut entry_keys,
                ) else {
                    continue;
                };
                for api in &rule_apis {
                    routings.push(DesiredRouting {
                        routing: Routing {
                            id: 0,
                            name: format!("{}.mirror.{i}", api.api.name),
                            api_id: 0,
                            cluster_id: 0,
                            strategy: RoutingStrategy::Copy,
                            traffic_rate: mirror.rate.unwrap_or(100),
                            conditions: mirror.conditions.clone(),
                            status: Status::Up,
                        },
                        api_name: api.api.name.clone(),
                        cluster_name: key.clone(),
                    });
                }
            }

            for (i, split) in rule.split.iter().enumerate() {
                let Some(key) = resolve_entry(
                    snapshot,
                    &namespace,
                    &split.cluster,
                    &mut entries,
                    &mut entry_keys,
                ) else {
                    continue;
                };
                for api in &rule_apis {
                    routings.push(DesiredRouting {
                        routing: Routing {
                            id: 0,
                            name: format!("{}.split.{i}", api.api.name),
                            api_id: 0,
                            cluster_id: 0,
                            strategy: RoutingStrategy::Split,
                            traffic_rate: split.rate.unwrap_or(100),
                            conditions: split.conditions.clone(),
                            status: Status::Up,
                        },
                        api_name: api.api.name.clone(),
                        cluster_name: key.clone(),
                    });
                }
            }

            apis.extend(rule_apis);
        }
    }

    let mut clusters: Vec<DesiredCluster> = Vec::new();
    let mut servers: Vec<Server> = Vec::new();
    let mut server_addrs_seen: HashSet<String> = HashSet::new();
    for entry in &entries {
        let (cluster, cluster_servers) = resolve_backends(snapshot, entry);
        clusters.push(DesiredCluster {
            cluster,
            server_addrs: cluster_servers.iter().map(|s| s.addr.clone()).collect(),
        });
        for server in cluster_servers {
            if server_addrs_seen.insert(server.addr.clone()) {
                servers.push(server);
            }
        }
    }

    dedup(DesiredState {
        apis,
        clusters,
        servers,
        routings,
    })
}

/// Resolves a route/mirror/split cluster reference to its service entry,
/// registering the entry on first sight.
fn resolve_entry(
    snapshot: &Snapshot,
    namespace: &str,
    cluster: &ManbaHttpRouteCluster,
    entries: &mut Vec<ServiceEntry>,
    entry_keys: &mut HashSet<String>,
) -> Option<String> {
    let key = service_key(namespace, cluster);
    if entry_keys.contains(&key) {
        return Some(key);
    }

    let Some(manba_cluster) = snapshot.cluster(namespace, &cluster.name) else {
        tracing::warn!(
            %namespace,
            cluster = %cluster.name,
            "referenced ManbaCluster not found, skipping route target",
        );
        return None;
    };
    let Some(subset) = manba_cluster.spec.subset(&cluster.subset) else {
        tracing::warn!(
            %namespace,
            cluster = %cluster.name,
            subset = %cluster.subset,
            "referenced subset not found, skipping route target",
        );
        return None;
    };

    let policy = manba_cluster.spec.subset_policy(subset).cloned();
    entry_keys.insert(key.clone());
    entries.push(ServiceEntry {
        key: key.clone(),
        namespace: namespace.to_string(),
        subset: subset.clone(),
        policy,
        port: cluster.port.clone(),
    });
    Some(key)
}

/// Materialises one service entry into a gateway cluster and its servers.
fn resolve_backends(snapshot: &Snapshot, entry: &ServiceEntry) -> (Cluster, Vec<Server>) {
    let policy = entry.policy.as_ref();
    let circuit_breaker = policy.and_then(|p| p.circuit_breaker.clone());

    let load_balance = match policy.and_then(|p| p.load_balancer.as_deref()) {
        None => LoadBalance::RoundRobin,
        Some("RoundRobin") | Some("roundrobin") => LoadBalance::RoundRobin,
        Some("IPHash") | Some("iphash") | Some("ip_hash") => LoadBalance::IpHash,
        Some(other) => {
            tracing::warn!(
                cluster = %entry.key,
                load_balancer = %other,
                "unknown load balancer, using RoundRobin",
            );
            LoadBalance::RoundRobin
        }
    };

    let cluster = Cluster {
        id: 0,
        name: entry.key.clone(),
        load_balance,
        circuit_breaker: circuit_breaker.clone(),
    };

    let mut servers: Vec<Server> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for service in snapshot.services_selected(&entry.namespace, &entry.subset.labels) {
        let service_name = service.name_unchecked();
        if resolve_service_port(service, &entry.port).is_none() {
            tracing::warn!(
                namespace = %entry.namespace,
                service = %service_name,
                port = %format_port(&entry.port),
                "service does not expose the requested port, skipping",
            );
            continue;
        }

        let Some(endpoints) = snapshot.endpoints(&entry.namespace, &service_name) else {
            tracing::warn!(
                namespace = %entry.namespace,
                service = %service_name,
                "no Endpoints for service, skipping",
            );
            continue;
        };

        let want = format_port(&entry.port);
        for subset in endpoints.subsets.iter().flatten() {
            for port in subset.ports.iter().flatten() {
                let matches =
                    port.port.to_string() == want || port.name.as_deref() == Some(want.as_str());
                if !matches {
                    continue;
                }
                for address in subset.addresses.iter().flatten() {
                    let addr = format!("{}:{}", address.ip, port.port);
                    if seen.insert(addr.clone()) {
                        servers.push(Server {
                            id: 0,
                            addr,
                            max_qps: 0,
                            circuit_breaker: circuit_breaker.clone(),
                            heath_check: None,
                        });
                    }
                }
            }
        }
    }

    if let Some(policy) = policy {
        if !servers.is_empty() {
            let share = policy.max_qps / servers.len() as u64;
            for server in &mut servers {
                server.max_qps = share;
            }
        }
    }

    (cluster, servers)
}

/// Finds the ServicePort matching the requested backend port by number,
/// name, or target-port string equality. Portless ExternalName services get
/// a synthesized TCP port.
fn resolve_service_port(service: &Service, requested: &IntOrString) -> Option<ServicePort> {
    let spec = service.spec.as_ref()?;
    let ports = spec.ports.clone().unwrap_or_default();

    if ports.is_empty() && spec.type_.as_deref() == Some("ExternalName") {
        if let IntOrString::Int(number) = requested {
            return Some(ServicePort {
                port: *number,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            });
        }
        return None;
    }

    let want = format_port(requested);
    ports.into_iter().find(|p| {
        p.port.to_string() == want
            || p.name.as_deref() == Some(want.as_str())
            || p.target_port.as_ref().map(format_port) == Some(want.clone())
    })
}

/// First-seen-wins dedup by natural key across all four lists.
fn dedup(state: DesiredState) -> DesiredState {
    let mut out = DesiredState::default();
    let mut seen: HashMap<&'static str, HashSet<String>> = HashMap::new();

    for api in state.apis {
        if seen
            .entry("api")
            .or_default()
            .insert(api.api.name.clone())
        {
            out.apis.push(api);
        }
    }
    for cluster in state.clusters {
        if seen
            .entry("cluster")
            .or_default()
            .insert(cluster.cluster.name.clone())
        {
            out.clusters.push(cluster);
        }
    }
    for server in state.servers {
        if seen
            .entry("server")
            .or_default()
            .insert(server.addr.clone())
        {
            out.servers.push(server);
        }
    }
    for routing in state.routings {
        if seen
            .entry("routing")
            .or_default()
            .insert(routing.routing.name.clone())
        {
            out.routings.push(routing);
        }
    }
    out
}
