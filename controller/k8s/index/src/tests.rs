use crate::class::IngressClass;
use crate::index::{Index, ResourceId, Snapshot};
use crate::parser;
use crate::ring;
use ahash::AHashMap as HashMap;
use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, EndpointSubset};
use kubert::index::IndexNamespacedResource;
use maplit::btreemap;
use manba_ingress_controller_core::model::{LoadBalance, RoutingStrategy, Status};
use manba_ingress_controller_k8s_api::{
    Endpoints, IntOrString, ManbaCluster, ManbaClusterSpec, ManbaClusterSubset, ManbaHttpMatch,
    ManbaHttpMatchRule, ManbaHttpRoute, ManbaHttpRouteCluster, ManbaHttpRouting, ManbaHttpRule,
    ManbaHttpUriMatch, ManbaIngress, ManbaIngressSpec, ObjectMeta, Service, ServicePort, Time,
    TrafficPolicy, INGRESS_CLASS_ANNOTATION,
};

fn meta(namespace: &str, name: &str, created_secs: u32) -> ObjectMeta {
    use chrono::TimeZone;
    ObjectMeta {
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        creation_timestamp: Some(Time(
            chrono::Utc
                .with_ymd_and_hms(2023, 1, 1, 0, 0, created_secs)
                .unwrap(),
        )),
        ..Default::default()
    }
}

fn route_cluster(name: &str, subset: &str, port: i32) -> ManbaHttpRouteCluster {
    ManbaHttpRouteCluster {
        name: name.to_string(),
        subset: subset.to_string(),
        port: IntOrString::Int(port),
    }
}

fn test_rule() -> ManbaHttpRule {
    ManbaHttpRule {
        match_: vec![ManbaHttpMatch {
            host: "test".to_string(),
            rules: vec![ManbaHttpMatchRule {
                uri: ManbaHttpUriMatch {
                    pattern: "/".to_string(),
                },
                method: Some("POST".to_string()),
                ..Default::default()
            }],
        }],
        route: vec![ManbaHttpRoute {
            cluster: route_cluster("test-cls", "v1", 8080),
            ..Default::default()
        }],
        mirror: vec![ManbaHttpRouting {
            cluster: route_cluster("test-cls", "v1", 8080),
            rate: Some(20),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn test_ingress(rule: ManbaHttpRule) -> ManbaIngress {
    ManbaIngress {
        metadata: meta("default", "test-ing", 0),
        spec: ManbaIngressSpec { http: vec![rule] },
        status: None,
    }
}

fn test_cluster(max_qps: u64) -> ManbaCluster {
    ManbaCluster {
        metadata: meta("default", "test-cls", 0),
        spec: ManbaClusterSpec {
            traffic_policy: None,
            subsets: vec![ManbaClusterSubset {
                name: "v1".to_string(),
                labels: btreemap! { "app".to_string() => "test".to_string() },
                traffic_policy: Some(TrafficPolicy {
                    max_qps,
                    ..Default::default()
                }),
            }],
        },
    }
}

fn test_service() -> Service {
    Service {
        metadata: ObjectMeta {
            labels: Some(btreemap! { "app".to_string() => "test".to_string() }),
            ..meta("default", "test-svc", 0)
        },
        spec: Some(k8s_openapi::api::core::v1::ServiceSpec {
            ports: Some(vec![ServicePort {
                port: 8080,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn test_endpoints(ips: &[&str]) -> Endpoints {
    Endpoints {
        metadata: meta("default", "test-svc", 0),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                ips.iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(vec![EndpointPort {
                port: 8080,
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

fn snapshot(ingresses: Vec<ManbaIngress>, ips: &[&str], max_qps: u64) -> Snapshot {
    let mut clusters = HashMap::new();
    clusters.insert(ResourceId::new("default", "test-cls"), test_cluster(max_qps));
    let mut services = HashMap::new();
    services.insert(ResourceId::new("default", "test-svc"), test_service());
    let mut endpoints = HashMap::new();
    endpoints.insert(ResourceId::new("default", "test-svc"), test_endpoints(ips));
    Snapshot::for_tests(ingresses, clusters, services, endpoints)
}

#[test]
fn mirror_route_with_qps_split() {
    let snap = snapshot(
        vec![test_ingress(test_rule())],
        &["1.1.1.1", "1.1.1.2"],
        500,
    );
    let state = parser::build(&snap);

    assert_eq!(state.apis.len(), 1);
    let api = &state.apis[0];
    assert_eq!(api.api.name, "default.test-ing.0000");
    assert_eq!(api.api.domain, "test");
    assert_eq!(api.api.url_pattern, "/");
    assert_eq!(api.api.method, "POST");
    assert_eq!(api.api.position, 1);
    assert_eq!(api.api.status, Status::Up);
    assert_eq!(api.api.nodes.len(), 1);
    assert_eq!(api.node_clusters, vec!["default.test-cls.v1.8080.svc"]);

    assert_eq!(state.clusters.len(), 1);
    let cluster = &state.clusters[0];
    assert_eq!(cluster.cluster.name, "default.test-cls.v1.8080.svc");
    assert_eq!(cluster.cluster.load_balance, LoadBalance::RoundRobin);
    assert_eq!(cluster.server_addrs.len(), 2);

    let mut addrs: Vec<&str> = state.servers.iter().map(|s| s.addr.as_str()).collect();
    addrs.sort();
    assert_eq!(addrs, vec!["1.1.1.1:8080", "1.1.1.2:8080"]);
    assert!(state.servers.iter().all(|s| s.max_qps == 250));

    assert_eq!(state.routings.len(), 1);
    let routing = &state.routings[0];
    assert_eq!(routing.routing.name, "default.test-ing.0000.mirror.0");
    assert_eq!(routing.routing.strategy, RoutingStrategy::Copy);
    assert_eq!(routing.routing.traffic_rate, 20);
    assert_eq!(routing.routing.status, Status::Up);
    assert_eq!(routing.api_name, "default.test-ing.0000");
    assert_eq!(routing.cluster_name, "default.test-cls.v1.8080.svc");
}

#[test]
fn single_server_receives_the_full_qps() {
    let snap = snapshot(vec![test_ingress(test_rule())], &["1.1.1.1"], 500);
    let state = parser::build(&snap);
    assert_eq!(state.servers.len(), 1);
    assert_eq!(state.servers[0].max_qps, 500);
}

#[test]
fn zero_servers_still_creates_the_cluster() {
    let snap = snapshot(vec![test_ingress(test_rule())], &[], 500);
    let state = parser::build(&snap);
    assert!(state.servers.is_empty());
    assert_eq!(state.clusters.len(), 1);
    assert!(state.clusters[0].server_addrs.is_empty());
}

#[test]
fn defaults_for_pattern_method_and_rate() {
    let mut rule = test_rule();
    rule.match_[0].rules[0].uri.pattern.clear();
    rule.match_[0].rules[0].method = None;
    rule.mirror[0].rate = None;
    rule.split = vec![ManbaHttpRouting {
        cluster: route_cluster("test-cls", "v1", 8080),
        rate: None,
        ..Default::default()
    }];

    let snap = snapshot(vec![test_ingress(rule)], &["1.1.1.1"], 0);
    let state = parser::build(&snap);

    let api = &state.apis[0];
    assert_eq!(api.api.url_pattern, "/");
    assert_eq!(api.api.method, "*");

    assert_eq!(state.routings.len(), 2);
    assert!(state.routings.iter().all(|r| r.routing.traffic_rate == 100));
    assert!(state
        .routings
        .iter()
        .any(|r| r.routing.name.ends_with(".split.0")
            && r.routing.strategy == RoutingStrategy::Split));
}

#[test]
fn unknown_cluster_reference_is_skipped_but_model_is_returned() {
    let mut rule = test_rule();
    rule.route[0].cluster.name = "missing-cls".to_string();
    rule.mirror.clear();

    let snap = snapshot(vec![test_ingress(rule)], &["1.1.1.1"], 500);
    let state = parser::build(&snap);

    // The API is still synthesised, just with no dispatch node.
    assert_eq!(state.apis.len(), 1);
    assert!(state.apis[0].api.nodes.is_empty());
    assert!(state.clusters.is_empty());
}

#[test]
fn parse_is_deterministic() {
    let snap = snapshot(
        vec![test_ingress(test_rule())],
        &["1.1.1.1", "1.1.1.2"],
        500,
    );
    let a = serde_json::to_vec(&parser::build(&snap).to_raw()).unwrap();
    let b = serde_json::to_vec(&parser::build(&snap).to_raw()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn endpoint_scale_down_changes_the_projection() {
    let two = snapshot(
        vec![test_ingress(test_rule())],
        &["1.1.1.1", "1.1.1.2"],
        500,
    );
    let one = snapshot(vec![test_ingress(test_rule())], &["1.1.1.1"], 500);

    let state = parser::build(&one);
    assert_eq!(state.servers.len(), 1);
    assert_eq!(state.servers[0].max_qps, 500);

    let before = serde_json::to_vec(&parser::build(&two).to_raw()).unwrap();
    let after = serde_json::to_vec(&state.to_raw()).unwrap();
    assert_ne!(before, after);
}

#[test]
fn duplicate_names_are_first_seen_wins() {
    // Two ingresses with the same name in different creation order produce
    // one API; the older ingress wins.
    let mut older = test_ingress(test_rule());
    older.metadata = meta("default", "test-ing", 0);
    let mut newer = test_ingress({
        let mut rule = test_rule();
        rule.match_[0].rules[0].method = Some("GET".to_string());
        rule
    });
    // The snapshot list is already creation-ordered; both resources project
    // the same API name, so the older one must win.
    newer.metadata = meta("default", "test-ing", 10);

    let snap = snapshot(vec![older, newer], &["1.1.1.1"], 500);
    let state = parser::build(&snap);
    assert_eq!(state.apis.len(), 1);
    assert_eq!(state.apis[0].api.method, "POST");
}

#[test]
fn admission_rejects_unknown_cluster() {
    let mut rule = test_rule();
    rule.route[0].cluster.name = "missing-cls".to_string();
    let spec = ManbaIngressSpec { http: vec![rule] };

    let snap = snapshot(vec![], &[], 0);
    let denied = crate::validation::validate_ingress(&snap, "default", &spec).unwrap_err();
    assert_eq!(denied, "manba cluster default/missing-cls not found");
}

#[test]
fn admission_rejects_unknown_subset() {
    let mut rule = test_rule();
    rule.route[0].cluster.subset = "v2".to_string();
    let spec = ManbaIngressSpec { http: vec![rule] };

    let snap = snapshot(vec![], &[], 0);
    let denied = crate::validation::validate_ingress(&snap, "default", &spec).unwrap_err();
    assert_eq!(denied, "manba cluster default/test-cls not found");
}

#[test]
fn admission_rejects_invalid_match_regex() {
    let mut rule = test_rule();
    rule.route[0].match_ = Some(manba_ingress_controller_k8s_api::ManbaHttpRouteMatch {
        header: btreemap! { "x-token".to_string() => "(".to_string() },
        ..Default::default()
    });
    let spec = ManbaIngressSpec { http: vec![rule] };

    let snap = snapshot(vec![], &[], 0);
    let denied = crate::validation::validate_ingress(&snap, "default", &spec).unwrap_err();
    assert_eq!(
        denied,
        "manba http route match value must conform to the regular expression rule"
    );
}

#[test]
fn admission_allows_a_valid_spec() {
    let spec = ManbaIngressSpec {
        http: vec![test_rule()],
    };
    let snap = snapshot(vec![], &[], 0);
    assert!(crate::validation::validate_ingress(&snap, "default", &spec).is_ok());
}

#[tokio::test]
async fn index_filters_by_ingress_class_and_notifies() {
    let (tx, mut rx) = ring::channel(16);
    let index = Index::shared(IngressClass::new("manba"), None, tx);

    let mut accepted = test_ingress(test_rule());
    accepted.metadata.annotations = Some(btreemap! {
        INGRESS_CLASS_ANNOTATION.to_string() => "manba".to_string()
    });
    index.write().apply(accepted);

    let mut foreign = test_ingress(test_rule());
    foreign.metadata.name = Some("other-ing".to_string());
    foreign.metadata.annotations = Some(btreemap! {
        INGRESS_CLASS_ANNOTATION.to_string() => "nginx".to_string()
    });
    index.write().apply(foreign);

    let snap = index.read().snapshot();
    assert_eq!(snap.ingresses().len(), 1);
    assert_eq!(
        snap.ingresses()[0].metadata.name.as_deref(),
        Some("test-ing")
    );

    let trigger = rx.recv().await.unwrap();
    assert_eq!(trigger.kind, "manbaingress");
    assert_eq!(trigger.name, "test-ing");
}

#[tokio::test]
async fn reset_drops_resources_deleted_during_a_watch_gap() {
    let (tx, mut rx) = ring::channel(16);
    let index = Index::shared(IngressClass::new("manba"), None, tx);

    let mut kept = test_ingress(test_rule());
    kept.metadata = meta("default", "kept-ing", 0);
    let mut dropped = test_ingress(test_rule());
    dropped.metadata = meta("default", "dropped-ing", 1);

    index.write().apply(kept.clone());
    index.write().apply(dropped);

    // A relist that no longer contains dropped-ing must evict it.
    let mut removed = kubert::index::NamespacedRemoved::default();
    removed
        .entry("default".to_string())
        .or_default()
        .insert("dropped-ing".to_string());
    index.write().reset(vec![kept], removed);

    let snap = index.read().snapshot();
    assert_eq!(snap.ingresses().len(), 1);
    assert_eq!(
        snap.ingresses()[0].metadata.name.as_deref(),
        Some("kept-ing")
    );

    // Two applies, the reset eviction, and the reset re-apply.
    let mut names = Vec::new();
    for _ in 0..4 {
        names.push(rx.recv().await.unwrap().name);
    }
    assert_eq!(names, vec!["kept-ing", "dropped-ing", "dropped-ing", "kept-ing"]);
}

#[tokio::test]
async fn snapshot_orders_ingresses_by_creation_time() {
    let (tx, _rx) = ring::channel(16);
    let index = Index::shared(IngressClass::new("manba"), None, tx);

    let mut newer = test_ingress(test_rule());
    newer.metadata = meta("default", "a-newer", 10);
    let mut older = test_ingress(test_rule());
    older.metadata = meta("default", "z-older", 1);

    index.write().apply(newer);
    index.write().apply(older);

    let names: Vec<String> = index
        .read()
        .snapshot()
        .ingresses()
        .iter()
        .map(|i| i.metadata.name.clone().unwrap())
        .collect();
    assert_eq!(names, vec!["z-older", "a-newer"]);
}
