//! The watch-fed resource cache.
//!
//! One `Index` holds every input the parser needs. Watch streams feed it
//! through [`kubert::index::IndexNamespacedResource`]; each accepted change
//! nudges the sync loop through the coalescing ring channel.

use crate::class::IngressClass;
use crate::ring;
use ahash::AHashMap as HashMap;
use manba_ingress_controller_k8s_api::{
    Endpoints, ManbaCluster, ManbaIngress, ResourceExt, Secret, Service,
};
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedIndex = Arc<RwLock<Index>>;

#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

pub struct Index {
    class: IngressClass,
    /// When set, resources outside this namespace are ignored.
    namespace: Option<String>,
    notify: ring::Sender,

    ingresses: HashMap<ResourceId, ManbaIngress>,
    clusters: HashMap<ResourceId, ManbaCluster>,
    services: HashMap<ResourceId, Service>,
    endpoints: HashMap<ResourceId, Endpoints>,
    secrets: HashMap<ResourceId, Secret>,
}

impl Index {
    pub fn shared(
        class: IngressClass,
        namespace: Option<String>,
        notify: ring::Sender,
    ) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            class,
            namespace,
            notify,
            ingresses: HashMap::new(),
            clusters: HashMap::new(),
            services: HashMap::new(),
            endpoints: HashMap::new(),
            secrets: HashMap::new(),
        }))
    }

    pub fn ingress_class(&self) -> &IngressClass {
        &self.class
    }

    fn in_scope(&self, namespace: &str) -> bool {
        match &self.namespace {
            Some(ns) => ns == namespace,
            None => true,
        }
    }

    /// A point-in-time copy of everything the parser reads.
    pub fn snapshot(&self) -> Snapshot {
        let mut ingresses: Vec<ManbaIngress> = self.ingresses.values().cloned().collect();
        ingresses.sort_by(|a, b| {
            let ka = (
                a.metadata.creation_timestamp.as_ref().map(|t| t.0),
                a.namespace().unwrap_or_default(),
                a.name_unchecked(),
            );
            let kb = (
                b.metadata.creation_timestamp.as_ref().map(|t| t.0),
                b.namespace().unwrap_or_default(),
                b.name_unchecked(),
            );
            ka.cmp(&kb)
        });

        Snapshot {
            ingresses,
            clusters: self.clusters.clone(),
            services: self.services.clone(),
            endpoints: self.endpoints.clone(),
            secrets: self.secrets.clone(),
        }
    }
}

/// What one sync sees: consistent, immutable, and already class-filtered.
#[derive(Clone, Debug)]
pub struct Snapshot {
    ingresses: Vec<ManbaIngress>,
    clusters: HashMap<ResourceId, ManbaCluster>,
    services: HashMap<ResourceId, Service>,
    endpoints: HashMap<ResourceId, Endpoints>,
    secrets: HashMap<ResourceId, Secret>,
}

impl Snapshot {
    /// Selected ManbaIngresses ordered by creation timestamp, then
    /// namespace/name.
    pub fn ingresses(&self) -> &[ManbaIngress] {
        &self.ingresses
    }

    pub fn cluster(&self, namespace: &str, name: &str) -> Option<&ManbaCluster> {
        self.clusters.get(&ResourceId::new(namespace, name))
    }

    /// Services in a namespace whose labels include every `selector` entry,
    /// ordered by name.
    pub fn services_selected(
        &self,
        namespace: &str,
        selector: &std::collections::BTreeMap<String, String>,
    ) -> Vec<&Service> {
        let mut matched: Vec<&Service> = self
            .services
            .iter()
            .filter(|(id, _)| id.namespace == namespace)
            .filter(|(_, svc)| {
                let labels = svc.metadata.labels.clone().unwrap_or_default();
                selector
                    .iter()
                    .all(|(k, v)| labels.get(k).map(String::as_str) == Some(v))
            })
            .map(|(_, svc)| svc)
            .collect();
        matched.sort_by_key(|svc| svc.name_unchecked());
        matched
    }

    pub fn endpoints(&self, namespace: &str, name: &str) -> Option<&Endpoints> {
        self.endpoints.get(&ResourceId::new(namespace, name))
    }

    /// TLS material hook; fetched but not yet wired into gateway entities.
    pub fn secret(&self, namespace: &str, name: &str) -> Option<&Secret> {
        self.secrets.get(&ResourceId::new(namespace, name))
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        ingresses: Vec<ManbaIngress>,
        clusters: HashMap<ResourceId, ManbaCluster>,
        services: HashMap<ResourceId, Service>,
        endpoints: HashMap<ResourceId, Endpoints>,
    ) -> Self {
        Self {
            ingresses,
            clusters,
            services,
            endpoints,
            secrets: HashMap::new(),
        }
    }
}

impl kubert::index::IndexNamespacedResource<ManbaIngress> for Index {
    fn apply(&mut self, resource: ManbaIngress) {
        let namespace = resource.namespace().expect("ManbaIngress must be namespaced");
        let name = resource.name_unchecked();
        if !self.in_scope(&namespace) {
            return;
        }
        let id = ResourceId::new(namespace.clone(), name.clone());

        if !self.class.accepts(Some(resource.annotations())) {
            // An update may move an object out of our class; that is a
            // removal from this controller's point of view.
            if self.ingresses.remove(&id).is_some() {
                self.notify
                    .send(ring::Trigger::new("manbaingress", namespace, name));
            }
            return;
        }

        self.ingresses.insert(id, resource);
        self.notify
            .send(ring::Trigger::new("manbaingress", namespace, name));
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace.clone(), name.clone());
        if self.ingresses.remove(&id).is_some() {
            self.notify
                .send(ring::Trigger::new("manbaingress", namespace, name));
        }
    }

    // Fires on every watch relist; objects deleted while the watch was
    // disconnected only surface here.
    fn reset(&mut self, resources: Vec<ManbaIngress>, removed: kubert::index::NamespacedRemoved) {
        let _span = tracing::info_span!("reset").entered();
        for (namespace, names) in removed {
            for name in names {
                let id = ResourceId::new(namespace.clone(), name.clone());
                if self.ingresses.remove(&id).is_some() {
                    self.notify.send(ring::Trigger::new(
                        "manbaingress",
                        namespace.clone(),
                        name,
                    ));
                }
            }
        }
        for resource in resources {
            self.apply(resource);
        }
    }
}

impl kubert::index::IndexNamespacedResource<ManbaCluster> for Index {
    fn apply(&mut self, resource: ManbaCluster) {
        let namespace = resource.namespace().expect("ManbaCluster must be namespaced");
        let name = resource.name_unchecked();
        if !self.in_scope(&namespace) {
            return;
        }
        self.clusters
            .insert(ResourceId::new(namespace.clone(), name.clone()), resource);
        self.notify
            .send(ring::Trigger::new("manbacluster", namespace, name));
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .clusters
            .remove(&ResourceId::new(namespace.clone(), name.clone()))
            .is_some()
        {
            self.notify
                .send(ring::Trigger::new("manbacluster", namespace, name));
        }
    }

    fn reset(&mut self, resources: Vec<ManbaCluster>, removed: kubert::index::NamespacedRemoved) {
        let _span = tracing::info_span!("reset").entered();
        for (namespace, names) in removed {
            for name in names {
                if self
                    .clusters
                    .remove(&ResourceId::new(namespace.clone(), name.clone()))
                    .is_some()
                {
                    self.notify.send(ring::Trigger::new(
                        "manbacluster",
                        namespace.clone(),
                        name,
                    ));
                }
            }
        }
        for resource in resources {
            self.apply(resource);
        }
    }
}

impl kubert::index::IndexNamespacedResource<Service> for Index {
    fn apply(&mut self, resource: Service) {
        let namespace = resource.namespace().expect("Service must be namespaced");
        let name = resource.name_unchecked();
        if !self.in_scope(&namespace) {
            return;
        }
        self.services
            .insert(ResourceId::new(namespace.clone(), name.clone()), resource);
        self.notify
            .send(ring::Trigger::new("service", namespace, name));
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .services
            .remove(&ResourceId::new(namespace.clone(), name.clone()))
            .is_some()
        {
            self.notify
                .send(ring::Trigger::new("service", namespace, name));
        }
    }

    fn reset(&mut self, resources: Vec<Service>, removed: kubert::index::NamespacedRemoved) {
        let _span = tracing::info_span!("reset").entered();
        for (namespace, names) in removed {
            for name in names {
                if self
                    .services
                    .remove(&ResourceId::new(namespace.clone(), name.clone()))
                    .is_some()
                {
                    self.notify
                        .send(ring::Trigger::new("service", namespace.clone(), name));
                }
            }
        }
        for resource in resources {
            self.apply(resource);
        }
    }
}

impl kubert::index::IndexNamespacedResource<Endpoints> for Index {
    fn apply(&mut self, resource: Endpoints) {
        let namespace = resource.namespace().expect("Endpoints must be namespaced");
        let name = resource.name_unchecked();
        if !self.in_scope(&namespace) {
            return;
        }
        self.endpoints
            .insert(ResourceId::new(namespace.clone(), name.clone()), resource);
        self.notify
            .send(ring::Trigger::new("endpoints", namespace, name));
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self
            .endpoints
            .remove(&ResourceId::new(namespace.clone(), name.clone()))
            .is_some()
        {
            self.notify
                .send(ring::Trigger::new("endpoints", namespace, name));
        }
    }

    fn reset(&mut self, resources: Vec<Endpoints>, removed: kubert::index::NamespacedRemoved) {
        let _span = tracing::info_span!("reset").entered();
        for (namespace, names) in removed {
            for name in names {
                if self
                    .endpoints
                    .remove(&ResourceId::new(namespace.clone(), name.clone()))
                    .is_some()
                {
                    self.notify
                        .send(ring::Trigger::new("endpoints", namespace.clone(), name));
                }
            }
        }
        for resource in resources {
            self.apply(resource);
        }
    }
}

impl kubert::index::IndexNamespacedResource<Secret> for Index {
    fn apply(&mut self, resource: Secret) {
        let namespace = resource.namespace().expect("Secret must be namespaced");
        let name = resource.name_unchecked();
        if !self.in_scope(&namespace) {
            return;
        }
        // Secrets only carry TLS material; no sync is needed when one
        // changes.
        self.secrets
            .insert(ResourceId::new(namespace, name), resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.secrets.remove(&ResourceId::new(namespace, name));
    }

    fn reset(&mut self, resources: Vec<Secret>, removed: kubert::index::NamespacedRemoved) {
        for (namespace, names) in removed {
            for name in names {
                self.secrets
                    .remove(&ResourceId::new(namespace.clone(), name));
            }
        }
        for resource in resources {
            self.apply(resource);
        }
    }
}
