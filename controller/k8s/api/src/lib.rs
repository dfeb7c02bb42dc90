#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cluster;
pub mod ingress;

pub use self::cluster::{ManbaCluster, ManbaClusterSpec, ManbaClusterSubset, TrafficPolicy};
pub use self::ingress::{
    ManbaHttpMatch, ManbaHttpMatchRule, ManbaHttpRoute, ManbaHttpRouteCluster,
    ManbaHttpRouteMatch, ManbaHttpRouting, ManbaHttpRule, ManbaHttpUriMatch, ManbaHttpUriRewrite,
    ManbaIngress, ManbaIngressSpec, ManbaIngressStatus,
};
pub use k8s_openapi::{
    api::{
        self,
        coordination::v1::Lease,
        core::v1::{
            Endpoints, Node, Pod, Secret, Service, ServicePort, ServiceSpec, ServiceStatus,
        },
        networking,
    },
    apimachinery::{
        self,
        pkg::{apis::meta::v1::Time, util::intstr::IntOrString},
    },
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    error::ErrorResponse,
    Client, Error,
};

/// The annotation consulted by the ingress-class filter.
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
