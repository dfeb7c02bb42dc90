//! Pre-submit entity validation.
//!
//! The gateway rejects malformed entities with opaque errors; these checks
//! run before submission so that one bad entity is dropped with a warning
//! instead of failing the whole sync.

use crate::model::{Api, Cluster, Routing, Server};

pub fn server_ok(server: &Server) -> bool {
    let well_formed = match server.addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    };
    if !well_formed {
        tracing::warn!(addr = %server.addr, "dropping server with malformed address");
        return false;
    }
    true
}

pub fn cluster_ok(cluster: &Cluster) -> bool {
    if cluster.name.is_empty() {
        tracing::warn!(id = cluster.id, "dropping cluster without a name");
        return false;
    }
    true
}

pub fn api_ok(api: &Api) -> bool {
    if api.method.is_empty() || api.url_pattern.is_empty() || api.domain.is_empty() {
        tracing::warn!(
            name = %api.name,
            method = %api.method,
            url_pattern = %api.url_pattern,
            domain = %api.domain,
            "dropping api with missing route fields",
        );
        return false;
    }
    true
}

pub fn routing_ok(routing: &Routing) -> bool {
    if routing.api_id == 0 || routing.cluster_id == 0 {
        tracing::warn!(
            name = %routing.name,
            api_id = routing.api_id,
            cluster_id = routing.cluster_id,
            "dropping routing with unresolved references",
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    #[test]
    fn server_addr_must_be_host_port() {
        let ok = Server {
            addr: "1.1.1.1:8080".to_string(),
            ..Default::default()
        };
        assert!(server_ok(&ok));

        let bad = Server {
            addr: "1.1.1.1".to_string(),
            ..Default::default()
        };
        assert!(!server_ok(&bad));
    }

    #[test]
    fn api_requires_route_fields() {
        let mut api = Api {
            name: "a".to_string(),
            domain: "example.com".to_string(),
            url_pattern: "/".to_string(),
            method: "*".to_string(),
            ..Default::default()
        };
        assert!(api_ok(&api));

        api.domain.clear();
        assert!(!api_ok(&api));
    }

    #[test]
    fn routing_requires_resolved_ids() {
        let routing = Routing {
            name: "r".to_string(),
            api_id: 1,
            cluster_id: 2,
            ..Default::default()
        };
        assert!(routing_ok(&routing));
        assert!(!routing_ok(&Routing {
            api_id: 0,
            ..routing.clone()
        }));
    }
}
