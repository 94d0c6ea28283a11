//! Builders for test patches and targets.

#![allow(dead_code)]

use route_merger::resource::{L4Match, RouteDestination, TlsMatch};
use route_merger::{
    HttpRoute, ObjectKey, RoutePatch, RouteTarget, TargetRef, TcpRoute, TlsRoute,
    DEFAULT_FINALIZER,
};

/// Builder for `RoutePatch` resources.
pub struct PatchBuilder {
    patch: RoutePatch,
}

impl PatchBuilder {
    /// A patch in `namespace` targeting `target` in the same namespace.
    pub fn new(namespace: &str, name: &str, target: &str) -> Self {
        Self {
            patch: RoutePatch::patch(namespace, name, TargetRef::new(target)),
        }
    }

    /// Points the patch at a target in another namespace.
    pub fn target_namespace(mut self, namespace: &str) -> Self {
        self.patch.spec.target.namespace = namespace.to_string();
        self
    }

    /// Adds the default finalizer marker up front.
    pub fn guarded(mut self) -> Self {
        self.patch
            .metadata
            .finalizers
            .push(DEFAULT_FINALIZER.to_string());
        self
    }

    pub fn http(mut self, name: &str, prefix: &str) -> Self {
        let host = format!("{}.svc.cluster.local", name);
        self.patch
            .spec
            .http
            .push(HttpRoute::prefix(name, prefix, host));
        self
    }

    pub fn tcp(mut self, name: &str, port: u32) -> Self {
        self.patch.spec.tcp.push(TcpRoute {
            name: name.to_string(),
            match_conditions: vec![L4Match {
                port: Some(port),
                ..Default::default()
            }],
            route: vec![RouteDestination::to_host(format!("{}.svc", name))],
        });
        self
    }

    pub fn tls(mut self, name: &str, sni: &str) -> Self {
        self.patch.spec.tls.push(TlsRoute {
            name: name.to_string(),
            match_conditions: vec![TlsMatch {
                sni_hosts: vec![sni.to_string()],
                ..Default::default()
            }],
            route: vec![RouteDestination::to_host(sni)],
        });
        self
    }

    pub fn build(self) -> RoutePatch {
        self.patch
    }
}

/// Builder for `RouteTarget` resources.
pub struct TargetBuilder {
    target: RouteTarget,
}

impl TargetBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            target: RouteTarget::target(namespace, name),
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.target.spec.hosts.push(host.to_string());
        self
    }

    /// Adds an HTTP route owned by the target itself.
    pub fn own_http(mut self, name: &str, prefix: &str) -> Self {
        self.target
            .spec
            .http
            .push(HttpRoute::prefix(name, prefix, "owner.svc"));
        self
    }

    pub fn build(self) -> RouteTarget {
        self.target
    }
}

pub fn key(namespace: &str, name: &str) -> ObjectKey {
    ObjectKey::new(namespace, name)
}
