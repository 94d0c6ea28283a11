//! K8s-style resource types for route patches and the targets they modify.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The API version for all route-merger resources.
pub const API_VERSION: &str = "routemerger.io/v1alpha1";

/// Namespace used when an object is stored without one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    RoutePatch,
    RouteTarget,
}

impl ResourceKind {
    /// Returns the directory name for storing resources of this kind.
    pub fn directory(&self) -> &'static str {
        match self {
            ResourceKind::RoutePatch => "patches",
            ResourceKind::RouteTarget => "targets",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::RoutePatch => write!(f, "RoutePatch"),
            ResourceKind::RouteTarget => write!(f, "RouteTarget"),
        }
    }
}

/// Namespace/name pair identifying one object of a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata for a resource, following K8s conventions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// The unique name of the resource within its kind and namespace.
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Changes on every write. Used for optimistic concurrency.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,

    /// Changes only when the spec changes.
    #[serde(default)]
    pub generation: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    /// Set once removal has been requested. The object stays readable until
    /// its finalizer list is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    /// Key-value labels for organizing and selecting resources.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    /// Key-value annotations for storing additional metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl ObjectMeta {
    /// Creates a new ObjectMeta with a namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Whether removal of the object has been requested.
    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// A generic K8s-style resource wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<T, S = ()> {
    /// API version, should always be `routemerger.io/v1alpha1`.
    pub api_version: String,

    /// The kind of resource.
    pub kind: ResourceKind,

    /// Resource metadata.
    pub metadata: ObjectMeta,

    /// The resource specification.
    pub spec: T,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<S>,
}

impl<T, S> Resource<T, S> {
    /// Creates a new resource with the given kind and spec.
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: T,
    ) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind,
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: None,
        }
    }

    /// Returns the name of the resource.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the namespace of the resource.
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

/// Header used to peek at the kind before parsing the full document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHeader {
    pub api_version: String,
    pub kind: ResourceKind,
    pub metadata: ObjectMeta,
}

// ============================================================================
// RoutePatch Resource
// ============================================================================

/// Reference to the target a patch modifies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub name: String,

    /// Empty means "same namespace as the patch".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl TargetRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Resolves the reference, defaulting an empty namespace to `owner_namespace`.
    pub fn resolve(&self, owner_namespace: &str) -> ObjectKey {
        let namespace = if self.namespace.is_empty() {
            owner_namespace
        } else {
            self.namespace.as_str()
        };
        ObjectKey::new(namespace, self.name.clone())
    }
}

/// RoutePatch specification - the routes one patch contributes to a target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutePatchSpec {
    pub target: TargetRef,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp: Vec<TcpRoute>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<TlsRoute>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpRoute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePatchStatus {
    /// Last generation whose routes were fully applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled_revision: Option<u64>,
}

/// Type alias for RoutePatch resource.
pub type RoutePatch = Resource<RoutePatchSpec, RoutePatchStatus>;

impl Resource<RoutePatchSpec, RoutePatchStatus> {
    /// Creates a patch in `namespace` that targets `target`.
    pub fn patch(
        namespace: impl Into<String>,
        name: impl Into<String>,
        target: TargetRef,
    ) -> Self {
        Resource::new(
            ResourceKind::RoutePatch,
            namespace,
            name,
            RoutePatchSpec {
                target,
                ..Default::default()
            },
        )
    }

    /// The resolved key of the target this patch declares.
    pub fn target_key(&self) -> ObjectKey {
        self.spec.target.resolve(&self.metadata.namespace)
    }

    /// The content revision of the spec.
    pub fn revision(&self) -> u64 {
        self.metadata.generation
    }

    pub fn handled_revision(&self) -> Option<u64> {
        self.status.as_ref().and_then(|s| s.handled_revision)
    }

    /// Total number of route fragments declared across all classes.
    pub fn route_count(&self) -> usize {
        self.spec.tcp.len() + self.spec.tls.len() + self.spec.http.len()
    }
}

// ============================================================================
// RouteTarget Resource
// ============================================================================

/// RouteTarget specification - the shared, ordered route lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteTargetSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp: Vec<TcpRoute>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<TlsRoute>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpRoute>,
}

/// Type alias for RouteTarget resource.
pub type RouteTarget = Resource<RouteTargetSpec>;

impl Resource<RouteTargetSpec> {
    pub fn target(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Resource::new(
            ResourceKind::RouteTarget,
            namespace,
            name,
            RouteTargetSpec::default(),
        )
    }
}

// ============================================================================
// Route fragments
// ============================================================================

/// Route classes, each with its own ordered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    Tcp,
    Tls,
    Http,
}

impl RouteClass {
    pub fn all() -> &'static [RouteClass] {
        &[RouteClass::Tcp, RouteClass::Tls, RouteClass::Http]
    }
}

impl std::fmt::Display for RouteClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteClass::Tcp => write!(f, "tcp"),
            RouteClass::Tls => write!(f, "tls"),
            RouteClass::Http => write!(f, "http"),
        }
    }
}

/// A route entry that can be identified by name.
pub trait NamedRoute: Clone + PartialEq {
    const CLASS: RouteClass;

    fn name(&self) -> &str;

    fn set_name(&mut self, name: String);
}

/// Upstream the traffic is sent to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDestination {
    pub destination: Destination,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl RouteDestination {
    pub fn to_host(host: impl Into<String>) -> Self {
        Self {
            destination: Destination {
                host: host.into(),
                ..Default::default()
            },
            weight: None,
        }
    }
}

/// String match criteria. Exactly one field is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl StringMatch {
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            exact: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            prefix: Some(value.into()),
            ..Default::default()
        }
    }

    /// Number of match fields that are set.
    pub fn criteria_count(&self) -> usize {
        [&self.exact, &self.prefix, &self.regex]
            .iter()
            .filter(|v| v.is_some())
            .count()
    }
}

/// L4 match attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L4Match {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub source_labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpRoute {
    pub name: String,

    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub match_conditions: Vec<L4Match>,

    #[serde(default)]
    pub route: Vec<RouteDestination>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsMatch {
    #[serde(default)]
    pub sni_hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsRoute {
    pub name: String,

    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub match_conditions: Vec<TlsMatch>,

    #[serde(default)]
    pub route: Vec<RouteDestination>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<StringMatch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatch>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, StringMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRetry {
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_try_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRewrite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRoute {
    pub name: String,

    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub match_conditions: Vec<HttpMatch>,

    #[serde(default)]
    pub route: Vec<RouteDestination>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<HttpRetry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<HttpRewrite>,
}

impl HttpRoute {
    /// A route forwarding requests whose URI starts with `prefix` to `host`.
    pub fn prefix(name: impl Into<String>, prefix: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            match_conditions: vec![HttpMatch {
                uri: Some(StringMatch::prefix(prefix)),
                ..Default::default()
            }],
            route: vec![RouteDestination::to_host(host)],
            ..Default::default()
        }
    }
}

macro_rules! impl_named_route {
    ($ty:ty, $class:expr) => {
        impl NamedRoute for $ty {
            const CLASS: RouteClass = $class;

            fn name(&self) -> &str {
                &self.name
            }

            fn set_name(&mut self, name: String) {
                self.name = name;
            }
        }
    };
}

impl_named_route!(TcpRoute, RouteClass::Tcp);
impl_named_route!(TlsRoute, RouteClass::Tls);
impl_named_route!(HttpRoute, RouteClass::Http);

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_display() {
        assert_eq!(ResourceKind::RoutePatch.to_string(), "RoutePatch");
        assert_eq!(ResourceKind::RouteTarget.to_string(), "RouteTarget");
    }

    #[test]
    fn test_target_ref_defaults_to_owner_namespace() {
        let target = TargetRef::new("svc-a");
        assert_eq!(target.resolve("team-a"), ObjectKey::new("team-a", "svc-a"));

        let target = TargetRef::new("svc-a").in_namespace("shared");
        assert_eq!(target.resolve("team-a"), ObjectKey::new("shared", "svc-a"));
    }

    #[test]
    fn test_patch_helpers() {
        let mut patch = RoutePatch::patch("team-a", "p1", TargetRef::new("svc-a"));
        patch.metadata.generation = 3;
        assert_eq!(patch.kind, ResourceKind::RoutePatch);
        assert_eq!(patch.revision(), 3);
        assert_eq!(patch.handled_revision(), None);
        assert_eq!(patch.target_key().to_string(), "team-a/svc-a");

        patch.status = Some(RoutePatchStatus {
            handled_revision: Some(3),
        });
        assert_eq!(patch.handled_revision(), Some(3));
    }

    #[test]
    fn test_serialize_patch() {
        let mut patch = RoutePatch::patch("team-a", "p1", TargetRef::new("svc-a"));
        patch
            .spec
            .http
            .push(HttpRoute::prefix("api", "/api", "api.team-a.svc"));

        let yaml = serde_yaml::to_string(&patch).unwrap();
        assert!(yaml.contains("apiVersion: routemerger.io/v1alpha1"));
        assert!(yaml.contains("kind: RoutePatch"));
        assert!(yaml.contains("prefix: /api"));
        assert!(!yaml.contains("status"));
    }

    #[test]
    fn test_deserialize_patch() {
        let yaml = r#"
apiVersion: routemerger.io/v1alpha1
kind: RoutePatch
metadata:
  name: reviews-canary
  namespace: bookinfo
  resourceVersion: "7"
  generation: 2
  finalizers: [routemerger.io/finalizer]
spec:
  target:
    name: reviews
  tcp:
    - name: mysql
      match:
        - port: 3306
      route:
        - destination:
            host: mysql.bookinfo.svc
  http:
    - name: canary
      match:
        - headers:
            x-canary:
              exact: "true"
      route:
        - destination:
            host: reviews.bookinfo.svc
            subset: v2
          weight: 100
      retries:
        attempts: 3
        perTryTimeout: 2s
status:
  handledRevision: 1
"#;
        let patch: RoutePatch = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(patch.metadata.resource_version, "7");
        assert_eq!(patch.revision(), 2);
        assert_eq!(patch.handled_revision(), Some(1));
        assert_eq!(patch.target_key(), ObjectKey::new("bookinfo", "reviews"));
        assert_eq!(patch.spec.tcp[0].match_conditions[0].port, Some(3306));
        assert_eq!(
            patch.spec.http[0].match_conditions[0].headers.get("x-canary"),
            Some(&StringMatch::exact("true"))
        );
        assert_eq!(patch.spec.http[0].retries.as_ref().unwrap().attempts, 3);
        assert_eq!(patch.route_count(), 2);
    }

    #[test]
    fn test_deserialize_target_without_status() {
        let yaml = r#"
apiVersion: routemerger.io/v1alpha1
kind: RouteTarget
metadata:
  name: reviews
  namespace: bookinfo
spec:
  hosts: [reviews.bookinfo.svc]
  http:
    - name: default
      route:
        - destination:
            host: reviews.bookinfo.svc
            subset: v1
"#;
        let target: RouteTarget = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(target.kind, ResourceKind::RouteTarget);
        assert_eq!(target.spec.http.len(), 1);
        assert!(target.status.is_none());
        assert!(!target.metadata.is_being_deleted());
    }

    #[test]
    fn test_named_route_class() {
        assert_eq!(<TcpRoute as NamedRoute>::CLASS, RouteClass::Tcp);
        assert_eq!(<HttpRoute as NamedRoute>::CLASS, RouteClass::Http);

        let mut route = TlsRoute {
            name: "sni".to_string(),
            ..Default::default()
        };
        route.set_name("team-a/p1/sni".to_string());
        assert_eq!(NamedRoute::name(&route), "team-a/p1/sni");
    }
}
