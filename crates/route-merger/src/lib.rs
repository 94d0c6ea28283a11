pub mod config;
pub mod context;
pub mod controller;
pub mod defaulting;
pub mod error;
pub mod finalizer;
pub mod merge;
pub mod migration;
pub mod reconciler;
pub mod resource;
pub mod revision;
pub mod store;
mod sync;
pub mod telemetry;
pub mod validation;
pub mod watcher;

pub use config::{EngineConfig, LogFormat, LogSettings, NamespaceFilter};
pub use context::ReconcileContext;
pub use controller::{Controller, PatchEvent, ResyncSummary, SnapshotCache};
pub use defaulting::{DefaultingHook, PatchHandling};
pub use error::{ConfigError, ErrorKind, ReconcileError, Result};
pub use finalizer::{FinalizerState, FinalizerStep, DEFAULT_FINALIZER};
pub use merge::{InsertPosition, MergeOutcome, MergePolicy, DEFAULT_INSERT_POSITION};
pub use migration::Migration;
pub use reconciler::{reconcile, ReconcileOutcome, Reconciliation};
pub use resource::{
    HttpRoute, ObjectKey, ObjectMeta, Resource, ResourceKind, RouteClass, RoutePatch,
    RoutePatchSpec, RoutePatchStatus, RouteTarget, RouteTargetSpec, TargetRef, TcpRoute,
    TlsRoute, API_VERSION,
};
pub use store::{FileStore, MemoryStore, ResourceStore, StoreError};
pub use watcher::{BackgroundWatcher, StoreWatcher};
