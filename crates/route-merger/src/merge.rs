//! Route merge algorithm.
//!
//! Pure functions that fold a patch's route fragments into a target's ordered
//! route lists, or take them back out. Every entry written on behalf of a
//! patch is renamed to `{patchNamespace}/{patchName}/{routeName}`; object
//! names cannot contain `/`, so the `{patchNamespace}/{patchName}/` prefix
//! attributes an entry to exactly one patch.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::resource::{NamedRoute, ObjectKey, RouteClass, RoutePatch, RouteTargetSpec};

/// Separator between the parts of an attribution key.
pub const ATTRIBUTION_SEPARATOR: char = '/';

/// Where entries new to a target are inserted.
pub const DEFAULT_INSERT_POSITION: InsertPosition = InsertPosition::Append;

/// Placement of entries that are not yet present on the target.
///
/// Entries that already exist are always replaced in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertPosition {
    /// After every existing entry, in declared order.
    #[default]
    Append,
    /// Before every existing entry, in declared order.
    Prepend,
}

impl std::fmt::Display for InsertPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsertPosition::Append => write!(f, "append"),
            InsertPosition::Prepend => write!(f, "prepend"),
        }
    }
}

impl std::str::FromStr for InsertPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" | "end" => Ok(InsertPosition::Append),
            "prepend" | "start" => Ok(InsertPosition::Prepend),
            _ => Err(format!("Unknown insert position: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergePolicy {
    pub insert_position: InsertPosition,
}

impl MergePolicy {
    pub fn new(insert_position: InsertPosition) -> Self {
        Self { insert_position }
    }
}

/// Changes made to one route list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassOutcome {
    pub inserted: usize,
    pub replaced: usize,
    pub removed: usize,
}

impl ClassOutcome {
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.replaced == 0 && self.removed == 0
    }
}

/// Changes made to a target by one merge call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub tcp: ClassOutcome,
    pub tls: ClassOutcome,
    pub http: ClassOutcome,
}

impl MergeOutcome {
    /// True when the merged target equals the input target.
    pub fn is_noop(&self) -> bool {
        self.tcp.is_noop() && self.tls.is_noop() && self.http.is_noop()
    }

    pub fn class(&self, class: RouteClass) -> &ClassOutcome {
        match class {
            RouteClass::Tcp => &self.tcp,
            RouteClass::Tls => &self.tls,
            RouteClass::Http => &self.http,
        }
    }
}

impl std::fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inserted = self.tcp.inserted + self.tls.inserted + self.http.inserted;
        let replaced = self.tcp.replaced + self.tls.replaced + self.http.replaced;
        let removed = self.tcp.removed + self.tls.removed + self.http.removed;
        write!(
            f,
            "{} inserted, {} replaced, {} removed",
            inserted, replaced, removed
        )
    }
}

/// The name prefix shared by every entry contributed by `patch`.
pub fn owner_prefix(patch: &ObjectKey) -> String {
    format!(
        "{}{sep}{}{sep}",
        patch.namespace,
        patch.name,
        sep = ATTRIBUTION_SEPARATOR
    )
}

/// The name an entry declared as `route_name` by `patch` carries on a target.
pub fn attribution_key(patch: &ObjectKey, route_name: &str) -> String {
    format!("{}{}", owner_prefix(patch), route_name)
}

/// Whether the target entry named `entry_name` was contributed by `patch`.
pub fn is_owned_by(entry_name: &str, patch: &ObjectKey) -> bool {
    entry_name.starts_with(&owner_prefix(patch))
}

/// Merges every route `patch` declares into a copy of `target`.
///
/// Entries the patch already owns are replaced in place, new entries are
/// placed according to `policy`, and owned entries the patch no longer
/// declares are dropped. Entries owned by anyone else keep their relative
/// order.
pub fn apply(
    patch: &RoutePatch,
    target: &RouteTargetSpec,
    policy: MergePolicy,
) -> (RouteTargetSpec, MergeOutcome) {
    let prefix = owner_prefix(&patch.key());
    let mut merged = target.clone();
    let mut outcome = MergeOutcome::default();

    (merged.tcp, outcome.tcp) = merge_class(
        &target.tcp,
        &patch.spec.tcp,
        &prefix,
        policy.insert_position,
    );
    (merged.tls, outcome.tls) = merge_class(
        &target.tls,
        &patch.spec.tls,
        &prefix,
        policy.insert_position,
    );
    (merged.http, outcome.http) = merge_class(
        &target.http,
        &patch.spec.http,
        &prefix,
        policy.insert_position,
    );

    (merged, outcome)
}

/// Removes every entry attributable to `patch` from a copy of `target`.
pub fn withdraw(patch: &ObjectKey, target: &RouteTargetSpec) -> (RouteTargetSpec, MergeOutcome) {
    let prefix = owner_prefix(patch);
    let mut withdrawn = target.clone();
    let mut outcome = MergeOutcome::default();

    (withdrawn.tcp, outcome.tcp) = withdraw_class(&target.tcp, &prefix);
    (withdrawn.tls, outcome.tls) = withdraw_class(&target.tls, &prefix);
    (withdrawn.http, outcome.http) = withdraw_class(&target.http, &prefix);

    (withdrawn, outcome)
}

/// Lists the declared route names of `patch` that are present on `target`.
pub fn applied_routes(patch: &RoutePatch, target: &RouteTargetSpec) -> Vec<String> {
    let prefix = owner_prefix(&patch.key());
    let names = target
        .tcp
        .iter()
        .map(NamedRoute::name)
        .chain(target.tls.iter().map(NamedRoute::name))
        .chain(target.http.iter().map(NamedRoute::name));

    names
        .filter_map(|name| name.strip_prefix(&prefix))
        .map(str::to_string)
        .collect()
}

fn merge_class<R: NamedRoute>(
    existing: &[R],
    declared: &[R],
    prefix: &str,
    position: InsertPosition,
) -> (Vec<R>, ClassOutcome) {
    let mut outcome = ClassOutcome::default();

    let owned: Vec<R> = declared
        .iter()
        .map(|route| {
            let mut route = route.clone();
            route.set_name(format!("{}{}", prefix, route.name()));
            route
        })
        .collect();

    let mut placed: HashSet<String> = HashSet::new();
    let mut merged: Vec<R> = Vec::with_capacity(existing.len() + owned.len());

    for entry in existing {
        if !entry.name().starts_with(prefix) {
            merged.push(entry.clone());
            continue;
        }

        let replacement = owned.iter().find(|route| route.name() == entry.name());
        match replacement {
            Some(route) if !placed.contains(route.name()) => {
                if route != entry {
                    outcome.replaced += 1;
                }
                placed.insert(route.name().to_string());
                merged.push(route.clone());
            }
            // No longer declared, or a duplicate of an entry already placed.
            _ => outcome.removed += 1,
        }
    }

    let mut fresh = Vec::new();
    for route in owned {
        if placed.insert(route.name().to_string()) {
            fresh.push(route);
        }
    }
    outcome.inserted = fresh.len();

    match position {
        InsertPosition::Append => merged.extend(fresh),
        InsertPosition::Prepend => {
            merged.splice(0..0, fresh);
        }
    }

    (merged, outcome)
}

fn withdraw_class<R: NamedRoute>(existing: &[R], prefix: &str) -> (Vec<R>, ClassOutcome) {
    let kept: Vec<R> = existing
        .iter()
        .filter(|entry| !entry.name().starts_with(prefix))
        .cloned()
        .collect();

    let outcome = ClassOutcome {
        removed: existing.len() - kept.len(),
        ..Default::default()
    };
    (kept, outcome)
}
