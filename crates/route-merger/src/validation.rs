//! Validation of route patches before they touch a target.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

// DNS-1123 label: what a namespace may be
static RE_DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

// DNS-1123 subdomain: what an object name may be
static RE_DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

const MAX_LABEL_LENGTH: usize = 63;
const MAX_SUBDOMAIN_LENGTH: usize = 253;

use crate::error::{ReconcileError, Result};
use crate::merge::ATTRIBUTION_SEPARATOR;
use crate::resource::{NamedRoute, RouteClass, RoutePatch, StringMatch};

/// Validator for route patches.
pub struct PatchValidator {
    /// Collected validation errors.
    errors: Vec<String>,
}

impl PatchValidator {
    /// Creates a new validator.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Validates the target reference and every declared route.
    pub fn validate(&mut self, patch: &RoutePatch) -> Result<()> {
        self.errors.clear();

        self.check_target_ref(patch);
        self.check_routes(RouteClass::Tcp, &patch.spec.tcp);
        self.check_routes(RouteClass::Tls, &patch.spec.tls);
        self.check_routes(RouteClass::Http, &patch.spec.http);
        self.check_http_matches(patch);

        self.finish(patch)
    }

    /// Validates only the target reference.
    ///
    /// Withdrawal needs nothing else, so a broken route list never blocks
    /// cleanup.
    pub fn validate_target_ref(&mut self, patch: &RoutePatch) -> Result<()> {
        self.errors.clear();
        self.check_target_ref(patch);
        self.finish(patch)
    }

    /// Returns the errors from the last validation run.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    fn finish(&self, patch: &RoutePatch) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::Validation {
                patch: patch.key(),
                message: self.errors.join("; "),
            })
        }
    }

    fn check_target_ref(&mut self, patch: &RoutePatch) {
        let target = &patch.spec.target;

        if target.name.is_empty() {
            self.errors
                .push("spec.target.name is required".to_string());
        } else if !is_dns_subdomain(&target.name) {
            self.errors.push(format!(
                "spec.target.name '{}' must be a lowercase DNS-1123 subdomain",
                target.name
            ));
        }

        if !target.namespace.is_empty() && !is_dns_label(&target.namespace) {
            self.errors.push(format!(
                "spec.target.namespace '{}' must be a lowercase DNS-1123 label",
                target.namespace
            ));
        }
    }

    fn check_routes<R: NamedRoute>(&mut self, class: RouteClass, routes: &[R]) {
        let mut seen = HashSet::new();

        for (index, route) in routes.iter().enumerate() {
            let name = route.name();

            if name.is_empty() {
                self.errors
                    .push(format!("spec.{}[{}].name is required", class, index));
                continue;
            }

            if name.contains(ATTRIBUTION_SEPARATOR) {
                self.errors.push(format!(
                    "spec.{}[{}].name '{}' must not contain '{}'",
                    class, index, name, ATTRIBUTION_SEPARATOR
                ));
            }

            if !seen.insert(name) {
                self.errors.push(format!(
                    "spec.{}[{}].name '{}' is declared more than once",
                    class, index, name
                ));
            }
        }
    }

    fn check_http_matches(&mut self, patch: &RoutePatch) {
        for (index, route) in patch.spec.http.iter().enumerate() {
            for (m, conditions) in route.match_conditions.iter().enumerate() {
                let field = format!("spec.http[{}].match[{}]", index, m);
                let mut matchers: Vec<(String, &StringMatch)> = Vec::new();
                if let Some(uri) = &conditions.uri {
                    matchers.push((format!("{}.uri", field), uri));
                }
                if let Some(method) = &conditions.method {
                    matchers.push((format!("{}.method", field), method));
                }
                for (header, value) in &conditions.headers {
                    matchers.push((format!("{}.headers.{}", field, header), value));
                }

                for (path, matcher) in matchers {
                    if matcher.criteria_count() != 1 {
                        self.errors.push(format!(
                            "{} must set exactly one of exact, prefix or regex",
                            path
                        ));
                    }
                }
            }
        }
    }
}

impl Default for PatchValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates the whole patch.
pub fn validate_patch(patch: &RoutePatch) -> Result<()> {
    PatchValidator::new().validate(patch)
}

/// Validates only the target reference of the patch.
pub fn validate_target_ref(patch: &RoutePatch) -> Result<()> {
    PatchValidator::new().validate_target_ref(patch)
}

fn is_dns_label(s: &str) -> bool {
    s.len() <= MAX_LABEL_LENGTH && RE_DNS_LABEL.is_match(s)
}

fn is_dns_subdomain(s: &str) -> bool {
    s.len() <= MAX_SUBDOMAIN_LENGTH && RE_DNS_SUBDOMAIN.is_match(s)
}
