//! Cheap name-based pre-check.
//!
//! Only ever answers "not installed". Anything it is unsure about goes on to
//! the package database query.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::Application;
use crate::ui::Renderer;

/// Substrings that only appear in placeholder or test package names.
const PLACEHOLDER_MARKERS: &[&str] = &[
    "this-package",
    "does-not-exist",
    "nonexistent",
    "fake-package",
    "test-package",
    "definitely-does-not-exist",
    "completely-fake",
    "absolutely-does-not-exist",
];

/// Random tokens no distribution uses as a package name: a uuid, or a run of
/// at least 16 hex digits standing as its own word.
const RANDOM_TOKEN: &str =
    r"(?:^|[^0-9a-z])(?:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}|[0-9a-f]{16,})(?:$|[^0-9a-z])";

#[derive(Debug, Default)]
pub struct QuickCheck {
    pub verified: HashMap<String, bool>,
    pub unverified: Vec<Application>,
}

#[derive(Debug)]
pub struct QuickVerificationLayer {
    renderer: Arc<Renderer>,
    random_token: Option<Regex>,
}

impl QuickVerificationLayer {
    pub fn new(renderer: Arc<Renderer>) -> Self {
        Self {
            renderer,
            random_token: Regex::new(RANDOM_TOKEN).ok(),
        }
    }

    /// Split `apps` into those known to be absent and those needing a real query.
    pub fn quick_verify(&self, apps: &[Application]) -> QuickCheck {
        let mut result = QuickCheck::default();
        for app in apps {
            match app.packages.iter().find(|p| self.is_definitely_absent(p)) {
                Some(package) => {
                    self.renderer.debug(
                        "status.l2.placeholder",
                        &format!("{}: '{}' is a placeholder package name", app.name, package),
                    );
                    result.verified.insert(app.name.clone(), false);
                }
                None => result.unverified.push(app.clone()),
            }
        }

        self.renderer.debug(
            "status.l2.complete",
            &format!(
                "Quick verification: {} resolved, {} need a system query",
                result.verified.len(),
                result.unverified.len()
            ),
        );
        result
    }

    pub fn is_definitely_absent(&self, package: &str) -> bool {
        let lower = package.to_lowercase();
        if PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m)) {
            return true;
        }
        self.random_token
            .as_ref()
            .is_some_and(|re| re.is_match(&lower))
    }
}
