//! Application catalog: definitions, derived suite state and change-sets.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigError;

pub mod loader;
pub mod model;
pub mod selection;

pub use model::{AppType, Application, ApplicationSuite, SoftwareItem, SuiteStatus};
pub use selection::{ChangeAction, SelectionState};

/// A row of the flattened, display-ordered catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlatEntry<'a> {
    App(&'a Application),
    Suite(&'a ApplicationSuite),
    Component {
        suite: &'a ApplicationSuite,
        app: &'a Application,
    },
}

impl FlatEntry<'_> {
    pub fn name(&self) -> &str {
        match self {
            FlatEntry::App(app) | FlatEntry::Component { app, .. } => &app.name,
            FlatEntry::Suite(suite) => &suite.name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoftwareCatalog {
    items: Vec<SoftwareItem>,
}

impl SoftwareCatalog {
    /// Build a catalog, rejecting duplicate application or suite names.
    pub fn new(items: Vec<SoftwareItem>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for item in &items {
            let mut names = vec![item.name()];
            if let SoftwareItem::Suite(suite) = item {
                names.extend(suite.components.iter().map(|c| c.name.as_str()));
            }
            for name in names {
                if !seen.insert(name.to_string()) {
                    return Err(ConfigError::DuplicateEntry(name.to_string()));
                }
            }
        }
        Ok(Self { items })
    }

    pub fn items(&self) -> &[SoftwareItem] {
        &self.items
    }

    /// Every installable application (standalone apps and suite components)
    /// in declaration order.
    pub fn applications(&self) -> Vec<&Application> {
        self.items
            .iter()
            .flat_map(|item| match item {
                SoftwareItem::App(app) => vec![app],
                SoftwareItem::Suite(suite) => suite.components.iter().collect(),
            })
            .collect()
    }

    fn applications_mut(&mut self) -> impl Iterator<Item = &mut Application> {
        self.items.iter_mut().flat_map(|item| match item {
            SoftwareItem::App(app) => std::slice::from_mut(app).iter_mut(),
            SoftwareItem::Suite(suite) => suite.components.iter_mut(),
        })
    }

    pub fn find(&self, name: &str) -> Option<&Application> {
        self.applications().into_iter().find(|app| app.name == name)
    }

    pub fn suite(&self, name: &str) -> Option<&ApplicationSuite> {
        self.items.iter().find_map(|item| match item {
            SoftwareItem::Suite(suite) if suite.name == name => Some(suite),
            _ => None,
        })
    }

    pub fn suites(&self) -> impl Iterator<Item = &ApplicationSuite> {
        self.items.iter().filter_map(|item| match item {
            SoftwareItem::Suite(suite) => Some(suite),
            SoftwareItem::App(_) => None,
        })
    }

    /// Update one application's installed flag. Returns false for unknown names.
    pub fn set_installed(&mut self, name: &str, installed: bool) -> bool {
        match self.applications_mut().find(|app| app.name == name) {
            Some(app) => {
                app.installed = installed;
                true
            }
            None => false,
        }
    }

    /// Write a resolved status map back into the catalog.
    pub fn apply_status(&mut self, status: &HashMap<String, bool>) {
        for app in self.applications_mut() {
            if let Some(&installed) = status.get(&app.name) {
                app.installed = installed;
            }
        }
    }

    /// Item-level installed view: a suite counts as installed when any
    /// component is.
    pub fn item_status(&self) -> HashMap<String, bool> {
        self.items
            .iter()
            .map(|item| match item {
                SoftwareItem::App(app) => (app.name.clone(), app.installed),
                SoftwareItem::Suite(suite) => (suite.name.clone(), suite.any_installed()),
            })
            .collect()
    }

    pub fn set_expanded(&mut self, suite_name: &str, expanded: bool) -> bool {
        for item in &mut self.items {
            if let SoftwareItem::Suite(suite) = item
                && suite.name == suite_name
            {
                suite.expanded = expanded;
                return true;
            }
        }
        false
    }

    /// Install/uninstall actions needed to move from the current installed
    /// flags to `selection`. Suites are never acted on directly, only their
    /// components.
    pub fn compute_changes(&self, selection: &SelectionState) -> Vec<ChangeAction> {
        self.applications()
            .into_iter()
            .filter_map(|app| {
                match (app.installed, selection.is_selected(app)) {
                    (true, false) => Some(ChangeAction::Uninstall(app.clone())),
                    (false, true) => Some(ChangeAction::Install(app.clone())),
                    _ => None,
                }
            })
            .collect()
    }

    /// Display order: declaration order, with an expanded suite's components
    /// right after the suite row.
    pub fn flatten(&self, expanded: &HashSet<String>) -> Vec<FlatEntry<'_>> {
        let mut rows = Vec::new();
        for item in &self.items {
            match item {
                SoftwareItem::App(app) => rows.push(FlatEntry::App(app)),
                SoftwareItem::Suite(suite) => {
                    rows.push(FlatEntry::Suite(suite));
                    if expanded.contains(&suite.name) {
                        rows.extend(
                            suite
                                .components
                                .iter()
                                .map(|app| FlatEntry::Component { suite, app }),
                        );
                    }
                }
            }
        }
        rows
    }

    /// [`flatten`](Self::flatten) using each suite's own `expanded` flag.
    pub fn flatten_expanded(&self) -> Vec<FlatEntry<'_>> {
        let expanded: HashSet<String> = self
            .suites()
            .filter(|s| s.expanded)
            .map(|s| s.name.clone())
            .collect();
        self.flatten(&expanded)
    }

    /// Select every component of the suite unless all are already selected,
    /// in which case deselect them all.
    ///
    /// Returns the new selection value, or `None` for an unknown suite.
    pub fn toggle_suite_selection(
        &self,
        suite_name: &str,
        selection: &mut SelectionState,
    ) -> Option<bool> {
        let suite = self.suite(suite_name)?;
        let all_selected = suite.components.iter().all(|c| selection.is_selected(c));
        let target = !all_selected;
        for component in &suite.components {
            selection.set(component.name.clone(), target);
        }
        Some(target)
    }
}
