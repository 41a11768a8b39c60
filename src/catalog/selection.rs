use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use super::model::Application;

/// Desired installed-ness per application name.
///
/// Applications without an entry keep their current state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    desired: HashMap<String, bool>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, selected: bool) {
        self.desired.insert(name.into(), selected);
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.desired.get(name).copied()
    }

    /// Desired state for `app`, defaulting to its current installed flag.
    pub fn is_selected(&self, app: &Application) -> bool {
        self.get(&app.name).unwrap_or(app.installed)
    }

    pub fn len(&self) -> usize {
        self.desired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for SelectionState {
    fn from_iter<T: IntoIterator<Item = (S, bool)>>(iter: T) -> Self {
        Self {
            desired: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// One step of a change-set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "app", rename_all = "snake_case")]
pub enum ChangeAction {
    Install(Application),
    Uninstall(Application),
}

impl ChangeAction {
    pub fn app(&self) -> &Application {
        match self {
            ChangeAction::Install(app) | ChangeAction::Uninstall(app) => app,
        }
    }

    pub fn is_install(&self) -> bool {
        matches!(self, ChangeAction::Install(_))
    }

    pub fn verb(&self) -> &'static str {
        match self {
            ChangeAction::Install(_) => "install",
            ChangeAction::Uninstall(_) => "uninstall",
        }
    }

    /// Installed flag the application ends up with if the action succeeds.
    pub fn target_installed(&self) -> bool {
        self.is_install()
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb(), self.app().name)
    }
}
