use serde::Serialize;
use std::fmt;

use crate::common::command::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppType {
    Standalone,
    Component,
}

/// One installable application, backed by one or more packages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Application {
    pub name: String,
    pub packages: Vec<String>,
    pub description: String,
    pub category: String,
    pub post_install: Option<String>,
    pub tags: Vec<String>,
    pub recommended: bool,
    pub installed: bool,
    pub app_type: AppType,
    /// Per-application override of the manager-wide recommends setting.
    pub install_recommends: Option<bool>,
}

impl Application {
    pub fn new<I, S>(name: impl Into<String>, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            packages: packages.into_iter().map(Into::into).collect(),
            description: String::new(),
            category: String::new(),
            post_install: None,
            tags: Vec::new(),
            recommended: false,
            installed: false,
            app_type: AppType::Standalone,
            install_recommends: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_post_install(mut self, command: impl Into<String>) -> Self {
        self.post_install = Some(command.into());
        self
    }

    pub fn with_installed(mut self, installed: bool) -> Self {
        self.installed = installed;
        self
    }

    /// Post-install step as a structured command, if configured and parsable.
    pub fn post_install_command(&self) -> Option<Command> {
        self.post_install.as_deref().and_then(Command::from_shell)
    }
}

/// Installation state of a suite, always derived from its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStatus {
    NotInstalled,
    PartiallyInstalled,
    FullyInstalled,
}

impl SuiteStatus {
    pub fn from_counts(installed: usize, total: usize) -> Self {
        if installed == 0 {
            SuiteStatus::NotInstalled
        } else if installed >= total {
            SuiteStatus::FullyInstalled
        } else {
            SuiteStatus::PartiallyInstalled
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SuiteStatus::NotInstalled => "not_installed",
            SuiteStatus::PartiallyInstalled => "partially_installed",
            SuiteStatus::FullyInstalled => "fully_installed",
        }
    }
}

impl fmt::Display for SuiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named group of component applications.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationSuite {
    pub name: String,
    pub description: String,
    pub category: String,
    pub components: Vec<Application>,
    pub expanded: bool,
}

impl ApplicationSuite {
    pub fn new(name: impl Into<String>, components: Vec<Application>) -> Self {
        let components = components
            .into_iter()
            .map(|mut app| {
                app.app_type = AppType::Component;
                app
            })
            .collect();
        Self {
            name: name.into(),
            description: String::new(),
            category: String::new(),
            components,
            expanded: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn install_status(&self) -> SuiteStatus {
        SuiteStatus::from_counts(self.installed_count(), self.components.len())
    }

    pub fn installed_count(&self) -> usize {
        self.components.iter().filter(|c| c.installed).count()
    }

    pub fn installed_components(&self) -> Vec<&Application> {
        self.components.iter().filter(|c| c.installed).collect()
    }

    pub fn uninstalled_components(&self) -> Vec<&Application> {
        self.components.iter().filter(|c| !c.installed).collect()
    }

    /// Every package identifier of every component, in declaration order.
    pub fn all_packages(&self) -> Vec<&str> {
        self.components
            .iter()
            .flat_map(|c| c.packages.iter().map(String::as_str))
            .collect()
    }

    pub fn any_installed(&self) -> bool {
        self.components.iter().any(|c| c.installed)
    }
}

/// Top-level catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SoftwareItem {
    App(Application),
    Suite(ApplicationSuite),
}

impl SoftwareItem {
    pub fn name(&self) -> &str {
        match self {
            SoftwareItem::App(app) => &app.name,
            SoftwareItem::Suite(suite) => &suite.name,
        }
    }
}
