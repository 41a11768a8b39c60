//! YAML catalog file.
//!
//! ```yaml
//! applications:
//!   - name: git
//!     package: git
//!     category: development
//!   - name: Office
//!     components:
//!       - name: writer
//!         package: libreoffice-writer
//!       - name: calc
//!         package: libreoffice-calc
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{Application, ApplicationSuite, SoftwareCatalog, SoftwareItem};
use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    applications: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Suite(RawSuite),
    App(RawApp),
}

#[derive(Debug, Deserialize)]
struct RawSuite {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    components: Vec<RawApp>,
}

#[derive(Debug, Deserialize)]
struct RawApp {
    name: String,
    /// Whitespace-separated package identifiers.
    package: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    post_install: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    recommended: bool,
    #[serde(default)]
    install_recommends: Option<bool>,
}

impl RawApp {
    fn into_application(self) -> Result<Application, ConfigError> {
        let packages: Vec<String> = self.package.split_whitespace().map(str::to_string).collect();
        if packages.is_empty() {
            return Err(ConfigError::InvalidEntry {
                name: self.name,
                reason: "no package identifiers".to_string(),
            });
        }

        let mut app = Application::new(self.name, packages)
            .with_description(self.description)
            .with_category(self.category);
        app.post_install = self.post_install.filter(|c| !c.trim().is_empty());
        app.tags = self.tags;
        app.recommended = self.recommended;
        app.install_recommends = self.install_recommends;
        Ok(app)
    }
}

/// Expand `~` in a user supplied catalog path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

pub fn load_catalog(path: &Path) -> Result<SoftwareCatalog, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_catalog(&contents, path)
}

pub fn parse_catalog(contents: &str, path: &Path) -> Result<SoftwareCatalog, ConfigError> {
    let file: CatalogFile = serde_yaml::from_str(contents).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    let items = file
        .applications
        .into_iter()
        .map(|entry| match entry {
            RawEntry::App(app) => app.into_application().map(SoftwareItem::App),
            RawEntry::Suite(suite) => {
                if suite.components.is_empty() {
                    return Err(ConfigError::InvalidEntry {
                        name: suite.name,
                        reason: "suite has no components".to_string(),
                    });
                }
                let components = suite
                    .components
                    .into_iter()
                    .map(RawApp::into_application)
                    .collect::<Result<Vec<_>, _>>()?;
                let mut built = ApplicationSuite::new(suite.name, components)
                    .with_description(suite.description);
                built.category = suite.category;
                Ok(SoftwareItem::Suite(built))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    SoftwareCatalog::new(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AppType;

    const SAMPLE: &str = r#"
applications:
  - name: git
    package: git
    category: development
    recommended: true
  - name: build tools
    package: "build-essential  pkg-config"
    post_install: "sudo ldconfig"
    install_recommends: false
  - name: Office
    description: Office suite
    components:
      - name: writer
        package: libreoffice-writer
      - name: calc
        package: libreoffice-calc
"#;

    #[test]
    fn parses_apps_and_suites() {
        let catalog = parse_catalog(SAMPLE, Path::new("apps.yaml")).unwrap();
        assert_eq!(catalog.items().len(), 3);

        let tools = catalog.find("build tools").unwrap();
        assert_eq!(tools.packages, vec!["build-essential", "pkg-config"]);
        assert_eq!(tools.install_recommends, Some(false));
        assert!(tools.post_install_command().unwrap().requires_elevation);

        let office = catalog.suite("Office").unwrap();
        assert_eq!(office.description, "Office suite");
        assert_eq!(office.components.len(), 2);
        assert_eq!(office.components[0].app_type, AppType::Component);
        assert!(catalog.find("git").unwrap().recommended);
    }

    #[test]
    fn empty_package_is_rejected() {
        let yaml = "applications:\n  - name: nothing\n    package: \"  \"\n";
        let err = parse_catalog(yaml, Path::new("apps.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEntry { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let yaml = "applications:\n  - {name: vim, package: vim}\n  - {name: vim, package: neovim}\n";
        let err = parse_catalog(yaml, Path::new("apps.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateEntry(_)));
    }

    #[test]
    fn malformed_yaml_names_the_file() {
        let err = parse_catalog("applications: [", Path::new("broken.yaml")).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let catalog = load_catalog(&path).unwrap();
        assert_eq!(catalog.applications().len(), 4);
    }
}
