#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use initializer::catalog::{Application, SoftwareCatalog, SoftwareItem};
use initializer::common::command::Command;
use initializer::common::package::{PackageManager, PackageManagerAdapter};
use initializer::common::process::ScriptedExecutor;
use initializer::config::EngineConfig;
use initializer::engine::Engine;
use initializer::ui::Renderer;

/// Scratch directory for catalogs, configs and script logs.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Shell snippet appending `name` to the shared `log` file.
    pub fn log_line(&self, name: &str) -> String {
        format!("echo {name} >> {}", self.log_path().display())
    }

    pub fn log_path(&self) -> PathBuf {
        self.path().join("log")
    }

    pub fn log(&self) -> String {
        std::fs::read_to_string(self.log_path()).unwrap_or_default()
    }
}

/// Engine on `manager` whose status queries are answered by `exec`.
pub fn scripted_engine(
    manager: PackageManager,
    exec: Arc<ScriptedExecutor>,
    renderer: Arc<Renderer>,
) -> Engine {
    Engine::with_parts(EngineConfig::default(), renderer, exec, manager).with_root(false)
}

/// Adapter that runs a shell script per application.
#[derive(Debug, Default)]
pub struct ShellAdapter {
    pub scripts: HashMap<String, String>,
    pub refresh: Option<String>,
}

impl ShellAdapter {
    pub fn script(mut self, app: &str, script: impl Into<String>) -> Self {
        self.scripts.insert(app.to_string(), script.into());
        self
    }
}

#[async_trait]
impl PackageManagerAdapter for ShellAdapter {
    fn manager(&self) -> PackageManager {
        PackageManager::Apt
    }

    fn install_command(&self, app: &Application) -> Command {
        let script = self
            .scripts
            .get(&app.name)
            .cloned()
            .unwrap_or_else(|| "true".to_string());
        Command::new(["sh", "-c", script.as_str()])
    }

    fn uninstall_command(&self, app: &Application) -> Command {
        self.install_command(app)
    }

    fn refresh_index_command(&self) -> Option<Command> {
        self.refresh.as_deref().map(|s| Command::new(["sh", "-c", s]))
    }

    fn individual_queries(&self, _package: &str) -> Vec<Vec<String>> {
        Vec::new()
    }
}

pub fn apps(names: &[&str]) -> Vec<Application> {
    names.iter().map(|n| Application::new(*n, [*n])).collect()
}

pub fn catalog_of(names: &[&str]) -> SoftwareCatalog {
    SoftwareCatalog::new(apps(names).into_iter().map(SoftwareItem::App).collect())
        .expect("valid catalog")
}
