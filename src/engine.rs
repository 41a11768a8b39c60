//! Wiring of the engine components.
//!
//! [`Engine`] owns the shared pieces (config, renderer, process executor,
//! package manager adapter) and builds every component from them, so nothing
//! reaches for global state.

use std::sync::Arc;

use crate::common::package::{PackageManager, PackageManagerAdapter, adapter_for};
use crate::common::process::{ProcessExecutor, SystemExecutor};
use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::orchestrator::InstallOrchestrator;
use crate::privilege::PrivilegedSession;
use crate::runner::{CommandRunner, RunnerSettings};
use crate::status::{BatchSystemQuery, QuerySettings, QuickVerificationLayer, StatusResolver};
use crate::ui::Renderer;

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    renderer: Arc<Renderer>,
    executor: Arc<dyn ProcessExecutor>,
    adapter: Arc<dyn PackageManagerAdapter>,
    running_as_root: Option<bool>,
}

impl Engine {
    /// Engine for this machine: real processes, manager from the config
    /// override or detected on `PATH`.
    pub fn detect(config: EngineConfig, renderer: Arc<Renderer>) -> Result<Self, ConfigError> {
        let manager = match config.forced_manager()? {
            Some(manager) => {
                renderer.debug(
                    "engine.manager.override",
                    &format!("Using package manager from config: {manager}"),
                );
                manager
            }
            None => PackageManager::detect().ok_or(ConfigError::NoPackageManager)?,
        };
        Ok(Self::with_parts(config, renderer, Arc::new(SystemExecutor), manager))
    }

    pub fn with_parts(
        config: EngineConfig,
        renderer: Arc<Renderer>,
        executor: Arc<dyn ProcessExecutor>,
        manager: PackageManager,
    ) -> Self {
        let adapter = adapter_for(manager, &config.package_manager);
        Self {
            config,
            renderer,
            executor,
            adapter,
            running_as_root: None,
        }
    }

    /// Swap the adapter, e.g. for one that runs scripted commands.
    pub fn with_adapter(mut self, adapter: Arc<dyn PackageManagerAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Override root detection for every component built afterwards.
    pub fn with_root(mut self, running_as_root: bool) -> Self {
        self.running_as_root = Some(running_as_root);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn renderer(&self) -> &Arc<Renderer> {
        &self.renderer
    }

    pub fn manager(&self) -> PackageManager {
        self.adapter.manager()
    }

    pub fn adapter(&self) -> &Arc<dyn PackageManagerAdapter> {
        &self.adapter
    }

    pub fn is_root(&self) -> bool {
        self.running_as_root
            .unwrap_or_else(|| matches!(sudo::check(), sudo::RunningAs::Root))
    }

    pub fn status_resolver(&self) -> StatusResolver {
        let quick = QuickVerificationLayer::new(Arc::clone(&self.renderer));
        let batch = BatchSystemQuery::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.executor),
            Arc::clone(&self.renderer),
            QuerySettings::from_config(&self.config),
        );
        StatusResolver::new(quick, batch, Arc::clone(&self.renderer))
    }

    pub fn privileged_session(&self) -> PrivilegedSession {
        PrivilegedSession::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.renderer),
            &self.config.timeouts,
        )
        .with_root(self.is_root())
    }

    pub fn command_runner(&self) -> CommandRunner {
        CommandRunner::new(
            Arc::clone(&self.renderer),
            RunnerSettings::from_timeouts(&self.config.timeouts),
        )
        .with_root(self.is_root())
    }

    pub fn orchestrator(&self, session: Option<Arc<PrivilegedSession>>) -> InstallOrchestrator {
        InstallOrchestrator::new(
            Arc::clone(&self.adapter),
            self.command_runner(),
            Arc::clone(&self.renderer),
            &self.config.package_manager,
        )
        .with_session(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Application;
    use crate::common::process::{ProcessOutput, ScriptedExecutor, ScriptedResponse};

    #[test]
    fn override_in_config_wins_over_detection() {
        let mut config = EngineConfig::default();
        config.package_manager.manager_override = Some("apk".into());
        let engine = Engine::detect(config, Arc::new(Renderer::silent())).unwrap();
        assert_eq!(engine.manager(), PackageManager::Apk);
    }

    #[test]
    fn unknown_override_is_a_config_error() {
        let mut config = EngineConfig::default();
        config.package_manager.manager_override = Some("portage".into());
        let err = Engine::detect(config, Arc::new(Renderer::silent())).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPackageManager(_)));
    }

    #[tokio::test]
    async fn components_share_the_injected_executor() {
        let exec = Arc::new(ScriptedExecutor::new().on(
            &["pacman", "-Qq"],
            ScriptedResponse::Output(ProcessOutput::ok("git\n")),
        ));
        let engine = Engine::with_parts(
            EngineConfig::default(),
            Arc::new(Renderer::silent()),
            exec.clone(),
            PackageManager::Pacman,
        )
        .with_root(false);

        let status = engine
            .status_resolver()
            .check(&[Application::new("git", ["git"])])
            .await;
        assert!(status["git"]);
        assert_eq!(exec.count_matching(&["pacman", "-Qq"]), 1);
        assert!(!engine.privileged_session().is_root());
    }
}
