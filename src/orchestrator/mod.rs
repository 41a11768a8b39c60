//! Sequential execution of a change-set.
//!
//! Each [`ChangeAction`] moves `pending → running → success | failed`. A
//! failure never stops the queue; every pending action is attempted once per
//! run. Failed actions only go back to pending through
//! [`InstallOrchestrator::retry_failed`].

mod task;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::catalog::{ChangeAction, SoftwareCatalog};
use crate::common::command::Command;
use crate::common::package::PackageManagerAdapter;
use crate::config::PackageManagerSettings;
use crate::diagnostics::ErrorClassifier;
use crate::error::CommandExecutionError;
use crate::privilege::PrivilegedSession;
use crate::runner::{AbortHandle, CommandOutcome, CommandRunner, LineKind, NoopObserver, OutputObserver};
use crate::ui::{Level, Renderer};

pub use task::{ActionResult, ActionState, ActionTask, RunSummary, scale_progress};

const START_PROGRESS: u8 = 20;
const INSTALL_WINDOW: (u8, u8) = (40, 70);
const POST_INSTALL_WINDOW: (u8, u8) = (70, 100);
const UNINSTALL_WINDOW: (u8, u8) = (50, 100);

/// Receives per-action updates. `index` is the position in the change-set.
pub trait OrchestratorObserver: Send + Sync {
    fn on_state(&self, _index: usize, _task: &ActionTask) {}
    fn on_progress(&self, _index: usize, _percent: u8) {}
    fn on_line(&self, _index: usize, _line: &str, _kind: LineKind) {}
}

impl OrchestratorObserver for NoopObserver {}

/// Forwards runner output for one phase of one action.
struct PhaseObserver<'a> {
    index: usize,
    window: (u8, u8),
    last: AtomicU8,
    inner: &'a dyn OrchestratorObserver,
}

impl<'a> PhaseObserver<'a> {
    fn new(index: usize, window: (u8, u8), inner: &'a dyn OrchestratorObserver) -> Self {
        Self {
            index,
            window,
            last: AtomicU8::new(window.0),
            inner,
        }
    }

    fn progress(&self) -> u8 {
        self.last.load(Ordering::Relaxed)
    }
}

impl OutputObserver for PhaseObserver<'_> {
    fn on_line(&self, line: &str, kind: LineKind) {
        self.inner.on_line(self.index, line, kind);
    }

    fn on_progress(&self, percent: u8) {
        let scaled = scale_progress(percent, self.window.0, self.window.1);
        self.last.fetch_max(scaled, Ordering::Relaxed);
        self.inner.on_progress(self.index, scaled);
    }
}

#[derive(Debug)]
pub struct InstallOrchestrator {
    adapter: Arc<dyn PackageManagerAdapter>,
    runner: CommandRunner,
    classifier: ErrorClassifier,
    renderer: Arc<Renderer>,
    session: Option<Arc<PrivilegedSession>>,
    refresh_index_once: bool,
    index_refreshed: bool,
    tasks: Vec<ActionTask>,
}

impl InstallOrchestrator {
    pub fn new(
        adapter: Arc<dyn PackageManagerAdapter>,
        runner: CommandRunner,
        renderer: Arc<Renderer>,
        settings: &PackageManagerSettings,
    ) -> Self {
        Self {
            adapter,
            runner,
            classifier: ErrorClassifier::new(),
            renderer,
            session: None,
            refresh_index_once: settings.refresh_index_once,
            index_refreshed: false,
            tasks: Vec::new(),
        }
    }

    pub fn with_session(mut self, session: Option<Arc<PrivilegedSession>>) -> Self {
        self.session = session;
        self
    }

    /// Replace the queue. The index refresh state is kept for the session.
    pub fn load(&mut self, actions: Vec<ChangeAction>) {
        self.tasks = actions.into_iter().map(ActionTask::new).collect();
    }

    pub fn tasks(&self) -> &[ActionTask] {
        &self.tasks
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.runner.abort_handle()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_tasks(&self.tasks)
    }

    /// Process every pending action in order and write results back into
    /// `catalog`.
    pub async fn run(
        &mut self,
        catalog: &mut SoftwareCatalog,
        observer: &dyn OrchestratorObserver,
    ) -> RunSummary {
        let pending: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state == ActionState::Pending)
            .map(|(i, _)| i)
            .collect();

        self.renderer.emit(
            Level::Info,
            "orchestrator.start",
            &format!("Processing {} action(s)", pending.len()),
            Some(serde_json::json!({ "actions": pending.len() })),
        );

        for (position, &index) in pending.iter().enumerate() {
            if self.runner.abort_handle().is_aborted() {
                self.abort_remaining(&pending[position..], observer);
                break;
            }
            self.process(index, catalog, observer).await;
        }

        let summary = self.summary();
        self.renderer.emit(
            if summary.all_succeeded() { Level::Success } else { Level::Warn },
            "orchestrator.summary",
            &summary.to_string(),
            Some(serde_json::json!({
                "succeeded": summary.succeeded,
                "failed": summary.failed,
            })),
        );
        summary
    }

    /// Move failed actions back to pending and run only those.
    pub async fn retry_failed(
        &mut self,
        catalog: &mut SoftwareCatalog,
        observer: &dyn OrchestratorObserver,
    ) -> RunSummary {
        self.runner.abort_handle().reset();
        for (index, task) in self.tasks.iter_mut().enumerate() {
            if task.state == ActionState::Failed {
                task.reset();
                observer.on_state(index, task);
            }
        }
        self.run(catalog, observer).await
    }

    async fn process(
        &mut self,
        index: usize,
        catalog: &mut SoftwareCatalog,
        observer: &dyn OrchestratorObserver,
    ) {
        let action = self.tasks[index].action.clone();
        let app = action.app();
        let verb = if action.is_install() { "Installing" } else { "Uninstalling" };

        self.update(index, observer, |task| {
            task.state = ActionState::Running;
            task.progress = START_PROGRESS;
            task.message = format!("{verb} {}...", app.name);
        });
        self.renderer
            .info("orchestrator.action.start", &format!("{verb} {}", app.name));

        if action.is_install() {
            self.refresh_index(index).await;
        }

        let (command, window) = if action.is_install() {
            (self.adapter.install_command(app), INSTALL_WINDOW)
        } else {
            (self.adapter.uninstall_command(app), UNINSTALL_WINDOW)
        };

        let phase = PhaseObserver::new(index, window, observer);
        let outcome = self.execute(&command, &phase).await;
        self.tasks[index].progress = phase.progress();

        if !outcome.success {
            self.fail(index, &action, &command, &outcome, catalog, observer);
            return;
        }

        if action.is_install()
            && let Some(post) = app.post_install_command()
        {
            let phase = PhaseObserver::new(index, POST_INSTALL_WINDOW, observer);
            let post_outcome = self.execute(&post, &phase).await;
            if !post_outcome.success {
                let warning = format!("Post-install command `{post}` failed: {}", post_outcome.summary);
                self.renderer.warn("orchestrator.post_install.failed", &warning);
                self.tasks[index].warnings.push(warning);
            }
        }

        catalog.set_installed(&app.name, action.target_installed());
        let done = if action.is_install() { "installed" } else { "uninstalled" };
        self.update(index, observer, |task| {
            task.state = ActionState::Success;
            task.progress = 100;
            task.message = format!("{} {done} successfully", app.name);
            task.output = outcome.summary.clone();
        });
        self.renderer.success(
            "orchestrator.action.success",
            &format!("{} {done} successfully", app.name),
        );
    }

    fn fail(
        &mut self,
        index: usize,
        action: &ChangeAction,
        command: &Command,
        outcome: &CommandOutcome,
        catalog: &mut SoftwareCatalog,
        observer: &dyn OrchestratorObserver,
    ) {
        let app = action.app();
        let message = if outcome.error == Some(CommandExecutionError::Aborted) {
            self.renderer.warn(
                "orchestrator.partial_install",
                &format!("{} was interrupted and may be partially installed", app.name),
            );
            CommandExecutionError::Aborted.to_string()
        } else {
            self.classifier
                .analyze(outcome.diagnostic_text(), &command.to_string(), &app.name)
        };

        // The action did not happen, keep the previous state
        catalog.set_installed(&app.name, !action.target_installed());
        self.update(index, observer, |task| {
            task.state = ActionState::Failed;
            task.message = message.clone();
            task.output = outcome.summary.clone();
        });
        self.renderer.emit(
            Level::Error,
            "orchestrator.action.failed",
            &format!("Failed to {action}"),
            Some(serde_json::json!({ "app": app.name, "summary": outcome.summary })),
        );
    }

    fn abort_remaining(&mut self, indices: &[usize], observer: &dyn OrchestratorObserver) {
        for &index in indices {
            self.update(index, observer, |task| {
                task.state = ActionState::Failed;
                task.message = CommandExecutionError::Aborted.to_string();
            });
        }
        self.renderer.warn(
            "orchestrator.aborted",
            &format!(
                "Aborted by user, {} action(s) not run. Packages being installed when the abort happened may be partially installed.",
                indices.len()
            ),
        );
    }

    /// `apt-get update` or equivalent, at most once per orchestrator.
    async fn refresh_index(&mut self, index: usize) {
        if !self.refresh_index_once || self.index_refreshed {
            return;
        }
        let Some(command) = self.adapter.refresh_index_command() else {
            return;
        };
        self.index_refreshed = true;

        self.renderer
            .info("orchestrator.refresh", &format!("Refreshing package index: {command}"));
        let outcome = self.execute(&command, &NoopObserver).await;
        if !outcome.success {
            let warning = format!("Package index refresh failed: {}", outcome.summary);
            self.renderer.warn("orchestrator.refresh.failed", &warning);
            self.tasks[index].warnings.push(warning);
        }
    }

    async fn execute(&self, command: &Command, observer: &dyn OutputObserver) -> CommandOutcome {
        self.runner
            .run(command, self.session.as_deref(), observer)
            .await
    }

    fn update(
        &mut self,
        index: usize,
        observer: &dyn OrchestratorObserver,
        change: impl FnOnce(&mut ActionTask),
    ) {
        let task = &mut self.tasks[index];
        change(task);
        observer.on_state(index, task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Application, SoftwareItem};
    use crate::common::package::PackageManager;
    use crate::runner::RunnerSettings;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    /// Adapter whose commands are shell scripts that log to a file.
    #[derive(Debug)]
    struct ShellAdapter {
        scripts: HashMap<String, String>,
        refresh: Option<String>,
    }

    #[async_trait]
    impl PackageManagerAdapter for ShellAdapter {
        fn manager(&self) -> PackageManager {
            PackageManager::Apt
        }

        fn install_command(&self, app: &Application) -> Command {
            let script = self.scripts.get(&app.name).cloned().unwrap_or_else(|| "true".into());
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

    fn log_line(dir: &Path, name: &str) -> String {
        format!("echo {name} >> {}/log", dir.display())
    }

    fn orchestrator(adapter: ShellAdapter, renderer: Arc<Renderer>) -> InstallOrchestrator {
        let runner = CommandRunner::new(
            renderer.clone(),
            RunnerSettings {
                line_stall: Duration::from_secs(5),
                total: Duration::from_secs(20),
                kill_grace: Duration::from_secs(1),
            },
        )
        .with_root(false);
        InstallOrchestrator::new(Arc::new(adapter), runner, renderer, &PackageManagerSettings::default())
    }

    fn catalog(names: &[&str]) -> SoftwareCatalog {
        SoftwareCatalog::new(
            names
                .iter()
                .map(|n| SoftwareItem::App(Application::new(*n, [*n])))
                .collect(),
        )
        .unwrap()
    }

    fn installs(catalog: &SoftwareCatalog) -> Vec<ChangeAction> {
        catalog
            .applications()
            .into_iter()
            .map(|a| ChangeAction::Install(a.clone()))
            .collect()
    }

    #[tokio::test]
    async fn failure_in_the_middle_does_not_stop_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("flag");
        let scripts = HashMap::from([
            ("a".to_string(), log_line(dir.path(), "a")),
            (
                "b".to_string(),
                format!(
                    "{}; echo 'E: Unable to locate package b' >&2; test -f {}",
                    log_line(dir.path(), "b"),
                    flag.display()
                ),
            ),
            ("c".to_string(), log_line(dir.path(), "c")),
        ]);
        let renderer = Arc::new(Renderer::capture());
        let mut orch = orchestrator(ShellAdapter { scripts, refresh: None }, renderer.clone());
        let mut catalog = catalog(&["a", "b", "c"]);
        orch.load(installs(&catalog));

        let summary = orch.run(&mut catalog, &NoopObserver).await;
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results[1].final_state, ActionState::Failed);
        assert!(summary.results[1].message.contains("package not found"));
        assert!(summary.results[1].message.contains("Raw error:"));
        assert!(catalog.find("a").unwrap().installed);
        assert!(!catalog.find("b").unwrap().installed);
        assert!(catalog.find("c").unwrap().installed);
        assert!(renderer.has_event("orchestrator.summary"));

        std::fs::write(&flag, "").unwrap();
        let summary = orch.retry_failed(&mut catalog, &NoopObserver).await;
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);
        assert!(catalog.find("b").unwrap().installed);

        let log = std::fs::read_to_string(dir.path().join("log")).unwrap();
        assert_eq!(log, "a\nb\nc\nb\n");
    }

    #[tokio::test]
    async fn index_refresh_runs_once_and_failure_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let refresh = format!("{}; exit 1", log_line(dir.path(), "update"));
        let renderer = Arc::new(Renderer::capture());
        let mut orch = orchestrator(
            ShellAdapter {
                scripts: HashMap::new(),
                refresh: Some(refresh),
            },
            renderer.clone(),
        );
        let mut catalog = catalog(&["a", "b"]);
        orch.load(installs(&catalog));

        let summary = orch.run(&mut catalog, &NoopObserver).await;
        assert_eq!(summary.succeeded, 2);
        assert_eq!(orch.tasks()[0].warnings.len(), 1);
        assert!(renderer.has_event("orchestrator.refresh.failed"));

        // a second batch in the same session does not refresh again
        orch.load(installs(&catalog));
        orch.run(&mut catalog, &NoopObserver).await;
        let log = std::fs::read_to_string(dir.path().join("log")).unwrap();
        assert_eq!(log, "update\n");
    }

    #[tokio::test]
    async fn post_install_failure_is_only_a_warning() {
        let renderer = Arc::new(Renderer::capture());
        let mut orch = orchestrator(
            ShellAdapter {
                scripts: HashMap::new(),
                refresh: None,
            },
            renderer.clone(),
        );
        let mut catalog = SoftwareCatalog::new(vec![SoftwareItem::App(
            Application::new("docker", ["docker.io"]).with_post_install("sh -c 'exit 4'"),
        )])
        .unwrap();
        orch.load(installs(&catalog));

        let summary = orch.run(&mut catalog, &NoopObserver).await;
        assert_eq!(summary.results[0].final_state, ActionState::Success);
        assert_eq!(orch.tasks()[0].progress, 100);
        assert_eq!(orch.tasks()[0].warnings.len(), 1);
        assert!(renderer.has_event("orchestrator.post_install.failed"));
    }

    #[tokio::test]
    async fn post_install_runs_through_the_shell() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("post.txt");
        let renderer = Arc::new(Renderer::capture());
        let mut orch = orchestrator(
            ShellAdapter {
                scripts: HashMap::new(),
                refresh: None,
            },
            renderer.clone(),
        );
        let mut catalog = SoftwareCatalog::new(vec![SoftwareItem::App(
            Application::new("docker", ["docker.io"])
                .with_post_install(format!("echo configured | tr a-z A-Z > {}", target.display())),
        )])
        .unwrap();
        orch.load(installs(&catalog));

        let summary = orch.run(&mut catalog, &NoopObserver).await;
        assert_eq!(summary.results[0].final_state, ActionState::Success);
        assert!(orch.tasks()[0].warnings.is_empty());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "CONFIGURED\n");
    }

    #[tokio::test]
    async fn failed_uninstall_keeps_app_installed() {
        let scripts = HashMap::from([("vim".to_string(), "exit 1".to_string())]);
        let mut orch = orchestrator(ShellAdapter { scripts, refresh: None }, Arc::new(Renderer::silent()));
        let mut catalog = SoftwareCatalog::new(vec![SoftwareItem::App(
            Application::new("vim", ["vim"]).with_installed(true),
        )])
        .unwrap();
        orch.load(vec![ChangeAction::Uninstall(catalog.find("vim").unwrap().clone())]);

        let summary = orch.run(&mut catalog, &NoopObserver).await;
        assert_eq!(summary.failed, 1);
        assert!(catalog.find("vim").unwrap().installed);
    }

    #[derive(Default)]
    struct ProgressLog(std::sync::Mutex<Vec<(usize, u8)>>);

    impl OrchestratorObserver for ProgressLog {
        fn on_progress(&self, index: usize, percent: u8) {
            self.0.lock().unwrap().push((index, percent));
        }
    }

    #[tokio::test]
    async fn uninstall_progress_stays_in_its_window() {
        let scripts = HashMap::from([("vim".to_string(), "echo removing; echo done".to_string())]);
        let mut orch = orchestrator(ShellAdapter { scripts, refresh: None }, Arc::new(Renderer::silent()));
        let mut catalog = SoftwareCatalog::new(vec![SoftwareItem::App(
            Application::new("vim", ["vim"]).with_installed(true),
        )])
        .unwrap();
        orch.load(vec![ChangeAction::Uninstall(catalog.find("vim").unwrap().clone())]);

        let log = ProgressLog::default();
        orch.run(&mut catalog, &log).await;
        let seen = log.0.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|(_, p)| (50..=100).contains(p)));
        assert_eq!(seen.last(), Some(&(0, 100)));
        assert!(!catalog.find("vim").unwrap().installed);
    }

    #[tokio::test]
    async fn abort_fails_current_and_remaining_actions() {
        let scripts = HashMap::from([("a".to_string(), "sleep 30".to_string())]);
        let renderer = Arc::new(Renderer::capture());
        let mut orch = orchestrator(ShellAdapter { scripts, refresh: None }, renderer.clone());
        let mut catalog = catalog(&["a", "b", "c"]);
        orch.load(installs(&catalog));

        let handle = orch.abort_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.abort();
        });

        let summary = orch.run(&mut catalog, &NoopObserver).await;
        assert_eq!(summary.failed, 3);
        assert!(summary.results.iter().all(|r| r.message == "user aborted"));
        assert!(renderer.has_event("orchestrator.partial_install"));
        assert!(renderer.has_event("orchestrator.aborted"));
        assert!(catalog.applications().iter().all(|a| !a.installed));
    }
}
