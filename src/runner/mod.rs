//! Streaming execution of install and uninstall commands.
//!
//! [`CommandRunner::run`] spawns a command, merges its stdout and stderr into
//! one line stream, forwards every cleaned line to an [`OutputObserver`] and
//! keeps a monotonic progress estimate. Two timeouts apply independently: a
//! per-line stall window and an overall deadline. Success is decided by the
//! exit code alone.

pub mod output;
pub mod progress;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until, timeout, timeout_at};

use crate::common::command::Command;
use crate::config::Timeouts;
use crate::error::CommandExecutionError;
use crate::privilege::{ElevatedSpawn, PrivilegedSession, looks_like_auth_failure};
use crate::ui::Renderer;

const POST_EXIT_DRAIN: Duration = Duration::from_secs(2);
const POST_EXIT_IDLE: Duration = Duration::from_millis(100);
const POST_EXIT_MAX_CHUNKS: usize = 10_000;

pub use output::{LineKind, sanitize, summarize};
pub use progress::{ProgressEstimator, RUNNING_CAP};

/// Receives live output of a running command.
pub trait OutputObserver: Send + Sync {
    fn on_line(&self, _line: &str, _kind: LineKind) {}

    /// Non-decreasing; 100 only once the process has exited.
    fn on_progress(&self, _percent: u8) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl OutputObserver for NoopObserver {}

/// Shared cancellation flag for whatever the runner is executing.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Terminate the running process and refuse to start new ones until
    /// [`reset`](Self::reset).
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    pub line_stall: Duration,
    pub total: Duration,
    pub kill_grace: Duration,
}

impl RunnerSettings {
    pub fn from_timeouts(timeouts: &Timeouts) -> Self {
        Self {
            line_stall: timeouts.line_stall(),
            total: timeouts.command_total(),
            kill_grace: timeouts.kill_grace(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_timeouts(&Timeouts::default())
    }
}

/// Result of one [`CommandRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    /// A few lines suitable for display.
    pub summary: String,
    /// Every cleaned output line.
    pub output: String,
    pub exit_code: Option<i32>,
    pub error: Option<CommandExecutionError>,
}

impl CommandOutcome {
    fn failed(error: CommandExecutionError) -> Self {
        let summary = error.to_string();
        Self {
            success: false,
            output: summary.clone(),
            summary,
            exit_code: None,
            error: Some(error),
        }
    }

    /// Text handed to error analysis: full output, or the summary if empty.
    pub fn diagnostic_text(&self) -> &str {
        if self.output.is_empty() {
            &self.summary
        } else {
            &self.output
        }
    }
}

enum Termination {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    renderer: Arc<Renderer>,
    settings: RunnerSettings,
    abort: AbortHandle,
    running_as_root: bool,
}

impl CommandRunner {
    pub fn new(renderer: Arc<Renderer>, settings: RunnerSettings) -> Self {
        Self {
            renderer,
            settings,
            abort: AbortHandle::new(),
            running_as_root: matches!(sudo::check(), sudo::RunningAs::Root),
        }
    }

    pub fn with_root(mut self, running_as_root: bool) -> Self {
        self.running_as_root = running_as_root;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Run `command` to completion.
    ///
    /// Elevated commands go through `session` when one is given (which must be
    /// verified unless we are root). Without a session they run as
    /// `sudo -n`, which fails instead of prompting.
    pub async fn run(
        &self,
        command: &Command,
        session: Option<&PrivilegedSession>,
        observer: &dyn OutputObserver,
    ) -> CommandOutcome {
        if self.abort.is_aborted() {
            return CommandOutcome::failed(CommandExecutionError::Aborted);
        }

        let Some(session) = session.filter(|_| command.requires_elevation) else {
            let spawn = if command.requires_elevation && !self.running_as_root {
                ElevatedSpawn {
                    argv: ["sudo", "-n"]
                        .into_iter()
                        .map(str::to_string)
                        .chain(command.argv.iter().cloned())
                        .collect(),
                    stdin: None,
                }
            } else {
                ElevatedSpawn {
                    argv: command.argv.clone(),
                    stdin: None,
                }
            };
            return self.stream(spawn, &command.to_string(), observer).await;
        };

        // Held for the whole run so nothing else uses the credential meanwhile
        let mut guard = session.lock().await;
        let spawn = match guard.elevate(command) {
            Ok(spawn) => spawn,
            Err(err) => {
                self.renderer.error("runner.not_verified", &err.to_string());
                return CommandOutcome::failed(err);
            }
        };
        let outcome = self.stream(spawn, &command.to_string(), observer).await;
        if !outcome.success && !session.is_root() && looks_like_auth_failure(&outcome.output) {
            guard.invalidate();
        }
        outcome
    }

    async fn stream(
        &self,
        spawn: ElevatedSpawn,
        display: &str,
        observer: &dyn OutputObserver,
    ) -> CommandOutcome {
        let Some((program, args)) = spawn.argv.split_first() else {
            return CommandOutcome::failed(CommandExecutionError::Spawn("empty command".into()));
        };

        self.renderer.debug("runner.spawn", &format!("Running: {display}"));
        let mut child = match tokio::process::Command::new(program)
            .args(args)
            .stdin(if spawn.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let error = match e.kind() {
                    std::io::ErrorKind::NotFound => CommandExecutionError::NotFound(program.clone()),
                    std::io::ErrorKind::PermissionDenied => CommandExecutionError::PermissionDenied,
                    _ => CommandExecutionError::Spawn(e.to_string()),
                };
                return CommandOutcome::failed(error);
            }
        };

        if let (Some(input), Some(mut stdin)) = (spawn.stdin.as_ref(), child.stdin.take()) {
            let _ = stdin.write_all(input).await;
            let _ = stdin.shutdown().await;
        }

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        let deadline = Instant::now() + self.settings.total;
        let mut abort_rx = self.abort.subscribe();
        let mut estimator = ProgressEstimator::new(display);
        let mut lines: Vec<String> = Vec::new();
        let mut streams_closed = false;
        let mut stalled = false;

        let termination = loop {
            let stall_window = (!stalled).then_some(self.settings.line_stall);
            tokio::select! {
                biased;
                true = abort_requested(&mut abort_rx) => break Termination::Aborted,
                _ = sleep_until(deadline) => break Termination::TimedOut,
                status = child.wait() => break Termination::Exited(status),
                next = next_chunk(&mut rx, stall_window), if !streams_closed => match next {
                    Some(Some(bytes)) => {
                        let parts = sanitize(&String::from_utf8_lossy(&bytes));
                        // After a stall the pipes are only drained so the child cannot block
                        if stalled || parts.is_empty() {
                            lines.extend(parts);
                            continue;
                        }
                        for part in &parts {
                            observer.on_line(part, LineKind::classify(part));
                        }
                        if let Some(percent) = estimator.observe(&parts.join("\n")) {
                            observer.on_progress(percent);
                        }
                        lines.extend(parts);
                    }
                    Some(None) => streams_closed = true,
                    None => {
                        stalled = true;
                        self.renderer.warn(
                            "runner.stall",
                            &format!(
                                "No output from `{display}` for {}s, waiting for it to exit",
                                self.settings.line_stall.as_secs()
                            ),
                        );
                    }
                },
            }
        };

        match termination {
            Termination::Exited(Ok(status)) => {
                // Output still buffered after exit. Descendants may hold the
                // pipes open, so the drain is bounded.
                let drain_until = Instant::now() + POST_EXIT_DRAIN;
                for _ in 0..POST_EXIT_MAX_CHUNKS {
                    let idle = (Instant::now() + POST_EXIT_IDLE).min(drain_until);
                    let Ok(Some(bytes)) = timeout_at(idle, rx.recv()).await else {
                        break;
                    };
                    let parts = sanitize(&String::from_utf8_lossy(&bytes));
                    if !stalled && !parts.is_empty() {
                        for part in &parts {
                            observer.on_line(part, LineKind::classify(part));
                        }
                        if let Some(percent) = estimator.observe(&parts.join("\n")) {
                            observer.on_progress(percent);
                        }
                    }
                    lines.extend(parts);
                }
                observer.on_progress(estimator.finish());

                let success = status.success();
                let code = status.code();
                CommandOutcome {
                    success,
                    summary: summarize(&lines, success, code),
                    output: lines.join("\n"),
                    exit_code: code,
                    error: (!success).then_some(CommandExecutionError::NonZeroExit { code }),
                }
            }
            Termination::Exited(Err(e)) => CommandOutcome::failed(CommandExecutionError::Spawn(e.to_string())),
            Termination::TimedOut => {
                let message = format!(
                    "Command execution timeout ({}s)",
                    self.settings.total.as_secs()
                );
                self.renderer.warn("runner.timeout", &format!("{message}: {display}"));
                self.terminate(&mut child).await;
                CommandOutcome {
                    success: false,
                    summary: message.clone(),
                    output: lines.join("\n"),
                    exit_code: None,
                    error: Some(CommandExecutionError::Timeout(message)),
                }
            }
            Termination::Aborted => {
                self.renderer.warn("runner.aborted", &format!("Aborted: {display}"));
                self.terminate(&mut child).await;
                CommandOutcome {
                    success: false,
                    summary: CommandExecutionError::Aborted.to_string(),
                    output: lines.join("\n"),
                    exit_code: None,
                    error: Some(CommandExecutionError::Aborted),
                }
            }
        }
    }

    /// SIGTERM, then SIGKILL once the grace period is over.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
        }
        if timeout(self.settings.kill_grace, child.wait()).await.is_err() {
            self.renderer
                .debug("runner.kill", "Process ignored SIGTERM, killing it");
            let _ = child.kill().await;
        }
    }
}

async fn abort_requested(rx: &mut watch::Receiver<bool>) -> bool {
    rx.wait_for(|aborted| *aborted).await.is_ok()
}

/// Next chunk from the merged stream. `None` means the stall window passed,
/// `Some(None)` that both pipes are closed.
async fn next_chunk(
    rx: &mut mpsc::Receiver<Vec<u8>>,
    stall_window: Option<Duration>,
) -> Option<Option<Vec<u8>>> {
    match stall_window {
        Some(window) => timeout(window, rx.recv()).await.ok(),
        None => Some(rx.recv().await),
    }
}

async fn pump<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut reader = BufReader::new(reader);
    loop {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(buf).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::process::ScriptedExecutor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<(String, LineKind)>>,
        progress: Mutex<Vec<u8>>,
    }

    impl OutputObserver for Recorder {
        fn on_line(&self, line: &str, kind: LineKind) {
            self.lines.lock().unwrap().push((line.to_string(), kind));
        }

        fn on_progress(&self, percent: u8) {
            self.progress.lock().unwrap().push(percent);
        }
    }

    fn runner(settings: RunnerSettings) -> CommandRunner {
        CommandRunner::new(Arc::new(Renderer::capture()), settings).with_root(false)
    }

    fn fast() -> RunnerSettings {
        RunnerSettings {
            line_stall: Duration::from_secs(5),
            total: Duration::from_secs(10),
            kill_grace: Duration::from_secs(1),
        }
    }

    fn sh(script: &str) -> Command {
        Command::new(["sh", "-c", script])
    }

    #[tokio::test]
    async fn streams_merged_output_and_finishes_at_100() {
        let recorder = Recorder::default();
        let outcome = runner(fast())
            .run(
                &sh("echo 'Reading package lists...'; echo 'W: warning here' >&2; echo 'Setting up git'"),
                None,
                &recorder,
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.exit_code, Some(0));
        let lines = recorder.lines.lock().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().any(|(l, k)| l == "W: warning here" && *k == LineKind::Warning));

        let progress = recorder.progress.lock().unwrap();
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(progress.last(), Some(&100));
        assert!(progress[..progress.len() - 1].iter().all(|p| *p <= RUNNING_CAP));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_regardless_of_text() {
        let outcome = runner(fast())
            .run(&sh("echo 'Complete! success'; exit 3"), None, &NoopObserver)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.error, Some(CommandExecutionError::NonZeroExit { code: Some(3) }));
        assert_eq!(outcome.summary, "Complete! success");
    }

    #[tokio::test]
    async fn error_lines_lead_the_failure_summary() {
        let outcome = runner(fast())
            .run(
                &sh("echo start; echo 'E: Unable to locate package nope' >&2; echo tail; exit 100"),
                None,
                &NoopObserver,
            )
            .await;
        assert_eq!(outcome.summary, "E: Unable to locate package nope");
        assert!(outcome.output.contains("start"));
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let outcome = runner(fast())
            .run(&Command::new(["no-such-binary-initializer"]), None, &NoopObserver)
            .await;
        assert!(matches!(outcome.error, Some(CommandExecutionError::NotFound(_))));
    }

    #[tokio::test]
    async fn overall_timeout_terminates_process() {
        let settings = RunnerSettings {
            line_stall: Duration::from_secs(5),
            total: Duration::from_millis(300),
            kill_grace: Duration::from_millis(200),
        };
        let recorder = Recorder::default();
        let started = std::time::Instant::now();
        let outcome = runner(settings)
            .run(&sh("while true; do echo tick; sleep 0.05; done"), None, &recorder)
            .await;

        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(CommandExecutionError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!recorder.progress.lock().unwrap().contains(&100));
    }

    #[tokio::test]
    async fn stall_then_exit_within_deadline() {
        let settings = RunnerSettings {
            line_stall: Duration::from_millis(100),
            total: Duration::from_secs(5),
            kill_grace: Duration::from_millis(200),
        };
        let r = runner(settings);
        let outcome = r.run(&sh("echo first; sleep 0.5; exit 0"), None, &NoopObserver).await;
        assert!(outcome.success);
        assert!(r.renderer.has_event("runner.stall"));
    }

    #[tokio::test]
    async fn background_writer_does_not_hold_the_run() {
        let r = runner(RunnerSettings {
            line_stall: Duration::from_secs(5),
            total: Duration::from_secs(20),
            kill_grace: Duration::from_millis(200),
        });
        let started = std::time::Instant::now();
        let outcome = r
            .run(
                &sh("(while :; do echo tick; sleep 0.01; done) & echo started"),
                None,
                &NoopObserver,
            )
            .await;
        assert!(outcome.success);
        assert!(outcome.output.contains("started"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn abort_kills_running_command() {
        let r = runner(fast());
        let handle = r.abort_handle();
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            handle.abort();
        });

        let outcome = r.run(&sh("sleep 30"), None, &NoopObserver).await;
        trigger.await.unwrap();
        assert_eq!(outcome.error, Some(CommandExecutionError::Aborted));

        // aborted runner refuses new work until reset
        let again = r.run(&sh("true"), None, &NoopObserver).await;
        assert_eq!(again.error, Some(CommandExecutionError::Aborted));
        r.abort_handle().reset();
        assert!(r.run(&sh("true"), None, &NoopObserver).await.success);
    }

    #[tokio::test]
    async fn elevated_command_needs_verified_session() {
        let session = PrivilegedSession::new(
            Arc::new(ScriptedExecutor::new()),
            Arc::new(Renderer::silent()),
            &Timeouts::default(),
        )
        .with_root(false);

        let outcome = runner(fast())
            .run(&Command::privileged(["sh", "-c", "true"]), Some(&session), &NoopObserver)
            .await;
        assert_eq!(outcome.error, Some(CommandExecutionError::NotVerified));
    }

    #[tokio::test]
    async fn root_session_runs_elevated_command_directly() {
        let session = PrivilegedSession::new(
            Arc::new(ScriptedExecutor::new()),
            Arc::new(Renderer::silent()),
            &Timeouts::default(),
        )
        .with_root(true);

        let outcome = runner(fast())
            .run(&Command::privileged(["sh", "-c", "echo as-root"]), Some(&session), &NoopObserver)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.summary, "as-root");
    }
}
