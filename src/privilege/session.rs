use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use zeroize::Zeroizing;

use super::cipher::CredentialCipher;
use crate::common::command::Command;
use crate::common::process::{ProcessExecutor, ProcessOutput, ProcessRequest};
use crate::config::Timeouts;
use crate::error::{AuthError, CommandExecutionError, StatusCheckError};
use crate::ui::Renderer;

pub const MAX_RETRIES: u32 = 3;

/// Output fragments meaning sudo rejected the credential we fed it.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "incorrect password",
    "authentication failure",
    "sorry, try again",
];

pub fn looks_like_auth_failure(output: &str) -> bool {
    let lower = output.to_lowercase();
    AUTH_FAILURE_MARKERS.iter().any(|m| lower.contains(m))
}

/// `sudo -S` reading the password from stdin, with an empty prompt so the
/// prompt text does not end up in captured output.
fn sudo_stdin_argv(argv: &[String]) -> Vec<String> {
    ["sudo", "-S", "-p", ""]
        .into_iter()
        .map(str::to_string)
        .chain(argv.iter().cloned())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub ok: bool,
    pub message: String,
    pub error: Option<AuthError>,
}

impl VerifyOutcome {
    fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            error: None,
        }
    }

    fn failure(error: AuthError, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SudoOutcome {
    pub ok: bool,
    pub output: String,
}

#[derive(Default)]
struct CredentialState {
    /// Obfuscated, base64 encoded.
    credential: Option<Zeroizing<String>>,
    verified: bool,
    retry_count: u32,
}

impl CredentialState {
    fn is_verified(&self) -> bool {
        self.verified && self.credential.as_ref().is_some_and(|c| !c.is_empty())
    }

    fn clear(&mut self) {
        // Zeroizing wipes the buffer on drop
        self.credential = None;
        self.verified = false;
        self.retry_count = 0;
    }
}

/// Argument vector and stdin for a command, ready to spawn.
pub struct ElevatedSpawn {
    pub argv: Vec<String>,
    pub stdin: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for ElevatedSpawn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevatedSpawn")
            .field("argv", &self.argv)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Exclusive access to the session while a privileged command runs.
pub struct SessionGuard<'a> {
    state: MutexGuard<'a, CredentialState>,
    session: &'a PrivilegedSession,
}

impl SessionGuard<'_> {
    pub fn is_verified(&self) -> bool {
        self.session.running_as_root || self.state.is_verified()
    }

    /// Build the spawn for `command`: as-is when no elevation is needed or we
    /// are root, otherwise through `sudo -S` with the cached password on stdin.
    pub fn elevate(&self, command: &Command) -> Result<ElevatedSpawn, CommandExecutionError> {
        if !command.requires_elevation || self.session.running_as_root {
            return Ok(ElevatedSpawn {
                argv: command.argv.clone(),
                stdin: None,
            });
        }
        if !self.state.is_verified() {
            return Err(CommandExecutionError::NotVerified);
        }
        let encoded = self
            .state
            .credential
            .as_ref()
            .ok_or(CommandExecutionError::NotVerified)?;
        let password = self
            .session
            .cipher
            .decrypt(encoded)
            .map_err(|_| CommandExecutionError::NotVerified)?;

        let mut stdin = Zeroizing::new(Vec::with_capacity(password.len() + 1));
        stdin.extend_from_slice(password.as_bytes());
        stdin.push(b'\n');

        Ok(ElevatedSpawn {
            argv: sudo_stdin_argv(&command.argv),
            stdin: Some(stdin),
        })
    }

    /// Drop the cached credential so the next privileged command requires
    /// verification again.
    pub fn invalidate(&mut self) {
        self.state.clear();
        self.session
            .renderer
            .warn("sudo.session.expired", "Sudo credential rejected, please verify again");
    }
}

/// Process-lifetime cache of a verified sudo credential.
///
/// All access goes through one async mutex, so verification and privileged
/// commands never interleave. The credential is wiped by [`clear`](Self::clear)
/// and again on drop.
pub struct PrivilegedSession {
    state: Mutex<CredentialState>,
    cipher: CredentialCipher,
    executor: Arc<dyn ProcessExecutor>,
    renderer: Arc<Renderer>,
    verify_timeout: Duration,
    command_timeout: Duration,
    running_as_root: bool,
}

impl std::fmt::Debug for PrivilegedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegedSession")
            .field("running_as_root", &self.running_as_root)
            .field("verify_timeout", &self.verify_timeout)
            .finish_non_exhaustive()
    }
}

impl PrivilegedSession {
    pub fn new(executor: Arc<dyn ProcessExecutor>, renderer: Arc<Renderer>, timeouts: &Timeouts) -> Self {
        Self {
            state: Mutex::new(CredentialState::default()),
            cipher: CredentialCipher::for_current_process(),
            executor,
            renderer,
            verify_timeout: timeouts.sudo_verify(),
            command_timeout: timeouts.privileged_command(),
            running_as_root: matches!(sudo::check(), sudo::RunningAs::Root),
        }
    }

    /// Override root detection.
    pub fn with_root(mut self, running_as_root: bool) -> Self {
        self.running_as_root = running_as_root;
        self
    }

    pub fn is_root(&self) -> bool {
        self.running_as_root
    }

    /// Case-insensitive check for the elevation keyword in a command line.
    pub fn is_sudo_required(command: &str) -> bool {
        command.to_lowercase().contains("sudo")
    }

    /// Root needs no sudo; everyone else needs it on `PATH`.
    pub fn check_sudo_available(&self) -> bool {
        self.running_as_root || which::which("sudo").is_ok()
    }

    pub async fn is_verified(&self) -> bool {
        self.state.lock().await.is_verified()
    }

    pub async fn retry_count(&self) -> u32 {
        self.state.lock().await.retry_count
    }

    pub async fn remaining_retries(&self) -> u32 {
        MAX_RETRIES.saturating_sub(self.retry_count().await)
    }

    pub async fn is_retry_available(&self) -> bool {
        self.retry_count().await < MAX_RETRIES
    }

    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            state: self.state.lock().await,
            session: self,
        }
    }

    /// Check `password` with `sudo -S -v` and cache it on success.
    pub async fn verify_sudo_access(&self, password: &str) -> VerifyOutcome {
        let mut state = self.state.lock().await;

        if state.retry_count >= MAX_RETRIES {
            return VerifyOutcome::failure(
                AuthError::RetriesExhausted,
                "Maximum retries reached, verification is locked for this session",
            );
        }
        if password.trim().is_empty() {
            return VerifyOutcome::failure(AuthError::EmptyPassword, "password empty");
        }

        self.renderer.info("sudo.verify.start", "Verifying sudo access");
        let mut stdin = Zeroizing::new(Vec::with_capacity(password.len() + 1));
        stdin.extend_from_slice(password.as_bytes());
        stdin.push(b'\n');
        let request = ProcessRequest::new(sudo_stdin_argv(&["-v".to_string()]), self.verify_timeout)
            .with_stdin(stdin);

        let outcome = match self.executor.output(request).await {
            Ok(output) if output.success() => {
                state.credential = Some(Zeroizing::new(self.cipher.encrypt(password)));
                state.verified = true;
                state.retry_count = 0;
                self.renderer.success("sudo.verify.ok", "Sudo access verified");
                return VerifyOutcome::success("Verification successful");
            }
            Ok(output) => {
                state.retry_count += 1;
                let error = classify_verify_failure(&output);
                let message = with_retry_note(error.to_string(), state.retry_count);
                VerifyOutcome::failure(error, message)
            }
            Err(StatusCheckError::Timeout { .. }) => {
                state.retry_count += 1;
                let message =
                    with_retry_note("Sudo verification timed out".to_string(), state.retry_count);
                VerifyOutcome::failure(AuthError::VerifyTimeout, message)
            }
            Err(StatusCheckError::ExecutableNotFound(_)) => VerifyOutcome::failure(
                AuthError::SudoMissing,
                "sudo command not found, please make sure sudo is installed",
            ),
            Err(err) => {
                state.retry_count += 1;
                let error = AuthError::Other(err.to_string());
                let message = with_retry_note(error.to_string(), state.retry_count);
                VerifyOutcome::failure(error, message)
            }
        };

        self.renderer.emit(
            crate::ui::Level::Warn,
            "sudo.verify.failed",
            &outcome.message,
            Some(serde_json::json!({ "retry_count": state.retry_count })),
        );
        outcome
    }

    /// Run `command` to completion, elevating through the cached credential
    /// when it requires root.
    pub async fn execute_with_sudo(&self, command: &Command) -> SudoOutcome {
        let mut guard = self.lock().await;
        if !guard.is_verified() {
            return SudoOutcome {
                ok: false,
                output: "Sudo permissions not verified, please verify first".to_string(),
            };
        }

        let spawn = match guard.elevate(command) {
            Ok(spawn) => spawn,
            Err(err) => {
                return SudoOutcome {
                    ok: false,
                    output: err.to_string(),
                };
            }
        };

        let mut request = ProcessRequest::new(spawn.argv, self.command_timeout);
        request.stdin = spawn.stdin;
        self.renderer
            .debug("sudo.exec", &format!("Running privileged command: {command}"));

        match self.executor.output(request).await {
            Ok(output) if output.success() => SudoOutcome {
                ok: true,
                output: non_empty_or(output.stdout.trim(), "Command executed successfully"),
            },
            Ok(output) => {
                let mut message = non_empty_or(output.stderr.trim(), "Command failed");
                if let Some(code) = output.code {
                    message.push_str(&format!(" (exit code: {code})"));
                }
                if command.requires_elevation && looks_like_auth_failure(&output.stderr) {
                    guard.invalidate();
                    message.push_str(" - credential expired, please verify again");
                }
                SudoOutcome {
                    ok: false,
                    output: message,
                }
            }
            Err(StatusCheckError::Timeout { after, .. }) => SudoOutcome {
                ok: false,
                output: format!("Command timed out after {}s", after.as_secs()),
            },
            Err(err) => SudoOutcome {
                ok: false,
                output: format!("Execution error: {err}"),
            },
        }
    }

    /// Wipe the credential and reset verification and retry state.
    pub async fn clear(&self) {
        self.state.lock().await.clear();
        self.renderer.debug("sudo.session.cleared", "Sudo session cleared");
    }
}

impl Drop for PrivilegedSession {
    fn drop(&mut self) {
        self.state.get_mut().clear();
    }
}

fn non_empty_or(text: &str, fallback: &str) -> String {
    if text.is_empty() {
        fallback.to_string()
    } else {
        text.to_string()
    }
}

fn classify_verify_failure(output: &ProcessOutput) -> AuthError {
    let stderr = output.stderr.trim();
    let lower = stderr.to_lowercase();
    if stderr.is_empty() || lower.contains("incorrect password") || lower.contains("sorry, try again") {
        AuthError::IncorrectPassword
    } else if lower.contains("not in the sudoers file") {
        AuthError::NotInSudoers
    } else if lower.contains("command not found") {
        AuthError::SudoMissing
    } else {
        AuthError::Other(stderr.to_string())
    }
}

fn with_retry_note(mut message: String, retry_count: u32) -> String {
    match MAX_RETRIES.saturating_sub(retry_count) {
        0 => message.push_str(", maximum retries reached"),
        remaining => message.push_str(&format!(", {remaining} retries remaining")),
    }
    message
}
