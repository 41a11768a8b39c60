//! Short-lived child processes with captured output.
//!
//! Status queries and sudo verification go through the [`ProcessExecutor`]
//! trait so tests can drive them with a scripted executor.

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use zeroize::Zeroizing;

use super::shell::join_argv;
use crate::error::StatusCheckError;

#[derive(Clone)]
pub struct ProcessRequest {
    pub argv: Vec<String>,
    pub stdin: Option<Zeroizing<Vec<u8>>>,
    pub timeout: Duration,
}

impl ProcessRequest {
    pub fn new<I, S>(argv: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout,
        }
    }

    pub fn with_stdin(mut self, input: Zeroizing<Vec<u8>>) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn command_line(&self) -> String {
        join_argv(&self.argv)
    }
}

impl fmt::Debug for ProcessRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRequest")
            .field("argv", &self.argv)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait ProcessExecutor: Send + Sync + fmt::Debug {
    /// Run to completion, capturing stdout and stderr.
    ///
    /// The child is killed when `request.timeout` elapses.
    async fn output(&self, request: ProcessRequest) -> Result<ProcessOutput, StatusCheckError>;
}

/// Runs real processes through `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

#[async_trait]
impl ProcessExecutor for SystemExecutor {
    async fn output(&self, request: ProcessRequest) -> Result<ProcessOutput, StatusCheckError> {
        let Some((program, args)) = request.argv.split_first() else {
            return Err(StatusCheckError::ExecutableNotFound(String::new()));
        };

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StatusCheckError::ExecutableNotFound(program.clone()),
            _ => StatusCheckError::Io(e),
        })?;

        if let (Some(input), Some(mut stdin)) = (request.stdin.as_ref(), child.stdin.take()) {
            // A child that exits before reading stdin is not an error here
            let _ = stdin.write_all(input).await;
            let _ = stdin.shutdown().await;
        }

        match tokio::time::timeout(request.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ProcessOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(StatusCheckError::Io(e)),
            Err(_) => Err(StatusCheckError::Timeout {
                command: request.command_line(),
                after: request.timeout,
            }),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub use scripted::{ScriptedExecutor, ScriptedResponse};

/// Test double for [`ProcessExecutor`], built for unit tests and for
/// dependents that enable the `testing` feature.
#[cfg(any(test, feature = "testing"))]
mod scripted {
    use async_trait::async_trait;
    use std::sync::Mutex;

    use super::{ProcessExecutor, ProcessOutput, ProcessRequest};
    use crate::error::StatusCheckError;

    /// Canned reaction of a [`ScriptedExecutor`] rule.
    #[derive(Debug, Clone)]
    pub enum ScriptedResponse {
        Output(ProcessOutput),
        Timeout,
        NotFound,
        /// Panic inside the executor, to exercise recovery paths.
        Panic,
    }

    #[derive(Debug)]
    struct Rule {
        prefix: Vec<String>,
        response: ScriptedResponse,
        once: bool,
    }

    /// Executor that answers from a script and records every spawn.
    ///
    /// Rules match on an argv prefix; the first matching rule wins. Unmatched
    /// requests get the default response (exit code 1, no output).
    #[derive(Debug)]
    pub struct ScriptedExecutor {
        rules: Mutex<Vec<Rule>>,
        calls: Mutex<Vec<ProcessRequest>>,
        default: ScriptedResponse,
    }

    impl Default for ScriptedExecutor {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self {
                rules: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                default: ScriptedResponse::Output(ProcessOutput::failed(1, "")),
            }
        }

        fn push_rule(self, prefix: &[&str], response: ScriptedResponse, once: bool) -> Self {
            if let Ok(mut rules) = self.rules.lock() {
                rules.push(Rule {
                    prefix: prefix.iter().map(|s| s.to_string()).collect(),
                    response,
                    once,
                });
            }
            self
        }

        pub fn on(self, prefix: &[&str], response: ScriptedResponse) -> Self {
            self.push_rule(prefix, response, false)
        }

        /// Rule that is consumed by its first match.
        pub fn on_once(self, prefix: &[&str], response: ScriptedResponse) -> Self {
            self.push_rule(prefix, response, true)
        }

        pub fn with_default(mut self, response: ScriptedResponse) -> Self {
            self.default = response;
            self
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .map(|c| c.iter().map(|r| r.argv.clone()).collect())
                .unwrap_or_default()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().map(|c| c.len()).unwrap_or(0)
        }

        /// Number of recorded spawns whose argv starts with `prefix`.
        pub fn count_matching(&self, prefix: &[&str]) -> usize {
            self.calls()
                .iter()
                .filter(|argv| argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p))
                .count()
        }

        /// Stdin of the most recent request that carried one, lossily decoded.
        pub fn last_stdin(&self) -> Option<String> {
            self.calls.lock().ok().and_then(|calls| {
                calls
                    .iter()
                    .rev()
                    .find_map(|r| r.stdin.as_ref().map(|s| String::from_utf8_lossy(s).into_owned()))
            })
        }

        fn respond(&self, argv: &[String]) -> ScriptedResponse {
            let Ok(mut rules) = self.rules.lock() else {
                return self.default.clone();
            };
            let matched = rules.iter().position(|rule| {
                argv.len() >= rule.prefix.len() && argv.iter().zip(&rule.prefix).all(|(a, p)| a == p)
            });
            match matched {
                Some(index) if rules[index].once => rules.remove(index).response,
                Some(index) => rules[index].response.clone(),
                None => self.default.clone(),
            }
        }
    }

    #[async_trait]
    impl ProcessExecutor for ScriptedExecutor {
        async fn output(&self, request: ProcessRequest) -> Result<ProcessOutput, StatusCheckError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(request.clone());
            }
            match self.respond(&request.argv) {
                ScriptedResponse::Output(output) => Ok(output),
                ScriptedResponse::Timeout => Err(StatusCheckError::Timeout {
                    command: request.command_line(),
                    after: request.timeout,
                }),
                ScriptedResponse::NotFound => Err(StatusCheckError::ExecutableNotFound(
                    request.argv.first().cloned().unwrap_or_default(),
                )),
                ScriptedResponse::Panic => panic!("scripted panic for `{}`", request.command_line()),
            }
        }
    }
}
