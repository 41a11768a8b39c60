//! Run async engine work from synchronous callers.

use std::future::Future;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};

#[derive(Debug, Error)]
pub enum TaskRunnerError {
    #[error("Failed to build async runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Background task panicked")]
    Panicked,
}

/// How a [`TaskRunner`] drives a future to completion.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Block the current worker of an existing multi-threaded runtime.
    InlineScheduler(Handle),
    /// Spawn an OS thread with its own runtime and join it.
    DedicatedThread,
}

impl Backend {
    /// Pick the backend for the calling context.
    ///
    /// `block_in_place` is only legal on a multi-threaded runtime, so a
    /// current-thread runtime (or no runtime at all) gets a dedicated thread.
    pub fn detect() -> Self {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Backend::InlineScheduler(handle)
            }
            _ => Backend::DedicatedThread,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::InlineScheduler(_) => "inline",
            Backend::DedicatedThread => "dedicated-thread",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRunner {
    backend: Backend,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner {
    pub fn new() -> Self {
        Self {
            backend: Backend::detect(),
        }
    }

    pub fn with_backend(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Block until `future` completes and return its output.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, TaskRunnerError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match &self.backend {
            Backend::InlineScheduler(handle) => {
                Ok(tokio::task::block_in_place(|| handle.block_on(future)))
            }
            Backend::DedicatedThread => {
                let worker = std::thread::Builder::new()
                    .name("initializer-task".to_string())
                    .spawn(move || -> Result<F::Output, TaskRunnerError> {
                        let runtime = Builder::new_multi_thread().enable_all().build()?;
                        Ok(runtime.block_on(future))
                    })?;
                worker.join().map_err(|_| TaskRunnerError::Panicked)?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_runtime_uses_dedicated_thread() {
        let runner = TaskRunner::new();
        assert!(matches!(runner.backend(), Backend::DedicatedThread));
        let value = runner.block_on(async { 40 + 2 }).unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn current_thread_runtime_uses_dedicated_thread() {
        let runner = TaskRunner::new();
        assert_eq!(runner.backend().name(), "dedicated-thread");
        let value = runner
            .block_on(async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                "done"
            })
            .unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn multi_thread_runtime_runs_inline() {
        let runner = TaskRunner::new();
        assert_eq!(runner.backend().name(), "inline");
        let value = runner.block_on(async { vec![1, 2, 3].len() }).unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn panicking_task_is_reported() {
        let runner = TaskRunner::with_backend(Backend::DedicatedThread);
        let result: Result<u8, _> = runner.block_on(async { panic!("boom") });
        assert!(matches!(result, Err(TaskRunnerError::Panicked)));
    }
}
