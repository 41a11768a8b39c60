//! Authoritative installed-package queries against the native package database.

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::Application;
use crate::common::package::PackageManagerAdapter;
use crate::common::process::{ProcessExecutor, ProcessRequest};
use crate::common::shell::join_argv;
use crate::config::EngineConfig;
use crate::error::StatusCheckError;
use crate::ui::Renderer;

#[derive(Debug, Clone, Copy)]
pub struct QuerySettings {
    pub batch_timeout: Duration,
    pub individual_timeout: Duration,
    /// 0 means unbounded.
    pub max_concurrent: usize,
}

impl QuerySettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            batch_timeout: config.timeouts.batch_query(),
            individual_timeout: config.timeouts.individual_query(),
            max_concurrent: config.status.max_concurrent_queries,
        }
    }
}

pub struct BatchSystemQuery {
    adapter: Arc<dyn PackageManagerAdapter>,
    executor: Arc<dyn ProcessExecutor>,
    renderer: Arc<Renderer>,
    settings: QuerySettings,
}

impl std::fmt::Debug for BatchSystemQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSystemQuery")
            .field("manager", &self.adapter.manager())
            .field("settings", &self.settings)
            .finish()
    }
}

impl BatchSystemQuery {
    pub fn new(
        adapter: Arc<dyn PackageManagerAdapter>,
        executor: Arc<dyn ProcessExecutor>,
        renderer: Arc<Renderer>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            adapter,
            executor,
            renderer,
            settings,
        }
    }

    /// Installed state for every app. Uses one bulk query when possible and
    /// falls back to per-package queries; never fails.
    pub async fn batch_check(&self, apps: &[Application]) -> HashMap<String, bool> {
        if apps.is_empty() {
            return HashMap::new();
        }

        match self.batch_only(apps).await {
            Ok(results) => results,
            Err(StatusCheckError::BatchUnsupported) => {
                self.renderer.debug(
                    "status.l3.individual",
                    &format!(
                        "{} has no bulk query, checking {} apps individually",
                        self.adapter.manager(),
                        apps.len()
                    ),
                );
                self.concurrent_individual_check(apps).await
            }
            Err(err) => {
                self.renderer.warn(
                    "status.l3.batch_failed",
                    &format!("Batch package query failed ({err}), checking individually"),
                );
                self.concurrent_individual_check(apps).await
            }
        }
    }

    /// The bulk query alone, without the per-package fallback.
    pub async fn batch_only(
        &self,
        apps: &[Application],
    ) -> Result<HashMap<String, bool>, StatusCheckError> {
        let mut packages: Vec<String> = Vec::new();
        for package in apps.iter().flat_map(|a| a.packages.iter()) {
            if !packages.contains(package) {
                packages.push(package.clone());
            }
        }

        let installed = self.installed_packages(&packages).await?;
        self.renderer.debug(
            "status.l3.batch",
            &format!(
                "Batch query via {} found {} installed packages",
                self.adapter.manager(),
                installed.len()
            ),
        );

        Ok(apps
            .iter()
            .map(|app| {
                let all_present = !app.packages.is_empty()
                    && app.packages.iter().all(|p| installed.contains(p));
                (app.name.clone(), all_present)
            })
            .collect())
    }

    async fn installed_packages(
        &self,
        packages: &[String],
    ) -> Result<HashSet<String>, StatusCheckError> {
        let query = self
            .adapter
            .batch_query(packages)
            .ok_or(StatusCheckError::BatchUnsupported)?;

        let outputs = join_all(query.commands.iter().map(|argv| {
            self.executor
                .output(ProcessRequest::new(argv.clone(), self.settings.batch_timeout))
        }))
        .await;

        let mut installed = HashSet::new();
        let mut usable = 0usize;
        let mut last_error = None;

        for (argv, result) in query.commands.iter().zip(outputs) {
            let command = join_argv(argv);
            match result {
                Ok(output)
                    if output.success()
                        || (query.accept_partial && !output.stdout.trim().is_empty()) =>
                {
                    match self.adapter.parse_batch_output(&output.stdout) {
                        Ok(names) => {
                            installed.extend(names);
                            usable += 1;
                        }
                        Err(reason) => {
                            last_error = Some(StatusCheckError::ParseFailure { command, reason })
                        }
                    }
                }
                Ok(output) => {
                    last_error = Some(StatusCheckError::QueryFailed {
                        command,
                        code: output.code,
                    })
                }
                Err(err) => last_error = Some(err),
            }
        }

        if usable == 0 {
            return Err(last_error.unwrap_or(StatusCheckError::BatchUnsupported));
        }
        Ok(installed)
    }

    /// One query per package, many apps at a time. Errors resolve to `false`.
    pub async fn concurrent_individual_check(&self, apps: &[Application]) -> HashMap<String, bool> {
        let limit = match self.settings.max_concurrent {
            0 => apps.len().max(1),
            n => n,
        };

        let checks: Vec<_> = apps
            .iter()
            .cloned()
            .map(|app| async move {
                let installed = self.check_app(&app).await;
                (app.name, installed)
            })
            .collect();

        stream::iter(checks)
            .buffer_unordered(limit)
            .collect()
            .await
    }

    /// An app is installed only when every one of its packages is.
    pub async fn check_app(&self, app: &Application) -> bool {
        if app.packages.is_empty() {
            return false;
        }
        let checks = app.packages.iter().map(|package| {
            self.adapter.is_package_installed(
                self.executor.as_ref(),
                package,
                self.settings.individual_timeout,
            )
        });
        join_all(checks).await.into_iter().all(|installed| installed)
    }
}
