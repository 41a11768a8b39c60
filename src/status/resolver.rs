use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::batch::BatchSystemQuery;
use super::quick::QuickVerificationLayer;
use super::stats::{PerformanceReport, PerformanceStats};
use crate::catalog::{Application, SoftwareCatalog};
use crate::common::task_runner::TaskRunner;
use crate::ui::{Level, Renderer};

struct PipelineOutcome {
    results: HashMap<String, bool>,
    l2_hits: usize,
    l3_checks: usize,
    l2_time: Duration,
    l3_time: Duration,
}

/// Combines the quick layer and the package database query.
///
/// [`check`](Self::check) always returns an entry for every input app. A
/// panic inside a tier is contained in its spawned task and the next tier
/// takes over: quick + batch, then batch alone, then one app at a time.
#[derive(Debug, Clone)]
pub struct StatusResolver {
    quick: Arc<QuickVerificationLayer>,
    batch: Arc<BatchSystemQuery>,
    renderer: Arc<Renderer>,
    stats: Arc<Mutex<PerformanceStats>>,
}

impl StatusResolver {
    pub fn new(
        quick: QuickVerificationLayer,
        batch: BatchSystemQuery,
        renderer: Arc<Renderer>,
    ) -> Self {
        Self {
            quick: Arc::new(quick),
            batch: Arc::new(batch),
            renderer,
            stats: Arc::new(Mutex::new(PerformanceStats::default())),
        }
    }

    pub async fn check(&self, apps: &[Application]) -> HashMap<String, bool> {
        if apps.is_empty() {
            return HashMap::new();
        }

        let started = Instant::now();
        let quick = Arc::clone(&self.quick);
        let batch = Arc::clone(&self.batch);
        let owned = apps.to_vec();

        let pipeline = tokio::spawn(async move {
            let l2_started = Instant::now();
            let quick_result = quick.quick_verify(&owned);
            let l2_time = l2_started.elapsed();

            let l3_started = Instant::now();
            let mut results = if quick_result.unverified.is_empty() {
                HashMap::new()
            } else {
                batch.batch_check(&quick_result.unverified).await
            };
            let l3_time = l3_started.elapsed();

            let l2_hits = quick_result.verified.len();
            // Quick answers are always `false`, so letting them win cannot
            // contradict a positive package database answer.
            results.extend(quick_result.verified);

            PipelineOutcome {
                results,
                l2_hits,
                l3_checks: quick_result.unverified.len(),
                l2_time,
                l3_time,
            }
        })
        .await;

        let mut results = match pipeline {
            Ok(outcome) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record(
                        outcome.l2_hits,
                        outcome.l3_checks,
                        outcome.l2_time,
                        outcome.l3_time,
                        started.elapsed(),
                    );
                }
                outcome.results
            }
            Err(err) => {
                self.renderer.warn(
                    "status.pipeline.failed",
                    &format!("Status check failed ({err}), retrying with batch query only"),
                );
                let results = self.degraded(apps).await;
                if let Ok(mut stats) = self.stats.lock() {
                    let elapsed = started.elapsed();
                    stats.record(0, apps.len(), Duration::ZERO, elapsed, elapsed);
                }
                results
            }
        };

        for app in apps {
            results.entry(app.name.clone()).or_insert(false);
        }

        let installed = results.values().filter(|v| **v).count();
        self.renderer.emit(
            Level::Debug,
            "status.complete",
            &format!("Status resolved: {installed}/{} installed", results.len()),
            Some(serde_json::json!({
                "apps": results.len(),
                "installed": installed,
                "elapsed_ms": started.elapsed().as_millis() as u64,
            })),
        );
        results
    }

    async fn degraded(&self, apps: &[Application]) -> HashMap<String, bool> {
        let batch = Arc::clone(&self.batch);
        let owned = apps.to_vec();
        match tokio::spawn(async move { batch.batch_only(&owned).await }).await {
            Ok(Ok(results)) => results,
            Ok(Err(err)) => {
                self.renderer.warn(
                    "status.batch_only.failed",
                    &format!("Batch query failed ({err}), checking apps one by one"),
                );
                self.last_resort(apps).await
            }
            Err(err) => {
                self.renderer.warn(
                    "status.batch_only.failed",
                    &format!("Batch query failed ({err}), checking apps one by one"),
                );
                self.last_resort(apps).await
            }
        }
    }

    async fn last_resort(&self, apps: &[Application]) -> HashMap<String, bool> {
        let mut results = HashMap::with_capacity(apps.len());
        for app in apps {
            let batch = Arc::clone(&self.batch);
            let owned = app.clone();
            let installed = tokio::spawn(async move { batch.check_app(&owned).await })
                .await
                .unwrap_or(false);
            results.insert(app.name.clone(), installed);
        }
        results
    }

    /// [`check`](Self::check) for synchronous callers.
    pub fn check_blocking(&self, apps: &[Application]) -> HashMap<String, bool> {
        let resolver = self.clone();
        let owned = apps.to_vec();
        match TaskRunner::new().block_on(async move { resolver.check(&owned).await }) {
            Ok(results) => results,
            Err(err) => {
                self.renderer.warn("status.blocking.failed", &err.to_string());
                apps.iter().map(|a| (a.name.clone(), false)).collect()
            }
        }
    }

    /// Resolve every application in the catalog, write the flags back and
    /// return the item-level view (a suite is installed if any component is).
    pub async fn refresh_catalog(&self, catalog: &mut SoftwareCatalog) -> HashMap<String, bool> {
        let apps: Vec<Application> = catalog.applications().into_iter().cloned().collect();
        let results = self.check(&apps).await;
        catalog.apply_status(&results);

        for suite in catalog.suites() {
            self.renderer.debug(
                "status.suite",
                &format!(
                    "Suite '{}': {}/{} components installed",
                    suite.name,
                    suite.installed_count(),
                    suite.components.len()
                ),
            );
        }
        catalog.item_status()
    }

    pub fn stats(&self) -> PerformanceStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn report(&self) -> PerformanceReport {
        self.stats().report()
    }

    pub fn reset_stats(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ApplicationSuite, SoftwareItem};
    use crate::common::package::{PackageManager, adapter_for};
    use crate::common::process::{ProcessOutput, ScriptedExecutor, ScriptedResponse};
    use crate::config::PackageManagerSettings;
    use crate::status::batch::QuerySettings;

    fn resolver(manager: PackageManager, exec: Arc<ScriptedExecutor>) -> (StatusResolver, Arc<Renderer>) {
        let renderer = Arc::new(Renderer::capture());
        let batch = BatchSystemQuery::new(
            adapter_for(manager, &PackageManagerSettings::default()),
            exec,
            renderer.clone(),
            QuerySettings {
                batch_timeout: Duration::from_secs(1),
                individual_timeout: Duration::from_secs(1),
                max_concurrent: 2,
            },
        );
        let quick = QuickVerificationLayer::new(renderer.clone());
        (StatusResolver::new(quick, batch, renderer.clone()), renderer)
    }

    #[tokio::test]
    async fn merges_quick_and_batch_results() {
        let exec = Arc::new(ScriptedExecutor::new().on(
            &["pacman", "-Qq"],
            ScriptedResponse::Output(ProcessOutput::ok("git\n")),
        ));
        let (resolver, _) = resolver(PackageManager::Pacman, exec.clone());
        let apps = vec![
            Application::new("git", ["git"]),
            Application::new("fake", ["fake-package-demo"]),
        ];

        let results = resolver.check(&apps).await;
        assert!(results["git"]);
        assert!(!results["fake"]);

        let stats = resolver.stats();
        assert_eq!(stats.total_checks, 2);
        assert_eq!(stats.l2_hits, 1);
        assert_eq!(stats.l3_checks, 1);
        resolver.reset_stats();
        assert_eq!(resolver.stats().total_checks, 0);
    }

    #[tokio::test]
    async fn all_placeholder_apps_spawn_nothing() {
        let exec = Arc::new(ScriptedExecutor::new());
        let (resolver, _) = resolver(PackageManager::Apt, exec.clone());
        let apps = vec![Application::new("a", ["does-not-exist"])];
        let results = resolver.check(&apps).await;
        assert_eq!(results.len(), 1);
        assert_eq!(exec.call_count(), 0);
    }

    #[tokio::test]
    async fn panicking_pipeline_degrades_to_later_tiers() {
        // Batch fails, first individual query panics inside the pipeline,
        // batch-only then fails again, serial pass answers.
        let exec = Arc::new(
            ScriptedExecutor::new()
                .on(&["rpm", "-qa"], ScriptedResponse::Output(ProcessOutput::failed(1, "rpmdb locked")))
                .on_once(&["rpm", "-q", "git"], ScriptedResponse::Panic)
                .on(&["rpm", "-q", "git"], ScriptedResponse::Output(ProcessOutput::ok("git-2.45\n"))),
        );
        let (resolver, renderer) = resolver(PackageManager::Dnf, exec.clone());
        let apps = vec![Application::new("git", ["git"]), Application::new("vim", ["vim"])];

        let results = resolver.check(&apps).await;
        assert_eq!(results.len(), 2);
        assert!(results["git"]);
        assert!(!results["vim"]);
        assert!(renderer.has_event("status.pipeline.failed"));
        assert!(renderer.has_event("status.batch_only.failed"));
    }

    #[tokio::test]
    async fn refresh_catalog_writes_back_and_reports_items() {
        let exec = Arc::new(ScriptedExecutor::new().on(
            &["pacman", "-Qq"],
            ScriptedResponse::Output(ProcessOutput::ok("libreoffice-writer\n")),
        ));
        let (resolver, _) = resolver(PackageManager::Pacman, exec);
        let mut catalog = SoftwareCatalog::new(vec![
            SoftwareItem::App(Application::new("git", ["git"]).with_installed(true)),
            SoftwareItem::Suite(ApplicationSuite::new(
                "office",
                vec![
                    Application::new("writer", ["libreoffice-writer"]),
                    Application::new("calc", ["libreoffice-calc"]),
                ],
            )),
        ])
        .unwrap();

        let items = resolver.refresh_catalog(&mut catalog).await;
        assert!(!items["git"]);
        assert!(items["office"]);
        assert!(catalog.find("writer").unwrap().installed);
        assert!(!catalog.find("git").unwrap().installed);
    }

    #[test]
    fn blocking_check_outside_runtime() {
        let exec = Arc::new(ScriptedExecutor::new().on(
            &["pacman", "-Qq"],
            ScriptedResponse::Output(ProcessOutput::ok("vim\n")),
        ));
        let (resolver, _) = resolver(PackageManager::Pacman, exec);
        let results = resolver.check_blocking(&[Application::new("vim", ["vim"])]);
        assert!(results["vim"]);
    }
}
