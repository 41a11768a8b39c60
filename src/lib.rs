//! Installation orchestration engine of the `initializer` setup assistant.
//!
//! The crate answers "which of these applications are installed?" through a
//! two-tier status pipeline, turns a desired selection into a change-set and
//! runs that change-set through the system package manager, elevating with a
//! cached sudo credential where needed.
//!
//! The three entry points below cover the common flow; the modules expose
//! the individual components for finer control.

use std::collections::HashMap;
use std::sync::Arc;

pub mod catalog;
pub mod common;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod privilege;
pub mod runner;
pub mod status;
pub mod ui;

use catalog::{Application, ChangeAction, SelectionState, SoftwareCatalog};
use engine::Engine;
use orchestrator::ActionResult;
use privilege::PrivilegedSession;
use runner::NoopObserver;

/// Installed flag for every application in `apps`.
pub async fn resolve_status(engine: &Engine, apps: &[Application]) -> HashMap<String, bool> {
    engine.status_resolver().check(apps).await
}

/// Actions needed to move from the catalog's installed flags to `selection`.
pub fn compute_changes(catalog: &SoftwareCatalog, selection: &SelectionState) -> Vec<ChangeAction> {
    catalog.compute_changes(selection)
}

/// Run `actions` in order, writing the outcome back into `catalog`.
pub async fn run_orchestration(
    engine: &Engine,
    catalog: &mut SoftwareCatalog,
    actions: Vec<ChangeAction>,
    session: Option<Arc<PrivilegedSession>>,
) -> Vec<ActionResult> {
    let mut orchestrator = engine.orchestrator(session);
    orchestrator.load(actions);
    orchestrator
        .run(catalog, &NoopObserver)
        .await
        .results
}
