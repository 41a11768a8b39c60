use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use colored::*;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use dialoguer::{Confirm, Password};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

use initializer::catalog::loader::{expand_path, load_catalog};
use initializer::catalog::{ChangeAction, SelectionState, SoftwareCatalog, SoftwareItem};
use initializer::config::EngineConfig;
use initializer::engine::Engine;
use initializer::orchestrator::{ActionState, ActionTask, OrchestratorObserver};
use initializer::privilege::PrivilegedSession;
use initializer::runner::LineKind;
use initializer::status::StatusResolver;
use initializer::ui::progress::{create_action_bar, create_spinner, finish_spinner_with_success};
use initializer::ui::{Level, OutputFormat, Renderer};

/// Initializer: install and remove software from a catalog
#[derive(Parser, Debug)]
#[command(name = "initializer", author, version, about, long_about = None)]
pub struct Cli {
    /// Activate debug output
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Emit events as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Software catalog (YAML)
    #[arg(long, global = true, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show the detected package manager and privilege situation
    Detect,
    /// Show the installed state of every catalog entry
    Status,
    /// Show the changes a selection would make
    Plan(SelectionArgs),
    /// Apply the changes a selection implies
    Apply {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Applications to have installed (comma separated)
    #[arg(long, value_delimiter = ',', value_name = "APP")]
    pub select: Vec<String>,
    /// Applications to have removed (comma separated)
    #[arg(long, value_delimiter = ',', value_name = "APP")]
    pub deselect: Vec<String>,
    /// Select all components of a suite, or deselect them if all are selected
    #[arg(long = "toggle-suite", value_name = "SUITE")]
    pub toggle_suite: Vec<String>,
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let renderer = Arc::new(Renderer::new(
        format,
        !cli.json && std::io::stdout().is_terminal(),
        cli.debug,
    ));
    let config = EngineConfig::load(cli.config.as_deref()).context("loading engine configuration")?;
    let engine = Engine::detect(config, renderer).context("selecting a package manager")?;

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Detect => handle_detect(&engine),
        Commands::Status => handle_status(&engine, cli.catalog).await,
        Commands::Plan(selection) => handle_plan(&engine, cli.catalog, &selection).await,
        Commands::Apply { selection, yes } => {
            handle_apply(&engine, cli.catalog, &selection, yes).await
        }
    }
}

fn catalog_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand_path(&path.to_string_lossy()));
    }
    dirs::config_dir()
        .map(|dir| dir.join("initializer").join("catalog.yaml"))
        .ok_or_else(|| anyhow!("Cannot determine config directory, pass --catalog"))
}

async fn load_resolved_catalog(
    engine: &Engine,
    resolver: &StatusResolver,
    path: Option<PathBuf>,
) -> Result<SoftwareCatalog> {
    let path = catalog_path(path)?;
    let mut catalog = load_catalog(&path)
        .with_context(|| format!("loading catalog {}", path.display()))?;

    let spinner = (engine.renderer().format() == OutputFormat::Text)
        .then(|| create_spinner("Checking installed software...".to_string()));
    let items = resolver.refresh_catalog(&mut catalog).await;
    if let Some(spinner) = spinner {
        let installed = items.values().filter(|v| **v).count();
        finish_spinner_with_success(
            spinner,
            format!("{installed} of {} entries installed", items.len()),
        );
    }
    Ok(catalog)
}

fn handle_detect(engine: &Engine) -> Result<()> {
    let manager = engine.manager();
    let session = engine.privileged_session();
    let root = session.is_root();
    let sudo = session.check_sudo_available();

    match engine.renderer().format() {
        OutputFormat::Json => engine.renderer().emit(
            Level::Info,
            "detect",
            &format!("Package manager: {manager}"),
            Some(serde_json::json!({
                "package_manager": manager.display_name(),
                "binary": manager.binary(),
                "root": root,
                "sudo_available": sudo,
            })),
        ),
        OutputFormat::Text => {
            println!("{} {} ({})", "Package manager:".bold(), manager, manager.binary());
            println!("{} {}", "Running as root:".bold(), yes_no(root));
            println!("{} {}", "sudo available:".bold(), yes_no(sudo));
        }
    }
    Ok(())
}

fn yes_no(value: bool) -> ColoredString {
    if value { "yes".green() } else { "no".yellow() }
}

async fn handle_status(engine: &Engine, catalog: Option<PathBuf>) -> Result<()> {
    let resolver = engine.status_resolver();
    let catalog = load_resolved_catalog(engine, &resolver, catalog).await?;
    let report = resolver.report();

    if engine.renderer().format() == OutputFormat::Json {
        let items: Vec<serde_json::Value> = catalog
            .items()
            .iter()
            .map(|item| match item {
                SoftwareItem::App(app) => serde_json::json!({
                    "name": app.name,
                    "type": "application",
                    "installed": app.installed,
                }),
                SoftwareItem::Suite(suite) => serde_json::json!({
                    "name": suite.name,
                    "type": "suite",
                    "status": suite.install_status().as_str(),
                    "installed_components": suite.installed_count(),
                    "total_components": suite.components.len(),
                }),
            })
            .collect();
        engine.renderer().emit(
            Level::Info,
            "status.table",
            "Installed status",
            Some(serde_json::json!({ "items": items })),
        );
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Name", "Status", "Packages", "Description"]);

    for item in catalog.items() {
        match item {
            SoftwareItem::App(app) => {
                table.add_row(vec![
                    Cell::new(&app.name),
                    Cell::new(installed_label(app.installed)),
                    Cell::new(app.packages.join(" ")),
                    Cell::new(&app.description),
                ]);
            }
            SoftwareItem::Suite(suite) => {
                table.add_row(vec![
                    Cell::new(format!("{} (suite)", suite.name)),
                    Cell::new(format!(
                        "{} {}/{}",
                        suite.install_status(),
                        suite.installed_count(),
                        suite.components.len()
                    )),
                    Cell::new(""),
                    Cell::new(&suite.description),
                ]);
                for component in &suite.components {
                    table.add_row(vec![
                        Cell::new(format!("  └ {}", component.name)),
                        Cell::new(installed_label(component.installed)),
                        Cell::new(component.packages.join(" ")),
                        Cell::new(&component.description),
                    ]);
                }
            }
        }
    }
    println!("{table}");

    if engine.renderer().is_debug_enabled() {
        println!();
        println!("{report}");
    }
    Ok(())
}

fn installed_label(installed: bool) -> &'static str {
    if installed { "installed" } else { "not installed" }
}

fn build_selection(catalog: &SoftwareCatalog, args: &SelectionArgs) -> Result<SelectionState> {
    let mut selection = SelectionState::new();
    for (names, value) in [(&args.select, true), (&args.deselect, false)] {
        for name in names {
            if catalog.find(name).is_none() {
                bail!("Unknown application '{name}'");
            }
            selection.set(name.clone(), value);
        }
    }
    for suite in &args.toggle_suite {
        catalog
            .toggle_suite_selection(suite, &mut selection)
            .ok_or_else(|| anyhow!("Unknown suite '{suite}'"))?;
    }
    Ok(selection)
}

fn print_plan(renderer: &Renderer, changes: &[ChangeAction]) {
    if renderer.format() == OutputFormat::Json {
        renderer.emit(
            Level::Info,
            "plan",
            &format!("{} change(s)", changes.len()),
            serde_json::to_value(changes).ok(),
        );
        return;
    }
    if changes.is_empty() {
        println!("{}", "Nothing to do.".green());
        return;
    }
    println!("{}", "Planned changes:".bold());
    for change in changes {
        let marker = if change.is_install() { "+".green() } else { "-".red() };
        println!("  {marker} {change}");
    }
}

async fn handle_plan(engine: &Engine, catalog: Option<PathBuf>, args: &SelectionArgs) -> Result<()> {
    let catalog = load_resolved_catalog(engine, &engine.status_resolver(), catalog).await?;
    let selection = build_selection(&catalog, args)?;
    print_plan(engine.renderer(), &initializer::compute_changes(&catalog, &selection));
    Ok(())
}

async fn handle_apply(
    engine: &Engine,
    catalog: Option<PathBuf>,
    args: &SelectionArgs,
    yes: bool,
) -> Result<()> {
    let mut catalog = load_resolved_catalog(engine, &engine.status_resolver(), catalog).await?;
    let selection = build_selection(&catalog, args)?;
    let changes = initializer::compute_changes(&catalog, &selection);
    print_plan(engine.renderer(), &changes);
    if changes.is_empty() {
        return Ok(());
    }

    let interactive = engine.renderer().format() == OutputFormat::Text && std::io::stdin().is_terminal();
    if !yes && interactive && !confirm("Apply these changes?").await? {
        return Ok(());
    }

    let session = Arc::new(engine.privileged_session());
    let result = apply_with_session(engine, &mut catalog, changes, &session, interactive && !yes).await;
    session.clear().await;
    result
}

async fn apply_with_session(
    engine: &Engine,
    catalog: &mut SoftwareCatalog,
    changes: Vec<ChangeAction>,
    session: &Arc<PrivilegedSession>,
    offer_retry: bool,
) -> Result<()> {
    if needs_elevation(engine, &changes) && !session.is_root() {
        if !session.check_sudo_available() {
            bail!("sudo is required for these changes but was not found");
        }
        verify_interactively(session).await?;
    }

    let mut orchestrator = engine.orchestrator(Some(Arc::clone(session)));
    orchestrator.load(changes);
    let observer = BarObserver::new(orchestrator.tasks(), engine.renderer().format());

    let abort = orchestrator.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let started = chrono::Utc::now();
    let mut summary = orchestrator.run(catalog, &observer).await;
    while summary.failed > 0
        && offer_retry
        && !orchestrator.abort_handle().is_aborted()
        && confirm("Retry failed actions?").await?
    {
        summary = orchestrator.retry_failed(catalog, &observer).await;
    }
    ctrl_c.abort();
    let duration = chrono::Utc::now() - started;

    if engine.renderer().format() == OutputFormat::Text {
        println!();
        for result in summary.results.iter().filter(|r| r.final_state == ActionState::Failed) {
            println!("{} {}", "✗".red(), result.message);
        }
        let line = format!("{summary} in {}s", duration.num_seconds());
        if summary.all_succeeded() {
            println!("{}", line.green().bold());
        } else {
            println!("{}", line.yellow().bold());
        }
    }

    if summary.failed > 0 {
        bail!("{} action(s) failed", summary.failed);
    }
    Ok(())
}

fn needs_elevation(engine: &Engine, changes: &[ChangeAction]) -> bool {
    let adapter = engine.adapter();
    changes.iter().any(|change| {
        let app = change.app();
        let command = if change.is_install() {
            adapter.install_command(app)
        } else {
            adapter.uninstall_command(app)
        };
        command.requires_elevation
            || (change.is_install()
                && app
                    .post_install_command()
                    .is_some_and(|post| post.requires_elevation))
    })
}

async fn verify_interactively(session: &PrivilegedSession) -> Result<()> {
    while session.is_retry_available().await {
        let password = tokio::task::spawn_blocking(|| {
            Password::new()
                .with_prompt("[sudo] password")
                .allow_empty_password(true)
                .interact()
                .map(Zeroizing::new)
        })
        .await
        .context("password prompt failed")?
        .context("reading password")?;

        let outcome = session.verify_sudo_access(&password).await;
        if outcome.ok {
            return Ok(());
        }
        eprintln!("{} {}", "✗".red(), outcome.message);
    }
    bail!("sudo verification failed, maximum retries reached")
}

async fn confirm(prompt: &'static str) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
    })
    .await
    .context("confirmation prompt failed")?
    .context("reading confirmation")
}

/// One progress bar per action.
struct BarObserver {
    bars: Vec<ProgressBar>,
    _multi: MultiProgress,
}

impl BarObserver {
    fn new(tasks: &[ActionTask], format: OutputFormat) -> Self {
        let multi = MultiProgress::new();
        if format == OutputFormat::Json {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }
        let bars = tasks
            .iter()
            .map(|task| multi.add(create_action_bar(&task.action.to_string())))
            .collect();
        Self { bars, _multi: multi }
    }
}

impl OrchestratorObserver for BarObserver {
    fn on_state(&self, index: usize, task: &ActionTask) {
        let Some(bar) = self.bars.get(index) else {
            return;
        };
        bar.set_position(u64::from(task.progress));
        let first_line = task.message.lines().next().unwrap_or_default().to_string();
        match task.state {
            ActionState::Success => bar.finish_with_message(format!("{}", "done".green())),
            ActionState::Failed => bar.abandon_with_message(format!("{}", first_line.red())),
            _ => bar.set_message(first_line),
        }
    }

    fn on_progress(&self, index: usize, percent: u8) {
        if let Some(bar) = self.bars.get(index) {
            bar.set_position(u64::from(percent));
        }
    }

    fn on_line(&self, index: usize, line: &str, kind: LineKind) {
        if let Some(bar) = self.bars.get(index) {
            let line = match kind {
                LineKind::Error => line.red().to_string(),
                LineKind::Warning => line.yellow().to_string(),
                _ => line.to_string(),
            };
            bar.set_message(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn selection_flags_parse() {
        let cli = Cli::parse_from([
            "initializer",
            "--json",
            "apply",
            "--select",
            "git,vim",
            "--deselect",
            "emacs",
            "--toggle-suite",
            "office",
            "-y",
        ]);
        let Some(Commands::Apply { selection, yes }) = cli.command else {
            panic!("expected apply");
        };
        assert!(cli.json);
        assert!(yes);
        assert_eq!(selection.select, vec!["git", "vim"]);
        assert_eq!(selection.deselect, vec!["emacs"]);
        assert_eq!(selection.toggle_suite, vec!["office"]);
    }
}
