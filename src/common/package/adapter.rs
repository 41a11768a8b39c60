//! Per-manager command construction and installed-package queries.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::PackageManager;
use crate::catalog::Application;
use crate::common::command::Command;
use crate::common::process::{ProcessExecutor, ProcessOutput, ProcessRequest};
use crate::config::PackageManagerSettings;

/// Native commands that list installed packages in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchQuery {
    /// Run concurrently; the parsed results are unioned.
    pub commands: Vec<Vec<String>>,
    /// Accept a non-zero exit as long as stdout is not empty.
    pub accept_partial: bool,
}

#[async_trait]
pub trait PackageManagerAdapter: Send + Sync + fmt::Debug {
    fn manager(&self) -> PackageManager;

    fn install_command(&self, app: &Application) -> Command;

    fn uninstall_command(&self, app: &Application) -> Command;

    /// Package index refresh to run once before installing, if any.
    fn refresh_index_command(&self) -> Option<Command> {
        None
    }

    /// `None` when the manager cannot list installed packages in bulk.
    fn batch_query(&self, _packages: &[String]) -> Option<BatchQuery> {
        None
    }

    /// Parse one batch command's stdout into installed package names.
    fn parse_batch_output(&self, stdout: &str) -> Result<HashSet<String>, String> {
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Commands that each prove `package` is installed when they succeed.
    fn individual_queries(&self, package: &str) -> Vec<Vec<String>>;

    fn individual_query_succeeded(&self, output: &ProcessOutput) -> bool {
        output.success()
    }

    /// Ask the package database about one package. Any error means `false`.
    async fn is_package_installed(
        &self,
        executor: &dyn ProcessExecutor,
        package: &str,
        timeout: Duration,
    ) -> bool {
        for argv in self.individual_queries(package) {
            if let Ok(output) = executor.output(ProcessRequest::new(argv, timeout)).await
                && self.individual_query_succeeded(&output)
            {
                return true;
            }
        }
        false
    }
}

/// Build the adapter for `manager` once, at startup.
pub fn adapter_for(
    manager: PackageManager,
    settings: &PackageManagerSettings,
) -> Arc<dyn PackageManagerAdapter> {
    let settings = settings.clone();
    match manager {
        PackageManager::Apt => Arc::new(AptAdapter { settings }),
        PackageManager::Yum | PackageManager::Dnf => Arc::new(RpmAdapter { manager, settings }),
        PackageManager::Pacman => Arc::new(PacmanAdapter { settings }),
        PackageManager::Zypper => Arc::new(ZypperAdapter { settings }),
        PackageManager::Apk => Arc::new(ApkAdapter),
        PackageManager::Brew => Arc::new(BrewAdapter),
    }
}

fn argv(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn packages_of(app: &Application) -> impl Iterator<Item = String> + '_ {
    app.packages.iter().cloned()
}

#[derive(Debug)]
pub struct AptAdapter {
    settings: PackageManagerSettings,
}

impl AptAdapter {
    /// `<want> ok installed`: `install` and `hold` both mean present.
    fn is_installed_status(status: &str) -> bool {
        let words: Vec<&str> = status.split_whitespace().collect();
        words.len() >= 2 && words[words.len() - 2..] == ["ok", "installed"]
    }
}

#[async_trait]
impl PackageManagerAdapter for AptAdapter {
    fn manager(&self) -> PackageManager {
        PackageManager::Apt
    }

    fn install_command(&self, app: &Application) -> Command {
        let mut cmd = Command::privileged(["apt-get", "install"]);
        if self.settings.auto_yes {
            cmd.argv.push("-y".into());
        }
        if !app
            .install_recommends
            .unwrap_or(self.settings.install_recommends)
        {
            cmd.argv.push("--no-install-recommends".into());
        }
        if self.settings.install_suggests {
            cmd.argv.push("--install-suggests".into());
        }
        cmd.with_args(packages_of(app))
    }

    fn uninstall_command(&self, app: &Application) -> Command {
        let mut cmd = Command::privileged(["apt-get", "remove"]);
        if self.settings.auto_yes {
            cmd.argv.push("-y".into());
        }
        cmd.with_args(packages_of(app))
    }

    fn refresh_index_command(&self) -> Option<Command> {
        Some(Command::privileged(["apt-get", "update"]))
    }

    fn batch_query(&self, packages: &[String]) -> Option<BatchQuery> {
        let mut command = argv(&["dpkg-query", "-W", "-f", "${Package}\t${Status}\n"]);
        command.extend(packages.iter().cloned());
        Some(BatchQuery {
            commands: vec![command],
            // dpkg-query exits 1 when any named package is unknown
            accept_partial: true,
        })
    }

    fn parse_batch_output(&self, stdout: &str) -> Result<HashSet<String>, String> {
        let mut installed = HashSet::new();
        let mut parsed_any = false;
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let Some((package, status)) = line.split_once('\t') else {
                continue;
            };
            parsed_any = true;
            if Self::is_installed_status(status) {
                // Strip an architecture qualifier such as `libc6:amd64`
                let name = package.split(':').next().unwrap_or(package);
                installed.insert(name.trim().to_string());
            }
        }
        if !parsed_any && !stdout.trim().is_empty() {
            return Err("no `package<TAB>status` lines in dpkg-query output".to_string());
        }
        Ok(installed)
    }

    fn individual_queries(&self, package: &str) -> Vec<Vec<String>> {
        vec![argv(&["dpkg", "-l", package])]
    }

    fn individual_query_succeeded(&self, output: &ProcessOutput) -> bool {
        // dpkg -l also lists removed packages (`rc`), only `ii`/`hi` count
        output.success()
            && output
                .stdout
                .lines()
                .any(|l| l.starts_with("ii ") || l.starts_with("hi "))
    }
}

/// yum and dnf share the rpm database.
#[derive(Debug)]
pub struct RpmAdapter {
    manager: PackageManager,
    settings: PackageManagerSettings,
}

#[async_trait]
impl PackageManagerAdapter for RpmAdapter {
    fn manager(&self) -> PackageManager {
        self.manager
    }

    fn install_command(&self, app: &Application) -> Command {
        let mut cmd = Command::privileged([self.manager.binary(), "install"]);
        if self.settings.auto_yes {
            cmd.argv.push("-y".into());
        }
        cmd.with_args(packages_of(app))
    }

    fn uninstall_command(&self, app: &Application) -> Command {
        let mut cmd = Command::privileged([self.manager.binary(), "remove"]);
        if self.settings.auto_yes {
            cmd.argv.push("-y".into());
        }
        cmd.with_args(packages_of(app))
    }

    fn batch_query(&self, _packages: &[String]) -> Option<BatchQuery> {
        Some(BatchQuery {
            commands: vec![argv(&["rpm", "-qa", "--queryformat", "%{NAME}\n"])],
            accept_partial: false,
        })
    }

    fn individual_queries(&self, package: &str) -> Vec<Vec<String>> {
        vec![argv(&["rpm", "-q", package])]
    }
}

#[derive(Debug)]
pub struct PacmanAdapter {
    settings: PackageManagerSettings,
}

#[async_trait]
impl PackageManagerAdapter for PacmanAdapter {
    fn manager(&self) -> PackageManager {
        PackageManager::Pacman
    }

    fn install_command(&self, app: &Application) -> Command {
        let mut cmd = Command::privileged(["pacman", "-S"]);
        if self.settings.auto_yes {
            cmd.argv.push("--noconfirm".into());
        }
        cmd.with_args(packages_of(app))
    }

    fn uninstall_command(&self, app: &Application) -> Command {
        let mut cmd = Command::privileged(["pacman", "-R"]);
        if self.settings.auto_yes {
            cmd.argv.push("--noconfirm".into());
        }
        cmd.with_args(packages_of(app))
    }

    fn batch_query(&self, _packages: &[String]) -> Option<BatchQuery> {
        Some(BatchQuery {
            commands: vec![argv(&["pacman", "-Qq"])],
            accept_partial: false,
        })
    }

    fn individual_queries(&self, package: &str) -> Vec<Vec<String>> {
        vec![argv(&["pacman", "-Q", package])]
    }
}

#[derive(Debug)]
pub struct ZypperAdapter {
    settings: PackageManagerSettings,
}

#[async_trait]
impl PackageManagerAdapter for ZypperAdapter {
    fn manager(&self) -> PackageManager {
        PackageManager::Zypper
    }

    fn install_command(&self, app: &Application) -> Command {
        let mut cmd = Command::privileged(["zypper", "install"]);
        if self.settings.auto_yes {
            cmd.argv.push("-y".into());
        }
        cmd.with_args(packages_of(app))
    }

    fn uninstall_command(&self, app: &Application) -> Command {
        let mut cmd = Command::privileged(["zypper", "remove"]);
        if self.settings.auto_yes {
            cmd.argv.push("-y".into());
        }
        cmd.with_args(packages_of(app))
    }

    fn individual_queries(&self, package: &str) -> Vec<Vec<String>> {
        vec![argv(&["rpm", "-q", package])]
    }
}

/// apk is non-interactive already and has no confirmation flag.
#[derive(Debug)]
pub struct ApkAdapter;

#[async_trait]
impl PackageManagerAdapter for ApkAdapter {
    fn manager(&self) -> PackageManager {
        PackageManager::Apk
    }

    fn install_command(&self, app: &Application) -> Command {
        Command::privileged(["apk", "add"]).with_args(packages_of(app))
    }

    fn uninstall_command(&self, app: &Application) -> Command {
        Command::privileged(["apk", "del"]).with_args(packages_of(app))
    }

    fn individual_queries(&self, package: &str) -> Vec<Vec<String>> {
        vec![argv(&["apk", "info", "-e", package])]
    }
}

/// Homebrew refuses to run as root, so nothing here is elevated.
#[derive(Debug)]
pub struct BrewAdapter;

#[async_trait]
impl PackageManagerAdapter for BrewAdapter {
    fn manager(&self) -> PackageManager {
        PackageManager::Brew
    }

    fn install_command(&self, app: &Application) -> Command {
        Command::new(["brew", "install"]).with_args(packages_of(app))
    }

    fn uninstall_command(&self, app: &Application) -> Command {
        Command::new(["brew", "uninstall"]).with_args(packages_of(app))
    }

    fn batch_query(&self, _packages: &[String]) -> Option<BatchQuery> {
        Some(BatchQuery {
            commands: vec![
                argv(&["brew", "list", "--formula"]),
                argv(&["brew", "list", "--cask"]),
            ],
            accept_partial: false,
        })
    }

    fn parse_batch_output(&self, stdout: &str) -> Result<HashSet<String>, String> {
        Ok(stdout.split_whitespace().map(str::to_string).collect())
    }

    fn individual_queries(&self, package: &str) -> Vec<Vec<String>> {
        vec![
            argv(&["brew", "list", package]),
            argv(&["brew", "list", "--cask", package]),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::process::{ScriptedExecutor, ScriptedResponse};

    fn app(packages: &[&str]) -> Application {
        Application::new("test", packages.iter().copied())
    }

    fn settings() -> PackageManagerSettings {
        PackageManagerSettings::default()
    }

    #[test]
    fn apt_install_command_honours_settings() {
        let adapter = adapter_for(PackageManager::Apt, &settings());
        let cmd = adapter.install_command(&app(&["curl", "git"]));
        assert!(cmd.requires_elevation);
        assert_eq!(cmd.argv, vec!["apt-get", "install", "-y", "curl", "git"]);

        let mut custom = settings();
        custom.auto_yes = false;
        custom.install_recommends = false;
        custom.install_suggests = true;
        let cmd = adapter_for(PackageManager::Apt, &custom).install_command(&app(&["vim"]));
        assert_eq!(
            cmd.argv,
            vec!["apt-get", "install", "--no-install-recommends", "--install-suggests", "vim"]
        );
    }

    #[test]
    fn per_app_recommends_override_wins() {
        let adapter = adapter_for(PackageManager::Apt, &settings());
        let mut lean = app(&["texlive"]);
        lean.install_recommends = Some(false);
        let cmd = adapter.install_command(&lean);
        assert!(cmd.argv.contains(&"--no-install-recommends".to_string()));
    }

    #[test]
    fn uninstall_commands_per_manager() {
        let target = app(&["htop"]);
        let cases = [
            (PackageManager::Apt, vec!["apt-get", "remove", "-y", "htop"]),
            (PackageManager::Yum, vec!["yum", "remove", "-y", "htop"]),
            (PackageManager::Dnf, vec!["dnf", "remove", "-y", "htop"]),
            (PackageManager::Pacman, vec!["pacman", "-R", "--noconfirm", "htop"]),
            (PackageManager::Zypper, vec!["zypper", "remove", "-y", "htop"]),
            (PackageManager::Apk, vec!["apk", "del", "htop"]),
            (PackageManager::Brew, vec!["brew", "uninstall", "htop"]),
        ];
        for (manager, expected) in cases {
            let cmd = adapter_for(manager, &settings()).uninstall_command(&target);
            assert_eq!(cmd.argv, expected, "{manager}");
            assert_eq!(cmd.requires_elevation, manager.requires_root(), "{manager}");
        }
    }

    #[test]
    fn install_commands_per_manager() {
        let target = app(&["htop"]);
        let cases = [
            (PackageManager::Dnf, "sudo dnf install -y htop"),
            (PackageManager::Pacman, "sudo pacman -S --noconfirm htop"),
            (PackageManager::Zypper, "sudo zypper install -y htop"),
            (PackageManager::Apk, "sudo apk add htop"),
            (PackageManager::Brew, "brew install htop"),
        ];
        for (manager, expected) in cases {
            let cmd = adapter_for(manager, &settings()).install_command(&target);
            assert_eq!(cmd.to_string(), expected);
        }
    }

    #[test]
    fn only_apt_refreshes_index() {
        assert!(adapter_for(PackageManager::Apt, &settings()).refresh_index_command().is_some());
        assert!(adapter_for(PackageManager::Pacman, &settings()).refresh_index_command().is_none());
    }

    #[test]
    fn batch_support_matches_manager_capability() {
        for manager in PackageManager::DETECTION_ORDER {
            let adapter = adapter_for(manager, &settings());
            assert_eq!(
                adapter.batch_query(&["x".to_string()]).is_some(),
                manager.supports_batch_query(),
                "{manager}"
            );
        }
    }

    #[test]
    fn apt_batch_parse() {
        let adapter = adapter_for(PackageManager::Apt, &settings());
        let stdout = "curl\tinstall ok installed\nvim\tdeinstall ok config-files\nlibc6:amd64\tinstall ok installed\n";
        let installed = adapter.parse_batch_output(stdout).unwrap();
        assert!(installed.contains("curl"));
        assert!(installed.contains("libc6"));
        assert!(!installed.contains("vim"));

        assert!(adapter.parse_batch_output("garbage without tabs").is_err());
        assert!(!adapter.parse_batch_output("nano\tinstall ok half-installed\n").unwrap().contains("nano"));
        assert!(adapter.parse_batch_output("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn apt_held_packages_agree_between_tiers() {
        let adapter = adapter_for(PackageManager::Apt, &settings());
        let batch = adapter.parse_batch_output("vim\thold ok installed\n").unwrap();
        assert!(batch.contains("vim"));

        let exec = ScriptedExecutor::new().on(
            &["dpkg", "-l", "vim"],
            ScriptedResponse::Output(ProcessOutput::ok("hi  vim  2:9.1  amd64  editor\n")),
        );
        assert!(adapter.is_package_installed(&exec, "vim", Duration::from_secs(1)).await);
    }

    #[test]
    fn brew_batch_parse_handles_columns() {
        let adapter = adapter_for(PackageManager::Brew, &settings());
        let installed = adapter.parse_batch_output("git  wget\nnode\n").unwrap();
        assert_eq!(installed.len(), 3);
    }

    #[tokio::test]
    async fn apt_individual_check_requires_ii_line() {
        let adapter = adapter_for(PackageManager::Apt, &settings());
        let exec = ScriptedExecutor::new()
            .on(
                &["dpkg", "-l", "curl"],
                ScriptedResponse::Output(ProcessOutput::ok("ii  curl  8.5.0  amd64  tool\n")),
            )
            .on(
                &["dpkg", "-l", "vim"],
                ScriptedResponse::Output(ProcessOutput::ok("rc  vim  2:9.1  amd64  editor\n")),
            );
        let timeout = Duration::from_secs(1);
        assert!(adapter.is_package_installed(&exec, "curl", timeout).await);
        assert!(!adapter.is_package_installed(&exec, "vim", timeout).await);
        assert!(!adapter.is_package_installed(&exec, "nano", timeout).await);
    }

    #[tokio::test]
    async fn brew_individual_check_falls_back_to_cask() {
        let adapter = adapter_for(PackageManager::Brew, &settings());
        let exec = ScriptedExecutor::new().on(
            &["brew", "list", "--cask", "firefox"],
            ScriptedResponse::Output(ProcessOutput::ok("firefox\n")),
        );
        assert!(
            adapter
                .is_package_installed(&exec, "firefox", Duration::from_secs(1))
                .await
        );
        assert_eq!(exec.call_count(), 2);
    }

    #[tokio::test]
    async fn individual_check_errors_mean_not_installed() {
        let adapter = adapter_for(PackageManager::Pacman, &settings());
        let exec = ScriptedExecutor::new().with_default(ScriptedResponse::Timeout);
        assert!(
            !adapter
                .is_package_installed(&exec, "vim", Duration::from_secs(1))
                .await
        );
    }
}
