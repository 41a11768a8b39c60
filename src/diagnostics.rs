//! Turns raw package manager failures into something a user can act on.

use serde::Serialize;
use std::fmt;

use crate::privilege::PrivilegedSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    FetchFailed,
    PackageNotFound,
    Permission,
    Dependency,
    BrokenPackages,
    DiskSpace,
    LockHeld,
    Repository,
    Service,
    Sudo,
    Unknown,
}

struct Rule {
    category: ErrorCategory,
    patterns: &'static [&'static str],
    summary: &'static str,
    remedies: &'static [&'static str],
}

/// Ordered; the first rule with a matching pattern wins.
const RULES: &[Rule] = &[
    Rule {
        category: ErrorCategory::Network,
        patterns: &[
            "network is unreachable",
            "could not resolve",
            "temporary failure resolving",
            "connection timed out",
            "failed to connect",
        ],
        summary: "network connection problem",
        remedies: &[
            "Check that the machine is online (ping a known host)",
            "Check DNS settings in /etc/resolv.conf",
            "Retry once the connection is stable, or switch to a closer mirror",
        ],
    },
    Rule {
        category: ErrorCategory::FetchFailed,
        patterns: &["unable to fetch", "failed to fetch", "failed to download"],
        summary: "package files could not be downloaded",
        remedies: &[
            "Refresh the package index (e.g. apt-get update) and retry",
            "Switch to a different mirror if the current one is out of sync",
        ],
    },
    Rule {
        category: ErrorCategory::PackageNotFound,
        patterns: &[
            "404",
            "unable to locate package",
            "no package",
            "target not found",
            "no match for argument",
        ],
        summary: "package not found in the configured repositories",
        remedies: &[
            "Refresh the package index and retry",
            "Check the package name for this distribution",
            "Enable the repository that provides the package",
        ],
    },
    Rule {
        category: ErrorCategory::Permission,
        patterns: &["permission denied", "operation not permitted", "are you root"],
        summary: "insufficient permissions",
        remedies: &[
            "Verify sudo access and retry",
            "Make sure your user is allowed to run the package manager via sudo",
        ],
    },
    Rule {
        category: ErrorCategory::Dependency,
        patterns: &["unmet dependencies", "conflicting requests", "nothing provides"],
        summary: "dependency conflict",
        remedies: &[
            "Fix broken dependencies (e.g. apt-get -f install)",
            "Upgrade the system first so package versions line up",
            "Remove the conflicting package and retry",
        ],
    },
    Rule {
        category: ErrorCategory::BrokenPackages,
        patterns: &["broken packages", "held broken packages", "dpkg was interrupted"],
        summary: "the package database is in a broken state",
        remedies: &[
            "Run dpkg --configure -a to finish interrupted installs",
            "Run apt-get -f install to repair broken packages",
        ],
    },
    Rule {
        category: ErrorCategory::DiskSpace,
        patterns: &["no space left on device"],
        summary: "not enough disk space",
        remedies: &[
            "Free up space (check with df -h)",
            "Clear the package cache (e.g. apt-get clean, pacman -Sc)",
        ],
    },
    Rule {
        category: ErrorCategory::LockHeld,
        patterns: &[
            "could not get lock",
            "unable to acquire the dpkg frontend lock",
            "unable to lock database",
            "another app is currently holding the yum lock",
            "waiting for cache lock",
        ],
        summary: "another package manager process holds the lock",
        remedies: &[
            "Wait for other updates or installs to finish",
            "Close other package managers and software centers",
            "If nothing else is running, remove the stale lock file",
        ],
    },
    Rule {
        category: ErrorCategory::Repository,
        patterns: &[
            "not signed",
            "no_pubkey",
            "signatures couldn't be verified",
            "gpg error",
        ],
        summary: "repository signature could not be verified",
        remedies: &[
            "Import the repository signing key",
            "Disable or fix the repository entry that fails verification",
        ],
    },
    Rule {
        category: ErrorCategory::Service,
        patterns: &[
            "system has not been booted with systemd",
            "failed to start",
            "job for",
            "systemctl",
        ],
        summary: "a system service could not be configured",
        remedies: &[
            "Inspect the service with systemctl status <service>",
            "Check the logs with journalctl -xe",
            "Services cannot be managed in containers without systemd",
        ],
    },
];

const SUDO_HINTS: &[&str] = &["sudo", "password", "permission", "not allowed"];

const SUDO_REMEDIES: &[&str] = &[
    "Verify sudo access again and retry",
    "Make sure your user is in the sudo (or wheel) group",
];

const GENERIC_REMEDIES: &[&str] = &[
    "Run the command manually in a terminal to see the full output",
    "Refresh the package index and retry",
    "Check the system logs for related errors",
];

/// Result of analysing one failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnosis {
    pub app: String,
    pub category: ErrorCategory,
    pub summary: String,
    pub remedies: Vec<String>,
    pub raw: String,
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} installation failed: {}", self.app, self.summary)?;
        writeln!(f, "Suggested solutions:")?;
        for remedy in &self.remedies {
            writeln!(f, "  • {remedy}")?;
        }
        write!(f, "Raw error: {}", self.raw.trim())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// `command` is the display form; an elevated one starts with `sudo`.
    pub fn diagnose(&self, raw: &str, command: &str, app: &str) -> Diagnosis {
        let lower = raw.to_lowercase();
        let build = |category, summary: &str, remedies: &[&str]| Diagnosis {
            app: app.to_string(),
            category,
            summary: summary.to_string(),
            remedies: remedies.iter().map(|r| r.to_string()).collect(),
            raw: raw.to_string(),
        };

        if let Some(rule) = RULES
            .iter()
            .find(|rule| rule.patterns.iter().any(|p| lower.contains(p)))
        {
            return build(rule.category, rule.summary, rule.remedies);
        }

        if PrivilegedSession::is_sudo_required(command)
            && SUDO_HINTS.iter().any(|h| lower.contains(h))
        {
            return build(
                ErrorCategory::Sudo,
                "the privileged command was rejected",
                SUDO_REMEDIES,
            );
        }

        build(ErrorCategory::Unknown, "unexpected error", GENERIC_REMEDIES)
    }

    /// Human readable message for a failed command. Always includes `raw`.
    pub fn analyze(&self, raw: &str, command: &str, app: &str) -> String {
        self.diagnose(raw, command, app).to_string()
    }
}
