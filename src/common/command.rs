use std::fmt;

use super::shell::{join_argv, split_words};

/// A command as data: an argument vector plus whether it needs root.
///
/// Elevation is a flag rather than a `sudo` word in the argument list, so the
/// runner decides how to elevate (stdin credential, direct execution as root,
/// or non-interactive sudo).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub argv: Vec<String>,
    pub requires_elevation: bool,
}

impl Command {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            requires_elevation: false,
        }
    }

    pub fn privileged<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            requires_elevation: true,
            ..Self::new(argv)
        }
    }

    /// Command for a shell line such as `sudo systemctl enable docker`.
    ///
    /// The line runs through `sh -c`, so redirects, pipes and variables keep
    /// working. A leading `sudo` (and its option words) is removed and turned
    /// into `requires_elevation`. Returns `None` for blank or unparsable lines.
    pub fn from_shell(line: &str) -> Option<Self> {
        let (requires_elevation, script) = strip_sudo(line.trim());
        if split_words(script).ok()?.is_empty() {
            return None;
        }

        Some(Self {
            argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            requires_elevation,
        })
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Split off a leading `sudo` and its options. `-u`/`-g` carry a value word.
fn strip_sudo(line: &str) -> (bool, &str) {
    let Some(mut rest) = line
        .strip_prefix("sudo")
        .filter(|after| after.is_empty() || after.starts_with(char::is_whitespace))
    else {
        return (false, line);
    };

    rest = rest.trim_start();
    while rest.starts_with('-') {
        let (word, after) = next_word(rest);
        rest = after;
        if matches!(word, "-u" | "-g") {
            rest = next_word(rest).1;
        }
    }
    (true, rest)
}

fn next_word(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(end) => (&s[..end], s[end..].trim_start()),
        None => (s, ""),
    }
}

impl fmt::Display for Command {
    /// Human readable form; elevation is rendered as a `sudo` prefix.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requires_elevation {
            write!(f, "sudo ")?;
        }
        write!(f, "{}", join_argv(&self.argv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_shell_strips_sudo_prefix() {
        let cmd = Command::from_shell("sudo -E systemctl enable --now docker").unwrap();
        assert!(cmd.requires_elevation);
        assert_eq!(cmd.argv, vec!["sh", "-c", "systemctl enable --now docker"]);

        let cmd = Command::from_shell("sudo -u root -H ldconfig").unwrap();
        assert_eq!(cmd.argv[2], "ldconfig");

        // only the word sudo counts
        let cmd = Command::from_shell("sudoedit /etc/hosts").unwrap();
        assert!(!cmd.requires_elevation);
        assert_eq!(cmd.argv[2], "sudoedit /etc/hosts");
    }

    #[test]
    fn from_shell_keeps_shell_syntax() {
        let cmd = Command::from_shell("usermod -aG docker \"$USER\" && echo ok > /tmp/x").unwrap();
        assert!(!cmd.requires_elevation);
        assert_eq!(cmd.program(), Some("sh"));
        assert_eq!(cmd.args()[1], "usermod -aG docker \"$USER\" && echo ok > /tmp/x");
    }

    #[test]
    fn from_shell_rejects_blank_and_bare_sudo() {
        assert!(Command::from_shell("   ").is_none());
        assert!(Command::from_shell("sudo").is_none());
        assert!(Command::from_shell("sudo -E").is_none());
        assert!(Command::from_shell("echo 'open").is_none());
    }

    #[tokio::test]
    async fn from_shell_runs_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("post.txt");
        let cmd = Command::from_shell(&format!("echo \"$HOME\" > {}", target.display())).unwrap();

        let status = tokio::process::Command::new(cmd.program().unwrap())
            .args(cmd.args())
            .status()
            .await
            .unwrap();
        assert!(status.success());
        let written = std::fs::read_to_string(&target).unwrap();
        assert!(!written.contains("$HOME"));
    }

    #[test]
    fn with_args_appends() {
        let cmd = Command::privileged(["apt-get", "install", "-y"]).with_args(["curl", "git"]);
        assert_eq!(cmd.to_string(), "sudo apt-get install -y curl git");
    }
}
