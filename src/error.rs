use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures while asking the package database whether something is installed.
#[derive(Error, Debug)]
pub enum StatusCheckError {
    #[error("Query `{command}` timed out after {}s", .after.as_secs())]
    Timeout { command: String, after: Duration },

    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Could not parse output of `{command}`: {reason}")]
    ParseFailure { command: String, reason: String },

    #[error("Package manager does not support batch queries")]
    BatchUnsupported,

    #[error("Query `{command}` failed with exit code {code:?}")]
    QueryFailed { command: String, code: Option<i32> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of sudo credential verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Password cannot be empty")]
    EmptyPassword,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("User is not in the sudoers file")]
    NotInSudoers,

    #[error("Sudo verification timed out")]
    VerifyTimeout,

    #[error("sudo command not found")]
    SudoMissing,

    #[error("Maximum retries reached")]
    RetriesExhausted,

    #[error("Sudo verification failed: {0}")]
    Other(String),
}

/// Failures of a single streamed command run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandExecutionError {
    #[error("{0}")]
    Timeout(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Command exited with code {code:?}")]
    NonZeroExit { code: Option<i32> },

    #[error("Sudo permissions not verified")]
    NotVerified,

    #[error("user aborted")]
    Aborted,

    #[error("Failed to start command: {0}")]
    Spawn(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid catalog in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Catalog entry '{0}' is defined more than once")]
    DuplicateEntry(String),

    #[error("Catalog entry '{name}' is invalid: {reason}")]
    InvalidEntry { name: String, reason: String },

    #[error("Unknown package manager '{0}'")]
    UnknownPackageManager(String),

    #[error("No supported package manager found on this system")]
    NoPackageManager,
}
