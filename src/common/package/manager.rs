//! Package manager enum and detection.

use std::str::FromStr;

use crate::error::ConfigError;

/// The system package managers the engine can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageManager {
    /// APT - Debian/Ubuntu family (driven through apt-get and dpkg)
    Apt,
    /// YUM - older RHEL/CentOS
    Yum,
    /// DNF - Fedora/RHEL family
    Dnf,
    /// Pacman - Arch Linux family
    Pacman,
    /// Zypper - openSUSE
    Zypper,
    /// APK - Alpine
    Apk,
    /// Homebrew - macOS, runs without root
    Brew,
}

impl PackageManager {
    /// Detection order. The first manager whose binary is on `PATH` wins.
    pub const DETECTION_ORDER: [PackageManager; 7] = [
        Self::Apt,
        Self::Yum,
        Self::Dnf,
        Self::Pacman,
        Self::Zypper,
        Self::Apk,
        Self::Brew,
    ];

    /// Detect the package manager of the running system.
    pub fn detect() -> Option<Self> {
        Self::detect_with(|binary| which::which(binary).is_ok())
    }

    /// Detection with an injectable `PATH` lookup.
    pub fn detect_with(has_binary: impl Fn(&str) -> bool) -> Option<Self> {
        Self::DETECTION_ORDER
            .into_iter()
            .find(|manager| has_binary(manager.binary()))
    }

    /// Binary looked up during detection.
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Apt => "apt-get",
            Self::Yum => "yum",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
            Self::Zypper => "zypper",
            Self::Apk => "apk",
            Self::Brew => "brew",
        }
    }

    /// Whether install and uninstall commands run as root.
    pub fn requires_root(&self) -> bool {
        !matches!(self, Self::Brew)
    }

    /// Whether one query can list every installed package.
    pub fn supports_batch_query(&self) -> bool {
        !matches!(self, Self::Zypper | Self::Apk)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Apt => "APT",
            Self::Yum => "YUM",
            Self::Dnf => "DNF",
            Self::Pacman => "Pacman",
            Self::Zypper => "Zypper",
            Self::Apk => "APK",
            Self::Brew => "Homebrew",
        }
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for PackageManager {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "apt" | "apt-get" | "dpkg" => Ok(Self::Apt),
            "yum" => Ok(Self::Yum),
            "dnf" => Ok(Self::Dnf),
            "pacman" => Ok(Self::Pacman),
            "zypper" => Ok(Self::Zypper),
            "apk" => Ok(Self::Apk),
            "brew" | "homebrew" => Ok(Self::Brew),
            other => Err(ConfigError::UnknownPackageManager(other.to_string())),
        }
    }
}
