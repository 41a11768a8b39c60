//! Package manager support.
//!
//! - [`PackageManager`]: the supported managers and how to detect them
//! - [`PackageManagerAdapter`]: one implementation per manager, chosen once by
//!   [`adapter_for`], that builds install/uninstall commands and describes how
//!   to query the package database

mod adapter;
mod manager;

pub use adapter::{
    AptAdapter, ApkAdapter, BatchQuery, BrewAdapter, PackageManagerAdapter, PacmanAdapter,
    RpmAdapter, ZypperAdapter, adapter_for,
};
pub use manager::PackageManager;
