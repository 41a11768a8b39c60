//! Installed-status resolution.
//!
//! Two tiers: [`quick`] rules out obvious placeholder packages without
//! spawning anything, [`batch`] asks the package database. [`StatusResolver`]
//! glues them together and keeps [`PerformanceStats`].

pub mod batch;
pub mod quick;
mod resolver;
mod stats;

pub use batch::{BatchSystemQuery, QuerySettings};
pub use quick::{QuickCheck, QuickVerificationLayer};
pub use resolver::StatusResolver;
pub use stats::{PerformanceReport, PerformanceStats};
