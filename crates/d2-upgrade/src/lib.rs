//! d2-upgrade: image builds and multi-version upgrades.
//!
//! # Components
//!
//! - **`images`**: core/data image builds, commit of a running instance, copies
//! - **`artifact`**: release WAR download
//! - **`orchestrator`**: per-version upgrade steps (build, deploy, wait, commit)

pub mod artifact;
pub mod fs;
pub mod images;
pub mod orchestrator;

#[cfg(test)]
mod test_support;

pub use artifact::{ArtifactSource, FetchFuture, ReleaseServer};
pub use images::{ImageBuilder, WarSource};
pub use orchestrator::{UpgradeEvent, UpgradeObserver, UpgradeRequest, UpgradeStep, Upgrader, plan};
