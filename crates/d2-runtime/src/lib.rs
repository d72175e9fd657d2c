//! d2-runtime: container runtime plumbing for d2-docker.
//!
//! Wraps the `docker` and compose command lines behind an injectable
//! [`CommandRunner`], derives instance state from `docker ps`, allocates
//! ports and drives the start/stop lifecycle of a data image stack.

pub mod compose;
pub mod docker;
pub mod lifecycle;
pub mod listing;
pub mod port;
pub mod runner;
pub mod status;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use compose::{Compose, ComposeOptions, normalize_deploy_path};
pub use docker::Docker;
pub use lifecycle::{Lifecycle, StartOptions, StopGuard};
pub use listing::ImageListing;
pub use port::{PortRange, get_free_port, port_in_use};
pub use runner::{
    CommandOutput, CommandRunner, CommandSpec, OutputMode, RunFuture, SharedRunner, SystemRunner,
};
pub use status::{InstanceState, LabeledContainer, RunningInstance};
