//! d2-core: shared types for d2-docker.
//!
//! Image references, upgrade version ranges, the configuration file and the
//! single error type every other crate propagates.

pub mod config;
pub mod error;
pub mod image;
pub mod version;

pub use config::{D2Config, ReadinessConfig, parse_duration};
pub use error::{D2Error, D2Result};
pub use image::{CORE_REPOSITORY, DATA_REPOSITORY, ImageKind, ImageReference};
pub use version::version_range;
