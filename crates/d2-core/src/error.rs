//! Error type shared by all d2-docker crates.

use thiserror::Error;

/// Result type alias for d2-docker operations.
pub type D2Result<T> = Result<T, D2Error>;

/// Domain errors. Every variant is fatal to the command that raised it.
#[derive(Debug, Error)]
pub enum D2Error {
    #[error("invalid image reference '{input}': {reason}")]
    Format { input: String, reason: String },

    #[error("invalid version range: {0}")]
    Version(String),

    #[error("{0}")]
    Lifecycle(String),

    #[error("container already running for image {image} (port {port})")]
    AlreadyRunning { image: String, port: u16 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no free port available in range {start}-{end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("instance on port {port} not ready after {attempts} attempts")]
    Readiness { port: u16, attempts: u32 },

    #[error("command `{command}` failed with code {code}: {stderr}")]
    ExternalCommand {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("interrupted")]
    Interrupted,

    #[error("download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl D2Error {
    pub fn format(input: &str, reason: impl Into<String>) -> Self {
        D2Error::Format {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
