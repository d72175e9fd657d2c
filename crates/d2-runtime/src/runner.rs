//! External process execution.
//!
//! Every interaction with the container runtime and the compose tool goes
//! through [`CommandRunner`], so the lifecycle logic can be driven by a fake
//! in tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use d2_core::{D2Error, D2Result};
use tracing::debug;

/// Where the child's stdout goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Collect stdout/stderr into [`CommandOutput`].
    #[default]
    Capture,
    /// Share the terminal with the child (progress output, interactive shells).
    Inherit,
    /// Write stdout to a file, capture stderr.
    File(PathBuf),
}

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment on top of the inherited one.
    pub env: BTreeMap<String, String>,
    pub output: OutputMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            output: OutputMode::Capture,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Shell-like rendering for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("\"{part}\"")
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit code and captured streams of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Non-blank stdout lines, trimmed.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Boxed future returned by [`CommandRunner`] methods.
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = D2Result<CommandOutput>> + Send + 'a>>;

/// Executes external commands. Injected so tests can substitute a fake.
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is reported in the output, not as
    /// an error; only spawn failures are errors.
    fn execute<'a>(&'a self, spec: &'a CommandSpec) -> RunFuture<'a>;

    /// Blocking variant, for cleanup paths that cannot await (drop guards).
    fn execute_blocking(&self, spec: &CommandSpec) -> D2Result<CommandOutput>;

    /// Run and turn a non-zero exit into [`D2Error::ExternalCommand`].
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> RunFuture<'a> {
        Box::pin(async move {
            let output = self.execute(spec).await?;
            check(spec, output)
        })
    }
}

/// Shared handle to a runner.
pub type SharedRunner = Arc<dyn CommandRunner>;

/// Map a non-zero exit to an error carrying the exit code and stderr.
pub fn check(spec: &CommandSpec, output: CommandOutput) -> D2Result<CommandOutput> {
    if output.success() {
        Ok(output)
    } else {
        Err(D2Error::ExternalCommand {
            command: spec.display(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

fn spawn_error(spec: &CommandSpec, err: std::io::Error) -> D2Error {
    D2Error::ExternalCommand {
        command: spec.display(),
        code: -1,
        stderr: format!("failed to execute '{}': {err}", spec.program),
    }
}

fn log_command(spec: &CommandSpec) {
    if !spec.env.is_empty() {
        let env = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        debug!(%env, "environment");
    }
    debug!(command = %spec.display(), "run");
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn shared() -> SharedRunner {
        Arc::new(SystemRunner)
    }
}

impl CommandRunner for SystemRunner {
    fn execute<'a>(&'a self, spec: &'a CommandSpec) -> RunFuture<'a> {
        Box::pin(async move {
            log_command(spec);

            let mut cmd = tokio::process::Command::new(&spec.program);
            cmd.args(&spec.args).envs(&spec.env).kill_on_drop(true);

            match &spec.output {
                OutputMode::Capture => {
                    cmd.stdin(Stdio::null())
                        .stdout(Stdio::piped())
                        .stderr(Stdio::piped());
                }
                OutputMode::Inherit => {
                    cmd.stdin(Stdio::inherit())
                        .stdout(Stdio::inherit())
                        .stderr(Stdio::inherit());
                }
                OutputMode::File(path) => {
                    let file = std::fs::File::create(path)?;
                    cmd.stdin(Stdio::null())
                        .stdout(Stdio::from(file))
                        .stderr(Stdio::piped());
                }
            }

            // `output()` would force piped stdio; spawn keeps the modes above.
            let child = cmd.spawn().map_err(|e| spawn_error(spec, e))?;
            let output = child.wait_with_output().await?;
            Ok(CommandOutput {
                code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }

    fn execute_blocking(&self, spec: &CommandSpec) -> D2Result<CommandOutput> {
        log_command(spec);

        let mut cmd = std::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd.output().map_err(|e| spawn_error(spec, e))?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
