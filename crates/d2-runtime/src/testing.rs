//! In-memory runner that emulates `docker` and the compose tool.
//!
//! Tracks which data images have a running stack and answers `docker ps`
//! queries from that state, so lifecycle code can be exercised without a
//! container runtime. Every call is recorded for assertions.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use d2_core::D2Result;

use crate::runner::{CommandOutput, CommandRunner, CommandSpec, OutputMode, RunFuture};
use crate::status::{GATEWAY, SERVICES};

const DATA_IMAGE_ENV: &str = "DHIS2_DATA_IMAGE";
const PORT_ENV: &str = "DHIS2_CORE_PORT";
/// Stdout of a compose `exec ... pg_dump`.
pub const FAKE_DUMP: &str = "-- fake pg_dump\n";

#[derive(Debug, Clone, Copy)]
struct FakeInstance {
    port: u16,
    complete: bool,
}

#[derive(Default)]
struct State {
    calls: Vec<CommandSpec>,
    blocking_calls: usize,
    running: BTreeMap<String, FakeInstance>,
    responses: Vec<(String, String)>,
    failures: Vec<String>,
    hangs: Vec<String>,
    incomplete_up: bool,
    created: usize,
    /// Tag and file sizes of every `docker build` context, in call order.
    contexts: Vec<(String, BTreeMap<String, u64>)>,
}

enum Outcome {
    Done(CommandOutput),
    Hang,
}

/// Fake [`CommandRunner`] backed by an in-memory stack table.
#[derive(Default)]
pub struct FakeStack {
    state: Mutex<State>,
}

impl FakeStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the stack of `image` as running on `port`.
    pub fn set_running(&self, image: &str, port: u16) {
        self.state().running.insert(
            image.to_string(),
            FakeInstance {
                port,
                complete: true,
            },
        );
    }

    pub fn is_running(&self, image: &str) -> bool {
        self.state().running.get(image).is_some_and(|i| i.complete)
    }

    /// Reply with `stdout` to any command whose rendering contains `pattern`.
    pub fn respond(&self, pattern: &str, stdout: &str) {
        self.state()
            .responses
            .push((pattern.to_string(), stdout.to_string()));
    }

    /// Exit with code 1 for any command whose rendering contains `pattern`.
    pub fn fail_on(&self, pattern: &str) {
        self.state().failures.push(pattern.to_string());
    }

    /// Never complete a matching command (its state effects still apply).
    pub fn hang_on(&self, pattern: &str) {
        self.state().hangs.push(pattern.to_string());
    }

    /// Subsequent `up` calls start the stack without its core service.
    pub fn fail_services_on_up(&self) {
        self.state().incomplete_up = true;
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.state().calls.clone()
    }

    /// Rendered command lines, in call order.
    pub fn lines(&self) -> Vec<String> {
        self.state().calls.iter().map(CommandSpec::display).collect()
    }

    /// Compose invocations, recognised by their environment.
    pub fn compose_calls(&self) -> Vec<CommandSpec> {
        self.state()
            .calls
            .iter()
            .filter(|spec| spec.env.contains_key(DATA_IMAGE_ENV))
            .cloned()
            .collect()
    }

    /// Files (relative path to size) of the last build context for `tag`,
    /// captured when `docker build` ran.
    pub fn build_context(&self, tag: &str) -> Option<BTreeMap<String, u64>> {
        self.state()
            .contexts
            .iter()
            .rev()
            .find(|(t, _)| t == tag)
            .map(|(_, files)| files.clone())
    }

    /// Number of calls that went through [`CommandRunner::execute_blocking`].
    pub fn blocking_calls(&self) -> usize {
        self.state().blocking_calls
    }

    fn handle(&self, spec: &CommandSpec) -> Outcome {
        let mut state = self.state();
        let line = spec.display();
        state.calls.push(spec.clone());

        if state.failures.iter().any(|p| line.contains(p.as_str())) {
            return Outcome::Done(CommandOutput {
                code: 1,
                stdout: String::new(),
                stderr: "boom".to_string(),
            });
        }

        if let Some(image) = spec.env.get(DATA_IMAGE_ENV) {
            apply_compose(&mut state, spec, image);
        }

        if state.hangs.iter().any(|p| line.contains(p.as_str())) {
            return Outcome::Hang;
        }

        let canned = state
            .responses
            .iter()
            .find(|(p, _)| line.contains(p.as_str()))
            .map(|(_, stdout)| stdout.clone());
        let stdout = match canned {
            Some(stdout) => stdout,
            None => builtin_stdout(&mut state, spec),
        };

        // Redirected stdout ends up in the file, like a real child process.
        if let OutputMode::File(path) = &spec.output {
            return Outcome::Done(match std::fs::write(path, &stdout) {
                Ok(()) => CommandOutput::default(),
                Err(e) => CommandOutput {
                    code: 1,
                    stdout: String::new(),
                    stderr: e.to_string(),
                },
            });
        }

        Outcome::Done(CommandOutput {
            code: 0,
            stdout,
            stderr: String::new(),
        })
    }
}

fn apply_compose(state: &mut State, spec: &CommandSpec, image: &str) {
    if spec.has_arg("up") {
        let port = spec
            .env
            .get(PORT_ENV)
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let complete = !state.incomplete_up;
        state
            .running
            .insert(image.to_string(), FakeInstance { port, complete });
    } else if spec.has_arg("stop") || spec.has_arg("down") {
        state.running.remove(image);
    }
}

fn builtin_stdout(state: &mut State, spec: &CommandSpec) -> String {
    if spec.has_arg("exec") && spec.args.iter().any(|a| a.contains("pg_dump")) {
        return FAKE_DUMP.to_string();
    }
    match spec.args.first().map(String::as_str) {
        Some("ps") => ps_stdout(state, spec),
        Some("create") => {
            state.created += 1;
            format!("fake-container-{}\n", state.created)
        }
        Some("build") => {
            if let (Some(dir), Some(tag)) = (spec.args.get(1), spec.args.last()) {
                let mut files = BTreeMap::new();
                snapshot(Path::new(dir), Path::new(dir), &mut files);
                state.contexts.push((tag.clone(), files));
            }
            String::new()
        }
        _ => String::new(),
    }
}

fn snapshot(root: &Path, dir: &Path, files: &mut BTreeMap<String, u64>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            snapshot(root, &path, files);
        } else if let (Ok(relative), Ok(meta)) = (path.strip_prefix(root), entry.metadata()) {
            files.insert(relative.to_string_lossy().into_owned(), meta.len());
        }
    }
}

fn ps_stdout(state: &State, spec: &CommandSpec) -> String {
    let format = spec
        .args
        .iter()
        .find_map(|a| a.strip_prefix("--format="))
        .unwrap_or("");
    let mut out = String::new();

    for (image, instance) in &state.running {
        if format.contains("{{.Names}}") {
            for service in SERVICES {
                if service == "core" && !instance.complete {
                    continue;
                }
                let ports = if service == GATEWAY {
                    format!("0.0.0.0:{}->80/tcp", instance.port)
                } else {
                    String::new()
                };
                out.push_str(&format!("{image} proj_{service}_1 {ports}\n"));
            }
        } else if format.contains(" | ") {
            out.push_str(&format!("{image} | 0.0.0.0:{}->80/tcp\n", instance.port));
        } else {
            out.push_str(&format!("{image}\n"));
        }
    }
    out
}

impl CommandRunner for FakeStack {
    fn execute<'a>(&'a self, spec: &'a CommandSpec) -> RunFuture<'a> {
        let outcome = self.handle(spec);
        Box::pin(async move {
            match outcome {
                Outcome::Done(output) => Ok(output),
                Outcome::Hang => std::future::pending().await,
            }
        })
    }

    fn execute_blocking(&self, spec: &CommandSpec) -> D2Result<CommandOutput> {
        self.state().blocking_calls += 1;
        match self.handle(spec) {
            Outcome::Done(output) => Ok(output),
            Outcome::Hang => Ok(CommandOutput::default()),
        }
    }
}
