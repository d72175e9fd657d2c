//! Instance status inspection.
//!
//! The runtime is the only source of truth: state is rebuilt from `docker ps`
//! on every call and never cached. An instance is `Running` only when all
//! three stack services are up and the gateway publishes a host port for
//! container port 80.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use d2_core::{D2Result, ImageReference};
use regex::Regex;
use tracing::debug;

use crate::docker::Docker;

/// Services of a compose stack.
pub const SERVICES: [&str; 3] = ["gateway", "core", "db"];

/// Service publishing the instance port.
pub const GATEWAY: &str = "gateway";

/// Separators of the container naming conventions, tried in order:
/// `project_service_1` (compose v1), then `project-service-1` (compose v2).
const NAMING_SEPARATORS: [char; 2] = ['_', '-'];

/// One row of `docker ps` for a labelled container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledContainer {
    /// Value of the image label.
    pub image: String,
    pub name: String,
    /// Raw `{{.Ports}}` column, possibly empty.
    pub ports: String,
}

impl LabeledContainer {
    /// Parse `LABEL NAME [PORTS...]`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(3, char::is_whitespace);
        let image = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        let ports = parts.next().unwrap_or("").trim();

        Some(Self {
            image: image.to_string(),
            name: name.to_string(),
            ports: ports.to_string(),
        })
    }

    /// Service name embedded in the container name.
    pub fn service(&self) -> Option<&str> {
        service_from_name(&self.name)
    }
}

fn service_from_name(name: &str) -> Option<&str> {
    NAMING_SEPARATORS
        .iter()
        .find_map(|sep| split_service(name, *sep))
}

/// `PROJECT<sep>SERVICE<sep>INDEX` → `SERVICE`.
fn split_service(name: &str, sep: char) -> Option<&str> {
    let mut parts = name.rsplitn(3, sep);
    let index = parts.next()?;
    let service = parts.next()?;
    let project = parts.next()?;

    let valid = !project.is_empty()
        && !service.is_empty()
        && !index.is_empty()
        && index.chars().all(|c| c.is_ascii_digit());
    valid.then_some(service)
}

static PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S*?:(\d+)->80/").expect("valid gateway port pattern"));

/// Host port published for container port 80, e.g. `0.0.0.0:8082->80/tcp`.
pub fn gateway_port(ports: &str) -> Option<u16> {
    PORT_RE.captures(ports.trim())?.get(1)?.as_str().parse().ok()
}

/// A live three-container stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInstance {
    /// service → container name
    pub containers: BTreeMap<String, String>,
    pub port: u16,
}

impl RunningInstance {
    pub fn container(&self, service: &str) -> Option<&str> {
        self.containers.get(service).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Stopped,
    Running(RunningInstance),
}

impl InstanceState {
    pub fn is_running(&self) -> bool {
        matches!(self, InstanceState::Running(_))
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            InstanceState::Running(running) => Some(running.port),
            InstanceState::Stopped => None,
        }
    }
}

/// Derive the state of `image` from labelled container rows.
pub fn derive_state(image: &str, rows: &[LabeledContainer]) -> InstanceState {
    let mut containers = BTreeMap::new();
    let mut port = None;

    for row in rows.iter().filter(|row| row.image == image) {
        let Some(service) = row.service() else {
            debug!(name = %row.name, "container name has no service segment");
            continue;
        };
        if service == GATEWAY {
            port = gateway_port(&row.ports);
        }
        containers.insert(service.to_string(), row.name.clone());
    }

    let complete = containers.len() == SERVICES.len()
        && SERVICES.iter().all(|s| containers.contains_key(*s));

    match (complete, port) {
        (true, Some(port)) => InstanceState::Running(RunningInstance { containers, port }),
        _ => InstanceState::Stopped,
    }
}

impl Docker {
    /// Current state of the stack for `image`.
    pub async fn get_status(&self, image: &ImageReference) -> D2Result<InstanceState> {
        let rows = self.list_labeled_containers().await?;
        let state = derive_state(&image.to_string(), &rows);
        debug!(image = %image, running = state.is_running(), "instance status");
        Ok(state)
    }
}
