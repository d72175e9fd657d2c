//! d2-docker.toml configuration parser.
//!
//! Every section is optional; a missing file or a missing key falls back to
//! the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{D2Error, D2Result};

/// Environment variable pointing at a config file.
pub const CONFIG_ENV: &str = "D2_DOCKER_CONFIG";

/// Environment variable overriding the assets directory.
pub const ASSETS_ENV: &str = "D2_DOCKER_ASSETS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct D2Config {
    pub runtime: RuntimeConfig,
    pub assets: AssetsConfig,
    pub ports: PortsConfig,
    pub releases: ReleasesConfig,
    pub readiness: ReadinessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Container runtime binary.
    pub docker: String,
    /// Compose command; `["docker", "compose"]` selects the plugin form.
    pub compose: Vec<String>,
    /// Label carrying the data image name on every stack container.
    pub label: String,
    pub deploy_path_label: String,
    pub project_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker: "docker".to_string(),
            compose: vec!["docker-compose".to_string()],
            label: "com.eyeseetea.image-name".to_string(),
            deploy_path_label: "com.eyeseetea.deploy-path".to_string(),
            project_prefix: "d2-docker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Directory with `docker-compose.yml`, `images/`, `config/` and `.empty/`.
    pub dir: Option<PathBuf>,
    /// Base directory for `images/dhis2-core` and `images/dhis2-data`.
    pub images_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub start: u16,
    pub end: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            start: 8080,
            end: 65535,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleasesConfig {
    pub base_url: String,
}

impl Default for ReleasesConfig {
    fn default() -> Self {
        Self {
            base_url: "https://releases.dhis2.org".to_string(),
        }
    }
}

/// Bounded polling policy for the readiness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub interval: String,
    pub timeout: String,
    pub max_attempts: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval: "5s".to_string(),
            timeout: "10s".to_string(),
            max_attempts: 360,
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> D2Result<Duration> {
        parse_duration(&self.interval)
            .ok_or_else(|| D2Error::Config(format!("invalid readiness interval: {}", self.interval)))
    }

    pub fn timeout(&self) -> D2Result<Duration> {
        parse_duration(&self.timeout)
            .ok_or_else(|| D2Error::Config(format!("invalid readiness timeout: {}", self.timeout)))
    }
}

impl D2Config {
    pub fn from_file(path: &Path) -> D2Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| D2Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: D2Config = toml::from_str(&content)
            .map_err(|e| D2Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, else from `$D2_DOCKER_CONFIG`, else defaults.
    pub fn load(explicit: Option<&Path>) -> D2Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> D2Result<()> {
        if self.runtime.compose.is_empty() {
            return Err(D2Error::Config("runtime.compose must not be empty".to_string()));
        }
        if self.ports.start > self.ports.end {
            return Err(D2Error::Config(format!(
                "ports.start ({}) is greater than ports.end ({})",
                self.ports.start, self.ports.end
            )));
        }
        if self.readiness.max_attempts == 0 {
            return Err(D2Error::Config("readiness.max_attempts must be positive".to_string()));
        }
        self.readiness.interval()?;
        self.readiness.timeout()?;
        Ok(())
    }

    /// Resolved assets directory.
    ///
    /// Order: `[assets] dir`, `$D2_DOCKER_ASSETS`, then the first directory
    /// holding a compose file among those next to the executable and the
    /// source checkout.
    pub fn assets_dir(&self) -> PathBuf {
        if let Some(dir) = &self.assets.dir {
            return dir.clone();
        }
        if let Some(dir) = std::env::var_os(ASSETS_ENV) {
            return PathBuf::from(dir);
        }
        let mut candidates = match std::env::current_exe() {
            Ok(exe) => installed_assets_candidates(&exe),
            Err(_) => Vec::new(),
        };
        let checkout = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../assets");
        candidates.push(checkout.clone());
        first_assets_dir(&candidates)
            .or_else(|| candidates.first().cloned())
            .unwrap_or(checkout)
    }

    /// Base directory holding `images/dhis2-core` and `images/dhis2-data`.
    pub fn images_base_dir(&self) -> PathBuf {
        self.assets
            .images_dir
            .clone()
            .unwrap_or_else(|| self.assets_dir())
    }

    pub fn compose_file(&self) -> PathBuf {
        self.assets_dir().join(COMPOSE_FILE)
    }

    /// Empty directory bound in place of unset SQL/script directories.
    pub fn empty_dir(&self) -> PathBuf {
        self.assets_dir().join(".empty")
    }

    /// Empty file bound in place of an unset Tomcat `server.xml`.
    pub fn placeholder_file(&self) -> PathBuf {
        self.empty_dir().join("placeholder")
    }

    pub fn default_dhis_conf(&self) -> PathBuf {
        self.assets_dir().join("config/DHIS2_home/dhis.conf")
    }
}

const COMPOSE_FILE: &str = "docker-compose.yml";

/// Asset locations relative to an installed executable:
/// `<prefix>/share/d2-docker/assets` for `<prefix>/bin/d2-docker`, then
/// `assets/` beside the executable.
fn installed_assets_candidates(exe: &Path) -> Vec<PathBuf> {
    let Some(bin_dir) = exe.parent() else {
        return Vec::new();
    };
    let mut candidates = Vec::new();
    if let Some(prefix) = bin_dir.parent() {
        candidates.push(prefix.join("share/d2-docker/assets"));
    }
    candidates.push(bin_dir.join("assets"));
    candidates
}

fn first_assets_dir(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|dir| dir.join(COMPOSE_FILE).is_file())
        .cloned()
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
