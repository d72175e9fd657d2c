//! Multi-version upgrade orchestration.
//!
//! An upgrade from `2.34` to `2.36` runs one step per intermediate version:
//!
//! ```text
//! for version in 2.35, 2.36:
//!   build core image for version        (WAR from migrations/<version> or release server)
//!   copy previous data image → new tag
//!   down --volumes; up --force-recreate -d with migrations/<version> mounted
//!   wait for readiness
//!   commit running instance → new tag
//!   stop (unless last step and keep_running)
//! ```
//!
//! A failing step aborts the upgrade. Nothing is rolled back: images built
//! by earlier steps stay, and a stack that failed to become ready is left
//! running for inspection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use d2_core::{D2Result, ImageReference, version_range};
use d2_health::ReadinessProbe;
use d2_runtime::{ComposeOptions, Lifecycle, PortRange, get_free_port};
use tracing::{debug, info, warn};

use crate::images::{ImageBuilder, WarSource};

const WAR_FILE: &str = "dhis.war";
const HOME_DIR: &str = "dhis2-home";

/// Parameters of an upgrade run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub source: ImageReference,
    pub dest: ImageReference,
    /// Overrides the version of `source`.
    pub from_version: Option<String>,
    /// Overrides the version of `dest`.
    pub to_version: Option<String>,
    /// Holds one `<version>/` directory per step with SQL, scripts, `dhis.war`
    /// and `dhis2-home/` files.
    pub migrations_dir: Option<PathBuf>,
    pub port: Option<u16>,
    /// Leave the last instance running.
    pub keep_running: bool,
    /// Name suffix of the core images.
    pub core_image_suffix: Option<String>,
}

impl UpgradeRequest {
    pub fn new(source: ImageReference, dest: ImageReference) -> Self {
        Self {
            source,
            dest,
            from_version: None,
            to_version: None,
            migrations_dir: None,
            port: None,
            keep_running: false,
            core_image_suffix: None,
        }
    }
}

/// One version hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeStep {
    pub version: String,
    pub source: ImageReference,
    pub dest: ImageReference,
    pub core_image: ImageReference,
    /// `migrations_dir/<version>` when that directory exists.
    pub migrations: Option<PathBuf>,
    pub keep_running: bool,
}

impl UpgradeStep {
    pub fn war_source(&self) -> WarSource {
        match &self.migrations {
            Some(dir) if dir.join(WAR_FILE).is_file() => WarSource::File(dir.join(WAR_FILE)),
            _ => WarSource::Release(self.version.clone()),
        }
    }

    /// Files under `<migrations>/dhis2-home/`, sorted.
    pub fn home_files(&self) -> D2Result<Vec<PathBuf>> {
        let Some(dir) = self.migrations.as_ref().map(|m| m.join(HOME_DIR)) else {
            return Ok(Vec::new());
        };
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn migrations_for(dir: Option<&Path>, version: &str) -> Option<PathBuf> {
    let path = dir?.join(version);
    if path.is_dir() {
        Some(path)
    } else {
        debug!(path = %path.display(), "no migrations for version");
        None
    }
}

/// Expand a request into its steps. The first version of the range is the
/// starting point and gets no step.
pub fn plan(request: &UpgradeRequest) -> D2Result<Vec<UpgradeStep>> {
    let from = request
        .from_version
        .as_deref()
        .unwrap_or(request.source.version());
    let to = request
        .to_version
        .as_deref()
        .unwrap_or(request.dest.version());
    let versions = version_range(from, to)?;
    info!(versions = %versions.join(" -> "), "Upgrade versions");

    let mut steps: Vec<UpgradeStep> = Vec::with_capacity(versions.len().saturating_sub(1));
    let mut source = request.source.clone();
    let last = versions.len().saturating_sub(1);

    for (index, version) in versions.iter().enumerate().skip(1) {
        let dest = request.dest.with_version(version);
        let core_image = dest
            .core_reference()
            .with_name(request.core_image_suffix.as_deref());
        steps.push(UpgradeStep {
            version: version.clone(),
            source: source.clone(),
            dest: dest.clone(),
            core_image,
            migrations: migrations_for(request.migrations_dir.as_deref(), version),
            keep_running: request.keep_running && index == last,
        });
        source = dest;
    }
    Ok(steps)
}

/// Progress notifications of an upgrade run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeEvent {
    StepStarted { version: String, source: String, dest: String },
    CoreImageBuilt { image: String },
    DataImageCopied { image: String },
    InstanceReady { image: String, port: u16 },
    Committed { image: String },
    Stopped { image: String },
    Finished { steps: usize },
}

/// Callback receiving [`UpgradeEvent`]s.
pub type UpgradeObserver = Arc<dyn Fn(&UpgradeEvent) + Send + Sync>;

/// Runs upgrade plans against the container runtime.
pub struct Upgrader {
    builder: ImageBuilder,
    readiness: Arc<dyn ReadinessProbe>,
    ports: PortRange,
    observer: Option<UpgradeObserver>,
}

impl Upgrader {
    pub fn new(builder: ImageBuilder, readiness: Arc<dyn ReadinessProbe>, ports: PortRange) -> Self {
        Self {
            builder,
            readiness,
            ports,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: UpgradeObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn lifecycle(&self) -> &Lifecycle {
        self.builder.lifecycle()
    }

    fn emit(&self, event: UpgradeEvent) {
        debug!(?event, "upgrade event");
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    /// Plan and run every step; returns the steps that were executed.
    pub async fn upgrade(&self, request: &UpgradeRequest) -> D2Result<Vec<UpgradeStep>> {
        let steps = plan(request)?;
        if steps.is_empty() {
            info!("Source and destination versions match, nothing to upgrade");
        }
        for step in &steps {
            self.run_step(step, request.port).await?;
        }
        self.emit(UpgradeEvent::Finished { steps: steps.len() });
        info!("Done");
        Ok(steps)
    }

    async fn run_step(&self, step: &UpgradeStep, port: Option<u16>) -> D2Result<()> {
        info!(source = %step.source, dest = %step.dest, version = %step.version, "Upgrade");
        self.emit(UpgradeEvent::StepStarted {
            version: step.version.clone(),
            source: step.source.to_string(),
            dest: step.dest.to_string(),
        });

        let core_image = step.core_image.to_string();
        self.builder
            .create_core(&core_image, &step.war_source(), &step.home_files()?)
            .await?;
        self.emit(UpgradeEvent::CoreImageBuilt {
            image: core_image.clone(),
        });

        let dest = step.dest.to_string();
        self.builder
            .copy_image(&step.source.to_string(), &dest)
            .await?;
        self.emit(UpgradeEvent::DataImageCopied { image: dest.clone() });

        let port = match port {
            Some(port) => port,
            None => get_free_port(self.ports).await?,
        };
        let opts = ComposeOptions {
            core_image: Some(core_image.clone()),
            port: Some(port),
            load_from_data: true,
            post_sql_dir: step.migrations.clone(),
            scripts_dir: step.migrations.clone(),
            ..ComposeOptions::default()
        };
        let base = ComposeOptions::with_core_image(Some(core_image));
        let compose = self.lifecycle().compose();

        // Validate mounts before tearing anything down.
        compose.environment(&step.dest, &opts)?;
        compose.run(&["down", "--volumes"], &step.dest, &base).await?;

        let guard = self.lifecycle().stop_guard(&step.dest, &base)?;
        let migrated = async {
            compose
                .run(&["up", "--force-recreate", "-d"], &step.dest, &opts)
                .await?;
            self.readiness.wait(port).await?;
            self.emit(UpgradeEvent::InstanceReady {
                image: dest.clone(),
                port,
            });
            self.builder.commit(&step.dest, &dest).await
        }
        .await;

        if let Err(e) = migrated {
            warn!(image = %dest, "Upgrade step failed, leaving containers as they are");
            guard.disarm();
            return Err(e);
        }
        self.emit(UpgradeEvent::Committed { image: dest.clone() });

        if step.keep_running {
            guard.disarm();
            info!(image = %dest, port, "Keeping instance running");
        } else {
            guard.release().await?;
            self.emit(UpgradeEvent::Stopped { image: dest });
        }
        Ok(())
    }
}
