//! Fakes shared by the unit tests of this crate.

use std::path::Path;
use std::sync::{Arc, Mutex};

use d2_core::{D2Config, D2Error, D2Result};
use d2_health::{ReadinessProbe, ReadyFuture};
use d2_runtime::testing::FakeStack;
use tempfile::TempDir;

use crate::artifact::{ArtifactSource, FetchFuture};
use crate::images::ImageBuilder;

/// Writes a stub WAR and records the requested versions.
#[derive(Default)]
pub struct RecordingArtifacts {
    pub versions: Mutex<Vec<String>>,
}

impl RecordingArtifacts {
    pub fn versions(&self) -> Vec<String> {
        self.versions.lock().unwrap().clone()
    }
}

impl ArtifactSource for RecordingArtifacts {
    fn fetch_war<'a>(&'a self, version: &'a str, dest: &'a Path) -> FetchFuture<'a> {
        Box::pin(async move {
            self.versions.lock().unwrap().push(version.to_string());
            std::fs::write(dest, format!("war {version}"))?;
            Ok(())
        })
    }
}

pub enum ReadyMode {
    Ready,
    Fail,
    Hang,
}

/// Readiness probe that answers immediately, fails, or never answers.
pub struct FakeReadiness {
    pub mode: ReadyMode,
    pub ports: Mutex<Vec<u16>>,
}

impl FakeReadiness {
    pub fn new(mode: ReadyMode) -> Self {
        Self {
            mode,
            ports: Mutex::new(Vec::new()),
        }
    }
}

impl ReadinessProbe for FakeReadiness {
    fn wait(&self, port: u16) -> ReadyFuture<'_> {
        self.ports.lock().unwrap().push(port);
        Box::pin(async move {
            match self.mode {
                ReadyMode::Ready => Ok(()),
                ReadyMode::Fail => Err(D2Error::Readiness { port, attempts: 1 }),
                ReadyMode::Hang => std::future::pending::<D2Result<()>>().await,
            }
        })
    }
}

/// Assets directory with both image build contexts.
pub fn assets() -> (TempDir, D2Config) {
    let dir = tempfile::tempdir().unwrap();
    for kind in ["dhis2-core", "dhis2-data"] {
        let context = dir.path().join("images").join(kind);
        std::fs::create_dir_all(&context).unwrap();
        std::fs::write(context.join("Dockerfile"), "FROM scratch\n").unwrap();
    }
    let mut config = D2Config::default();
    config.assets.dir = Some(dir.path().to_path_buf());
    (dir, config)
}

pub fn builder(
    fake: &Arc<FakeStack>,
    config: &D2Config,
    artifacts: &Arc<RecordingArtifacts>,
) -> ImageBuilder {
    ImageBuilder::from_config(fake.clone(), config, artifacts.clone())
}

/// Tags passed to `docker build`, in order.
pub fn built_tags(fake: &FakeStack) -> Vec<String> {
    fake.calls()
        .iter()
        .filter(|spec| spec.args.first().is_some_and(|a| a == "build"))
        .filter_map(|spec| spec.args.last().cloned())
        .collect()
}
