//! Core and data image builds.
//!
//! Every build copies a base build context (`images/dhis2-core` or
//! `images/dhis2-data`) into a temporary directory, adds the payload
//! (WAR, database dump, apps) and runs `docker build` on it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use d2_core::{D2Config, D2Error, D2Result, ImageReference};
use d2_runtime::{ComposeOptions, InstanceState, Lifecycle, SharedRunner};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::artifact::{ArtifactSource, ReleaseServer};
use crate::fs::{copy_into, copy_tree};

const CORE_CONTEXT: &str = "images/dhis2-core";
const DATA_CONTEXT: &str = "images/dhis2-data";
const WAR_FILE: &str = "dhis.war";
const HOME_FILES_DIR: &str = "dhis2-home-files";
const APPS_PATH_IN_CORE: &str = "/DHIS2_home/files/apps/";
const DATA_PATHS_IN_IMAGE: [&str; 2] = ["/data/db", "/data/apps"];
const DB_DUMP: &str = "db/db.sql.gz";
// -T: no pseudo-tty, otherwise the compressed stream gets mangled.
const PG_DUMP: [&str; 6] = ["exec", "-T", "db", "bash", "-c", "pg_dump -U dhis dhis2 | gzip"];

/// Where the WAR of a core image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarSource {
    File(PathBuf),
    /// Downloaded from the release server.
    Release(String),
}

/// Temporary build context; removed on drop.
struct BuildContext {
    _root: TempDir,
    dir: PathBuf,
}

impl BuildContext {
    fn from_base(base: &Path) -> D2Result<Self> {
        if !base.is_dir() {
            return Err(D2Error::Config(format!(
                "Docker directory not found: {}",
                base.display()
            )));
        }
        let root = tempfile::tempdir()?;
        let dir = root.path().join("contents");
        debug!(dir = %dir.display(), base = %base.display(), "build context");
        copy_tree(base, &dir)?;
        Ok(Self { _root: root, dir })
    }

    fn path(&self) -> &Path {
        &self.dir
    }
}

/// Builds core and data images.
#[derive(Clone)]
pub struct ImageBuilder {
    lifecycle: Lifecycle,
    images_dir: PathBuf,
    artifacts: Arc<dyn ArtifactSource>,
}

impl ImageBuilder {
    pub fn new(lifecycle: Lifecycle, images_dir: PathBuf, artifacts: Arc<dyn ArtifactSource>) -> Self {
        Self {
            lifecycle,
            images_dir,
            artifacts,
        }
    }

    pub fn from_config(
        runner: SharedRunner,
        config: &D2Config,
        artifacts: Arc<dyn ArtifactSource>,
    ) -> Self {
        Self::new(
            Lifecycle::from_config(runner, config),
            config.images_base_dir(),
            artifacts,
        )
    }

    /// Builder fetching WARs from the configured release server.
    pub fn with_release_server(runner: SharedRunner, config: &D2Config) -> Self {
        let server = ReleaseServer::new(config.releases.base_url.clone());
        Self::from_config(runner, config, Arc::new(server))
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn core_context(&self) -> D2Result<BuildContext> {
        BuildContext::from_base(&self.images_dir.join(CORE_CONTEXT))
    }

    fn data_context(&self) -> D2Result<BuildContext> {
        BuildContext::from_base(&self.images_dir.join(DATA_CONTEXT))
    }

    /// Build a core image around a WAR plus optional extra home files.
    pub async fn create_core(
        &self,
        image: &str,
        war: &WarSource,
        home_files: &[PathBuf],
    ) -> D2Result<()> {
        info!(%image, "Create core image");
        let context = self.core_context()?;
        let war_path = context.path().join(WAR_FILE);

        match war {
            WarSource::File(file) => {
                debug!(from = %file.display(), to = %war_path.display(), "copy WAR file");
                std::fs::copy(file, &war_path)?;
            }
            WarSource::Release(version) => {
                self.artifacts.fetch_war(version, &war_path).await?;
            }
        }

        let home_dir = context.path().join(HOME_FILES_DIR);
        std::fs::create_dir_all(&home_dir)?;
        for file in home_files {
            copy_into(file, &home_dir)?;
        }

        self.lifecycle.docker().build(context.path(), image).await
    }

    /// Build a data image from a database dump and an apps directory.
    pub async fn create_data(
        &self,
        image: &str,
        sql: Option<&Path>,
        apps_dir: Option<&Path>,
    ) -> D2Result<()> {
        info!(%image, "Create data image");
        let context = self.data_context()?;
        if let Some(apps_dir) = apps_dir {
            copy_tree(apps_dir, &context.path().join("apps"))?;
        }
        if let Some(sql) = sql {
            let dump = context.path().join(DB_DUMP);
            if let Some(parent) = dump.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(sql, &dump)?;
        }
        self.lifecycle.docker().build(context.path(), image).await
    }

    /// Extract `db/` and `apps/` of a data image into `dest`.
    ///
    /// The temporary container is removed whether or not the copy worked.
    pub async fn export_image(&self, image: &str, dest: &Path) -> D2Result<()> {
        let docker = self.lifecycle.docker();
        let container = docker.create_container(image).await?;
        std::fs::create_dir_all(dest)?;

        let copied = async {
            for path in DATA_PATHS_IN_IMAGE {
                docker.copy_from_container(&container, path, dest).await?;
            }
            Ok::<_, D2Error>(())
        }
        .await;
        let removed = docker.remove_container(&container).await;
        copied.and(removed)
    }

    /// New data image with the contents of `source`.
    pub async fn copy_image(&self, source: &str, dest: &str) -> D2Result<()> {
        info!(%source, %dest, "Copy image");
        let context = self.data_context()?;
        self.export_image(source, context.path()).await?;
        self.lifecycle.docker().build(context.path(), dest).await
    }

    /// New data image from a `db/` + `apps/` folder.
    pub async fn build_from_directory(&self, folder: &Path, dest: &str) -> D2Result<()> {
        info!(folder = %folder.display(), %dest, "Build image from directory");
        let context = self.data_context()?;
        copy_tree(folder, context.path())?;
        self.lifecycle.docker().build(context.path(), dest).await
    }

    /// Snapshot the running instance of `source` into data image `dest`.
    pub async fn commit(&self, source: &ImageReference, dest: &str) -> D2Result<()> {
        let running = match self.lifecycle.status(source).await? {
            InstanceState::Running(running) => running,
            InstanceState::Stopped => {
                return Err(D2Error::Lifecycle(
                    "Container must be running to build image".to_string(),
                ));
            }
        };
        let core = running
            .container("core")
            .ok_or_else(|| D2Error::Lifecycle(format!("No core container for {source}")))?;

        let context = self.data_context()?;
        info!("Copy DHIS2 apps");
        self.lifecycle
            .docker()
            .copy_from_container(core, APPS_PATH_IN_CORE, context.path())
            .await?;

        let dump = context.path().join(DB_DUMP);
        info!(path = %dump.display(), "Dump DB");
        if let Some(parent) = dump.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.lifecycle
            .compose()
            .run_to_file(&PG_DUMP, source, &ComposeOptions::default(), &dump)
            .await?;

        self.lifecycle.docker().build(context.path(), dest).await
    }

    /// Copy `source` (data image or folder) to each destination.
    pub async fn copy(&self, source: &str, destinations: &[String]) -> D2Result<()> {
        let source_is_image = ImageReference::is_data_image(source);
        for dest in destinations {
            let dest_is_image = ImageReference::is_data_image(dest);
            info!(%source, %dest, source_is_image, dest_is_image, "Copying");
            match (source_is_image, dest_is_image) {
                (true, true) => self.copy_image(source, dest).await?,
                (true, false) => self.export_image(source, Path::new(dest)).await?,
                (false, true) => self.build_from_directory(Path::new(source), dest).await?,
                (false, false) => copy_tree(Path::new(source), Path::new(dest))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use d2_runtime::OutputMode;
    use d2_runtime::testing::{FAKE_DUMP, FakeStack};

    use super::*;
    use crate::test_support::{RecordingArtifacts, assets, builder, built_tags};

    const DATA: &str = "eyeseetea/dhis2-data:2.34-sierra";

    #[tokio::test]
    async fn create_core_from_release() {
        let (_dir, config) = assets();
        let fake = Arc::new(FakeStack::new());
        let artifacts = Arc::new(RecordingArtifacts::default());

        builder(&fake, &config, &artifacts)
            .create_core("eyeseetea/dhis2-core:2.36", &WarSource::Release("2.36".into()), &[])
            .await
            .unwrap();

        assert_eq!(artifacts.versions(), vec!["2.36"]);
        assert_eq!(built_tags(&fake), vec!["eyeseetea/dhis2-core:2.36"]);
    }

    #[tokio::test]
    async fn create_core_from_war_file_skips_download() {
        let (dir, config) = assets();
        let war = dir.path().join("custom.war");
        std::fs::write(&war, "war").unwrap();
        let home = dir.path().join("dhis.conf");
        std::fs::write(&home, "conf").unwrap();
        let fake = Arc::new(FakeStack::new());
        let artifacts = Arc::new(RecordingArtifacts::default());

        builder(&fake, &config, &artifacts)
            .create_core("org/dhis2-core:2.36", &WarSource::File(war), &[home])
            .await
            .unwrap();

        assert!(artifacts.versions().is_empty());
        assert_eq!(built_tags(&fake), vec!["org/dhis2-core:2.36"]);
    }

    #[tokio::test]
    async fn missing_build_context_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = D2Config::default();
        config.assets.dir = Some(dir.path().to_path_buf());
        let fake = Arc::new(FakeStack::new());
        let artifacts = Arc::new(RecordingArtifacts::default());

        let err = builder(&fake, &config, &artifacts)
            .copy_image(DATA, "org/dhis2-data:2.34-copy")
            .await
            .unwrap_err();
        assert!(matches!(err, D2Error::Config(_)));
        assert!(fake.lines().is_empty());
    }

    #[tokio::test]
    async fn copy_image_exports_then_builds() {
        let (_dir, config) = assets();
        let fake = Arc::new(FakeStack::new());
        let artifacts = Arc::new(RecordingArtifacts::default());

        builder(&fake, &config, &artifacts)
            .copy_image(DATA, "org/dhis2-data:2.34-copy")
            .await
            .unwrap();

        let lines = fake.lines();
        assert_eq!(lines[0], format!("docker create {DATA}"));
        assert!(lines[1].starts_with("docker cp fake-container-1:/data/db "));
        assert!(lines[2].starts_with("docker cp fake-container-1:/data/apps "));
        assert_eq!(lines[3], "docker rm -v fake-container-1");
        assert_eq!(built_tags(&fake), vec!["org/dhis2-data:2.34-copy"]);
    }

    #[tokio::test]
    async fn export_removes_container_when_copy_fails() {
        let (dir, config) = assets();
        let fake = Arc::new(FakeStack::new());
        fake.fail_on("docker cp");
        let artifacts = Arc::new(RecordingArtifacts::default());

        let err = builder(&fake, &config, &artifacts)
            .export_image(DATA, &dir.path().join("out"))
            .await
            .unwrap_err();

        assert!(matches!(err, D2Error::ExternalCommand { .. }));
        assert_eq!(fake.lines().last().unwrap(), "docker rm -v fake-container-1");
    }

    #[tokio::test]
    async fn commit_requires_running_instance() {
        let (_dir, config) = assets();
        let fake = Arc::new(FakeStack::new());
        let artifacts = Arc::new(RecordingArtifacts::default());
        let image = ImageReference::parse(DATA).unwrap();

        let err = builder(&fake, &config, &artifacts)
            .commit(&image, DATA)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must be running"));
        assert!(built_tags(&fake).is_empty());
    }

    #[tokio::test]
    async fn commit_dumps_database_and_apps() {
        let (_dir, config) = assets();
        let fake = Arc::new(FakeStack::new());
        fake.set_running(DATA, 8081);
        let artifacts = Arc::new(RecordingArtifacts::default());
        let image = ImageReference::parse(DATA).unwrap();

        builder(&fake, &config, &artifacts)
            .commit(&image, DATA)
            .await
            .unwrap();

        let calls = fake.calls();
        let cp = calls.iter().find(|c| c.has_arg("cp")).unwrap();
        assert_eq!(cp.args[1], "proj_core_1:/DHIS2_home/files/apps/");

        let dump = calls.iter().find(|c| c.has_arg("exec")).unwrap();
        assert_eq!(dump.args.last().unwrap(), "pg_dump -U dhis dhis2 | gzip");
        match &dump.output {
            OutputMode::File(path) => assert!(path.ends_with("db/db.sql.gz")),
            other => panic!("unexpected output mode {other:?}"),
        }
        assert_eq!(built_tags(&fake), vec![DATA]);
        let context = fake.build_context(DATA).unwrap();
        assert_eq!(context.get("db/db.sql.gz"), Some(&(FAKE_DUMP.len() as u64)));
        assert!(fake.is_running(DATA));
    }

    #[tokio::test]
    async fn copy_folder_to_folder() {
        let (dir, config) = assets();
        let source = dir.path().join("source");
        std::fs::create_dir_all(source.join("db")).unwrap();
        std::fs::write(source.join("db/db.sql.gz"), "dump").unwrap();
        let dest = dir.path().join("dest");
        let fake = Arc::new(FakeStack::new());
        let artifacts = Arc::new(RecordingArtifacts::default());

        builder(&fake, &config, &artifacts)
            .copy(
                source.to_str().unwrap(),
                &[dest.to_string_lossy().into_owned()],
            )
            .await
            .unwrap();

        assert!(dest.join("db/db.sql.gz").is_file());
        assert!(fake.lines().is_empty());
    }

    #[tokio::test]
    async fn copy_dispatches_on_item_type() {
        let (dir, config) = assets();
        let folder = dir.path().join("data");
        std::fs::create_dir_all(&folder).unwrap();
        let fake = Arc::new(FakeStack::new());
        let artifacts = Arc::new(RecordingArtifacts::default());

        builder(&fake, &config, &artifacts)
            .copy(folder.to_str().unwrap(), &["org/dhis2-data:2.36-a".to_string()])
            .await
            .unwrap();
        assert_eq!(built_tags(&fake), vec!["org/dhis2-data:2.36-a"]);
        assert!(!fake.lines().iter().any(|l| l.starts_with("docker create")));
    }
}
