//! Compose invocation contract.
//!
//! The compose template declares every bind mount unconditionally, so each
//! mount variable must point at something that exists: unset directories are
//! replaced by an empty placeholder directory, unset files by a placeholder
//! file. Caller-supplied paths are validated before anything is run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use d2_core::{D2Config, D2Error, D2Result, DATA_REPOSITORY, ImageReference};

use crate::runner::{CommandOutput, CommandSpec, OutputMode, SharedRunner};

/// Per-invocation settings turned into the compose environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Overrides the core image derived from the data image.
    pub core_image: Option<String>,
    pub port: Option<u16>,
    pub bind_ip: Option<String>,
    pub db_port: Option<u16>,
    /// Seed the database from the data image on first start.
    pub load_from_data: bool,
    pub post_sql_dir: Option<PathBuf>,
    pub scripts_dir: Option<PathBuf>,
    pub deploy_path: Option<String>,
    /// `USER:PASSWORD`
    pub auth: Option<String>,
    pub tomcat_server: Option<PathBuf>,
    pub dhis_conf: Option<PathBuf>,
    pub java_opts: Option<String>,
    pub postgis_version: Option<String>,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            core_image: None,
            port: None,
            bind_ip: None,
            db_port: None,
            load_from_data: true,
            post_sql_dir: None,
            scripts_dir: None,
            deploy_path: None,
            auth: None,
            tomcat_server: None,
            dhis_conf: None,
            java_opts: None,
            postgis_version: None,
        }
    }
}

impl ComposeOptions {
    pub fn with_core_image(core_image: Option<String>) -> Self {
        Self {
            core_image,
            ..Self::default()
        }
    }
}

/// Normalise a Tomcat context path to a single leading `/`; empty stays empty.
pub fn normalize_deploy_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if path.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Handle on the compose tool bound to the stack template.
#[derive(Clone)]
pub struct Compose {
    runner: SharedRunner,
    command: Vec<String>,
    file: PathBuf,
    empty_dir: PathBuf,
    placeholder_file: PathBuf,
    default_dhis_conf: PathBuf,
    project_prefix: String,
}

impl Compose {
    pub fn new(runner: SharedRunner, config: &D2Config) -> Self {
        Self {
            runner,
            command: config.runtime.compose.clone(),
            file: config.compose_file(),
            empty_dir: config.empty_dir(),
            placeholder_file: config.placeholder_file(),
            default_dhis_conf: config.default_dhis_conf(),
            project_prefix: config.runtime.project_prefix.clone(),
        }
    }

    pub fn runner(&self) -> &SharedRunner {
        &self.runner
    }

    /// Compose project name for an image.
    ///
    /// `eyeseetea/dhis2-data:2.30-ento` → `d2-docker-eyeseetea-2-30-ento`
    pub fn project_name(&self, image: &ImageReference) -> String {
        let clean = image.to_string().replace(&format!("/{DATA_REPOSITORY}"), "");
        format!("{}-{}", self.project_prefix, clean)
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '-' })
            .collect()
    }

    /// Environment passed to the compose process.
    pub fn environment(
        &self,
        image: &ImageReference,
        opts: &ComposeOptions,
    ) -> D2Result<BTreeMap<String, String>> {
        let core_image = opts
            .core_image
            .clone()
            .unwrap_or_else(|| image.core_reference().to_string());

        let mut env = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            env.insert(key.to_string(), value);
        };

        set("DHIS2_DATA_IMAGE", image.to_string());
        set("DHIS2_CORE_IMAGE", core_image);
        if let Some(port) = opts.port {
            set("DHIS2_CORE_PORT", port.to_string());
        }
        set(
            "DHIS2_CORE_IP",
            opts.bind_ip.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
        );
        if let Some(db_port) = opts.db_port {
            set("DB_PORT", db_port.to_string());
        }
        set(
            "LOAD_FROM_DATA",
            if opts.load_from_data { "yes" } else { "no" }.to_string(),
        );
        set("POST_SQL_DIR", path_string(&self.volume_dir(opts.post_sql_dir.as_deref())?));
        set("SCRIPTS_DIR", path_string(&self.volume_dir(opts.scripts_dir.as_deref())?));
        set("DEPLOY_PATH", opts.deploy_path.clone().unwrap_or_default());
        set("DHIS2_AUTH", opts.auth.clone().unwrap_or_default());
        set(
            "TOMCAT_SERVER",
            path_string(&volume_file(opts.tomcat_server.as_deref(), &self.placeholder_file)?),
        );
        set(
            "DHIS_CONF",
            path_string(&volume_file(opts.dhis_conf.as_deref(), &self.default_dhis_conf)?),
        );
        set("JAVA_OPTS", opts.java_opts.clone().unwrap_or_default());
        if let Some(version) = &opts.postgis_version {
            set("POSTGIS_VERSION", version.clone());
        }

        Ok(env)
    }

    /// Absolute directory for a bind mount, or the empty placeholder.
    fn volume_dir(&self, dir: Option<&Path>) -> D2Result<PathBuf> {
        match dir {
            None => Ok(self.empty_dir.clone()),
            Some(dir) if !dir.is_dir() => Err(D2Error::Config(format!(
                "Should be a directory: {}",
                dir.display()
            ))),
            Some(dir) => Ok(std::path::absolute(dir)?),
        }
    }

    /// Full command line for `compose -f FILE -p PROJECT ARGS...`.
    pub fn command(
        &self,
        args: &[&str],
        image: &ImageReference,
        opts: &ComposeOptions,
    ) -> D2Result<CommandSpec> {
        let env = self.environment(image, opts)?;
        let (program, prefix) = self
            .command
            .split_first()
            .ok_or_else(|| D2Error::Config("empty compose command".to_string()))?;

        Ok(CommandSpec::new(program)
            .args(prefix.iter().cloned())
            .arg("-f")
            .arg(path_string(&self.file))
            .arg("-p")
            .arg(self.project_name(image))
            .args(args.iter().copied())
            .envs(env))
    }

    /// Print the compose tool version.
    pub async fn version(&self) -> D2Result<()> {
        let (program, prefix) = self
            .command
            .split_first()
            .ok_or_else(|| D2Error::Config("empty compose command".to_string()))?;
        let spec = CommandSpec::new(program)
            .args(prefix.iter().cloned())
            .arg("version")
            .output(OutputMode::Inherit);
        self.runner.run(&spec).await?;
        Ok(())
    }

    /// Run attached to the terminal.
    pub async fn run(
        &self,
        args: &[&str],
        image: &ImageReference,
        opts: &ComposeOptions,
    ) -> D2Result<CommandOutput> {
        let spec = self.command(args, image, opts)?.output(OutputMode::Inherit);
        self.runner.run(&spec).await
    }

    /// Run with stdout/stderr captured.
    pub async fn capture(
        &self,
        args: &[&str],
        image: &ImageReference,
        opts: &ComposeOptions,
    ) -> D2Result<CommandOutput> {
        let spec = self.command(args, image, opts)?;
        self.runner.run(&spec).await
    }

    /// Run with stdout redirected into `file`.
    pub async fn run_to_file(
        &self,
        args: &[&str],
        image: &ImageReference,
        opts: &ComposeOptions,
        file: &Path,
    ) -> D2Result<CommandOutput> {
        let spec = self
            .command(args, image, opts)?
            .output(OutputMode::File(file.to_path_buf()));
        self.runner.run(&spec).await
    }
}

/// Absolute file for a bind mount, or the fallback.
fn volume_file(file: Option<&Path>, fallback: &Path) -> D2Result<PathBuf> {
    match file {
        None => Ok(fallback.to_path_buf()),
        Some(file) if !file.is_file() => Err(D2Error::Config(format!(
            "Should be a file: {}",
            file.display()
        ))),
        Some(file) => Ok(std::path::absolute(file)?),
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::FakeStack;

    fn compose(assets: &Path) -> Compose {
        let mut config = D2Config::default();
        config.assets.dir = Some(assets.to_path_buf());
        Compose::new(Arc::new(FakeStack::new()), &config)
    }

    fn image() -> ImageReference {
        ImageReference::parse("eyeseetea/dhis2-data:2.30-ento").unwrap()
    }

    #[test]
    fn test_project_name() {
        let compose = compose(Path::new("/opt/d2"));
        assert_eq!(compose.project_name(&image()), "d2-docker-eyeseetea-2-30-ento");
    }

    #[test]
    fn test_defaults_use_placeholders() {
        let compose = compose(Path::new("/opt/d2"));
        let env = compose.environment(&image(), &ComposeOptions::default()).unwrap();

        assert_eq!(env["DHIS2_DATA_IMAGE"], "eyeseetea/dhis2-data:2.30-ento");
        assert_eq!(env["DHIS2_CORE_IMAGE"], "eyeseetea/dhis2-core:2.30");
        assert_eq!(env["LOAD_FROM_DATA"], "yes");
        assert_eq!(env["POST_SQL_DIR"], "/opt/d2/.empty");
        assert_eq!(env["SCRIPTS_DIR"], "/opt/d2/.empty");
        assert_eq!(env["TOMCAT_SERVER"], "/opt/d2/.empty/placeholder");
        assert_eq!(env["DHIS_CONF"], "/opt/d2/config/DHIS2_home/dhis.conf");
        assert_eq!(env["DEPLOY_PATH"], "");
        assert!(!env.contains_key("DHIS2_CORE_PORT"));
        assert!(!env.contains_key("DB_PORT"));
        assert!(env.values().all(|v| !v.contains("None")));
    }

    #[test]
    fn test_explicit_options() {
        let dir = tempfile::tempdir().unwrap();
        let sql = dir.path().join("sql");
        std::fs::create_dir(&sql).unwrap();
        let compose = compose(Path::new("/opt/d2"));

        let opts = ComposeOptions {
            core_image: Some("custom/dhis2-core:2.30-patched".to_string()),
            port: Some(8085),
            load_from_data: false,
            post_sql_dir: Some(sql.clone()),
            auth: Some("admin:district".to_string()),
            java_opts: Some("-Xmx4g".to_string()),
            deploy_path: Some("/dhis2".to_string()),
            ..ComposeOptions::default()
        };
        let env = compose.environment(&image(), &opts).unwrap();

        assert_eq!(env["DHIS2_CORE_IMAGE"], "custom/dhis2-core:2.30-patched");
        assert_eq!(env["DHIS2_CORE_PORT"], "8085");
        assert_eq!(env["LOAD_FROM_DATA"], "no");
        assert_eq!(env["POST_SQL_DIR"], sql.to_string_lossy());
        assert_eq!(env["SCRIPTS_DIR"], "/opt/d2/.empty");
        assert_eq!(env["DHIS2_AUTH"], "admin:district");
        assert_eq!(env["JAVA_OPTS"], "-Xmx4g");
        assert_eq!(env["DEPLOY_PATH"], "/dhis2");
    }

    #[test]
    fn test_missing_directory_is_config_error() {
        let compose = compose(Path::new("/opt/d2"));
        let opts = ComposeOptions {
            scripts_dir: Some(PathBuf::from("/nonexistent/scripts")),
            ..ComposeOptions::default()
        };
        let err = compose.environment(&image(), &opts).unwrap_err();
        assert!(matches!(err, D2Error::Config(_)));
        assert!(err.to_string().contains("/nonexistent/scripts"));
    }

    #[test]
    fn test_file_given_as_directory_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let compose = compose(Path::new("/opt/d2"));
        let opts = ComposeOptions {
            tomcat_server: Some(dir.path().to_path_buf()),
            ..ComposeOptions::default()
        };
        assert!(matches!(
            compose.environment(&image(), &opts),
            Err(D2Error::Config(_))
        ));
    }

    #[test]
    fn test_command_line() {
        let compose = compose(Path::new("/opt/d2"));
        let spec = compose
            .command(&["up", "-d"], &image(), &ComposeOptions::default())
            .unwrap();
        assert_eq!(
            spec.display(),
            "docker-compose -f /opt/d2/docker-compose.yml -p d2-docker-eyeseetea-2-30-ento up -d"
        );
        assert_eq!(spec.env["DHIS2_DATA_IMAGE"], "eyeseetea/dhis2-data:2.30-ento");
    }

    #[test]
    fn test_plugin_compose_command() {
        let mut config = D2Config::default();
        config.assets.dir = Some(PathBuf::from("/opt/d2"));
        config.runtime.compose = vec!["docker".to_string(), "compose".to_string()];
        let compose = Compose::new(Arc::new(FakeStack::new()), &config);

        let spec = compose.command(&["stop"], &image(), &ComposeOptions::default()).unwrap();
        assert_eq!(spec.program, "docker");
        assert_eq!(spec.args[0], "compose");
        assert_eq!(spec.args.last().unwrap(), "stop");
    }

    #[test]
    fn test_normalize_deploy_path() {
        assert_eq!(normalize_deploy_path("dhis2"), "/dhis2");
        assert_eq!(normalize_deploy_path("///dhis2"), "/dhis2");
        assert_eq!(normalize_deploy_path("/"), "/");
        assert_eq!(normalize_deploy_path(""), "");
    }
}
