//! Container runtime CLI adapter.
//!
//! Thin typed wrappers around `docker` sub-commands. Parsing of `docker ps`
//! output lives in [`crate::status`] and [`crate::listing`].

use std::collections::BTreeSet;
use std::path::Path;

use d2_core::config::RuntimeConfig;
use d2_core::{D2Error, D2Result};
use tracing::{debug, info};

use crate::runner::{CommandOutput, CommandSpec, OutputMode, SharedRunner};
use crate::status::LabeledContainer;

/// Handle on the container runtime binary.
#[derive(Clone)]
pub struct Docker {
    runner: SharedRunner,
    program: String,
    label: String,
    deploy_path_label: String,
}

impl Docker {
    pub fn new(runner: SharedRunner, config: &RuntimeConfig) -> Self {
        Self {
            runner,
            program: config.docker.clone(),
            label: config.label.clone(),
            deploy_path_label: config.deploy_path_label.clone(),
        }
    }

    pub fn runner(&self) -> &SharedRunner {
        &self.runner
    }

    /// Label holding the data image name on stack containers.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn deploy_path_label(&self) -> &str {
        &self.deploy_path_label
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.program)
    }

    async fn run(&self, spec: CommandSpec) -> D2Result<CommandOutput> {
        self.runner.run(&spec).await
    }

    /// `docker ps` restricted to containers carrying the image label.
    pub(crate) async fn ps_labeled(&self, format: &str) -> D2Result<CommandOutput> {
        let spec = self.command().args([
            "ps".to_string(),
            "--filter".to_string(),
            format!("label={}", self.label),
            format!("--format={format}"),
        ]);
        self.run(spec).await
    }

    /// Running containers with the image label, their names and published ports.
    pub async fn list_labeled_containers(&self) -> D2Result<Vec<LabeledContainer>> {
        let format = format!("{{{{.Label \"{}\"}}}} {{{{.Names}}}} {{{{.Ports}}}}", self.label);
        let output = self.ps_labeled(&format).await?;
        Ok(output.lines().filter_map(LabeledContainer::parse_line).collect())
    }

    /// Distinct data image names that have at least one running container.
    pub async fn running_image_names(&self) -> D2Result<BTreeSet<String>> {
        let format = format!("{{{{.Label \"{}\"}}}}", self.label);
        let output = self.ps_labeled(&format).await?;
        Ok(output.lines().map(str::to_string).collect())
    }

    /// The single running data image. Zero or several running images is an error.
    pub async fn running_image_name(&self) -> D2Result<String> {
        let names = self.running_image_names().await?;
        let mut iter = names.iter();
        match (iter.next(), iter.next()) {
            (None, _) => Err(D2Error::Lifecycle(
                "There are no d2-docker images running".to_string(),
            )),
            (Some(name), None) => {
                info!(image = %name, "Image is running");
                Ok(name.clone())
            }
            _ => {
                let listing = names
                    .iter()
                    .map(|n| format!("  {n}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                Err(D2Error::Lifecycle(format!(
                    "Multiple d2-docker images running, specify one:\n{listing}"
                )))
            }
        }
    }

    /// Create (without starting) a container and return its id.
    pub async fn create_container(&self, image: &str) -> D2Result<String> {
        let output = self.run(self.command().args(["create", image])).await?;
        output
            .lines()
            .next()
            .map(str::to_string)
            .ok_or_else(|| D2Error::Lifecycle(format!("docker create {image} returned no id")))
    }

    /// `docker cp CONTAINER:PATH DEST`
    pub async fn copy_from_container(
        &self,
        container: &str,
        path: &str,
        dest: &Path,
    ) -> D2Result<()> {
        let source = format!("{container}:{path}");
        debug!(%source, dest = %dest.display(), "copy from container");
        self.run(
            self.command()
                .args(["cp", source.as_str()])
                .arg(dest.to_string_lossy()),
        )
        .await?;
        Ok(())
    }

    /// Remove a container together with its anonymous volumes.
    pub async fn remove_container(&self, container: &str) -> D2Result<()> {
        self.run(self.command().args(["rm", "-v", container])).await?;
        Ok(())
    }

    pub async fn remove_containers(&self, ids: &[String]) -> D2Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.run(self.command().args(["container", "rm"]).args(ids.iter().cloned()))
            .await?;
        Ok(())
    }

    pub async fn remove_image(&self, image: &str) -> D2Result<()> {
        self.run(self.command().args(["image", "rm", image])).await?;
        Ok(())
    }

    /// `docker build DIR --tag TAG`
    pub async fn build(&self, dir: &Path, tag: &str) -> D2Result<()> {
        info!(image = %tag, dir = %dir.display(), "Build image");
        self.run(
            self.command()
                .arg("build")
                .arg(dir.to_string_lossy())
                .args(["--tag", tag])
                .output(OutputMode::Inherit),
        )
        .await?;
        Ok(())
    }

    pub async fn push(&self, image: &str) -> D2Result<()> {
        self.run(self.command().args(["push", image]).output(OutputMode::Inherit))
            .await?;
        Ok(())
    }

    pub async fn pull(&self, image: &str) -> D2Result<()> {
        self.run(self.command().args(["pull", image]).output(OutputMode::Inherit))
            .await?;
        Ok(())
    }

    /// `docker load -i FILE`; returns the loaded image names.
    pub async fn load(&self, file: &Path) -> D2Result<Vec<String>> {
        let output = self
            .run(self.command().args(["load", "-i"]).arg(file.to_string_lossy()))
            .await?;
        Ok(output
            .lines()
            .filter_map(|line| line.split_whitespace().last())
            .map(str::to_string)
            .collect())
    }

    /// `(repository, tag)` of every local image.
    pub async fn list_images(&self) -> D2Result<Vec<(String, String)>> {
        let output = self
            .run(self.command().args(["image", "ls", "--format={{.Repository}} {{.Tag}}"]))
            .await?;
        Ok(output
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(repo), Some(tag), None) => Some((repo.to_string(), tag.to_string())),
                    _ => None,
                }
            })
            .collect())
    }

    /// Interactive command inside a running container, attached to the terminal.
    pub async fn exec_interactive(&self, container: &str, command: &[&str]) -> D2Result<()> {
        self.run(
            self.command()
                .args(["exec", "--interactive", "--tty", container])
                .args(command.iter().copied())
                .output(OutputMode::Inherit),
        )
        .await?;
        Ok(())
    }

    pub async fn version(&self) -> D2Result<()> {
        self.run(self.command().arg("-v").output(OutputMode::Inherit))
            .await?;
        Ok(())
    }
}
