//! Instance lifecycle: start, stop and scoped "ensure running" helpers.
//!
//! ```text
//! Stopped --start--> Running
//! Running --stop---> Stopped
//! start on Running  => AlreadyRunning
//! stop on Stopped   => no-op
//! ```

use std::future::Future;

use d2_core::{D2Config, D2Error, D2Result, ImageReference};
use tracing::{debug, info, warn};

use crate::compose::{Compose, ComposeOptions};
use crate::docker::Docker;
use crate::port::{PortRange, get_free_port};
use crate::runner::{CommandSpec, OutputMode, SharedRunner};
use crate::status::{InstanceState, RunningInstance};

/// Options of [`Lifecycle::start`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Explicit port; a free one is allocated otherwise.
    pub port: Option<u16>,
    /// Return once the stack is up instead of attaching to it.
    pub detach: bool,
    /// Reuse existing containers and volumes instead of recreating them.
    pub keep_containers: bool,
    pub pull: bool,
    pub compose: ComposeOptions,
}

/// Issues a compose `stop` when dropped while armed.
///
/// The async paths call [`StopGuard::release`] or [`StopGuard::disarm`]; the
/// drop path only runs when the owning future is cancelled, and stops the
/// stack with a blocking call.
#[must_use]
pub struct StopGuard {
    runner: SharedRunner,
    spec: Option<CommandSpec>,
}

impl StopGuard {
    pub fn new(runner: SharedRunner, spec: CommandSpec) -> Self {
        Self {
            runner,
            spec: Some(spec),
        }
    }

    /// Stop now and disarm.
    pub async fn release(mut self) -> D2Result<()> {
        let result = match &self.spec {
            Some(spec) => self.runner.run(spec).await.map(drop),
            None => Ok(()),
        };
        self.spec = None;
        result
    }

    /// Leave the stack as it is.
    pub fn disarm(mut self) {
        self.spec = None;
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(spec) = self.spec.take() {
            warn!("Interrupted, stopping containers");
            match self.runner.execute_blocking(&spec) {
                Ok(output) if output.success() => {}
                Ok(output) => warn!(code = output.code, "stop on interrupt failed"),
                Err(e) => warn!(error = %e, "stop on interrupt failed"),
            }
        }
    }
}

/// Drives the stack of a data image through its states.
#[derive(Clone)]
pub struct Lifecycle {
    docker: Docker,
    compose: Compose,
    ports: PortRange,
}

impl Lifecycle {
    pub fn new(docker: Docker, compose: Compose, ports: PortRange) -> Self {
        Self {
            docker,
            compose,
            ports,
        }
    }

    pub fn from_config(runner: SharedRunner, config: &D2Config) -> Self {
        Self::new(
            Docker::new(runner.clone(), &config.runtime),
            Compose::new(runner, config),
            PortRange::from(&config.ports),
        )
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub fn compose(&self) -> &Compose {
        &self.compose
    }

    pub async fn status(&self, image: &ImageReference) -> D2Result<InstanceState> {
        self.docker.get_status(image).await
    }

    /// Resolve an optional image argument, defaulting to the single running image.
    pub async fn resolve_image(&self, image: Option<&str>) -> D2Result<ImageReference> {
        match image {
            Some(image) => ImageReference::parse(image),
            None => ImageReference::parse(&self.docker.running_image_name().await?),
        }
    }

    /// Start the stack and return its port.
    ///
    /// In foreground mode the call returns when the compose process exits;
    /// if `interrupt` resolves first the stack is stopped and
    /// [`D2Error::Interrupted`] is returned.
    pub async fn start<I>(
        &self,
        image: &ImageReference,
        opts: StartOptions,
        interrupt: I,
    ) -> D2Result<u16>
    where
        I: Future<Output = ()>,
    {
        info!(image = %image, "Start image");
        if let InstanceState::Running(running) = self.status(image).await? {
            return Err(D2Error::AlreadyRunning {
                image: image.to_string(),
                port: running.port,
            });
        }

        let port = match opts.port {
            Some(port) => port,
            None => get_free_port(self.ports).await?,
        };
        info!(port, "Port");

        let recreate = !opts.keep_containers;
        let compose_opts = ComposeOptions {
            port: Some(port),
            load_from_data: recreate,
            ..opts.compose
        };
        let base = ComposeOptions::with_core_image(compose_opts.core_image.clone());

        // Validate mounts before touching anything.
        let mut up_args = vec!["up"];
        if recreate {
            up_args.push("--force-recreate");
        }
        if opts.detach {
            up_args.push("-d");
        }
        let up = self
            .compose
            .command(&up_args, image, &compose_opts)?
            .output(OutputMode::Inherit);

        if opts.pull {
            self.compose.run(&["pull"], image, &base).await?;
        }
        if recreate {
            self.compose.run(&["down", "--volumes"], image, &base).await?;
        }

        if opts.detach {
            self.compose.runner().run(&up).await?;
            info!("Detaching... run d2-docker logs to see logs");
            return Ok(port);
        }

        tokio::select! {
            result = self.compose.runner().run(&up) => {
                result?;
                Ok(port)
            }
            () = interrupt => {
                info!("Control+C pressed, stopping containers");
                self.compose.run(&["stop"], image, &base).await?;
                Err(D2Error::Interrupted)
            }
        }
    }

    /// Stop the stack. Stopping a stopped stack succeeds.
    pub async fn stop(&self, image: &ImageReference, core_image: Option<String>) -> D2Result<()> {
        info!(image = %image, "Stop container for image");
        self.compose
            .run(&["stop"], image, &ComposeOptions::with_core_image(core_image))
            .await?;
        Ok(())
    }

    /// Stop the stack, remove its containers and delete the image.
    pub async fn remove(&self, image: &ImageReference) -> D2Result<()> {
        info!(image = %image, "Delete image/containers");
        let base = ComposeOptions::default();
        self.compose.run(&["stop"], image, &base).await?;
        let ids: Vec<String> = self
            .compose
            .capture(&["ps", "-q"], image, &base)
            .await?
            .lines()
            .map(str::to_string)
            .collect();
        debug!(?ids, "container ids");
        self.docker.remove_containers(&ids).await?;
        self.docker.remove_image(&image.to_string()).await?;
        info!(image = %image, "Removed");
        Ok(())
    }

    /// Armed guard that stops the stack of `image` if dropped.
    pub fn stop_guard(&self, image: &ImageReference, opts: &ComposeOptions) -> D2Result<StopGuard> {
        let base = ComposeOptions::with_core_image(opts.core_image.clone());
        let spec = self.compose.command(&["stop"], image, &base)?;
        Ok(StopGuard::new(self.compose.runner().clone(), spec))
    }

    /// Bring the stack up (detached), run `body` against it and stop it on
    /// every exit path.
    pub async fn with_running<F, Fut, T>(
        &self,
        image: &ImageReference,
        opts: &ComposeOptions,
        body: F,
    ) -> D2Result<T>
    where
        F: FnOnce(RunningInstance) -> Fut,
        Fut: Future<Output = D2Result<T>>,
    {
        let guard = self.stop_guard(image, opts)?;

        let result = async {
            self.compose.run(&["up", "-d"], image, opts).await?;
            match self.status(image).await? {
                InstanceState::Running(running) => body(running).await,
                InstanceState::Stopped => Err(D2Error::Lifecycle(format!(
                    "Could not run image: {image}"
                ))),
            }
        }
        .await;

        let stopped = guard.release().await;
        match (result, stopped) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(stop_err)) => {
                warn!(error = %stop_err, "could not stop containers");
                Err(e)
            }
        }
    }

    /// Run `body` against a live instance and restore the prior state:
    /// a running stack is left running, a stopped one is started for the
    /// duration and stopped again.
    pub async fn preserving_state<F, Fut, T>(
        &self,
        image: &ImageReference,
        opts: &ComposeOptions,
        body: F,
    ) -> D2Result<T>
    where
        F: FnOnce(RunningInstance) -> Fut,
        Fut: Future<Output = D2Result<T>>,
    {
        match self.status(image).await? {
            InstanceState::Running(running) => body(running).await,
            InstanceState::Stopped => self.with_running(image, opts, body).await,
        }
    }
}
