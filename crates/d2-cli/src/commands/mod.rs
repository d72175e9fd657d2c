pub mod images;
pub mod list;
pub mod logs;
pub mod start;
pub mod stop;
pub mod upgrade;
pub mod version;

use std::path::{Path, PathBuf};

use d2_core::D2Config;
use d2_runtime::{Lifecycle, SharedRunner, SystemRunner};
use d2_upgrade::ImageBuilder;

/// Everything a command needs, built once from the global flags.
pub struct Context {
    pub config: D2Config,
    pub runner: SharedRunner,
    pub lifecycle: Lifecycle,
}

impl Context {
    pub fn load(config: Option<&Path>, images_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = D2Config::load(config)?;
        if images_dir.is_some() {
            config.assets.images_dir = images_dir;
        }
        let runner = SystemRunner::shared();
        let lifecycle = Lifecycle::from_config(runner.clone(), &config);
        Ok(Self {
            config,
            runner,
            lifecycle,
        })
    }

    pub fn builder(&self) -> ImageBuilder {
        ImageBuilder::with_release_server(self.runner.clone(), &self.config)
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
