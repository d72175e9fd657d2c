//! Image-level commands: commit, push, pull, copy, rm, create, shell.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Subcommand};
use d2_core::{D2Error, ImageReference};
use d2_runtime::{ComposeOptions, InstanceState};
use d2_upgrade::WarSource;
use tracing::info;

use super::Context;

#[derive(Args)]
pub struct ImageArg {
    /// Data image (default: the single running one)
    pub image: Option<String>,
}

#[derive(Args)]
pub struct PushArgs {
    /// Data image (default: the single running one)
    pub image: Option<String>,
    /// Push the companion core image too
    #[arg(long)]
    pub with_core: bool,
}

#[derive(Args)]
pub struct CopyArgs {
    /// Source data image or data folder
    pub source: String,
    /// Destination data images or folders
    #[arg(required = true)]
    pub destinations: Vec<String>,
}

#[derive(Args)]
pub struct RmArgs {
    #[arg(required = true, value_name = "IMAGE")]
    pub images: Vec<String>,
}

#[derive(Subcommand)]
pub enum CreateKind {
    /// Create a core image from a release version or a WAR file
    #[command(group(ArgGroup::new("war_source").required(true).args(["version", "war"])))]
    Core {
        image: String,
        /// Release version to download
        #[arg(short, long)]
        version: Option<String>,
        /// Local WAR file
        #[arg(long)]
        war: Option<PathBuf>,
        /// Extra files for the DHIS2 home directory
        #[arg(long, value_name = "FILE")]
        home: Vec<PathBuf>,
    },
    /// Create a data image from a database dump and apps
    Data {
        image: String,
        /// Gzipped SQL dump
        #[arg(long, value_name = "FILE")]
        sql: Option<PathBuf>,
        /// Directory containing DHIS2 apps
        #[arg(long, value_name = "DIRECTORY")]
        apps_dir: Option<PathBuf>,
    },
}

pub async fn commit(ctx: &Context, args: ImageArg) -> anyhow::Result<()> {
    let image = ctx.lifecycle.resolve_image(args.image.as_deref()).await?;
    let target = image.to_string();
    info!(image = %target, "Commit image");

    let builder = ctx.builder();
    ctx.lifecycle
        .preserving_state(&image, &ComposeOptions::default(), |_| {
            builder.commit(&image, &target)
        })
        .await?;
    Ok(())
}

pub async fn push(ctx: &Context, args: PushArgs) -> anyhow::Result<()> {
    let image = ctx.lifecycle.resolve_image(args.image.as_deref()).await?;
    let docker = ctx.lifecycle.docker();
    info!(image = %image, "Push data image");
    docker.push(&image.to_string()).await?;

    if args.with_core {
        let core = image.core_reference().to_string();
        info!(image = %core, "Push core image");
        docker.push(&core).await?;
    }
    Ok(())
}

pub async fn pull(ctx: &Context, args: ImageArg) -> anyhow::Result<()> {
    let image = ctx.lifecycle.resolve_image(args.image.as_deref()).await?;
    info!(image = %image, "Pull image");
    ctx.lifecycle.docker().pull(&image.to_string()).await?;
    Ok(())
}

pub async fn copy(ctx: &Context, args: CopyArgs) -> anyhow::Result<()> {
    ctx.builder().copy(&args.source, &args.destinations).await?;
    info!("Done");
    Ok(())
}

pub async fn rm(ctx: &Context, args: RmArgs) -> anyhow::Result<()> {
    for name in &args.images {
        let image = ImageReference::parse(name)?;
        ctx.lifecycle.remove(&image).await?;
    }
    Ok(())
}

pub async fn create(ctx: &Context, kind: CreateKind) -> anyhow::Result<()> {
    let builder = ctx.builder();
    match kind {
        CreateKind::Core {
            image,
            version,
            war,
            home,
        } => {
            let source = match (war, version) {
                (Some(war), _) => WarSource::File(war),
                (None, Some(version)) => WarSource::Release(version),
                (None, None) => anyhow::bail!("One option is required: --version | --war"),
            };
            builder.create_core(&image, &source, &home).await?;
        }
        CreateKind::Data {
            image,
            sql,
            apps_dir,
        } => {
            builder
                .create_data(&image, sql.as_deref(), apps_dir.as_deref())
                .await?;
        }
    }
    Ok(())
}

pub async fn shell(ctx: &Context, args: ImageArg) -> anyhow::Result<()> {
    let image = ctx.lifecycle.resolve_image(args.image.as_deref()).await?;
    info!(image = %image, "Open shell for image");

    let InstanceState::Running(running) = ctx.lifecycle.status(&image).await? else {
        return Err(D2Error::Lifecycle(
            "Container must be running to start a shell".to_string(),
        )
        .into());
    };
    let core = running
        .container("core")
        .ok_or_else(|| D2Error::Lifecycle(format!("No core container for {image}")))?;
    ctx.lifecycle.docker().exec_interactive(core, &["bash"]).await?;
    Ok(())
}
