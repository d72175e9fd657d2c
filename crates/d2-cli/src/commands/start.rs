use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Args;
use d2_core::{DATA_REPOSITORY, ImageReference};
use d2_runtime::{ComposeOptions, StartOptions, normalize_deploy_path};
use tracing::info;

use super::{Context, interrupted};

#[derive(Args)]
pub struct StartArgs {
    /// Data image or exported images file
    #[arg(value_name = "IMAGE_OR_EXPORT_FILE")]
    pub image: String,
    /// Core image to use instead of the one derived from the data image
    #[arg(short, long)]
    pub core_image: Option<String>,
    /// Instance authentication
    #[arg(long, value_name = "USER:PASSWORD")]
    pub auth: Option<String>,
    /// Run containers in the background
    #[arg(short, long)]
    pub detach: bool,
    /// Keep existing containers and volumes
    #[arg(short, long)]
    pub keep_containers: bool,
    /// Custom Tomcat server.xml
    #[arg(long, value_name = "FILE")]
    pub tomcat_server_xml: Option<PathBuf>,
    /// Custom dhis.conf
    #[arg(long, value_name = "FILE")]
    pub dhis_conf: Option<PathBuf>,
    /// Run .sql[.gz] files in directory
    #[arg(long, value_name = "DIRECTORY")]
    pub run_sql: Option<PathBuf>,
    /// Publish the Postgres port
    #[arg(long, value_name = "PORT")]
    pub db_port: Option<u16>,
    /// Run shell scripts in directory (pre-Tomcat; `post*` files run post-Tomcat)
    #[arg(long, value_name = "DIRECTORY")]
    pub run_scripts: Option<PathBuf>,
    /// Pull images before starting
    #[arg(long)]
    pub pull: bool,
    /// Instance port
    #[arg(short, long, value_name = "N")]
    pub port: Option<u16>,
    /// Bind the instance port to this IP
    #[arg(long, value_name = "IP")]
    pub bind_ip: Option<String>,
    /// Tomcat context path
    #[arg(long)]
    pub deploy_path: Option<String>,
    /// Tomcat JAVA_OPTS
    #[arg(long)]
    pub java_opts: Option<String>,
    /// PostGIS database version
    #[arg(long)]
    pub postgis_version: Option<String>,
}

impl StartArgs {
    pub fn options(&self) -> StartOptions {
        StartOptions {
            port: self.port,
            detach: self.detach,
            keep_containers: self.keep_containers,
            pull: self.pull,
            compose: ComposeOptions {
                core_image: self.core_image.clone(),
                bind_ip: self.bind_ip.clone(),
                db_port: self.db_port,
                post_sql_dir: self.run_sql.clone(),
                scripts_dir: self.run_scripts.clone(),
                deploy_path: self.deploy_path.as_deref().map(normalize_deploy_path),
                auth: self.auth.clone(),
                tomcat_server: self.tomcat_server_xml.clone(),
                dhis_conf: self.dhis_conf.clone(),
                java_opts: self.java_opts.clone(),
                postgis_version: self.postgis_version.clone(),
                ..ComposeOptions::default()
            },
        }
    }
}

/// First `*/dhis2-data:*` image among loaded image names.
fn first_data_image(loaded: &[String]) -> Option<&str> {
    let marker = format!("/{DATA_REPOSITORY}:");
    loaded
        .iter()
        .map(String::as_str)
        .find(|name| name.contains(&marker))
}

async fn import_from_file(ctx: &Context, file: &Path) -> anyhow::Result<String> {
    info!(file = %file.display(), "Load images file");
    let loaded = ctx.lifecycle.docker().load(file).await?;
    first_data_image(&loaded)
        .map(str::to_string)
        .with_context(|| format!("Cannot find {DATA_REPOSITORY} image in {}", file.display()))
}

pub async fn run(ctx: &Context, args: StartArgs) -> anyhow::Result<()> {
    let path = Path::new(&args.image);
    let name = if path.is_file() {
        import_from_file(ctx, path).await?
    } else {
        args.image.clone()
    };
    let image = ImageReference::parse(&name)?;

    let port = ctx
        .lifecycle
        .start(&image, args.options(), interrupted())
        .await?;
    if args.detach {
        info!(image = %image, port, "Started");
    }
    Ok(())
}
