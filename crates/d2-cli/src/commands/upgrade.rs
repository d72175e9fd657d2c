use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use d2_core::{D2Error, ImageReference};
use d2_health::{HttpReadiness, ReadinessPolicy};
use d2_runtime::PortRange;
use d2_upgrade::{UpgradeEvent, UpgradeRequest, Upgrader};
use tracing::info;

use super::{Context, interrupted};

#[derive(Args)]
pub struct UpgradeArgs {
    /// Source data image
    #[arg(long, value_name = "IMAGE")]
    pub from: String,
    /// Destination data image
    #[arg(long, value_name = "IMAGE")]
    pub to: String,
    /// Version to start from (default: the source image version)
    #[arg(long)]
    pub from_version: Option<String>,
    /// Version to end at (default: the destination image version)
    #[arg(long)]
    pub to_version: Option<String>,
    /// Directory with one sub-directory of migrations per version
    #[arg(long, value_name = "DIRECTORY")]
    pub migrations: Option<PathBuf>,
    /// Leave the last instance running
    #[arg(short = 'r', long)]
    pub keep_running: bool,
    /// Instance port for every step
    #[arg(short, long, value_name = "N")]
    pub port: Option<u16>,
    /// Suffix appended to the intermediate core image tags
    #[arg(long)]
    pub core_image_suffix: Option<String>,
}

impl UpgradeArgs {
    fn request(&self) -> anyhow::Result<UpgradeRequest> {
        let mut request = UpgradeRequest::new(
            ImageReference::parse(&self.from)?,
            ImageReference::parse(&self.to)?,
        );
        request.from_version = self.from_version.clone();
        request.to_version = self.to_version.clone();
        request.migrations_dir = self.migrations.clone();
        request.port = self.port;
        request.keep_running = self.keep_running;
        request.core_image_suffix = self.core_image_suffix.clone();
        Ok(request)
    }
}

fn report(event: &UpgradeEvent) {
    if let UpgradeEvent::InstanceReady { image, port } = event {
        info!(image = %image, port, "Instance ready, committing");
    }
}

pub async fn run(ctx: &Context, args: UpgradeArgs) -> anyhow::Result<()> {
    let request = args.request()?;
    let policy = ReadinessPolicy::from_config(&ctx.config.readiness)?;
    let upgrader = Upgrader::new(
        ctx.builder(),
        Arc::new(HttpReadiness::new(policy)),
        PortRange::from(&ctx.config.ports),
    )
    .with_observer(Arc::new(report));

    // Dropping the upgrade future stops any instance it left half-migrated.
    let steps = tokio::select! {
        result = upgrader.upgrade(&request) => result?,
        () = interrupted() => return Err(D2Error::Interrupted.into()),
    };
    if let Some(last) = steps.last() {
        info!(image = %last.dest, steps = steps.len(), "Upgraded");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_overrides() {
        let args = UpgradeArgs {
            from: "org/dhis2-data:2.34-x".to_string(),
            to: "org/dhis2-data:2.36-x".to_string(),
            from_version: Some("2.35".to_string()),
            to_version: None,
            migrations: Some(PathBuf::from("/tmp/migrations")),
            keep_running: true,
            port: Some(8090),
            core_image_suffix: Some("upgrade".to_string()),
        };
        let request = args.request().unwrap();
        assert_eq!(request.source.to_string(), "org/dhis2-data:2.34-x");
        assert_eq!(request.dest.to_string(), "org/dhis2-data:2.36-x");
        assert_eq!(request.from_version.as_deref(), Some("2.35"));
        assert_eq!(request.port, Some(8090));
        assert!(request.keep_running);
    }

    #[test]
    fn invalid_image_is_rejected() {
        let args = UpgradeArgs {
            from: "not-an-image".to_string(),
            to: "org/dhis2-data:2.36".to_string(),
            from_version: None,
            to_version: None,
            migrations: None,
            keep_running: false,
            port: None,
            core_image_suffix: None,
        };
        assert!(args.request().is_err());
    }
}
