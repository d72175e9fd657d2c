use clap::Args;
use d2_runtime::ComposeOptions;
use tracing::info;

use super::Context;

#[derive(Args)]
pub struct LogsArgs {
    /// Data image (default: the single running one)
    pub image: Option<String>,
    /// Follow log output
    #[arg(short, long)]
    pub follow: bool,
    /// Only this service (gateway, core, db)
    #[arg(short, long)]
    pub service: Option<String>,
}

impl LogsArgs {
    fn compose_args(&self) -> Vec<&str> {
        let mut args = vec!["logs", "-t"];
        if self.follow {
            args.push("-f");
        }
        if let Some(service) = &self.service {
            args.push(service);
        }
        args
    }
}

pub async fn run(ctx: &Context, args: LogsArgs) -> anyhow::Result<()> {
    let image = ctx.lifecycle.resolve_image(args.image.as_deref()).await?;
    info!(image = %image, "Show logs");
    ctx.lifecycle
        .compose()
        .run(&args.compose_args(), &image, &ComposeOptions::default())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_arguments() {
        let args = LogsArgs {
            image: None,
            follow: true,
            service: Some("core".to_string()),
        };
        assert_eq!(args.compose_args(), vec!["logs", "-t", "-f", "core"]);
    }
}
