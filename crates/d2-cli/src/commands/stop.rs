use clap::Args;

use super::Context;

#[derive(Args)]
pub struct StopArgs {
    /// Data image (default: the single running one)
    pub image: Option<String>,
    /// Core image the stack was started with
    #[arg(short, long)]
    pub core_image: Option<String>,
}

pub async fn run(ctx: &Context, args: StopArgs) -> anyhow::Result<()> {
    let image = ctx.lifecycle.resolve_image(args.image.as_deref()).await?;
    ctx.lifecycle.stop(&image, args.core_image).await?;
    Ok(())
}
