use super::Context;

pub async fn run(ctx: &Context) -> anyhow::Result<()> {
    ctx.lifecycle.docker().version().await?;
    ctx.lifecycle.compose().version().await?;
    println!("d2-docker version {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
