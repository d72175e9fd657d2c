use clap::{Args, ValueEnum};

use super::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Text,
    Json,
}

#[derive(Args)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = ListFormat::Text)]
    pub format: ListFormat,
}

pub async fn run(ctx: &Context, args: ListArgs) -> anyhow::Result<()> {
    let listings = ctx.lifecycle.docker().list_data_images().await?;
    match args.format {
        ListFormat::Json => println!("{}", serde_json::to_string_pretty(&listings)?),
        ListFormat::Text => {
            for listing in &listings {
                println!("{}", listing.description());
            }
        }
    }
    Ok(())
}
