//! d2-docker: run, snapshot and upgrade DHIS2 data images.
//!
//! # Usage
//!
//! ```text
//! d2-docker start eyeseetea/dhis2-data:2.36-sierra -d -p 8080
//! d2-docker list
//! d2-docker upgrade --from org/dhis2-data:2.34-x --to org/dhis2-data:2.36-x --migrations ./migrations
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

use commands::Context;

const EXIT_USAGE: u8 = 1;
const EXIT_DOMAIN: u8 = 2;

#[derive(Parser)]
#[command(
    name = "d2-docker",
    about = "Docker stacks for DHIS2 data images",
    version
)]
struct Cli {
    /// Configuration file (default: $D2_DOCKER_CONFIG)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory containing the images/dhis2-core and images/dhis2-data build contexts
    #[arg(long, global = true, value_name = "DIRECTORY")]
    dhis2_docker_images_directory: Option<PathBuf>,

    /// Log level, unless RUST_LOG is set
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Show runtime, compose and d2-docker versions
    Version,
    /// List d2-docker data images
    List(commands::list::ListArgs),
    /// Start a container stack from a data image or an exported images file
    Start(commands::start::StartArgs),
    /// Stop the containers of a data image
    Stop(commands::stop::StopArgs),
    /// Show compose logs
    Logs(commands::logs::LogsArgs),
    /// Snapshot a running instance into its data image
    Commit(commands::images::ImageArg),
    /// Push a data image (and optionally its core image)
    Push(commands::images::PushArgs),
    /// Pull a data image
    Pull(commands::images::ImageArg),
    /// Copy databases between data images and folders
    Copy(commands::images::CopyArgs),
    /// Remove data images and their containers
    Rm(commands::images::RmArgs),
    /// Create core or data images
    Create {
        #[command(subcommand)]
        kind: commands::images::CreateKind,
    },
    /// Upgrade a data image through consecutive platform versions
    Upgrade(commands::upgrade::UpgradeArgs),
    /// Open a shell in the core container
    Shell(commands::images::ImageArg),
}

fn init_tracing(level: LogLevel) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::load(cli.config.as_deref(), cli.dhis2_docker_images_directory)?;

    match cli.command {
        Command::Version => commands::version::run(&ctx).await,
        Command::List(args) => commands::list::run(&ctx, args).await,
        Command::Start(args) => commands::start::run(&ctx, args).await,
        Command::Stop(args) => commands::stop::run(&ctx, args).await,
        Command::Logs(args) => commands::logs::run(&ctx, args).await,
        Command::Commit(args) => commands::images::commit(&ctx, args).await,
        Command::Push(args) => commands::images::push(&ctx, args).await,
        Command::Pull(args) => commands::images::pull(&ctx, args).await,
        Command::Copy(args) => commands::images::copy(&ctx, args).await,
        Command::Rm(args) => commands::images::rm(&ctx, args).await,
        Command::Create { kind } => commands::images::create(&ctx, kind).await,
        Command::Upgrade(args) => commands::upgrade::run(&ctx, args).await,
        Command::Shell(args) => commands::images::shell(&ctx, args).await,
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.log_level);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("d2-docker: cannot start runtime: {e}");
            return ExitCode::from(EXIT_DOMAIN);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("d2-docker: {e:#}");
            ExitCode::from(EXIT_DOMAIN)
        }
    }
}
