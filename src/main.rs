mod app;
mod cli;

use clap::Parser;
use cli::{Cli, Command, RunArgs};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Command::Run(RunArgs::default()));

    match command {
        Command::Run(args) => cmd_run(args),
    }
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    // Peek at config for logging destination before the subscriber exists.
    let peeked = stratum_core::config::Config::load(&args.config).ok();
    let to_file = peeked.as_ref().map(|c| c.logging_to_file).unwrap_or(false);
    let log_dir = peeked.as_ref().and_then(|c| c.log_dir.clone());

    let _guard = stratum_core::lifecycle::logging::init_logging(
        &args.log_level,
        to_file,
        log_dir.as_deref(),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let application = app::Application::build(&args).await?;
        application.serve().await
    })
}
