use crate::demo::{run_demo, run_import, DemoArgs, ImportArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use craftlink::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "CraftLink",
    about = "Run and demonstrate the CraftLink marketplace service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk through posting a job, competing applications, hiring, and chat
    Demo(DemoArgs),
    /// Validate a job seed CSV and post its rows into a scratch marketplace
    ImportJobs(ImportArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Job seed CSV to post before accepting requests
    #[arg(long)]
    pub(crate) seed_csv: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::ImportJobs(args) => run_import(args).await,
    }
}
