use crate::demo::{run_check_deadlines, run_demo, CheckDeadlinesArgs, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use procurement::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Vendor Comparison Service",
    about = "Compare negotiated vendor offers, report the top bids and award the winner",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and deadline scheduler (default command)
    Serve(ServeArgs),
    /// Run one deadline scan against the configured store and exit
    CheckDeadlines(CheckDeadlinesArgs),
    /// Walk a sample requisition from negotiation to purchase order in memory
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// SQLite database file; omit to keep state in memory
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
    /// Seed a sample requisition with two completed vendors
    #[arg(long)]
    pub(crate) seed_demo: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::CheckDeadlines(args) => run_check_deadlines(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}
