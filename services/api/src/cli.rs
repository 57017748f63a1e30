use crate::demo::{run_demo, run_inventory_check, DemoArgs, InventoryCheckArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use turnos::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Turnos",
    about = "Run and demonstrate the pharmacy turno service from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and the expiry sweeper (default command)
    Serve(ServeArgs),
    /// Inspect catalog stock exports
    Inventory {
        #[command(subcommand)]
        command: InventoryCommand,
    },
    /// Walk a week of turnos through intake, review and expiry in memory
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum InventoryCommand {
    /// Validate an inventory CSV and print the stock it would load
    Check(InventoryCheckArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Seed catalog stock from a `kind,id,name,stock` CSV export
    #[arg(long)]
    pub(crate) inventory_csv: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Inventory {
            command: InventoryCommand::Check(args),
        } => run_inventory_check(args),
        Command::Demo(args) => run_demo(args),
    }
}
