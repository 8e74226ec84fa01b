mod config;
mod error;
mod logging;

mod cmd;

use clap::Parser;
use config::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve(args) => cmd::serve::run(args).await,
        Commands::Check(args) => cmd::check::run(args),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
