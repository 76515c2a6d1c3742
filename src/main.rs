//! Parley - queue-correlated echo/search workers and client.

use clap::Parser;
use std::process::ExitCode;

mod cli;
mod config;
mod correlate;
mod error;
mod logging;
mod protocol;
mod store;
mod transport;
mod worker;

use cli::Commands;

#[tokio::main]
async fn main() -> ExitCode {
    let guard = match logging::init() {
        Ok((guard, _)) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let _guard = guard;

    let args = Commands::parse();

    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
