use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod connect;

/// Probe WebSocket endpoints: validate a target, open it, and report why it failed.
///
/// Examples:
///   wsprobe connect wss://echo.websocket.org
///   wsprobe connect -H 'Authorization: Bearer token' -p chat ws://localhost:8080/ws
///
#[derive(Parser)]
#[command(author, version)]
struct Cli {
    /// Print connection lifecycle diagnostics.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Connect(connect::Cmd),
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let level = if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Warn
    };
    let _ = simple_logger::init_with_level(level);

    let res = match args.command {
        Commands::Connect(cmd) => connect::run(cmd),
    };
    match res {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::FAILURE
        }
    }
}
