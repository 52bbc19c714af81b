use std::{process::ExitCode, time::Duration};

use clap::Args;
use tokio::runtime;
use wsconnect::{Connection, Endpoint, ErrorKind, Options, TlsTransport, WebSocketError};

/// Exit code for network failures worth retrying.
const EXIT_NETWORK: u8 = 1;
/// Exit code for targets that can never succeed as given.
const EXIT_CONFIG: u8 = 2;
/// Exit code when interrupted, following the shell convention for SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

/// Command to open a WebSocket connection and report the outcome.
///
/// The connection is closed right after the opening handshake. Supports both plaintext
/// WebSocket (ws://) and secure WebSocket (wss://) targets.
#[derive(Args)]
#[command(alias = "c")]
pub struct Cmd {
    /// Maximum duration for each of the transport connect and the opening handshake.
    /// Accepts human-readable formats like "5s", "1m", "500ms".
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "5s")]
    timeout: Duration,

    /// Extra request header, as `Name: value`. May be repeated.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Subprotocol to offer. May be repeated; order is preference order.
    #[arg(short = 'p', long = "protocol")]
    protocols: Vec<String>,

    /// The WebSocket URI to connect to (ws:// or wss://)
    uri: String,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    Ok((name.trim().to_owned(), value.trim().to_owned()))
}

async fn probe(endpoint: &Endpoint<TlsTransport>, cmd: &Cmd) -> wsconnect::Result<Connection> {
    let con = endpoint.acquire(&cmd.uri)?;
    for (name, value) in &cmd.headers {
        con.set_header(name, value)?;
    }
    for protocol in &cmd.protocols {
        con.add_subprotocol(protocol)?;
    }

    tokio::select! {
        res = endpoint.start(&con) => res,
        _ = tokio::signal::ctrl_c() => {
            con.cancel();
            Err(WebSocketError::Cancelled)
        }
    }
}

fn exit_code(err: &WebSocketError) -> u8 {
    if err.kind() == ErrorKind::Cancelled {
        EXIT_INTERRUPTED
    } else if err.is_retryable() {
        EXIT_NETWORK
    } else {
        EXIT_CONFIG
    }
}

pub fn run(cmd: Cmd) -> anyhow::Result<ExitCode> {
    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let endpoint = Endpoint::secure_client().with_options(
        Options::default()
            .with_connect_timeout(cmd.timeout)
            .with_handshake_timeout(cmd.timeout)
            .with_user_agent(concat!("wsprobe/", env!("CARGO_PKG_VERSION"))),
    );

    let outcome = runtime.block_on(probe(&endpoint, &cmd));

    let code = match outcome {
        Ok(con) => {
            println!(
                "open {} {}",
                con.id(),
                con.subprotocol().as_deref().unwrap_or("-")
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("failed {}: {}", err.kind(), err);
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                println!("  caused by: {cause}");
                source = cause.source();
            }

            ExitCode::from(exit_code(&err))
        }
    };

    endpoint.shutdown();
    runtime.shutdown_background();

    Ok(code)
}
