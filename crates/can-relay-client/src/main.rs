//! CAN relay client: entry point.
//!
//! Connects to a relay server, sends any `--send` commands, then prints every
//! received event until Ctrl-C or until the server closes the connection.
//!
//! # Usage
//!
//! ```text
//! can-relay-client [OPTIONS]
//!
//! Options:
//!   --host    <HOST>     Relay server host [default: 127.0.0.1]
//!   --port    <PORT>     Relay server port [default: 5000]
//!   --details <DETAILS>  "ip=H;port=N" shorthand
//!   --send    <SPEC>     "id=0x123;data=1 2" or "channel=can1;bitrate=250000"
//!                        (repeatable)
//! ```
//!
//! Events go to stdout, one per line; logs go to stderr.

use std::future::Future;
use std::io::Write;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use can_relay_client::application::command_spec::parse_command_spec;
use can_relay_client::application::event_queue::DEFAULT_EVENT_QUEUE_CAPACITY;
use can_relay_client::application::render::format_event;
use can_relay_client::{ClientConfig, RelayClient};
use can_relay_core::{parse_details, Command};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Watches and drives a remote CAN bus through a relay server.
#[derive(Debug, Parser)]
#[command(name = "can-relay-client", version)]
struct Cli {
    /// Relay server host name or IP address.
    #[arg(long, env = "CAN_RELAY_HOST")]
    host: Option<String>,

    /// Relay server TCP port.
    #[arg(long, env = "CAN_RELAY_PORT")]
    port: Option<u16>,

    /// `ip=<host>;port=<n>` connection details.
    #[arg(long)]
    details: Option<String>,

    /// Command to send after connecting.  May be given more than once.
    #[arg(long = "send", value_name = "SPEC")]
    sends: Vec<String>,

    /// Events kept while the terminal falls behind.
    #[arg(long, default_value_t = DEFAULT_EVENT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info", env = "CAN_RELAY_LOG")]
    log_level: String,
}

impl Cli {
    /// Resolves the server endpoint: defaults, then `--details`, then the
    /// explicit `--host` / `--port` flags.
    fn endpoint(&self) -> anyhow::Result<(String, u16)> {
        let mut host = DEFAULT_HOST.to_string();
        let mut port = DEFAULT_PORT;

        if let Some(details) = &self.details {
            for (key, value) in parse_details(details).context("invalid --details")? {
                match key.as_str() {
                    "ip" | "host" => host = value,
                    "port" => {
                        port = value
                            .parse()
                            .with_context(|| format!("invalid port '{value}'"))?;
                    }
                    other => bail!("unknown --details key '{other}'"),
                }
            }
        }

        if let Some(h) = &self.host {
            host = h.clone();
        }
        if let Some(p) = self.port {
            port = p;
        }
        Ok((host, port))
    }

    /// Parses every `--send` spec, failing on the first bad one.
    fn commands(&self) -> anyhow::Result<Vec<Command>> {
        self.sends
            .iter()
            .map(|spec| {
                parse_command_spec(spec).with_context(|| format!("invalid --send '{spec}'"))
            })
            .collect()
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let (host, port) = cli.endpoint()?;
    let commands = cli.commands()?;

    let client = RelayClient::new(ClientConfig {
        event_queue_capacity: cli.queue_capacity,
        ..ClientConfig::default()
    });
    client
        .connect(&host, port)
        .await
        .with_context(|| format!("cannot reach relay server at {host}:{port}"))?;

    for cmd in &commands {
        client
            .send_command(cmd)
            .await
            .with_context(|| format!("failed to send {} command", cmd.tag()))?;
    }

    let mut stdout = std::io::stdout().lock();
    print_until_shutdown(&client, tokio::signal::ctrl_c(), &mut stdout).await?;

    client.disconnect().await;
    let dropped = client.dropped_events();
    if dropped > 0 {
        warn!("{dropped} events were dropped because output fell behind");
    }
    Ok(())
}

/// Writes one line per event to `out` until `shutdown` resolves or the
/// server closes the connection.
async fn print_until_shutdown(
    client: &RelayClient,
    shutdown: impl Future<Output = std::io::Result<()>>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!("failed to listen for Ctrl-C: {e}");
                }
                info!("shutdown signal received");
                return Ok(());
            }
            event = client.recv_event() => match event {
                Some(event) => writeln!(out, "{}", format_event(&event))?,
                None => {
                    info!("connection closed");
                    return Ok(());
                }
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
