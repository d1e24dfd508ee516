//! CAN relay server: entry point.
//!
//! Opens the local CAN interface, listens for relay clients and forwards
//! traffic in both directions until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! can-relay-server [OPTIONS]
//!
//! Options:
//!   --config  <PATH>     TOML config file [default: platform config dir]
//!   --bind    <ADDR>     IP address to listen on
//!   --port    <PORT>     TCP port to listen on
//!   --details <DETAILS>  "port=5000;channel=can0;bitrate=500000" shorthand
//!   --channel <NAME>     CAN interface name
//!   --bitrate <BPS>      CAN bit rate
//!   --adapter <KIND>     socketcan | virtual
//!                        [default: socketcan on Linux, virtual elsewhere]
//! ```
//!
//! Precedence, lowest first: defaults, config file, `--details`, explicit
//! flags.  Logging follows `RUST_LOG` when set, otherwise `logging.log_level`.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use can_relay_core::parse_details;
use can_relay_server::infrastructure::bus::{create_adapter, lock_bus, shared, AdapterKind};
use can_relay_server::infrastructure::network::RelayServer;
use can_relay_server::infrastructure::storage::config::{load_config, ServerConfig};

/// How often the main task checks the bus state flag.
const BUS_WATCH_INTERVAL: Duration = Duration::from_secs(1);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Exposes a local CAN bus to remote relay clients over TCP.
#[derive(Debug, Parser)]
#[command(name = "can-relay-server", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "CAN_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the listener to.
    #[arg(long, env = "CAN_RELAY_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "CAN_RELAY_PORT")]
    port: Option<u16>,

    /// `key=value;key=value` settings: `port`, `bind`, `channel`, `bitrate`.
    #[arg(long)]
    details: Option<String>,

    /// CAN interface to open.
    #[arg(long, env = "CAN_RELAY_CHANNEL")]
    channel: Option<String>,

    /// CAN bit rate in bit/s.
    #[arg(long, env = "CAN_RELAY_BITRATE")]
    bitrate: Option<u32>,

    /// Bus adapter implementation.
    #[arg(long, value_enum, env = "CAN_RELAY_ADAPTER")]
    adapter: Option<AdapterKind>,
}

impl Cli {
    /// Applies `--details` and then the explicit flags on top of `config`.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed details string, an unknown details
    /// key, or a details value that does not parse.
    fn apply_to(&self, config: &mut ServerConfig) -> anyhow::Result<()> {
        if let Some(details) = &self.details {
            let pairs = parse_details(details).context("invalid --details")?;
            for (key, value) in pairs {
                match key.as_str() {
                    "port" => {
                        config.network.port = value
                            .parse()
                            .with_context(|| format!("invalid port '{value}'"))?;
                    }
                    "bind" | "ip" => config.network.bind_address = value,
                    "channel" => config.bus.channel = value,
                    "bitrate" => {
                        config.bus.bitrate = value
                            .parse()
                            .with_context(|| format!("invalid bitrate '{value}'"))?;
                    }
                    other => bail!("unknown --details key '{other}'"),
                }
            }
        }

        if let Some(bind) = &self.bind {
            config.network.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(channel) = &self.channel {
            config.bus.channel = channel.clone();
        }
        if let Some(bitrate) = self.bitrate {
            config.bus.bitrate = bitrate;
        }
        if let Some(adapter) = self.adapter {
            config.bus.adapter = adapter;
        }
        Ok(())
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("failed to load config")?;
    cli.apply_to(&mut config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level)),
        )
        .init();

    let relay_config = config.relay_config()?;

    // ── Open the bus (fail fast) ──────────────────────────────────────────────
    let mut adapter = create_adapter(config.bus.adapter)
        .with_context(|| format!("cannot create '{}' bus adapter", config.bus.adapter))?;
    adapter
        .connect(&config.bus.channel, config.bus.bitrate)
        .with_context(|| {
            format!(
                "cannot open CAN channel '{}' at {} bit/s",
                config.bus.channel, config.bus.bitrate
            )
        })?;
    info!(
        adapter = %config.bus.adapter,
        channel = %config.bus.channel,
        bitrate = config.bus.bitrate,
        "bus connected"
    );
    if config.bus.adapter == AdapterKind::Virtual {
        warn!("using the in-memory virtual bus; no CAN hardware is attached");
    }
    let bus = shared(adapter);

    // ── Start the relay ───────────────────────────────────────────────────────
    let mut server = RelayServer::new(bus.clone(), relay_config);
    let addr = server.start().await.context("failed to start relay server")?;
    info!("CAN relay listening on {addr}.  Press Ctrl-C to exit.");

    watch_until_shutdown(&server, tokio::signal::ctrl_c(), BUS_WATCH_INTERVAL).await;

    server.stop().await;
    if let Err(e) = lock_bus(&bus).disconnect() {
        warn!("bus disconnect failed: {e}");
    }

    let stats = server.stats();
    info!(
        frames_forwarded = stats.frames_forwarded,
        commands_applied = stats.commands_applied,
        commands_rejected = stats.commands_rejected,
        decode_errors = stats.decode_errors,
        sessions_dropped = stats.sessions_dropped,
        "CAN relay stopped"
    );
    Ok(())
}

/// Logs bus state changes until `shutdown` resolves.
///
/// `shutdown` is created once and polled across iterations, so a signal that
/// arrives between two ticks is never missed.
async fn watch_until_shutdown(
    server: &RelayServer,
    shutdown: impl Future<Output = std::io::Result<()>>,
    every: Duration,
) {
    tokio::pin!(shutdown);
    let mut watch = tokio::time::interval(every);
    let mut bus_was_up = true;
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                match signal {
                    Ok(()) => info!("shutdown signal received"),
                    Err(e) => error!("failed to listen for Ctrl-C: {e}"),
                }
                break;
            }
            _ = watch.tick() => {
                let up = server.bus_connected();
                if up != bus_was_up {
                    if up {
                        info!("bus is connected again");
                    } else {
                        warn!("bus is disconnected; relay keeps serving clients");
                    }
                    bus_was_up = up;
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use can_relay_server::infrastructure::bus::VirtualBus;
    use can_relay_server::infrastructure::network::RelayConfig;

    fn apply(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let cli = Cli::parse_from(args);
        let mut config = ServerConfig::default();
        cli.apply_to(&mut config)?;
        Ok(config)
    }

    #[test]
    fn test_cli_without_flags_keeps_defaults() {
        let config = apply(&["can-relay-server"]).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_cli_details_sets_port() {
        // Arrange / Act
        let config = apply(&["can-relay-server", "--details", "port=15000"]).unwrap();

        // Assert
        assert_eq!(config.network.port, 15000);
    }

    #[test]
    fn test_cli_details_sets_channel_and_bitrate() {
        let config = apply(&[
            "can-relay-server",
            "--details",
            "channel=vcan0; bitrate=250000",
        ])
        .unwrap();

        assert_eq!(config.bus.channel, "vcan0");
        assert_eq!(config.bus.bitrate, 250_000);
    }

    #[test]
    fn test_cli_explicit_port_overrides_details() {
        let config = apply(&[
            "can-relay-server",
            "--details",
            "port=15000",
            "--port",
            "16000",
        ])
        .unwrap();

        assert_eq!(config.network.port, 16000);
    }

    #[test]
    fn test_cli_adapter_flag() {
        let config = apply(&["can-relay-server", "--adapter", "socketcan"]).unwrap();
        assert_eq!(config.bus.adapter, AdapterKind::Socketcan);
    }

    #[test]
    fn test_cli_details_rejects_unknown_key() {
        let result = apply(&["can-relay-server", "--details", "colour=blue"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_details_rejects_bad_port() {
        let result = apply(&["can-relay-server", "--details", "port=99999"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_details_rejects_segment_without_equals() {
        let result = apply(&["can-relay-server", "--details", "port"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_watch_returns_when_shutdown_fires_between_ticks() {
        // Arrange
        let server = RelayServer::new(
            shared(Box::new(VirtualBus::new())),
            RelayConfig::new("127.0.0.1:0".parse().unwrap()),
        );
        let shutdown = async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok::<(), std::io::Error>(())
        };

        // Act
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            watch_until_shutdown(&server, shutdown, Duration::from_millis(5)),
        )
        .await;

        // Assert
        assert!(result.is_ok(), "shutdown was lost across watch ticks");
    }
}
