//! RelayServer: accept loop, forwarding loop and broadcast fan-out.
//!
//! # Tasks
//!
//! ```text
//! start()
//!  ├─ accept loop      TcpListener::accept -> Session -> registry.insert -> spawn session task
//!  ├─ forwarding loop  bus.poll -> Event::Frame -> broadcast to registry snapshot
//!  └─ session tasks    one per client (see `session`)
//! ```
//!
//! All loops watch a single `watch::channel(bool)` shutdown signal.  `stop()`
//! raises it, waits for the accept loop (which drops the listener) and the
//! forwarding loop, closes every remaining session and then waits for all
//! session tasks.  A stopped server cannot be started again.
//!
//! # Bus access
//!
//! The forwarding loop and every session share one [`SharedBus`].  The lock is
//! held for a single `poll` or `send` and never across an `.await`.
//!
//! # Back-pressure
//!
//! A broadcast first tries every session without waiting.  Sessions whose
//! queue is full are then given `send_deadline` to make room, all at once, and
//! the broadcast completes only when each has either accepted the record or
//! timed out.  Timed-out sessions are dropped.  Healthy clients therefore see
//! every event in order even through a long bus burst, while a stalled client
//! costs the relay at most one deadline.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use can_relay_core::{decode_record, encode_event, Event, WireMessage};
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::application::relay_commands::{CommandOutcome, CommandProcessor};
use crate::application::session_registry::{SessionId, SessionRegistry};
use crate::application::stats::{RelayStats, StatsSnapshot};
use crate::infrastructure::bus::{lock_bus, BusError, SharedBus};
use crate::infrastructure::network::session::{run_session, Session, SessionError};

/// Frames drained from the bus before the forwarding loop yields.
const MAX_POLL_BURST: usize = 256;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Errors returned by [`RelayServer::start`].
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("relay server is already running")]
    AlreadyStarted,

    #[error("relay server has been stopped and cannot be restarted")]
    Stopped,

    /// The bus must be connected before the relay starts.
    #[error("bus is not connected")]
    BusNotConnected,
}

/// Runtime parameters for a [`RelayServer`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to listen on.  Port 0 picks an ephemeral port.
    pub bind_addr: SocketAddr,
    /// Sleep between bus polls when the bus is idle.
    pub poll_interval: Duration,
    /// Outbound records a session may have queued before it is dropped.
    pub session_queue_capacity: usize,
    /// How long a broadcast waits on a full session queue before the session
    /// is dropped.
    pub send_deadline: Duration,
    /// Broadcast a `tx` event after every frame a client sends.
    pub echo_tx: bool,
    /// `SO_SNDBUF` for accepted sockets.  `None` keeps the OS default.
    pub socket_send_buffer: Option<u32>,
}

impl RelayConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            poll_interval: Duration::from_millis(5),
            session_queue_capacity: 256,
            send_deadline: Duration::from_millis(500),
            echo_tx: true,
            socket_send_buffer: None,
        }
    }
}

/// State shared by the accept loop, the forwarding loop and the sessions.
pub(crate) struct RelayShared {
    pub(crate) registry: SessionRegistry<Arc<Session>>,
    processor: CommandProcessor,
    stats: Arc<RelayStats>,
    bus_connected: Arc<AtomicBool>,
    echo_tx: bool,
    queue_capacity: usize,
    send_deadline: Duration,
}

impl RelayShared {
    /// Delivers `event` to every live session and drops those that cannot
    /// keep up.  Returns the number of sessions the event was queued for.
    pub(crate) async fn broadcast(&self, event: &Event) -> usize {
        let record: Arc<[u8]> = match encode_event(event) {
            Ok(bytes) => bytes.into(),
            Err(e) => {
                error!("cannot encode event for broadcast: {e}");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        let mut waiting = JoinSet::new();
        for (id, session) in self.registry.snapshot() {
            match session.try_send(Arc::clone(&record)) {
                Ok(()) => delivered += 1,
                Err(SessionError::QueueFull) => {
                    let record = Arc::clone(&record);
                    let deadline = self.send_deadline;
                    waiting.spawn(async move {
                        let result = session.send_within(record, deadline).await;
                        (id, session, result)
                    });
                }
                Err(e) => {
                    debug!(session = %id, "broadcast failed: {e}");
                    failed.push((id, session));
                }
            }
        }

        while let Some(joined) = waiting.join_next().await {
            match joined {
                Ok((_, _, Ok(()))) => delivered += 1,
                Ok((id, session, Err(e))) => {
                    debug!(session = %id, "broadcast failed: {e}");
                    failed.push((id, session));
                }
                Err(e) => error!("broadcast send task panicked: {e}"),
            }
        }

        for (id, session) in failed {
            if self.registry.remove_if_present(id).is_some() {
                self.stats.record_session_dropped();
                warn!(session = %id, peer = %session.peer(), "dropping client that cannot keep up");
            }
            session.close();
        }
        delivered
    }

    /// Decodes one inbound record from `session` and acts on it.
    pub(crate) async fn handle_record(&self, session: SessionId, record: &[u8]) {
        let cmd = match decode_record(record) {
            Ok(WireMessage::Command(cmd)) => cmd,
            Ok(WireMessage::Event(_)) => {
                self.stats.record_decode_error();
                warn!(%session, "ignoring event record sent by a client");
                return;
            }
            Err(e) => {
                self.stats.record_decode_error();
                warn!(%session, "dropping malformed record: {e}");
                return;
            }
        };

        let tag = cmd.tag();
        match self.processor.apply(cmd) {
            Ok(CommandOutcome::Transmitted(frame)) => {
                debug!(%session, id = frame.id(), len = frame.data().len(), "frame sent");
                if self.echo_tx {
                    self.broadcast(&Event::Frame(frame)).await;
                }
            }
            Ok(CommandOutcome::BusChanged { channel, bitrate }) => {
                info!(%session, %channel, bitrate, "bus reconfigured by client");
            }
            Err(e) => warn!(%session, command = tag, "command rejected: {e}"),
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept: JoinHandle<JoinSet<()>>,
    forward: JoinHandle<()>,
}

enum State {
    Idle,
    Running(Running),
    Stopped,
}

/// TCP relay between one CAN bus and any number of remote clients.
pub struct RelayServer {
    config: RelayConfig,
    bus: SharedBus,
    shared: Arc<RelayShared>,
    state: State,
}

impl RelayServer {
    /// Creates an idle server.  Nothing is bound until [`RelayServer::start`].
    pub fn new(bus: SharedBus, config: RelayConfig) -> Self {
        let stats = Arc::new(RelayStats::new());
        let bus_connected = Arc::new(AtomicBool::new(false));
        let processor =
            CommandProcessor::new(Arc::clone(&bus), Arc::clone(&stats), Arc::clone(&bus_connected));
        let shared = Arc::new(RelayShared {
            registry: SessionRegistry::new(),
            processor,
            stats,
            bus_connected,
            echo_tx: config.echo_tx,
            queue_capacity: config.session_queue_capacity,
            send_deadline: config.send_deadline,
        });
        Self {
            config,
            bus,
            shared,
            state: State::Idle,
        }
    }

    /// Binds the listener and spawns the accept and forwarding loops.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    ///
    /// # Errors
    ///
    /// - [`RelayError::BusNotConnected`] if the bus has not been opened.
    /// - [`RelayError::BindFailed`] if the port is unavailable.
    /// - [`RelayError::AlreadyStarted`] / [`RelayError::Stopped`] when called
    ///   in the wrong state.
    pub async fn start(&mut self) -> Result<SocketAddr, RelayError> {
        match self.state {
            State::Idle => {}
            State::Running(_) => return Err(RelayError::AlreadyStarted),
            State::Stopped => return Err(RelayError::Stopped),
        }

        if !lock_bus(&self.bus).is_connected() {
            return Err(RelayError::BusNotConnected);
        }
        self.shared.bus_connected.store(true, Ordering::SeqCst);

        let addr = self.config.bind_addr;
        let listener = bind_listener(addr, self.config.socket_send_buffer)
            .map_err(|source| RelayError::BindFailed { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| RelayError::BindFailed { addr, source })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            shutdown_rx.clone(),
        ));
        let forward = tokio::spawn(forward_loop(
            Arc::clone(&self.bus),
            Arc::clone(&self.shared),
            self.config.poll_interval,
            shutdown_rx,
        ));

        info!(%local_addr, "relay server listening");
        self.state = State::Running(Running {
            local_addr,
            shutdown_tx,
            accept,
            forward,
        });
        Ok(local_addr)
    }

    /// Stops accepting, closes every session and waits for all tasks.
    ///
    /// Calling `stop` on a stopped (or never started) server is a no-op.
    pub async fn stop(&mut self) {
        let running = match std::mem::replace(&mut self.state, State::Stopped) {
            State::Running(running) => running,
            State::Idle | State::Stopped => return,
        };

        running.shutdown_tx.send_replace(true);

        let mut sessions = match running.accept.await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("accept loop panicked: {e}");
                JoinSet::new()
            }
        };
        if let Err(e) = running.forward.await {
            error!("forwarding loop panicked: {e}");
        }

        for (_, session) in self.shared.registry.drain() {
            session.close();
        }
        while let Some(result) = sessions.join_next().await {
            if let Err(e) = result {
                error!("session task panicked: {e}");
            }
        }
        info!(addr = %running.local_addr, "relay server stopped");
    }

    /// Broadcasts an event to every connected client.
    pub async fn broadcast(&self, event: &Event) -> usize {
        self.shared.broadcast(event).await
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            State::Running(running) => Some(running.local_addr),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    /// `false` once the bus has reported a permanent disconnect.
    pub fn bus_connected(&self) -> bool {
        self.shared.bus_connected.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if let State::Running(running) = &self.state {
            running.shutdown_tx.send_replace(true);
            for (_, session) in self.shared.registry.drain() {
                session.close();
            }
        }
    }
}

// ── Loops ─────────────────────────────────────────────────────────────────────

/// Accepted sockets inherit `SO_SNDBUF` from the listener.
fn bind_listener(addr: SocketAddr, send_buffer: Option<u32>) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    if let Some(size) = send_buffer {
        socket.set_send_buffer_size(size)?;
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<RelayShared>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, "set_nodelay failed: {e}");
                    }
                    let (session, outbound) = Session::new(peer, shared.queue_capacity);
                    shared.registry.insert(session.id(), Arc::clone(&session));
                    info!(session = %session.id(), %peer, "client connected");
                    sessions.spawn(run_session(session, stream, outbound, Arc::clone(&shared)));
                }
                Err(e) => {
                    error!("accept error: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(result) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = result {
                    error!("session task panicked: {e}");
                }
            }
        }
    }
    debug!("accept loop stopped");
    sessions
}

async fn forward_loop(
    bus: SharedBus,
    shared: Arc<RelayShared>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        let mut forwarded = 0;
        while forwarded < MAX_POLL_BURST {
            // The guard is a temporary and is released at the end of this statement.
            let polled = lock_bus(&bus).poll();
            match polled {
                Ok(Some(frame)) => {
                    forwarded += 1;
                    shared.stats.record_forwarded();
                    shared.broadcast(&Event::Frame(frame)).await;
                }
                Ok(None) => break,
                Err(BusError::Disconnected(reason)) => {
                    if shared.bus_connected.swap(false, Ordering::SeqCst) {
                        error!("bus disconnected: {reason}");
                    }
                    break;
                }
                Err(BusError::NotConnected) => {
                    shared.bus_connected.store(false, Ordering::SeqCst);
                    break;
                }
                Err(e) => {
                    warn!("bus poll failed: {e}");
                    break;
                }
            }
        }

        if forwarded == MAX_POLL_BURST {
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    debug!("forwarding loop stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
