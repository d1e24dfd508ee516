//! Network infrastructure for the relay client.
//!
//! Architecture:
//! - [`RelayClient`] owns one TCP connection to a relay server.
//! - A spawned read task frames inbound bytes, decodes event records and
//!   pushes them onto the [`EventQueue`].
//! - Commands are encoded and written through the shared write half.
//!
//! There is no reconnect loop.  When the server goes away the client drops to
//! the disconnected state, the queue is closed, and the caller decides what to
//! do next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use can_relay_core::{
    decode_record, encode_command, Command, Event, LineFramer, ProtocolError, WireMessage,
};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::event_queue::{EventQueue, DEFAULT_EVENT_QUEUE_CAPACITY};

const READ_CHUNK: usize = 4096;

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum RelayClientError {
    /// TCP connection to the relay server failed or timed out.
    #[error("failed to connect to relay server at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// `connect` was called while a connection is open.
    #[error("already connected")]
    AlreadyConnected,

    /// The client has no open connection.
    #[error("not connected")]
    NotConnected,

    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A command could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Configuration for a [`RelayClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Events kept before the oldest is dropped.
    pub event_queue_capacity: usize,
    /// Upper bound on the TCP connect.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

struct ReadTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// One connection to a relay server.
///
/// All methods take `&self`, so a client wrapped in an `Arc` can be driven
/// from several tasks; [`RelayClient::disconnect`] may run concurrently with
/// the read loop and with [`RelayClient::recv_event`].
pub struct RelayClient {
    config: ClientConfig,
    events: Arc<EventQueue>,
    connected: Arc<AtomicBool>,
    write_half: Arc<Mutex<Option<OwnedWriteHalf>>>,
    read_task: StdMutex<Option<ReadTask>>,
}

impl RelayClient {
    /// Creates a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        let events = Arc::new(EventQueue::new(config.event_queue_capacity));
        events.close();
        Self {
            config,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            write_half: Arc::new(Mutex::new(None)),
            read_task: StdMutex::new(None),
        }
    }

    /// Opens the connection and starts the read loop.
    ///
    /// No retry: on failure the client stays disconnected.
    ///
    /// # Errors
    ///
    /// - [`RelayClientError::ConnectFailed`] if the server cannot be reached
    ///   within `connect_timeout`.
    /// - [`RelayClientError::AlreadyConnected`] if a connection is open.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), RelayClientError> {
        if self.is_connected() {
            return Err(RelayClientError::AlreadyConnected);
        }
        let addr = format!("{host}:{port}");

        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((host, port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(RelayClientError::ConnectFailed { addr, source }),
            Err(_) => {
                return Err(RelayClientError::ConnectFailed {
                    addr,
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {e}");
        }

        // The previous read task must be gone before the new write half is
        // stored, since it clears the slot on exit.
        let stale = self.lock_read_task().take();
        if let Some(stale) = stale {
            stale.shutdown_tx.send_replace(true);
            if let Err(e) = stale.handle.await {
                warn!("previous read task panicked: {e}");
            }
        }

        let (reader, writer) = stream.into_split();
        *self.write_half.lock().await = Some(writer);

        self.events.reopen();
        self.connected.store(true, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.events),
            Arc::clone(&self.connected),
            Arc::clone(&self.write_half),
            shutdown_rx,
        ));
        *self.lock_read_task() = Some(ReadTask {
            shutdown_tx,
            handle,
        });

        info!("connected to relay server at {addr}");
        Ok(())
    }

    /// Encodes and writes one command.
    ///
    /// # Errors
    ///
    /// - [`RelayClientError::NotConnected`] when there is no connection.
    /// - [`RelayClientError::Io`] when the write fails; the client is then
    ///   disconnected.
    /// - [`RelayClientError::Protocol`] if the command cannot be encoded.
    pub async fn send_command(&self, cmd: &Command) -> Result<(), RelayClientError> {
        if !self.is_connected() {
            return Err(RelayClientError::NotConnected);
        }
        let bytes = encode_command(cmd)?;

        let mut guard = self.write_half.lock().await;
        let writer = guard.as_mut().ok_or(RelayClientError::NotConnected)?;
        let written = writer.write_all(&bytes).await;
        if let Err(e) = written {
            warn!("command write failed: {e}");
            guard.take();
            drop(guard);
            self.connected.store(false, Ordering::SeqCst);
            if let Some(task) = self.lock_read_task().as_ref() {
                task.shutdown_tx.send_replace(true);
            }
            return Err(RelayClientError::Io(e));
        }
        debug!(command = cmd.tag(), "command sent");
        Ok(())
    }

    /// Next queued event, without waiting.
    pub fn next_event(&self) -> Option<Event> {
        self.events.pop()
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the connection is gone and every queued event has
    /// been consumed.
    pub async fn recv_event(&self) -> Option<Event> {
        self.events.recv().await
    }

    /// Stops the read loop and closes the socket.  Idempotent.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);

        let task = self.lock_read_task().take();
        if let Some(task) = task {
            task.shutdown_tx.send_replace(true);
            if let Err(e) = task.handle.await {
                warn!("read task panicked: {e}");
            }
            info!("disconnected from relay server");
        }

        if let Some(mut writer) = self.write_half.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("socket shutdown failed: {e}");
            }
        }
        self.events.close();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Events discarded because the consumer fell behind.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    fn lock_read_task(&self) -> std::sync::MutexGuard<'_, Option<ReadTask>> {
        self.read_task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(task) = self.lock_read_task().as_ref() {
            task.shutdown_tx.send_replace(true);
        }
    }
}

/// Reads records until EOF, error, framing desync or shutdown.
async fn read_loop(
    mut reader: OwnedReadHalf,
    events: Arc<EventQueue>,
    connected: Arc<AtomicBool>,
    write_half: Arc<Mutex<Option<OwnedWriteHalf>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    'outer: loop {
        let n = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("read loop stopped");
                    break;
                }
                continue;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!("relay server closed the connection");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("read error on relay connection: {e}");
                    break;
                }
            },
        };

        framer.push(&buf[..n]);
        loop {
            let record = match framer.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    warn!("relay stream desynchronised: {e}");
                    break 'outer;
                }
            };
            match decode_record(&record) {
                Ok(WireMessage::Event(event)) => {
                    if events.push(event) {
                        debug!("event queue full; dropped oldest event");
                    }
                }
                Ok(WireMessage::Command(cmd)) => {
                    warn!(command = cmd.tag(), "ignoring command record sent by the server");
                }
                Err(e) => warn!("dropping malformed record: {e}"),
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    write_half.lock().await.take();
    events.close();
}

// ── Tests ─────────────────────────────────────────────────────────────────────
