//! One accepted client connection.
//!
//! A session runs as a single task made of two halves:
//!
//! - the **reader** frames inbound bytes into records, decodes them and hands
//!   commands to the [`CommandProcessor`](crate::application::relay_commands::CommandProcessor);
//! - the **writer** drains a bounded outbound queue onto the socket.
//!
//! [`Session::try_send`] never waits.  When the queue is momentarily full the
//! broadcaster falls back to [`Session::send_within`], which gives the writer
//! a bounded time to make room.  A client that stays full past that deadline
//! is marked dead and dropped, so one stalled peer delays a broadcast by at
//! most one deadline and is then gone.
//!
//! The task ends on EOF, on any socket error, on a framing desync, or when
//! [`Session::close`] is called.  On the way out it removes itself from the
//! registry (if a broadcast pass or shutdown has not done so already) and the
//! socket is closed when its halves are dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use can_relay_core::{encode_event, Event, LineFramer, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::application::session_registry::SessionId;
use crate::infrastructure::network::relay_server::RelayShared;

const READ_CHUNK: usize = 4096;

/// Errors that end a session or refuse a send.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session has already been closed.
    #[error("session closed")]
    Closed,

    /// The client is not draining its queue fast enough.
    #[error("outbound queue full")]
    QueueFull,

    /// The socket failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The inbound byte stream can no longer be split into records.
    #[error("framing error: {0}")]
    Framing(ProtocolError),

    /// An event could not be serialized.
    #[error("encode error: {0}")]
    Encode(ProtocolError),
}

/// Server-side handle for one connected client.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<Arc<[u8]>>,
    alive: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl Session {
    /// Creates a session handle and the receiving end of its outbound queue.
    pub fn new(peer: SocketAddr, queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<[u8]>>) {
        let (outbound, rx) = mpsc::channel(queue_capacity.max(1));
        let (close_tx, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: SessionId::new(),
            peer,
            outbound,
            alive: AtomicBool::new(true),
            close_tx,
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Queues an already-encoded record without waiting.
    ///
    /// A full queue is reported but leaves the session alive; a closed one
    /// marks it dead.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::QueueFull`] or [`SessionError::Closed`].
    pub fn try_send(&self, record: Arc<[u8]>) -> Result<(), SessionError> {
        if !self.is_alive() {
            return Err(SessionError::Closed);
        }
        match self.outbound.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SessionError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.alive.store(false, Ordering::SeqCst);
                Err(SessionError::Closed)
            }
        }
    }

    /// Queues a record, waiting at most `deadline` for room.
    ///
    /// A queue that is still full when the deadline passes marks the session
    /// dead; the caller is expected to remove it from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::QueueFull`] on timeout or
    /// [`SessionError::Closed`].
    pub async fn send_within(
        &self,
        record: Arc<[u8]>,
        deadline: Duration,
    ) -> Result<(), SessionError> {
        if !self.is_alive() {
            return Err(SessionError::Closed);
        }
        match self.outbound.send_timeout(record, deadline).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                self.alive.store(false, Ordering::SeqCst);
                Err(SessionError::QueueFull)
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                self.alive.store(false, Ordering::SeqCst);
                Err(SessionError::Closed)
            }
        }
    }

    /// Encodes and queues a single event without waiting.
    ///
    /// # Errors
    ///
    /// Same as [`Session::try_send`], plus [`SessionError::Encode`].
    pub fn send_event(&self, event: &Event) -> Result<(), SessionError> {
        let record = encode_event(event).map_err(SessionError::Encode)?;
        self.try_send(record.into())
    }

    /// Marks the session dead and stops its task.  Idempotent.
    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.close_tx.send_replace(true);
    }
}

/// Runs the session until the connection ends or it is closed.
pub(crate) async fn run_session(
    session: Arc<Session>,
    stream: TcpStream,
    outbound: mpsc::Receiver<Arc<[u8]>>,
    shared: Arc<RelayShared>,
) {
    let id = session.id();
    let peer = session.peer();
    let (reader, writer) = stream.into_split();
    let mut closed = session.close_tx.subscribe();

    let result = tokio::select! {
        r = read_loop(&session, reader, &shared) => r,
        w = write_loop(writer, outbound) => w,
        _ = closed.wait_for(|closed| *closed) => Ok(()),
    };

    session.close();
    match result {
        Ok(()) => debug!(session = %id, %peer, "session ended"),
        Err(e) => warn!(session = %id, %peer, "session ended with error: {e}"),
    }
    if shared.registry.remove_if_present(id).is_some() {
        info!(session = %id, %peer, "client disconnected");
    }
}

async fn read_loop(
    session: &Session,
    mut reader: OwnedReadHalf,
    shared: &RelayShared,
) -> Result<(), SessionError> {
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        framer.push(&buf[..n]);
        while let Some(record) = framer.next_record().map_err(SessionError::Framing)? {
            shared.handle_record(session.id(), &record).await;
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Arc<[u8]>>,
) -> Result<(), SessionError> {
    while let Some(record) = outbound.recv().await {
        writer.write_all(&record).await?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
