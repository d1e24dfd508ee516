//! Network infrastructure for the relay server.
//!
//! # Sub-modules
//!
//! - **`relay_server`** – Owns the listening socket, the accept loop, the
//!   bus forwarding loop and the broadcast fan-out.  `start`/`stop` manage the
//!   whole lifecycle.
//!
//! - **`session`** – One task per accepted client: reads and applies
//!   commands, and drains a bounded outbound queue onto the socket.

pub mod relay_server;
pub mod session;

pub use relay_server::{RelayConfig, RelayError, RelayServer};
pub use session::{Session, SessionError};
