//! can-relay-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The client connects to a relay server, queues every frame event it
//! broadcasts, and sends `send_message` / `change_can` commands back.

/// Application layer: event queue, rendering, command specs.
pub mod application;

/// Infrastructure layer: the TCP connection.
pub mod infrastructure;

pub use application::event_queue::EventQueue;
pub use infrastructure::network::{ClientConfig, RelayClient, RelayClientError};
