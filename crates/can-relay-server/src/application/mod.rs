//! Application layer for the relay server.
//!
//! Nothing in here opens a socket.  The use cases work on the core domain
//! types and on the [`BusAdapter`](crate::infrastructure::bus::BusAdapter)
//! trait, so they can be driven from unit tests with a mock bus.
//!
//! # Sub-modules
//!
//! - **`session_registry`** – The concurrency-safe set of live sessions:
//!   insert on accept, remove-if-present on failure, snapshot for broadcast.
//!
//! - **`relay_commands`** – Validates client commands against the adapter
//!   and applies them through the shared bus lock.
//!
//! - **`stats`** – Counters that make forwarded frames and dropped commands
//!   observable without a NACK on the wire.

pub mod relay_commands;
pub mod session_registry;
pub mod stats;
