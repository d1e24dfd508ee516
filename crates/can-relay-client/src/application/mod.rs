//! Application layer for the relay client.
//!
//! - **`event_queue`** – Bounded FIFO between the socket reader and the
//!   consumer; drops the oldest event on overflow and counts it.
//! - **`render`** – One-line text form of an event for terminal output.
//! - **`command_spec`** – `key=value` command-line specs turned into
//!   [`Command`](can_relay_core::Command)s.

pub mod command_spec;
pub mod event_queue;
pub mod render;
