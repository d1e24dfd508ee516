//! Infrastructure layer for the client application.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `can_relay_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – TCP connection to the relay server: a read task that
//!   decodes event records into the event queue, and a command writer.

pub mod network;
