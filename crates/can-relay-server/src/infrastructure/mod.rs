//! Infrastructure layer for the relay server.
//!
//! Contains the OS-facing adapters: CAN bus access, TCP sockets and
//! configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `can_relay_core`.  The application layer only reaches back in for the
//! `BusAdapter` trait and the `SharedBus` handle.

pub mod bus;
pub mod network;
pub mod storage;
