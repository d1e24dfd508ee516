//! can-relay-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::stats::StatsSnapshot;
pub use infrastructure::bus::{shared, AdapterKind, BusAdapter, BusError, SharedBus, VirtualBus};
pub use infrastructure::network::{RelayConfig, RelayError, RelayServer};
