//! Domain entities for the CAN relay.
//!
//! This module contains pure data types and parsing rules with no
//! infrastructure dependencies.  Nothing here touches a socket, a thread, or
//! a CAN driver, so everything can be unit-tested on any platform.

/// A single CAN frame and its id/length limits.
pub mod frame;

/// Hex/binary/decimal token parsing shared by commands and CLI arguments.
pub mod value;
