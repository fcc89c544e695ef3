//! In-memory registry of live duplex connections.

mod connection;

pub use connection::{ConnectionRegistry, RelayConnection};
