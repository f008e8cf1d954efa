//! Marionette Transport
//!
//! The replication layer only needs `send(recipients, bytes)` and a way to
//! poll for `(sender, bytes)`. Delivery may be late, reordered or lossy.

pub mod loopback;
pub mod transport;
pub mod udp;

pub use loopback::*;
pub use transport::*;
pub use udp::*;
