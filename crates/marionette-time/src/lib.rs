//! Marionette Time - re-timing remote motion for smooth playback
//!
//! Snapshots arrive with irregular spacing. Each remote avatar replays its
//! snapshots a fixed delay behind the newest one, speeding up or slowing
//! down slightly so the buffered duration stays near that delay.

pub mod buffer;
pub mod clock;
pub mod network;
pub mod synchronizer;

pub use buffer::*;
pub use clock::*;
pub use network::*;
pub use synchronizer::*;
