//! Marionette Test Harness
//!
//! This crate provides:
//! - A seeded chaos network (latency, jitter, loss, reordering, duplication)
//! - `Transport` endpoints that route through it
//! - A multi-peer session simulator driving real `ReplicationNode`s
//! - End-to-end replication scenarios

pub mod chaos;
pub mod integration;
pub mod session;
pub mod simulator;

pub use chaos::*;
pub use integration::*;
pub use session::*;
pub use simulator::*;
