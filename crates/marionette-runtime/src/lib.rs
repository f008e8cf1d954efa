//! Marionette Runtime
//!
//! `ReplicationNode` ties the pieces together: it records and sends the
//! local avatar, feeds received snapshots to playback buffers, keeps LOD
//! builds moving, and runs per-avatar work in three parallel phases.

pub mod config;
pub mod node;
pub mod phase;
pub mod recorder;
pub mod registry;
pub mod scheduler;
pub mod telemetry;

pub use config::*;
pub use node::*;
pub use phase::*;
pub use recorder::*;
pub use registry::*;
pub use scheduler::*;
pub use telemetry::*;
