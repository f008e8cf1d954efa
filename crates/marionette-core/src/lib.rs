//! Marionette Core - Fundamental types and primitives
//!
//! This crate defines the core types shared by every Marionette crate:
//! - Identifiers (AvatarId, PeerId, LodInstanceId)
//! - Motion time on the authoring peer's timeline
//! - Snapshot detail levels and LOD levels
//! - Error taxonomy and upward events

pub mod error;
pub mod event;
pub mod id;
pub mod level;
pub mod time;

pub use error::*;
pub use event::*;
pub use id::*;
pub use level::*;
pub use time::*;
