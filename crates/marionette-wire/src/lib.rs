//! Marionette Wire Protocol - Snapshot packet format
//!
//! Every packet is:
//! - Fixed header (10 bytes): version, detail level, source timestamp
//! - Skeleton payload sized by the detail level
//!
//! The header is self-describing so a receiver running a different build
//! can detect an incompatible packet and drop it instead of misreading it.

pub mod codec;
pub mod header;
pub mod snapshot;

pub use codec::*;
pub use header::*;
pub use snapshot::*;
