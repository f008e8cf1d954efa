//! Marionette LOD - per-avatar detail levels
//!
//! Each avatar owns a `LodLifecycleManager` that moves built levels through
//! `Requested -> Building -> Ready -> Active -> Retiring -> Destroyed`.
//! Builds run on `LodBuildPipeline` worker threads; the control thread
//! drains their results once per frame and swaps levels only between
//! recompute passes.

pub mod builder;
pub mod culling;
pub mod instance;
pub mod manager;
pub mod selector;

pub use builder::*;
pub use culling::*;
pub use instance::*;
pub use manager::*;
pub use selector::*;
