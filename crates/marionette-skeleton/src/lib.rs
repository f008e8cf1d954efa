//! Marionette Skeleton
//!
//! Pose as state: the joint transforms and facial weights that describe one
//! avatar at one instant. This is NOT skinning data; meshes, weights and
//! blend-shape targets live with the renderer.
//!
//! # Detail Ladder
//!
//! - BoneOnly: tracked core chain (hips to head, both hands)
//! - FullBone: every body joint
//! - FullBoneFace: every body joint plus facial blend weights

pub mod face;
pub mod joint;
pub mod sample;
pub mod skeleton;
pub mod transform;

pub use face::*;
pub use joint::*;
pub use sample::*;
pub use skeleton::*;
pub use transform::*;
