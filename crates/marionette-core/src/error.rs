//! Error types for Marionette

use thiserror::Error;

use crate::{AvatarId, LodLevel, PeerId};

/// Why a packet was rejected by the codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    #[error("buffer too short: expected {expected}, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unknown wire version {0}")]
    UnknownVersion(u8),

    #[error("unknown detail level {0:#04x}")]
    UnknownDetailLevel(u8),

    #[error("joint count {actual} does not match level (expected {expected})")]
    JointCountMismatch { expected: usize, actual: usize },

    #[error("unexpected {0} section")]
    UnexpectedSection(&'static str),

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("timestamp out of range")]
    TimestampOutOfRange,
}

/// Core Marionette errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarionetteError {
    // Wire errors
    #[error("Malformed packet: {0}")]
    MalformedPacket(MalformedReason),

    // LOD errors
    #[error("LOD build failed for {avatar:?} at {level:?} after {attempts} attempts: {reason}")]
    LodBuildFailed {
        avatar: AvatarId,
        level: LodLevel,
        attempts: u32,
        reason: String,
    },

    // Registry errors
    #[error("Duplicate avatar handle {0:?}")]
    DuplicateAvatarHandle(AvatarId),

    #[error("Unknown avatar {0:?}")]
    UnknownAvatar(AvatarId),

    // Transport errors
    #[error("Unknown recipient {0:?}")]
    UnknownRecipient(PeerId),

    #[error("Transport error: {0}")]
    TransportError(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<MalformedReason> for MarionetteError {
    fn from(reason: MalformedReason) -> Self {
        MarionetteError::MalformedPacket(reason)
    }
}

impl MarionetteError {
    /// Can the frame loop drop this and continue?
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, MarionetteError::DuplicateAvatarHandle(_))
    }
}

/// Result type for Marionette operations
pub type MarionetteResult<T> = Result<T, MarionetteError>;
