//! Identity types for Marionette
//!
//! All identifiers are 64-bit so they can be carried on the wire unchanged.

use std::fmt;

/// Peer identity - one participant on the transport
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PeerId(pub u64);

impl PeerId {
    pub const ZERO: PeerId = PeerId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        PeerId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        PeerId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({:016x})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Avatar identity - one replicated character
///
/// Layout: \[owner peer low 32 bits\]\[local index:32\], so ids minted on
/// different peers never collide.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AvatarId(pub u64);

impl AvatarId {
    #[inline]
    pub fn new(id: u64) -> Self {
        AvatarId(id)
    }

    #[inline]
    pub fn from_owner_index(owner: PeerId, index: u32) -> Self {
        AvatarId(((owner.0 & 0xFFFF_FFFF) << 32) | index as u64)
    }

    #[inline]
    pub fn index(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

impl fmt::Debug for AvatarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Avatar({:08x}:{:08x})", self.0 >> 32, self.index())
    }
}

impl fmt::Display for AvatarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:08x}", self.0 >> 32, self.index())
    }
}

/// Identity of one built detail level instance
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LodInstanceId(pub u64);

impl LodInstanceId {
    #[inline]
    pub fn new(id: u64) -> Self {
        LodInstanceId(id)
    }

    #[inline]
    pub fn next(self) -> Self {
        LodInstanceId(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for LodInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LodInstance({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_roundtrip() {
        let id = PeerId::new(0xDEADBEEF_CAFEBABE);
        assert_eq!(PeerId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn test_avatar_id_owner_index() {
        let a = AvatarId::from_owner_index(PeerId::new(7), 3);
        let b = AvatarId::from_owner_index(PeerId::new(8), 3);

        assert_eq!(a.index(), 3);
        assert_ne!(a, b);
    }

    #[test]
    fn test_lod_instance_id_next() {
        assert_eq!(LodInstanceId::new(41).next(), LodInstanceId::new(42));
    }
}
