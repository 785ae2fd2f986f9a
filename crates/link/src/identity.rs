use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub const MAX_PLAYERS: usize = 8;

/// Slot of a peer in the session, `0..MAX_PLAYERS`.
///
/// Doubles as the index of the car that peer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(u8);

impl PlayerId {
    pub const fn new(raw: u8) -> Option<Self> {
        if (raw as usize) < MAX_PLAYERS {
            Some(Self(raw))
        } else {
            None
        }
    }

    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = PlayerId> {
        (0..MAX_PLAYERS as u8).map(PlayerId)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

bitflags! {
    /// Set of players, one bit per `PlayerId`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PeerMask: u8 {
        const P0 = 1 << 0;
        const P1 = 1 << 1;
        const P2 = 1 << 2;
        const P3 = 1 << 3;
        const P4 = 1 << 4;
        const P5 = 1 << 5;
        const P6 = 1 << 6;
        const P7 = 1 << 7;
    }
}

impl PeerMask {
    #[inline]
    pub fn single(id: PlayerId) -> Self {
        Self::from_bits_retain(1 << id.raw())
    }

    #[inline]
    pub fn has(self, id: PlayerId) -> bool {
        self.contains(Self::single(id))
    }

    pub fn players(self) -> impl Iterator<Item = PlayerId> {
        PlayerId::all().filter(move |id| self.has(*id))
    }
}

/// Source of the local peer's identity.
///
/// The protocol only needs the id to be unique on the segment and stable for
/// the session; how it is derived is up to the host.
pub trait PlayerIdProvider {
    fn player_id(&self) -> PlayerId;
}

/// Derives the id from the last octet of the radio's hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddressId {
    pub mac: [u8; 6],
}

impl MacAddressId {
    pub fn new(mac: [u8; 6]) -> Self {
        Self { mac }
    }

    /// Parses `aa:bb:cc:dd:ee:ff` (or `-` separated).
    pub fn parse(text: &str) -> Option<Self> {
        let mut mac = [0u8; 6];
        let mut parts = text.split([':', '-']);
        for byte in &mut mac {
            *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self { mac })
    }
}

impl PlayerIdProvider for MacAddressId {
    fn player_id(&self) -> PlayerId {
        PlayerId(self.mac[5] % MAX_PLAYERS as u8)
    }
}

impl fmt::Display for MacAddressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.mac;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPlayerId(pub PlayerId);

impl PlayerIdProvider for FixedPlayerId {
    fn player_id(&self) -> PlayerId {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_range() {
        assert!(PlayerId::new(7).is_some());
        assert!(PlayerId::new(8).is_none());
        assert_eq!(PlayerId::all().count(), MAX_PLAYERS);
    }

    #[test]
    fn test_mac_derivation_uses_last_octet() {
        let mac = MacAddressId::parse("00:09:BF:12:34:AB").unwrap();
        assert_eq!(mac.player_id().raw(), 0xAB % 8);

        let other = MacAddressId::parse("00-09-BF-56-78-CD").unwrap();
        assert_eq!(other.player_id().raw(), 0xCD % 8);
        assert_eq!(other.to_string(), "00:09:BF:56:78:CD");
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!(MacAddressId::parse("00:09:BF:12:34").is_none());
        assert!(MacAddressId::parse("00:09:BF:12:34:AB:CD").is_none());
        assert!(MacAddressId::parse("zz:09:BF:12:34:AB").is_none());
    }

    #[test]
    fn test_peer_mask_membership() {
        let p1 = PlayerId::new(1).unwrap();
        let p6 = PlayerId::new(6).unwrap();
        let mask = PeerMask::single(p1) | PeerMask::single(p6);

        assert!(mask.has(p1));
        assert!(!mask.has(PlayerId::new(2).unwrap()));
        assert_eq!(mask.players().collect::<Vec<_>>(), vec![p1, p6]);
        assert_eq!(mask - PeerMask::single(p1), PeerMask::P6);
    }
}
