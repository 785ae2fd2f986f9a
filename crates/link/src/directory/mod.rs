use std::net::SocketAddr;

use serde::Serialize;

use crate::error::LinkError;
use crate::identity::{MAX_PLAYERS, PeerMask, PlayerId};

/// Host frame counter.
pub type Tick = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub addr: SocketAddr,
    pub last_seen: Tick,
    pub ready: bool,
    pub connected: bool,
    /// Incarnation last advertised by this peer.
    pub epoch: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Discovered,
    Rejoined,
    Refreshed,
}

/// Single source of truth for peer liveness and readiness. Always holds the
/// local player's own record.
#[derive(Debug)]
pub struct PlayerDirectory {
    local: PlayerId,
    records: [Option<PlayerRecord>; MAX_PLAYERS],
    timeout: Tick,
}

impl PlayerDirectory {
    pub fn new(local: PlayerId, local_addr: SocketAddr, timeout: Tick, now: Tick) -> Self {
        let mut records = [None; MAX_PLAYERS];
        records[local.index()] = Some(PlayerRecord {
            id: local,
            addr: local_addr,
            last_seen: now,
            ready: false,
            connected: true,
            epoch: None,
        });

        Self {
            local,
            records,
            timeout,
        }
    }

    pub fn local(&self) -> PlayerId {
        self.local
    }

    pub fn timeout(&self) -> Tick {
        self.timeout
    }

    /// Records traffic from `id` at `addr`. A connected record bound to a
    /// different address, or a remote claiming our own id, is a collision.
    pub fn upsert(&mut self, addr: SocketAddr, id: PlayerId, now: Tick) -> Result<Upsert, LinkError> {
        if id == self.local {
            return Err(LinkError::IdCollision { id, addr });
        }

        let slot = &mut self.records[id.index()];
        match slot {
            Some(record) if record.connected && record.addr != addr => {
                Err(LinkError::IdCollision { id, addr })
            }
            Some(record) if record.connected => {
                record.last_seen = now;
                Ok(Upsert::Refreshed)
            }
            Some(record) => {
                record.addr = addr;
                record.last_seen = now;
                record.ready = false;
                record.connected = true;
                Ok(Upsert::Rejoined)
            }
            None => {
                *slot = Some(PlayerRecord {
                    id,
                    addr,
                    last_seen: now,
                    ready: false,
                    connected: true,
                    epoch: None,
                });
                Ok(Upsert::Discovered)
            }
        }
    }

    /// Records the incarnation `id` advertised. Returns true when it replaces
    /// a different one: the peer restarted, so its ready flag no longer holds.
    pub fn note_epoch(&mut self, id: PlayerId, epoch: u32) -> bool {
        let Some(record) = self.records[id.index()].as_mut() else {
            return false;
        };
        if id == self.local {
            return false;
        }

        let restarted = record.epoch.is_some_and(|known| known != epoch);
        record.epoch = Some(epoch);
        if restarted {
            record.ready = false;
        }
        restarted
    }

    /// Returns whether the flag changed. Disconnected records stay unready.
    pub fn mark_ready(&mut self, id: PlayerId, ready: bool) -> bool {
        match &mut self.records[id.index()] {
            Some(record) if record.connected && record.ready != ready => {
                record.ready = ready;
                true
            }
            _ => false,
        }
    }

    /// Marks every remote silent for longer than the timeout as disconnected
    /// and returns the ones that dropped on this sweep.
    pub fn sweep_timeouts(&mut self, now: Tick) -> PeerMask {
        let mut dropped = PeerMask::empty();

        for record in self.records.iter_mut().flatten() {
            if record.id == self.local || !record.connected {
                continue;
            }
            if now.wrapping_sub(record.last_seen) > self.timeout {
                record.connected = false;
                record.ready = false;
                dropped |= PeerMask::single(record.id);
            }
        }

        dropped
    }

    pub fn count_connected(&self) -> usize {
        self.iter().filter(|r| r.connected).count()
    }

    pub fn count_ready(&self) -> usize {
        self.iter().filter(|r| r.connected && r.ready).count()
    }

    pub fn all_ready(&self) -> bool {
        let connected = self.count_connected();
        connected >= 2 && self.count_ready() == connected
    }

    /// Connected remote peers; the local player is never included.
    pub fn connected_peers(&self) -> PeerMask {
        self.iter()
            .filter(|r| r.connected && r.id != self.local)
            .fold(PeerMask::empty(), |mask, r| mask | PeerMask::single(r.id))
    }

    pub fn is_connected(&self, id: PlayerId) -> bool {
        self.get(id).is_some_and(|r| r.connected)
    }

    pub fn is_ready(&self, id: PlayerId) -> bool {
        self.get(id).is_some_and(|r| r.connected && r.ready)
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerRecord> {
        self.records[id.index()].as_ref()
    }

    /// Every known record, disconnected ones included, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.records.iter().flatten()
    }
}
