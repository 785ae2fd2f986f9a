use crate::directory::{PlayerDirectory, Tick};
use crate::identity::{MAX_PLAYERS, PlayerId};
use crate::net::{BroadcastTransport, CarStateSnapshot, DatagramSocket, Message, Packet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaceStateStats {
    pub sent: u64,
    pub send_failures: u64,
    pub received: u64,
}

/// Latest-wins car state exchange. Nothing is acked, retried or sequenced; a
/// remote slot simply stops being visible once its player disconnects.
#[derive(Debug)]
pub struct RaceStateBroadcaster {
    local: CarStateSnapshot,
    remote: [Option<CarStateSnapshot>; MAX_PLAYERS],
    interval: Tick,
    started_at: Option<Tick>,
    stats: RaceStateStats,
}

impl RaceStateBroadcaster {
    pub fn new(local: PlayerId, interval: Tick) -> Self {
        Self {
            local: CarStateSnapshot::new(local),
            remote: [None; MAX_PLAYERS],
            interval: interval.max(1),
            started_at: None,
            stats: RaceStateStats::default(),
        }
    }

    pub fn start(&mut self, now: Tick) {
        self.started_at = Some(now);
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn stats(&self) -> &RaceStateStats {
        &self.stats
    }

    pub fn local(&self) -> &CarStateSnapshot {
        &self.local
    }

    /// Replaces the local car's state. The player id is always ours.
    pub fn set_local(&mut self, snapshot: CarStateSnapshot) {
        let player = self.local.player;
        self.local = CarStateSnapshot { player, ..snapshot };
    }

    /// Broadcasts the local snapshot on every interval boundary since
    /// `start`. Returns whether a packet went out.
    pub fn tick<S: DatagramSocket>(&mut self, now: Tick, transport: &mut BroadcastTransport<S>) -> bool {
        let Some(started_at) = self.started_at else {
            return false;
        };
        if now.wrapping_sub(started_at) % self.interval != 0 {
            return false;
        }

        let packet = Packet::new(self.local.player, Message::CarState(self.local));
        match transport.send(&packet.encode()) {
            Ok(()) => {
                self.stats.sent += 1;
                true
            }
            Err(e) => {
                self.stats.send_failures += 1;
                log::debug!("Car state send failed: {}", e);
                false
            }
        }
    }

    pub fn on_snapshot(&mut self, snapshot: CarStateSnapshot) {
        if snapshot.player == self.local.player {
            return;
        }
        self.stats.received += 1;
        self.remote[snapshot.player.index()] = Some(snapshot);
    }

    /// Latest snapshot for `player`, provided the directory still has them
    /// connected.
    pub fn remote(&self, player: PlayerId, directory: &PlayerDirectory) -> Option<&CarStateSnapshot> {
        if !directory.is_connected(player) {
            return None;
        }
        self.remote[player.index()].as_ref()
    }

    pub fn reset(&mut self) {
        self.remote = [None; MAX_PLAYERS];
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{MAX_DATAGRAM, SimulatedNetwork};
    use glam::IVec2;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 8888)
    }

    fn player(raw: u8) -> PlayerId {
        PlayerId::new(raw).unwrap()
    }

    #[test]
    fn test_sends_every_interval() {
        let net = SimulatedNetwork::new();
        let mut transport = BroadcastTransport::new(net.socket(addr(1)));
        transport.open(8888).unwrap();

        let mut race = RaceStateBroadcaster::new(player(0), 4);
        assert!(!race.tick(0, &mut transport));

        race.start(100);
        let sent: Vec<Tick> = (100..117).filter(|t| race.tick(*t, &mut transport)).collect();
        assert_eq!(sent, vec![100, 104, 108, 112, 116]);
        assert_eq!(race.stats().sent, 5);
    }

    #[test]
    fn test_latest_snapshot_wins() {
        let mut dir = PlayerDirectory::new(player(0), addr(1), 180, 0);
        dir.upsert(addr(2), player(1), 0).unwrap();
        let mut race = RaceStateBroadcaster::new(player(0), 4);

        let mut first = CarStateSnapshot::new(player(1));
        first.position = IVec2::new(256, 512);
        race.on_snapshot(first);

        let mut second = first;
        second.lap = 1;
        race.on_snapshot(second);

        assert_eq!(race.remote(player(1), &dir), Some(&second));
        assert_eq!(race.remote(player(2), &dir), None);
    }

    #[test]
    fn test_disconnected_player_hidden() {
        let mut dir = PlayerDirectory::new(player(0), addr(1), 180, 0);
        dir.upsert(addr(2), player(1), 0).unwrap();
        let mut race = RaceStateBroadcaster::new(player(0), 4);
        race.on_snapshot(CarStateSnapshot::new(player(1)));

        dir.sweep_timeouts(181);
        assert_eq!(race.remote(player(1), &dir), None);
    }

    #[test]
    fn test_set_local_keeps_own_id() {
        let net = SimulatedNetwork::new();
        let mut tx = BroadcastTransport::new(net.socket(addr(1)));
        let mut rx = BroadcastTransport::new(net.socket(addr(2)));
        tx.open(8888).unwrap();
        rx.open(8888).unwrap();

        let mut race = RaceStateBroadcaster::new(player(3), 4);
        let mut car = CarStateSnapshot::new(player(6));
        car.speed = 300;
        race.set_local(car);
        race.start(0);
        race.tick(0, &mut tx);

        let mut buf = [0u8; MAX_DATAGRAM];
        let (size, _) = rx.receive(&mut buf).unwrap();
        let packet = Packet::decode(&buf[..size]).unwrap();
        assert_eq!(packet.sender, player(3));
        match packet.message {
            Message::CarState(state) => assert_eq!(state.speed, 300),
            other => panic!("unexpected {:?}", other),
        }
    }
}
