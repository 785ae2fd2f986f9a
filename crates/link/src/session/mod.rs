mod events;

pub use events::SessionEvent;

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::directory::{PlayerDirectory, PlayerRecord, Tick, Upsert};
use crate::error::LinkError;
use crate::identity::{MAX_PLAYERS, PlayerId, PlayerIdProvider};
use crate::net::{
    BroadcastTransport, CarStateSnapshot, ControlMessage, DatagramSocket, ItemEvent, MAX_DATAGRAM,
    Message, Packet, TransportStats, rand_u64,
};
use crate::race::{ItemEventBroadcaster, ItemStats, RaceStateBroadcaster, RaceStateStats};
use crate::reliable::{ReliableEngine, ReliableStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    Discovery,
    LobbyWait,
    Countdown,
    RaceActive,
    Teardown,
}

impl SessionPhase {
    /// Phases in which lobby control traffic is processed.
    pub fn is_lobby(self) -> bool {
        matches!(self, Self::Discovery | Self::LobbyWait | Self::Countdown)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub transport: TransportStats,
    pub reliable: ReliableStats,
    pub race: RaceStateStats,
    pub items: ItemStats,
    pub malformed: u64,
    pub collisions: u64,
    /// Outstanding reliable messages still owed an ack by each peer.
    pub window_occupancy: [usize; MAX_PLAYERS],
}

/// One device's view of a lobby and the race that follows it. The host calls
/// `tick` once per frame; nothing in here blocks.
pub struct Session<S> {
    config: SessionConfig,
    local: PlayerId,
    epoch: u32,
    phase: SessionPhase,
    transport: BroadcastTransport<S>,
    directory: PlayerDirectory,
    reliable: ReliableEngine,
    race: RaceStateBroadcaster,
    items: ItemEventBroadcaster,
    countdown: Option<Tick>,
    announce_pending: bool,
    ready_pending: bool,
    last_heartbeat: Tick,
    now: Tick,
    events: VecDeque<SessionEvent>,
    malformed: u64,
    collisions: u64,
    reported_send_failures: u64,
}

impl<S: DatagramSocket> Session<S> {
    /// Opens the transport and announces ourselves. Fails only when the radio
    /// cannot be brought up.
    pub fn start(
        config: SessionConfig,
        socket: S,
        identity: &impl PlayerIdProvider,
        now: Tick,
    ) -> Result<Self, LinkError> {
        let local = identity.player_id();

        let mut transport = BroadcastTransport::new(socket);
        transport.set_packet_loss(config.packet_loss.clone());
        let local_addr = transport.open(config.port)?;
        let epoch = new_epoch(local_addr, now);

        let directory =
            PlayerDirectory::new(local, local_addr, config.disconnect_timeout_ticks, now);
        let reliable = ReliableEngine::new(local, epoch, config.retransmit_interval);
        let race = RaceStateBroadcaster::new(local, config.car_state_interval);
        let items = ItemEventBroadcaster::new(local);

        log::info!("Session started as {} on {}", local, local_addr);

        let mut session = Self {
            config,
            local,
            epoch,
            phase: SessionPhase::Discovery,
            transport,
            directory,
            reliable,
            race,
            items,
            countdown: None,
            announce_pending: true,
            ready_pending: false,
            last_heartbeat: now,
            now,
            events: VecDeque::new(),
            malformed: 0,
            collisions: 0,
            reported_send_failures: 0,
        };
        session.announce();

        Ok(session)
    }

    pub fn tick(&mut self, now: Tick) {
        if self.phase == SessionPhase::Teardown {
            return;
        }
        self.now = now;

        self.poll();

        for id in self.directory.sweep_timeouts(now).players() {
            log::info!("{} timed out", id);
            self.events.push_back(SessionEvent::PlayerTimedOut { id });
        }

        let connected = self.directory.connected_peers();
        self.reliable.tick(now, connected, &mut self.transport);
        self.apply_delivered();

        if (self.announce_pending || self.ready_pending) && self.phase.is_lobby() {
            self.announce();
        }

        self.update_phase();

        match self.phase {
            phase if phase.is_lobby() => self.heartbeat(),
            SessionPhase::RaceActive => {
                self.race.tick(now, &mut self.transport);
            }
            _ => {}
        }

        self.report_send_failures();
    }

    pub fn current_phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn local_id(&self) -> PlayerId {
        self.local
    }

    /// Random per-session value peers use to tell a restart from a
    /// retransmission.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn directory(&self) -> &PlayerDirectory {
        &self.directory
    }

    /// Every record seen this session, disconnected ones included, so the
    /// lobby can keep showing who left.
    pub fn visible_players(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.directory.iter()
    }

    pub fn is_ready(&self) -> bool {
        self.directory.is_ready(self.local)
    }

    pub fn countdown_remaining(&self) -> Option<Tick> {
        self.countdown
    }

    pub fn countdown_seconds(&self) -> Option<u32> {
        self.countdown
            .map(|remaining| self.config.countdown_seconds(remaining))
    }

    pub fn remote_car_state(&self, id: PlayerId) -> Option<&CarStateSnapshot> {
        if id == self.local {
            return None;
        }
        self.race.remote(id, &self.directory)
    }

    /// Announces a ready toggle. The local flag only changes once the message
    /// is in the send window.
    pub fn submit_ready(&mut self, ready: bool) -> Result<(), LinkError> {
        if !self.phase.is_lobby() {
            return Err(LinkError::InvalidPhase(self.phase));
        }
        if self.directory.is_ready(self.local) == ready {
            return Ok(());
        }

        let message = if ready {
            ControlMessage::Ready
        } else {
            ControlMessage::Unready
        };
        self.reliable.send(
            message,
            self.directory.connected_peers(),
            self.now,
            &mut self.transport,
        )?;

        self.set_ready(self.local, ready);
        Ok(())
    }

    /// Leaves the session from any phase. In the lobby a cancel is sent first
    /// so peers stop counting us as ready; departure itself is left to their
    /// timeout sweep.
    pub fn request_cancel(&mut self) {
        if self.phase == SessionPhase::Teardown {
            return;
        }

        if self.phase.is_lobby() {
            let connected = self.directory.connected_peers();
            if let Err(e) =
                self.reliable
                    .send(ControlMessage::Cancel, connected, self.now, &mut self.transport)
            {
                log::warn!("Cancel not sent: {}", e);
            }
        }

        self.teardown();
    }

    pub fn set_local_car(&mut self, snapshot: CarStateSnapshot) {
        self.race.set_local(snapshot);
    }

    pub fn local_car(&self) -> &CarStateSnapshot {
        self.race.local()
    }

    pub fn send_item(&mut self, event: ItemEvent) -> Result<(), LinkError> {
        if self.phase != SessionPhase::RaceActive {
            return Err(LinkError::InvalidPhase(self.phase));
        }
        self.items.send(event, &mut self.transport)
    }

    /// Remote item events to spawn locally, oldest first.
    pub fn drain_item_events(&mut self) -> impl Iterator<Item = ItemEvent> + '_ {
        self.items.drain()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.events.drain(..)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            transport: *self.transport.stats(),
            reliable: *self.reliable.stats(),
            race: *self.race.stats(),
            items: *self.items.stats(),
            malformed: self.malformed,
            collisions: self.collisions,
            window_occupancy: std::array::from_fn(|index| {
                PlayerId::new(index as u8).map_or(0, |id| self.reliable.occupancy_for(id))
            }),
        }
    }

    pub fn transport(&self) -> &BroadcastTransport<S> {
        &self.transport
    }

    fn poll(&mut self) {
        let mut buf = [0u8; MAX_DATAGRAM];

        for _ in 0..self.config.max_receive_per_tick {
            let Some((size, addr)) = self.transport.receive(&mut buf) else {
                break;
            };

            match Packet::decode(&buf[..size]) {
                Ok(packet) => self.handle_packet(packet, addr),
                Err(e) => {
                    self.malformed += 1;
                    log::warn!("Dropped malformed packet from {}: {}", addr, e);
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let sender = packet.sender;

        let upsert = match self.directory.upsert(addr, sender, self.now) {
            Ok(upsert) => upsert,
            Err(LinkError::IdCollision { id, addr }) => {
                self.collisions += 1;
                log::warn!("Rejected packet from {}: {} is already taken", addr, id);
                self.events.push_back(SessionEvent::IdCollision { id, addr });
                return;
            }
            Err(e) => {
                log::warn!("Rejected packet from {}: {}", addr, e);
                return;
            }
        };

        let was_ready = self.directory.is_ready(sender);
        let restarted = packet
            .message
            .epoch()
            .is_some_and(|epoch| self.directory.note_epoch(sender, epoch));
        if restarted && was_ready {
            self.events.push_back(SessionEvent::ReadyChanged {
                id: sender,
                ready: false,
            });
        }

        if upsert != Upsert::Refreshed || restarted {
            let rejoined = upsert == Upsert::Rejoined || restarted;
            if rejoined {
                self.reliable.forget_peer(sender);
            }
            if restarted {
                log::info!("{} restarted at {}", sender, addr);
            } else {
                log::info!("{} discovered at {}", sender, addr);
            }
            self.events.push_back(SessionEvent::PlayerDiscovered {
                id: sender,
                addr,
                rejoined,
            });
            if self.phase.is_lobby() {
                self.announce_pending = true;
            }
        }

        match packet.message {
            Message::Control {
                sequence,
                base,
                message,
                ..
            } => {
                self.reliable
                    .on_message(sender, sequence, base, message, &mut self.transport);
            }
            Message::Ack { target, sequence } => self.reliable.on_ack(sender, target, sequence),
            Message::CarState(snapshot) if self.phase == SessionPhase::RaceActive => {
                self.race.on_snapshot(snapshot);
            }
            Message::Item(event) if self.phase == SessionPhase::RaceActive => {
                self.items.on_event(event);
            }
            Message::CarState(_) | Message::Item(_) => {
                log::trace!("Ignored race traffic from {} in {:?}", sender, self.phase);
            }
            Message::Heartbeat { .. } => {}
        }
    }

    fn apply_delivered(&mut self) {
        while let Some((from, message)) = self.reliable.pop_delivered() {
            if !self.phase.is_lobby() {
                log::trace!("Ignored {:?} from {} in {:?}", message, from, self.phase);
                continue;
            }

            match message {
                ControlMessage::Join => {
                    log::debug!("{} announced", from);
                    self.ready_pending = true;
                }
                ControlMessage::Ready => self.set_ready(from, true),
                ControlMessage::Unready | ControlMessage::Cancel => self.set_ready(from, false),
                ControlMessage::RaceStart => {
                    let startable = match self.phase {
                        SessionPhase::Countdown => true,
                        SessionPhase::LobbyWait => self.directory.all_ready(),
                        _ => false,
                    };
                    if startable {
                        log::info!("Race start received from {}", from);
                        self.start_race();
                    } else {
                        log::warn!("Ignored race start from {} in {:?}", from, self.phase);
                    }
                }
            }
        }
    }

    fn update_phase(&mut self) {
        match self.phase {
            SessionPhase::Discovery => self.set_phase(SessionPhase::LobbyWait),
            SessionPhase::LobbyWait => {
                if self.directory.all_ready() {
                    let ticks = self.config.countdown_ticks;
                    self.countdown = Some(ticks);
                    self.set_phase(SessionPhase::Countdown);
                    self.events.push_back(SessionEvent::CountdownStarted { ticks });
                }
            }
            SessionPhase::Countdown => {
                if !self.directory.all_ready() {
                    self.countdown = None;
                    self.set_phase(SessionPhase::LobbyWait);
                    self.events.push_back(SessionEvent::CountdownCancelled);
                    return;
                }

                let remaining = self.countdown.unwrap_or(0).saturating_sub(1);
                if remaining == 0 {
                    self.start_race();
                } else {
                    self.countdown = Some(remaining);
                }
            }
            SessionPhase::RaceActive | SessionPhase::Teardown => {}
        }
    }

    fn start_race(&mut self) {
        if self.phase == SessionPhase::RaceActive {
            return;
        }

        self.countdown = None;
        self.announce_pending = false;
        self.ready_pending = false;
        self.reliable.clear_outbound();

        let connected = self.directory.connected_peers();
        if let Err(e) =
            self.reliable
                .send(ControlMessage::RaceStart, connected, self.now, &mut self.transport)
        {
            log::warn!("Race start not sent: {}", e);
        }
        self.reliable.set_draining(true);

        self.race.start(self.now);
        self.set_phase(SessionPhase::RaceActive);
        self.events
            .push_back(SessionEvent::RaceStarted { at: self.now });
    }

    fn teardown(&mut self) {
        self.reliable.reset();
        self.race.reset();
        self.items.reset();
        self.countdown = None;
        self.announce_pending = false;
        self.ready_pending = false;
        self.transport.close();

        self.set_phase(SessionPhase::Teardown);
        self.events.push_back(SessionEvent::TornDown);
    }

    /// Join for newcomers and rejoiners, then Ready when we are ready so
    /// anyone who has just announced learns our state. Whatever does not fit
    /// in the send window is retried next tick.
    fn announce(&mut self) {
        if self.announce_pending {
            if !self.send_announcement(ControlMessage::Join) {
                return;
            }
            self.announce_pending = false;
            self.ready_pending = true;
        }

        if self.ready_pending {
            if self.directory.is_ready(self.local) && !self.send_announcement(ControlMessage::Ready)
            {
                return;
            }
            self.ready_pending = false;
        }
    }

    /// False only when the window is full and the send should be retried.
    fn send_announcement(&mut self, message: ControlMessage) -> bool {
        let peers = self.directory.connected_peers();
        match self.reliable.send(message, peers, self.now, &mut self.transport) {
            Ok(_) => true,
            Err(LinkError::WindowFull) => {
                log::debug!("{:?} deferred: send window full", message);
                false
            }
            Err(e) => {
                log::warn!("{:?} not announced: {}", message, e);
                true
            }
        }
    }

    fn heartbeat(&mut self) {
        if self.now.wrapping_sub(self.last_heartbeat) < self.config.heartbeat_interval {
            return;
        }
        self.last_heartbeat = self.now;

        let packet = Packet::new(self.local, Message::Heartbeat { epoch: self.epoch });
        if let Err(e) = self.transport.send(&packet.encode()) {
            log::debug!("Heartbeat failed: {}", e);
        }
    }

    fn set_ready(&mut self, id: PlayerId, ready: bool) {
        if self.directory.mark_ready(id, ready) {
            log::info!("{} ready={}", id, ready);
            self.events.push_back(SessionEvent::ReadyChanged { id, ready });
        }
    }

    fn set_phase(&mut self, next: SessionPhase) {
        if self.phase == next {
            return;
        }
        log::info!("Session phase {:?} -> {:?}", self.phase, next);
        self.events.push_back(SessionEvent::PhaseChanged {
            from: self.phase,
            to: next,
        });
        self.phase = next;
    }

    fn report_send_failures(&mut self) {
        let failed = self.transport.stats().sends_failed;
        if failed > self.reported_send_failures {
            let count = failed - self.reported_send_failures;
            self.reported_send_failures = failed;
            log::warn!("{} sends failed", count);
            self.events.push_back(SessionEvent::SendFailed { count });
        }
    }
}

fn new_epoch(local_addr: SocketAddr, now: Tick) -> u32 {
    let mut hasher = DefaultHasher::new();
    (rand_u64(), local_addr, now).hash(&mut hasher);
    hasher.finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FixedPlayerId;
    use crate::net::{SimSocket, SimulatedNetwork};
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 8888)
    }

    fn start(net: &SimulatedNetwork, id: u8) -> Session<SimSocket> {
        let identity = FixedPlayerId(PlayerId::new(id).unwrap());
        Session::start(SessionConfig::default(), net.socket(addr(id + 1)), &identity, 0).unwrap()
    }

    fn run(sessions: &mut [Session<SimSocket>], ticks: std::ops::RangeInclusive<Tick>) {
        for now in ticks {
            for session in sessions.iter_mut() {
                session.tick(now);
            }
        }
    }

    #[test]
    fn test_discovery_moves_to_lobby() {
        let net = SimulatedNetwork::new();
        let mut sessions = [start(&net, 0)];
        assert_eq!(sessions[0].current_phase(), SessionPhase::Discovery);

        run(&mut sessions, 1..=1);
        assert_eq!(sessions[0].current_phase(), SessionPhase::LobbyWait);
    }

    #[test]
    fn test_peers_discover_each_other() {
        let net = SimulatedNetwork::new();
        let mut sessions = [start(&net, 0), start(&net, 1)];
        run(&mut sessions, 1..=3);

        for session in &sessions {
            assert_eq!(session.directory().count_connected(), 2);
        }
    }

    #[test]
    fn test_single_ready_peer_does_not_count_down() {
        let net = SimulatedNetwork::new();
        let mut sessions = [start(&net, 0)];
        run(&mut sessions, 1..=1);

        sessions[0].submit_ready(true).unwrap();
        run(&mut sessions, 2..=10);
        assert_eq!(sessions[0].current_phase(), SessionPhase::LobbyWait);
    }

    #[test]
    fn test_race_starts_once() {
        let net = SimulatedNetwork::new();
        let mut sessions = [start(&net, 0), start(&net, 1)];
        run(&mut sessions, 1..=3);

        sessions[0].submit_ready(true).unwrap();
        sessions[1].submit_ready(true).unwrap();
        run(&mut sessions, 4..=6);
        assert!(sessions.iter().all(|s| s.current_phase() == SessionPhase::Countdown));

        run(&mut sessions, 7..=400);
        for session in &mut sessions {
            assert_eq!(session.current_phase(), SessionPhase::RaceActive);
            let starts = session
                .drain_events()
                .filter(|e| matches!(e, SessionEvent::RaceStarted { .. }))
                .count();
            assert_eq!(starts, 1);
        }
    }

    #[test]
    fn test_ready_rejected_outside_lobby() {
        let net = SimulatedNetwork::new();
        let mut session = start(&net, 0);
        session.request_cancel();

        assert!(matches!(
            session.submit_ready(true),
            Err(LinkError::InvalidPhase(SessionPhase::Teardown))
        ));
    }

    #[test]
    fn test_cancel_tears_down_and_clears_ready() {
        let net = SimulatedNetwork::new();
        let mut sessions = [start(&net, 0), start(&net, 1)];
        run(&mut sessions, 1..=3);
        sessions[1].submit_ready(true).unwrap();
        run(&mut sessions, 4..=5);
        assert!(sessions[0].directory().is_ready(PlayerId::new(1).unwrap()));

        sessions[1].request_cancel();
        assert_eq!(sessions[1].current_phase(), SessionPhase::Teardown);
        assert!(!sessions[1].transport().is_open());
        assert!(sessions[1].drain_events().any(|e| e == SessionEvent::TornDown));

        run(&mut sessions, 6..=7);
        assert!(!sessions[0].directory().is_ready(PlayerId::new(1).unwrap()));
    }

    #[test]
    fn test_items_only_during_race() {
        let net = SimulatedNetwork::new();
        let mut session = start(&net, 0);
        let event = ItemEvent {
            action: crate::net::ItemAction::Fire,
            origin: session.local_id(),
            item: 2,
            position: glam::IVec2::ZERO,
            angle: 0,
            speed: 0,
            target: None,
        };

        assert!(matches!(
            session.send_item(event),
            Err(LinkError::InvalidPhase(SessionPhase::Discovery))
        ));
    }

    #[test]
    fn test_countdown_seconds_readout() {
        let net = SimulatedNetwork::new();
        let mut sessions = [start(&net, 0), start(&net, 1)];
        run(&mut sessions, 1..=3);
        sessions[0].submit_ready(true).unwrap();
        sessions[1].submit_ready(true).unwrap();
        run(&mut sessions, 4..=6);

        let remaining = sessions[0].countdown_remaining().unwrap();
        assert_eq!(sessions[0].countdown_seconds(), Some(remaining / 60 + 1));
    }
}
