use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use kartlink::{
    DatagramSocket, Diagnostics, LinkError, PlayerId, PlayerRecord, Session, SessionEvent,
    SessionPhase, Tick,
};

use crate::car::ScriptedCar;
use crate::config::PeerConfig;

/// What the dashboard shows each frame.
pub struct PeerView {
    pub tick: Tick,
    pub phase: SessionPhase,
    pub local: PlayerId,
    pub ready: bool,
    pub countdown_seconds: Option<u32>,
    pub players: Vec<PlayerRecord>,
    pub diagnostics: Diagnostics,
    pub lap: u8,
    pub items_spawned: u64,
}

/// Drives one session from a fixed-rate clock, standing in for the game's
/// frame callback.
pub struct PeerNode<S> {
    session: Session<S>,
    car: ScriptedCar,
    config: PeerConfig,
    tick: Tick,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    running: Arc<AtomicBool>,
    race_started_at: Option<Tick>,
    items_spawned: u64,
}

impl<S: DatagramSocket> PeerNode<S> {
    pub fn new(session: Session<S>, config: PeerConfig) -> Self {
        let tick_rate = config.session.tick_rate.max(1);
        Self {
            car: ScriptedCar::new(session.local_id()),
            session,
            config,
            tick: 0,
            tick_duration: Duration::from_secs_f64(1.0 / tick_rate as f64),
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            running: Arc::new(AtomicBool::new(true)),
            race_started_at: None,
            items_spawned: 0,
        }
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.session.drain_events()
    }

    /// Headless loop; logs the event feed until the session is torn down.
    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.session.drain_events() {
                log::info!("{}", event);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta.min(Duration::from_millis(250));

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.step();
        }
    }

    pub fn toggle_ready(&mut self) -> Result<(), LinkError> {
        let ready = !self.session.is_ready();
        self.session.submit_ready(ready)
    }

    pub fn shutdown(&mut self) {
        self.session.request_cancel();
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn view(&self) -> PeerView {
        PeerView {
            tick: self.tick,
            phase: self.session.current_phase(),
            local: self.session.local_id(),
            ready: self.session.is_ready(),
            countdown_seconds: self.session.countdown_seconds(),
            players: self.session.visible_players().copied().collect(),
            diagnostics: self.session.diagnostics(),
            lap: self.car.lap(),
            items_spawned: self.items_spawned,
        }
    }

    fn step(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.session.tick(self.tick);

        match self.session.current_phase() {
            SessionPhase::LobbyWait if self.config.auto_ready && !self.session.is_ready() => {
                if let Err(e) = self.session.submit_ready(true) {
                    log::debug!("Auto ready deferred: {}", e);
                }
            }
            SessionPhase::RaceActive => self.drive(),
            SessionPhase::Teardown => self.running.store(false, Ordering::SeqCst),
            _ => {}
        }
    }

    fn drive(&mut self) {
        let started_at = *self.race_started_at.get_or_insert(self.tick);
        let race_tick = self.tick.wrapping_sub(started_at);

        let dt = self.tick_duration.as_secs_f32();
        let state = self.car.step(dt);
        self.session.set_local_car(state);

        if let Some(event) = self.car.fire(race_tick, &state) {
            if let Err(e) = self.session.send_item(event) {
                log::warn!("Item not sent: {}", e);
            }
        }

        for event in self.session.drain_item_events() {
            log::debug!("Spawn {:?} from {}", event.action, event.origin);
            self.items_spawned += 1;
        }

        if self.config.race_ticks.is_some_and(|limit| race_tick >= limit) {
            log::info!("Race time limit reached after {} ticks", race_tick);
            self.shutdown();
        }
    }
}
