use std::f32::consts::TAU;

use glam::Vec2;

use kartlink::{CarStateSnapshot, ItemAction, ItemEvent, PlayerId, Tick};

/// Q16.8 scale used on the wire.
const FIXED_ONE: f32 = 256.0;
/// Angle units per full turn.
const ANGLE_STEPS: f32 = 512.0;
const TRACK_RADIUS: f32 = 48.0;
const LANE_WIDTH: f32 = 2.0;
const LAP_SECONDS: f32 = 12.0;
const CHECKPOINTS: f32 = 8.0;
const ITEM_INTERVAL: Tick = 300;

/// Stand-in driver that laps a circular track so race traffic has something
/// to carry.
pub struct ScriptedCar {
    id: PlayerId,
    heading: f32,
    lap: u8,
    item: u8,
}

impl ScriptedCar {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            heading: 0.0,
            lap: 0,
            item: 0,
        }
    }

    pub fn lap(&self) -> u8 {
        self.lap
    }

    pub fn step(&mut self, dt: f32) -> CarStateSnapshot {
        let angular_speed = TAU / LAP_SECONDS;
        self.heading += angular_speed * dt;
        if self.heading >= TAU {
            self.heading -= TAU;
            self.lap = self.lap.saturating_add(1);
        }

        let radius = TRACK_RADIUS + self.id.raw() as f32 * LANE_WIDTH;
        let position = Vec2::new(self.heading.cos(), self.heading.sin()) * radius;
        let travel = (self.heading + TAU / 4.0).rem_euclid(TAU);

        CarStateSnapshot {
            player: self.id,
            position: (position * FIXED_ONE).as_ivec2(),
            speed: (radius * angular_speed * FIXED_ONE) as i32,
            angle: (travel / TAU * ANGLE_STEPS) as i32 % ANGLE_STEPS as i32,
            lap: self.lap,
            checkpoint: ((self.heading / TAU * CHECKPOINTS) as u8).min(CHECKPOINTS as u8 - 1),
            item: self.item,
        }
    }

    /// Fires whatever is held every few seconds of race time.
    pub fn fire(&mut self, race_tick: Tick, state: &CarStateSnapshot) -> Option<ItemEvent> {
        if race_tick == 0 || race_tick % ITEM_INTERVAL != 0 {
            return None;
        }

        let item = self.item;
        self.item = (self.item + 1) % 4;

        Some(ItemEvent {
            action: ItemAction::Fire,
            origin: self.id,
            item,
            position: state.position,
            angle: state.angle,
            speed: state.speed * 2,
            target: None,
        })
    }
}
