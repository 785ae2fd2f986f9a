use serde::{Deserialize, Serialize};

use crate::net::{DEFAULT_PORT, PacketLossSimulation};

pub const DEFAULT_TICK_RATE: u32 = 60;

/// Tick-based timing for one session. All intervals are in host frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub port: u16,
    pub tick_rate: u32,
    pub disconnect_timeout_ticks: u32,
    pub countdown_ticks: u32,
    pub car_state_interval: u32,
    pub retransmit_interval: u32,
    pub heartbeat_interval: u32,
    pub max_receive_per_tick: usize,
    pub packet_loss: PacketLossSimulation,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tick_rate: DEFAULT_TICK_RATE,
            disconnect_timeout_ticks: 3 * DEFAULT_TICK_RATE,
            countdown_ticks: 3 * DEFAULT_TICK_RATE,
            car_state_interval: 4,
            retransmit_interval: 30,
            heartbeat_interval: DEFAULT_TICK_RATE,
            max_receive_per_tick: 64,
            packet_loss: PacketLossSimulation::default(),
        }
    }
}

impl SessionConfig {
    /// Whole seconds left on a countdown, rounded up for display.
    pub fn countdown_seconds(&self, remaining_ticks: u32) -> u32 {
        remaining_ticks / self.tick_rate.max(1) + 1
    }
}
