use std::fmt;
use std::net::SocketAddr;

use crate::directory::Tick;
use crate::identity::PlayerId;

use super::SessionPhase;

/// Lifecycle notifications for the host UI, drained once per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },
    PlayerDiscovered {
        id: PlayerId,
        addr: SocketAddr,
        rejoined: bool,
    },
    PlayerTimedOut {
        id: PlayerId,
    },
    ReadyChanged {
        id: PlayerId,
        ready: bool,
    },
    CountdownStarted {
        ticks: Tick,
    },
    CountdownCancelled,
    RaceStarted {
        at: Tick,
    },
    IdCollision {
        id: PlayerId,
        addr: SocketAddr,
    },
    SendFailed {
        count: u64,
    },
    TornDown,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhaseChanged { from, to } => write!(f, "{:?} -> {:?}", from, to),
            Self::PlayerDiscovered { id, addr, rejoined: false } => {
                write!(f, "{} joined from {}", id, addr)
            }
            Self::PlayerDiscovered { id, addr, rejoined: true } => {
                write!(f, "{} rejoined from {}", id, addr)
            }
            Self::PlayerTimedOut { id } => write!(f, "{} timed out", id),
            Self::ReadyChanged { id, ready: true } => write!(f, "{} is ready", id),
            Self::ReadyChanged { id, ready: false } => write!(f, "{} is not ready", id),
            Self::CountdownStarted { ticks } => write!(f, "Countdown started ({} ticks)", ticks),
            Self::CountdownCancelled => write!(f, "Countdown cancelled"),
            Self::RaceStarted { at } => write!(f, "Race started at tick {}", at),
            Self::IdCollision { id, addr } => write!(f, "{} claimed by {} as well", id, addr),
            Self::SendFailed { count } => write!(f, "{} sends failed", count),
            Self::TornDown => write!(f, "Session closed"),
        }
    }
}
