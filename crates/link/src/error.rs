use std::io;
use std::net::SocketAddr;

use crate::identity::PlayerId;
use crate::session::SessionPhase;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("could not start multiplayer: {0}")]
    TransportUnavailable(#[source] io::Error),
    #[error("transport already open")]
    AlreadyOpen,
    #[error("transport not open")]
    NotOpen,
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),
    #[error("reliable send window full")]
    WindowFull,
    #[error("reliable engine is draining, no new sends")]
    Draining,
    #[error("operation not allowed in {0:?}")]
    InvalidPhase(SessionPhase),
    #[error("player id {id} already claimed by another peer ({addr})")]
    IdCollision { id: PlayerId, addr: SocketAddr },
}
