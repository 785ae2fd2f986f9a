pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod net;
pub mod race;
pub mod reliable;
pub mod session;

pub use config::{DEFAULT_TICK_RATE, SessionConfig};
pub use directory::{PlayerDirectory, PlayerRecord, Tick, Upsert};
pub use error::LinkError;
pub use identity::{FixedPlayerId, MAX_PLAYERS, MacAddressId, PeerMask, PlayerId, PlayerIdProvider};
pub use net::{
    BroadcastTransport, CarStateSnapshot, ControlMessage, DEFAULT_PORT, DatagramSocket, ItemAction,
    ItemEvent, Message, MessageKind, PACKET_SIZE, Packet, PacketError, PacketLossSimulation,
    SimulatedNetwork, TransportStats, UdpBroadcastSocket,
};
pub use race::{ItemEventBroadcaster, RaceStateBroadcaster};
pub use reliable::{ReliableEngine, ReliableStats, WINDOW_SIZE};
pub use session::{Diagnostics, Session, SessionEvent, SessionPhase};
