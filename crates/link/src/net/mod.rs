mod protocol;
pub mod simulator;
mod stats;
mod transport;

pub use protocol::sequence_greater_than;
pub use protocol::{
    CarStateSnapshot, ControlMessage, DEFAULT_PORT, HEADER_SIZE, ItemAction, ItemEvent, Message,
    MessageKind, PACKET_SIZE, PAYLOAD_SIZE, Packet, PacketError,
};
pub use simulator::{SimDatagram, SimSocket, SimulatedNetwork, Verdict};
pub use stats::{PacketLossSimulation, TransportStats};
pub(crate) use stats::rand_u64;
pub use transport::{BroadcastTransport, DatagramSocket, MAX_DATAGRAM, UdpBroadcastSocket};
