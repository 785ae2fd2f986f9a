use bytemuck::{Pod, Zeroable};
use glam::IVec2;

use crate::identity::PlayerId;

pub const PACKET_SIZE: usize = 32;
pub const HEADER_SIZE: usize = 4;
pub const PAYLOAD_SIZE: usize = PACKET_SIZE - HEADER_SIZE;
pub const DEFAULT_PORT: u16 = 8888;

const SEQUENCE_WRAP_THRESHOLD: u16 = u16::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Join = 0,
    Ready = 1,
    Unready = 2,
    RaceStart = 3,
    Ack = 4,
    CarState = 5,
    ItemEvent = 6,
    Heartbeat = 7,
    Cancel = 8,
}

impl MessageKind {
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            Self::Join | Self::Ready | Self::Unready | Self::RaceStart | Self::Cancel
        )
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Join,
            1 => Self::Ready,
            2 => Self::Unready,
            3 => Self::RaceStart,
            4 => Self::Ack,
            5 => Self::CarState,
            6 => Self::ItemEvent,
            7 => Self::Heartbeat,
            8 => Self::Cancel,
            other => return Err(PacketError::UnknownKind(other)),
        })
    }
}

/// Lobby control messages carried by the reliable engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Join,
    Ready,
    Unready,
    RaceStart,
    Cancel,
}

impl ControlMessage {
    pub fn kind(self) -> MessageKind {
        match self {
            Self::Join => MessageKind::Join,
            Self::Ready => MessageKind::Ready,
            Self::Unready => MessageKind::Unready,
            Self::RaceStart => MessageKind::RaceStart,
            Self::Cancel => MessageKind::Cancel,
        }
    }

    fn from_kind(kind: MessageKind) -> Option<Self> {
        match kind {
            MessageKind::Join => Some(Self::Join),
            MessageKind::Ready => Some(Self::Ready),
            MessageKind::Unready => Some(Self::Unready),
            MessageKind::RaceStart => Some(Self::RaceStart),
            MessageKind::Cancel => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// Latest known state of one car. Positions and speed are Q16.8 fixed point,
/// the angle is in 512ths of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarStateSnapshot {
    pub player: PlayerId,
    pub position: IVec2,
    pub speed: i32,
    pub angle: i32,
    pub lap: u8,
    pub checkpoint: u8,
    pub item: u8,
}

impl CarStateSnapshot {
    pub fn new(player: PlayerId) -> Self {
        Self {
            player,
            position: IVec2::ZERO,
            speed: 0,
            angle: 0,
            lap: 0,
            checkpoint: 0,
            item: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ItemAction {
    Place = 0,
    Pickup = 1,
    Fire = 2,
}

impl TryFrom<u8> for ItemAction {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Place),
            1 => Ok(Self::Pickup),
            2 => Ok(Self::Fire),
            _ => Err(PacketError::InvalidPayload("item action")),
        }
    }
}

/// A discrete item occurrence. For `Pickup` the target is the item box index,
/// for `Place`/`Fire` it is the homing target car, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemEvent {
    pub action: ItemAction,
    pub origin: PlayerId,
    pub item: u8,
    pub position: IVec2,
    pub angle: i32,
    pub speed: i32,
    pub target: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Control {
        sequence: u16,
        base: u16,
        /// Sender's session incarnation.
        epoch: u32,
        message: ControlMessage,
    },
    Ack {
        target: PlayerId,
        sequence: u16,
    },
    CarState(CarStateSnapshot),
    Item(ItemEvent),
    Heartbeat {
        epoch: u32,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Control { message, .. } => message.kind(),
            Self::Ack { .. } => MessageKind::Ack,
            Self::CarState(_) => MessageKind::CarState,
            Self::Item(_) => MessageKind::ItemEvent,
            Self::Heartbeat { .. } => MessageKind::Heartbeat,
        }
    }

    /// Incarnation of the sending session, for kinds that carry one.
    pub fn epoch(&self) -> Option<u32> {
        match *self {
            Self::Control { epoch, .. } | Self::Heartbeat { epoch } => Some(epoch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub sender: PlayerId,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("expected {PACKET_SIZE} bytes, got {0}")]
    Length(usize),
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("invalid player id {0}")]
    InvalidPlayer(u8),
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct WireFrame {
    kind: u8,
    sender: u8,
    sequence: [u8; 2],
    payload: [u8; PAYLOAD_SIZE],
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct ControlWire {
    base: u16,
    reserved0: u16,
    epoch: u32,
    reserved: [u8; 20],
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct HeartbeatWire {
    epoch: u32,
    reserved: [u8; 24],
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct AckWire {
    target: u8,
    reserved0: u8,
    sequence: u16,
    reserved: [u8; 24],
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct CarStateWire {
    x: i32,
    y: i32,
    speed: i32,
    angle: i32,
    lap: u8,
    checkpoint: u8,
    item: u8,
    reserved: [u8; 9],
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct ItemWire {
    action: u8,
    item: u8,
    target: i16,
    x: i32,
    y: i32,
    angle: i32,
    speed: i32,
    reserved: [u8; 8],
}

const _: () = assert!(size_of::<WireFrame>() == PACKET_SIZE);
const _: () = assert!(size_of::<ControlWire>() == PAYLOAD_SIZE);
const _: () = assert!(size_of::<HeartbeatWire>() == PAYLOAD_SIZE);
const _: () = assert!(size_of::<AckWire>() == PAYLOAD_SIZE);
const _: () = assert!(size_of::<CarStateWire>() == PAYLOAD_SIZE);
const _: () = assert!(size_of::<ItemWire>() == PAYLOAD_SIZE);

impl Packet {
    pub fn new(sender: PlayerId, message: Message) -> Self {
        Self { sender, message }
    }

    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut frame = WireFrame::zeroed();
        frame.kind = self.message.kind() as u8;
        frame.sender = self.sender.raw();

        match self.message {
            Message::Control {
                sequence,
                base,
                epoch,
                ..
            } => {
                frame.sequence = sequence.to_le_bytes();
                let wire = ControlWire {
                    base: base.to_le(),
                    epoch: epoch.to_le(),
                    ..Zeroable::zeroed()
                };
                frame.payload.copy_from_slice(bytemuck::bytes_of(&wire));
            }
            Message::Ack { target, sequence } => {
                let wire = AckWire {
                    target: target.raw(),
                    sequence: sequence.to_le(),
                    ..Zeroable::zeroed()
                };
                frame.payload.copy_from_slice(bytemuck::bytes_of(&wire));
            }
            Message::CarState(state) => {
                let wire = CarStateWire {
                    x: state.position.x.to_le(),
                    y: state.position.y.to_le(),
                    speed: state.speed.to_le(),
                    angle: state.angle.to_le(),
                    lap: state.lap,
                    checkpoint: state.checkpoint,
                    item: state.item,
                    ..Zeroable::zeroed()
                };
                frame.payload.copy_from_slice(bytemuck::bytes_of(&wire));
            }
            Message::Item(event) => {
                let wire = ItemWire {
                    action: event.action as u8,
                    item: event.item,
                    target: event.target.map_or(-1, i16::from).to_le(),
                    x: event.position.x.to_le(),
                    y: event.position.y.to_le(),
                    angle: event.angle.to_le(),
                    speed: event.speed.to_le(),
                    ..Zeroable::zeroed()
                };
                frame.payload.copy_from_slice(bytemuck::bytes_of(&wire));
            }
            Message::Heartbeat { epoch } => {
                let wire = HeartbeatWire {
                    epoch: epoch.to_le(),
                    ..Zeroable::zeroed()
                };
                frame.payload.copy_from_slice(bytemuck::bytes_of(&wire));
            }
        }

        bytemuck::cast(frame)
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        let frame: &WireFrame =
            bytemuck::try_from_bytes(data).map_err(|_| PacketError::Length(data.len()))?;

        let kind = MessageKind::try_from(frame.kind)?;
        let sender = PlayerId::new(frame.sender).ok_or(PacketError::InvalidPlayer(frame.sender))?;

        let message = match kind {
            MessageKind::Ack => {
                let wire: AckWire = bytemuck::pod_read_unaligned(&frame.payload);
                let target =
                    PlayerId::new(wire.target).ok_or(PacketError::InvalidPlayer(wire.target))?;
                Message::Ack {
                    target,
                    sequence: u16::from_le(wire.sequence),
                }
            }
            MessageKind::CarState => {
                let wire: CarStateWire = bytemuck::pod_read_unaligned(&frame.payload);
                Message::CarState(CarStateSnapshot {
                    player: sender,
                    position: IVec2::new(i32::from_le(wire.x), i32::from_le(wire.y)),
                    speed: i32::from_le(wire.speed),
                    angle: i32::from_le(wire.angle),
                    lap: wire.lap,
                    checkpoint: wire.checkpoint,
                    item: wire.item,
                })
            }
            MessageKind::ItemEvent => {
                let wire: ItemWire = bytemuck::pod_read_unaligned(&frame.payload);
                let target = match i16::from_le(wire.target) {
                    -1 => None,
                    t => Some(u8::try_from(t).map_err(|_| PacketError::InvalidPayload("item target"))?),
                };
                Message::Item(ItemEvent {
                    action: ItemAction::try_from(wire.action)?,
                    origin: sender,
                    item: wire.item,
                    position: IVec2::new(i32::from_le(wire.x), i32::from_le(wire.y)),
                    angle: i32::from_le(wire.angle),
                    speed: i32::from_le(wire.speed),
                    target,
                })
            }
            MessageKind::Heartbeat => {
                let wire: HeartbeatWire = bytemuck::pod_read_unaligned(&frame.payload);
                Message::Heartbeat {
                    epoch: u32::from_le(wire.epoch),
                }
            }
            reliable => {
                let wire: ControlWire = bytemuck::pod_read_unaligned(&frame.payload);
                let message = ControlMessage::from_kind(reliable)
                    .ok_or(PacketError::InvalidPayload("control kind"))?;
                Message::Control {
                    sequence: u16::from_le_bytes(frame.sequence),
                    base: u16::from_le(wire.base),
                    epoch: u32::from_le(wire.epoch),
                    message,
                }
            }
        };

        Ok(Self { sender, message })
    }
}
