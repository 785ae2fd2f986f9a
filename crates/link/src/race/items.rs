use std::collections::VecDeque;

use crate::error::LinkError;
use crate::identity::PlayerId;
use crate::net::{BroadcastTransport, DatagramSocket, ItemEvent, Message, Packet};

/// Received events waiting for the host to spawn them. The oldest is
/// discarded when the host falls behind.
pub const MAX_PENDING_ITEM_EVENTS: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemStats {
    pub sent: u64,
    pub received: u64,
    pub ignored_own: u64,
    pub overflowed: u64,
}

/// Fire-and-forget item events. Lost or duplicated events are not
/// reconciled.
#[derive(Debug)]
pub struct ItemEventBroadcaster {
    local: PlayerId,
    inbox: VecDeque<ItemEvent>,
    stats: ItemStats,
}

impl ItemEventBroadcaster {
    pub fn new(local: PlayerId) -> Self {
        Self {
            local,
            inbox: VecDeque::with_capacity(MAX_PENDING_ITEM_EVENTS),
            stats: ItemStats::default(),
        }
    }

    pub fn stats(&self) -> &ItemStats {
        &self.stats
    }

    /// Transmits one event stamped with the local player as origin.
    pub fn send<S: DatagramSocket>(
        &mut self,
        event: ItemEvent,
        transport: &mut BroadcastTransport<S>,
    ) -> Result<(), LinkError> {
        let event = ItemEvent {
            origin: self.local,
            ..event
        };
        transport.send(&Packet::new(self.local, Message::Item(event)).encode())?;
        self.stats.sent += 1;
        Ok(())
    }

    /// Queues a remote event for spawning. Our own events never spawn here;
    /// the shooter is immune to what it fired.
    pub fn on_event(&mut self, event: ItemEvent) {
        if event.origin == self.local {
            self.stats.ignored_own += 1;
            return;
        }

        if self.inbox.len() >= MAX_PENDING_ITEM_EVENTS {
            self.inbox.pop_front();
            self.stats.overflowed += 1;
        }
        self.inbox.push_back(event);
        self.stats.received += 1;
    }

    pub fn drain(&mut self) -> impl Iterator<Item = ItemEvent> + '_ {
        self.inbox.drain(..)
    }

    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    pub fn reset(&mut self) {
        self.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ItemAction, MAX_DATAGRAM, SimulatedNetwork};
    use glam::IVec2;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn player(raw: u8) -> PlayerId {
        PlayerId::new(raw).unwrap()
    }

    fn banana(origin: PlayerId) -> ItemEvent {
        ItemEvent {
            action: ItemAction::Place,
            origin,
            item: 1,
            position: IVec2::new(2560, 1280),
            angle: 128,
            speed: 0,
            target: None,
        }
    }

    #[test]
    fn test_own_events_ignored() {
        let mut items = ItemEventBroadcaster::new(player(2));
        items.on_event(banana(player(2)));
        items.on_event(banana(player(4)));

        let spawned: Vec<ItemEvent> = items.drain().collect();
        assert_eq!(spawned, vec![banana(player(4))]);
        assert_eq!(items.stats().ignored_own, 1);
        assert_eq!(items.pending(), 0);
    }

    #[test]
    fn test_inbox_drops_oldest() {
        let mut items = ItemEventBroadcaster::new(player(0));
        for angle in 0..(MAX_PENDING_ITEM_EVENTS as i32 + 3) {
            items.on_event(ItemEvent {
                angle,
                ..banana(player(1))
            });
        }

        assert_eq!(items.pending(), MAX_PENDING_ITEM_EVENTS);
        assert_eq!(items.stats().overflowed, 3);
        assert_eq!(items.drain().next().map(|e| e.angle), Some(3));
    }

    #[test]
    fn test_send_stamps_origin() {
        let addr = |last| SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 8888);
        let net = SimulatedNetwork::new();
        let mut tx = BroadcastTransport::new(net.socket(addr(1)));
        let mut rx = BroadcastTransport::new(net.socket(addr(2)));
        tx.open(8888).unwrap();
        rx.open(8888).unwrap();

        let mut items = ItemEventBroadcaster::new(player(5));
        items.send(banana(player(0)), &mut tx).unwrap();

        let mut buf = [0u8; MAX_DATAGRAM];
        let (size, _) = rx.receive(&mut buf).unwrap();
        let packet = Packet::decode(&buf[..size]).unwrap();
        assert_eq!(packet.message, Message::Item(banana(player(5))));
    }
}
