mod window;

pub use window::{PendingMessage, ReceiveWindow, Receipt, SendWindow, WINDOW_SIZE};

use std::collections::VecDeque;

use crate::directory::Tick;
use crate::error::LinkError;
use crate::identity::{MAX_PLAYERS, PeerMask, PlayerId};
use crate::net::{BroadcastTransport, ControlMessage, DatagramSocket, Message, Packet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReliableStats {
    pub sent: u64,
    pub retransmitted: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub out_of_window: u64,
    pub window_full: u64,
}

/// Selective-Repeat ARQ for lobby control messages. One send window for the
/// local stream and one receive window per remote sender.
#[derive(Debug)]
pub struct ReliableEngine {
    local: PlayerId,
    epoch: u32,
    window: SendWindow,
    receivers: [ReceiveWindow; MAX_PLAYERS],
    delivered: VecDeque<(PlayerId, ControlMessage)>,
    retransmit_interval: Tick,
    draining: bool,
    stats: ReliableStats,
}

impl ReliableEngine {
    pub fn new(local: PlayerId, epoch: u32, retransmit_interval: Tick) -> Self {
        Self {
            local,
            epoch,
            window: SendWindow::new(),
            receivers: std::array::from_fn(|_| ReceiveWindow::new()),
            delivered: VecDeque::new(),
            retransmit_interval: retransmit_interval.max(1),
            draining: false,
            stats: ReliableStats::default(),
        }
    }

    pub fn stats(&self) -> &ReliableStats {
        &self.stats
    }

    pub fn window(&self) -> &SendWindow {
        &self.window
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Closes the engine to new sends. Outstanding messages keep being
    /// retransmitted and incoming duplicates keep being acked.
    pub fn set_draining(&mut self, draining: bool) {
        self.draining = draining;
    }

    pub fn occupancy_for(&self, peer: PlayerId) -> usize {
        self.window.occupancy_for(peer)
    }

    /// Queues `message` for every peer in `awaiting` and transmits it once
    /// right away. A failed transmission is left to the retransmit timer.
    pub fn send<S: DatagramSocket>(
        &mut self,
        message: ControlMessage,
        awaiting: PeerMask,
        now: Tick,
        transport: &mut BroadcastTransport<S>,
    ) -> Result<u16, LinkError> {
        if self.draining {
            return Err(LinkError::Draining);
        }

        let awaiting = awaiting - PeerMask::single(self.local);
        let sequence = match self.window.push(message, awaiting, now) {
            Ok(sequence) => sequence,
            Err(e) => {
                self.stats.window_full += 1;
                return Err(e);
            }
        };

        self.stats.sent += 1;
        self.transmit(sequence, message, transport);
        log::debug!("Sent {:?} seq={} awaiting={:?}", message, sequence, awaiting);

        if awaiting.is_empty() {
            self.window.retain_peers(PeerMask::all());
        }

        Ok(sequence)
    }

    pub fn on_ack(&mut self, from: PlayerId, target: PlayerId, sequence: u16) {
        if target != self.local {
            return;
        }

        self.stats.acks_received += 1;
        if self.window.acknowledge(sequence, from) {
            log::debug!("seq={} acknowledged by every peer", sequence);
        }
    }

    pub fn on_message<S: DatagramSocket>(
        &mut self,
        from: PlayerId,
        sequence: u16,
        base: u16,
        message: ControlMessage,
        transport: &mut BroadcastTransport<S>,
    ) -> Receipt {
        let delivered = &mut self.delivered;
        let stats = &mut self.stats;
        let receipt = self.receivers[from.index()].receive(sequence, base, message, |m| {
            stats.delivered += 1;
            delivered.push_back((from, m));
        });

        match receipt {
            Receipt::OutOfWindow => {
                self.stats.out_of_window += 1;
                log::debug!("Dropped seq={} from {}: beyond window", sequence, from);
                return receipt;
            }
            Receipt::Duplicate => {
                self.stats.duplicates += 1;
                log::trace!("Duplicate seq={} from {}", sequence, from);
            }
            Receipt::Accepted => {}
        }

        let ack = Packet::new(self.local, Message::Ack { target: from, sequence });
        if let Err(e) = transport.send(&ack.encode()) {
            log::warn!("Ack to {} failed: {}", from, e);
        } else {
            self.stats.acks_sent += 1;
        }

        receipt
    }

    /// Releases obligations owed by peers outside `connected` and retransmits
    /// whatever has waited a full interval.
    pub fn tick<S: DatagramSocket>(
        &mut self,
        now: Tick,
        connected: PeerMask,
        transport: &mut BroadcastTransport<S>,
    ) {
        let released = self.window.retain_peers(connected);
        if released > 0 {
            log::debug!("Released {} messages owed by departed peers", released);
        }

        for pending in self.window.due(now, self.retransmit_interval).into_iter().flatten() {
            self.stats.retransmitted += 1;
            log::trace!(
                "Retransmit {:?} seq={} (#{})",
                pending.message,
                pending.sequence,
                pending.transmissions
            );
            self.transmit(pending.sequence, pending.message, transport);
        }
    }

    /// Next control message released in order, oldest first.
    pub fn pop_delivered(&mut self) -> Option<(PlayerId, ControlMessage)> {
        self.delivered.pop_front()
    }

    /// Discards every outstanding outbound message.
    pub fn clear_outbound(&mut self) {
        self.window.clear();
    }

    /// A peer that left and came back starts a fresh stream.
    pub fn forget_peer(&mut self, peer: PlayerId) {
        self.receivers[peer.index()].reset();
    }

    pub fn reset(&mut self) {
        self.window.clear();
        for receiver in &mut self.receivers {
            receiver.reset();
        }
        self.delivered.clear();
        self.draining = false;
    }

    fn transmit<S: DatagramSocket>(
        &mut self,
        sequence: u16,
        message: ControlMessage,
        transport: &mut BroadcastTransport<S>,
    ) {
        let packet = Packet::new(
            self.local,
            Message::Control {
                sequence,
                base: self.window.base(),
                epoch: self.epoch,
                message,
            },
        );
        if let Err(e) = transport.send(&packet.encode()) {
            log::warn!("Transmit of seq={} failed: {}", sequence, e);
        }
    }
}
