use crate::directory::Tick;
use crate::error::LinkError;
use crate::identity::{PeerMask, PlayerId};
use crate::net::{ControlMessage, sequence_greater_than};

/// Maximum reliable messages outstanding at once, per sender.
pub const WINDOW_SIZE: usize = 8;

const WINDOW: u16 = WINDOW_SIZE as u16;

#[inline]
fn slot_of(sequence: u16) -> usize {
    sequence as usize % WINDOW_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMessage {
    pub sequence: u16,
    pub message: ControlMessage,
    /// Peers that still owe an ack.
    pub awaiting: PeerMask,
    pub last_sent: Tick,
    pub transmissions: u32,
}

/// Sender half of the Selective-Repeat window. Each message stays until every
/// peer it was addressed to has acked it, or has left the directory.
#[derive(Debug, Default)]
pub struct SendWindow {
    slots: [Option<PendingMessage>; WINDOW_SIZE],
    next_sequence: u16,
}

impl SendWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    /// Oldest outstanding sequence, or the next one to be assigned when the
    /// window is empty.
    pub fn base(&self) -> u16 {
        self.slots
            .iter()
            .flatten()
            .map(|p| p.sequence)
            .max_by_key(|s| self.next_sequence.wrapping_sub(*s))
            .unwrap_or(self.next_sequence)
    }

    pub fn is_full(&self) -> bool {
        self.next_sequence.wrapping_sub(self.base()) >= WINDOW
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn push(
        &mut self,
        message: ControlMessage,
        awaiting: PeerMask,
        now: Tick,
    ) -> Result<u16, LinkError> {
        if self.is_full() {
            return Err(LinkError::WindowFull);
        }

        let sequence = self.next_sequence;
        self.next_sequence = sequence.wrapping_add(1);
        self.slots[slot_of(sequence)] = Some(PendingMessage {
            sequence,
            message,
            awaiting,
            last_sent: now,
            transmissions: 1,
        });

        Ok(sequence)
    }

    pub fn get(&self, sequence: u16) -> Option<&PendingMessage> {
        self.slots[slot_of(sequence)]
            .as_ref()
            .filter(|p| p.sequence == sequence)
    }

    /// Clears `from`'s obligation for `sequence`. Returns true when that
    /// completed the message.
    pub fn acknowledge(&mut self, sequence: u16, from: PlayerId) -> bool {
        let slot = &mut self.slots[slot_of(sequence)];
        let Some(pending) = slot.as_mut().filter(|p| p.sequence == sequence) else {
            return false;
        };

        pending.awaiting.remove(PeerMask::single(from));
        if pending.awaiting.is_empty() {
            *slot = None;
            return true;
        }
        false
    }

    /// Drops obligations owed by peers no longer in `connected` and releases
    /// messages left with nobody to wait for. Returns how many were released.
    pub fn retain_peers(&mut self, connected: PeerMask) -> usize {
        let mut released = 0;
        for slot in &mut self.slots {
            if let Some(pending) = slot {
                pending.awaiting &= connected;
                if pending.awaiting.is_empty() {
                    *slot = None;
                    released += 1;
                }
            }
        }
        released
    }

    /// Messages due for retransmission at `now`, oldest first, packed at
    /// the front.
    pub fn due(&mut self, now: Tick, interval: Tick) -> [Option<PendingMessage>; WINDOW_SIZE] {
        let base = self.base();
        let mut due = [None; WINDOW_SIZE];
        for (out, pending) in due.iter_mut().zip(
            self.slots
                .iter_mut()
                .flatten()
                .filter(|p| now.wrapping_sub(p.last_sent) >= interval),
        ) {
            pending.last_sent = now;
            pending.transmissions += 1;
            *out = Some(*pending);
        }
        due.sort_unstable_by_key(|p| p.map_or(u16::MAX, |p| p.sequence.wrapping_sub(base)));
        due
    }

    pub fn occupancy(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn occupancy_for(&self, peer: PlayerId) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|p| p.awaiting.has(peer))
            .count()
    }

    /// Forgets every outstanding message. The sequence counter keeps running
    /// so peers never mistake new traffic for duplicates.
    pub fn clear(&mut self) {
        self.slots = [None; WINDOW_SIZE];
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// New message; acked and buffered or released.
    Accepted,
    /// Seen before; acked again, never re-delivered.
    Duplicate,
    /// Too far ahead to buffer; dropped without an ack.
    OutOfWindow,
}

/// Receiver half of the window, one per remote sender. Releases messages to
/// the caller strictly in sequence order, each exactly once.
#[derive(Debug, Default)]
pub struct ReceiveWindow {
    next_expected: Option<u16>,
    buffered: [Option<(u16, ControlMessage)>; WINDOW_SIZE],
}

impl ReceiveWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_expected(&self) -> Option<u16> {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.buffered.iter().flatten().count()
    }

    pub fn receive<F>(&mut self, sequence: u16, base: u16, message: ControlMessage, mut deliver: F) -> Receipt
    where
        F: FnMut(ControlMessage),
    {
        let expected = *self.next_expected.get_or_insert(base);
        if sequence_greater_than(base, expected) {
            self.advance_to(base, &mut deliver);
        }

        let expected = self.next_expected.unwrap_or(base);
        if sequence_greater_than(expected, sequence) {
            return Receipt::Duplicate;
        }
        if sequence.wrapping_sub(expected) >= WINDOW {
            return Receipt::OutOfWindow;
        }

        let slot = &mut self.buffered[slot_of(sequence)];
        if slot.is_some_and(|(s, _)| s == sequence) {
            return Receipt::Duplicate;
        }
        *slot = Some((sequence, message));

        self.release_in_order(&mut deliver);
        Receipt::Accepted
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The sender has given up on everything below `target`: deliver what we
    /// hold from the gap and skip the rest.
    fn advance_to<F: FnMut(ControlMessage)>(&mut self, target: u16, deliver: &mut F) {
        let Some(mut expected) = self.next_expected else {
            return;
        };

        let gap = target.wrapping_sub(expected).min(WINDOW);
        for _ in 0..gap {
            if let Some(message) = self.take(expected) {
                deliver(message);
            }
            expected = expected.wrapping_add(1);
        }

        self.next_expected = Some(target);
        self.release_in_order(deliver);
    }

    fn release_in_order<F: FnMut(ControlMessage)>(&mut self, deliver: &mut F) {
        while let Some(expected) = self.next_expected {
            let Some(message) = self.take(expected) else {
                break;
            };
            deliver(message);
            self.next_expected = Some(expected.wrapping_add(1));
        }
    }

    fn take(&mut self, sequence: u16) -> Option<ControlMessage> {
        self.buffered[slot_of(sequence)]
            .take_if(|(s, _)| *s == sequence)
            .map(|(_, message)| message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(raw: u8) -> PlayerId {
        PlayerId::new(raw).unwrap()
    }

    fn collect(window: &mut ReceiveWindow, sequence: u16, base: u16) -> (Receipt, Vec<ControlMessage>) {
        let mut out = Vec::new();
        let receipt = window.receive(sequence, base, ControlMessage::Ready, |m| out.push(m));
        (receipt, out)
    }

    #[test]
    fn test_send_window_fills_at_eight() {
        let mut window = SendWindow::new();
        for expected in 0..WINDOW {
            assert_eq!(window.push(ControlMessage::Join, PeerMask::P1, 0).unwrap(), expected);
        }
        assert!(window.is_full());
        assert!(matches!(
            window.push(ControlMessage::Ready, PeerMask::P1, 0),
            Err(LinkError::WindowFull)
        ));
    }

    #[test]
    fn test_oldest_unacked_holds_the_window() {
        let mut window = SendWindow::new();
        for _ in 0..WINDOW {
            window.push(ControlMessage::Join, PeerMask::P1, 0).unwrap();
        }

        for sequence in 1..WINDOW {
            assert!(window.acknowledge(sequence, player(1)));
        }
        assert_eq!(window.base(), 0);
        assert!(window.is_full());

        assert!(window.acknowledge(0, player(1)));
        assert_eq!(window.base(), WINDOW);
        assert!(!window.is_full());
        assert!(window.is_empty());
    }

    #[test]
    fn test_every_peer_must_ack() {
        let mut window = SendWindow::new();
        let seq = window.push(ControlMessage::Ready, PeerMask::P1 | PeerMask::P2, 0).unwrap();

        assert!(!window.acknowledge(seq, player(1)));
        assert!(!window.acknowledge(seq, player(1)));
        assert_eq!(window.occupancy_for(player(2)), 1);
        assert_eq!(window.occupancy_for(player(1)), 0);
        assert!(window.acknowledge(seq, player(2)));
        assert_eq!(window.occupancy(), 0);
    }

    #[test]
    fn test_departed_peer_releases_obligation() {
        let mut window = SendWindow::new();
        window.push(ControlMessage::Ready, PeerMask::P1 | PeerMask::P2, 0).unwrap();
        window.push(ControlMessage::Unready, PeerMask::P2, 0).unwrap();

        assert_eq!(window.retain_peers(PeerMask::P1), 1);
        assert_eq!(window.occupancy(), 1);
        assert_eq!(window.get(0).unwrap().awaiting, PeerMask::P1);
    }

    #[test]
    fn test_retransmit_interval() {
        let mut window = SendWindow::new();
        window.push(ControlMessage::Join, PeerMask::P1, 10).unwrap();
        window.push(ControlMessage::Ready, PeerMask::P1, 15).unwrap();

        assert!(window.due(39, 30).iter().all(Option::is_none));
        let due = window.due(40, 30);
        assert_eq!(due.iter().flatten().count(), 1);
        let first = due[0].unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.transmissions, 2);

        let due = window.due(70, 30);
        assert_eq!(
            due.iter().flatten().map(|p| p.sequence).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn test_sequence_wraps() {
        let mut window = SendWindow {
            next_sequence: u16::MAX - 1,
            ..SendWindow::default()
        };
        for _ in 0..4 {
            window.push(ControlMessage::Join, PeerMask::P3, 0).unwrap();
        }
        assert_eq!(window.base(), u16::MAX - 1);
        assert_eq!(window.next_sequence(), 2);
        assert!(window.acknowledge(u16::MAX - 1, player(3)));
        assert_eq!(window.base(), u16::MAX);

        let due = window.due(30, 30);
        assert_eq!(
            due.iter().flatten().map(|p| p.sequence).collect::<Vec<_>>(),
            vec![u16::MAX, 0, 1]
        );
    }

    #[test]
    fn test_receive_in_order() {
        let mut window = ReceiveWindow::new();
        assert_eq!(collect(&mut window, 0, 0), (Receipt::Accepted, vec![ControlMessage::Ready]));
        assert_eq!(collect(&mut window, 1, 0), (Receipt::Accepted, vec![ControlMessage::Ready]));
        assert_eq!(window.next_expected(), Some(2));
    }

    #[test]
    fn test_out_of_order_is_buffered() {
        let mut window = ReceiveWindow::new();
        let mut out = Vec::new();

        window.receive(2, 0, ControlMessage::Unready, |m| out.push(m));
        window.receive(1, 0, ControlMessage::Ready, |m| out.push(m));
        assert!(out.is_empty());
        assert_eq!(window.buffered(), 2);

        window.receive(0, 0, ControlMessage::Join, |m| out.push(m));
        assert_eq!(
            out,
            vec![ControlMessage::Join, ControlMessage::Ready, ControlMessage::Unready]
        );
        assert_eq!(window.buffered(), 0);
    }

    #[test]
    fn test_duplicates_never_redelivered() {
        let mut window = ReceiveWindow::new();
        collect(&mut window, 0, 0);
        assert_eq!(collect(&mut window, 0, 0), (Receipt::Duplicate, vec![]));

        collect(&mut window, 3, 0);
        assert_eq!(collect(&mut window, 3, 0), (Receipt::Duplicate, vec![]));
    }

    #[test]
    fn test_beyond_window_dropped() {
        let mut window = ReceiveWindow::new();
        assert_eq!(collect(&mut window, 8, 0), (Receipt::OutOfWindow, vec![]));
        assert_eq!(collect(&mut window, 7, 0).0, Receipt::Accepted);
    }

    #[test]
    fn test_late_joiner_starts_at_base() {
        let mut window = ReceiveWindow::new();
        assert_eq!(collect(&mut window, 41, 41), (Receipt::Accepted, vec![ControlMessage::Ready]));
        assert_eq!(collect(&mut window, 40, 41).0, Receipt::Duplicate);
    }

    #[test]
    fn test_base_skips_abandoned_gap() {
        let mut window = ReceiveWindow::new();
        let mut out = Vec::new();
        window.receive(0, 0, ControlMessage::Join, |m| out.push(m));
        window.receive(2, 0, ControlMessage::Ready, |m| out.push(m));
        assert_eq!(out.len(), 1);

        // 1 was abandoned by the sender; base moves to 3.
        window.receive(3, 3, ControlMessage::Unready, |m| out.push(m));
        assert_eq!(
            out,
            vec![ControlMessage::Join, ControlMessage::Ready, ControlMessage::Unready]
        );
        assert_eq!(window.next_expected(), Some(4));
    }
}
