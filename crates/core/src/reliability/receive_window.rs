use std::collections::{BTreeMap, VecDeque};

use bytes::{Bytes, BytesMut};

use crate::net::{ACK_BITS, AckHeader, SegmentFrame, sequence_diff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Accepted,
    Duplicate,
    OutOfWindow,
}

/// Receiver half of the reliable channel.
///
/// Buffers segments that arrive ahead of `cursor` and releases complete
/// messages strictly in sequence order. Anything below the cursor has already
/// been delivered and is dropped.
#[derive(Debug)]
pub struct ReceiveWindow {
    cursor: u32,
    window_size: u32,
    buffer: BTreeMap<u32, (u8, Bytes)>,
    assembling: BytesMut,
    ready: VecDeque<Bytes>,
    ack_pending: bool,
}

impl ReceiveWindow {
    pub fn new(window_size: u16) -> Self {
        Self {
            cursor: 0,
            window_size: u32::from(window_size.max(1)),
            buffer: BTreeMap::new(),
            assembling: BytesMut::new(),
            ready: VecDeque::new(),
            ack_pending: false,
        }
    }

    pub fn insert(&mut self, segment: SegmentFrame) -> ReceiveOutcome {
        // the sender needs an ack even for duplicates, its ack may have been lost
        self.ack_pending = true;

        let offset = sequence_diff(segment.sequence, self.cursor);
        if offset < 0 {
            return ReceiveOutcome::Duplicate;
        }
        if offset as u32 >= self.window_size {
            log::trace!(
                "Segment {} outside receive window at {}",
                segment.sequence,
                self.cursor
            );
            return ReceiveOutcome::OutOfWindow;
        }
        if self.buffer.contains_key(&segment.sequence) {
            return ReceiveOutcome::Duplicate;
        }

        self.buffer
            .insert(segment.sequence, (segment.fragment, segment.payload));
        self.advance();
        ReceiveOutcome::Accepted
    }

    fn advance(&mut self) {
        while let Some((fragment, payload)) = self.buffer.remove(&self.cursor) {
            self.cursor = self.cursor.wrapping_add(1);
            if fragment == 0 && self.assembling.is_empty() {
                self.ready.push_back(payload);
                continue;
            }

            self.assembling.extend_from_slice(&payload);
            if fragment == 0 {
                self.ready.push_back(self.assembling.split().freeze());
            }
        }
    }

    pub fn ack_header(&self) -> AckHeader {
        let mut bits = 0u32;
        for i in 0..ACK_BITS {
            let sequence = self.cursor.wrapping_add(i + 1);
            if self.buffer.contains_key(&sequence) {
                bits |= 1 << i;
            }
        }

        let free = self.window_size.saturating_sub(self.buffer.len() as u32);
        AckHeader {
            cursor: self.cursor,
            bits,
            window: free.min(u32::from(u16::MAX)) as u16,
        }
    }

    pub fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    pub fn take_ack_pending(&mut self) -> bool {
        std::mem::take(&mut self.ack_pending)
    }

    pub fn pop_message(&mut self) -> Option<Bytes> {
        self.ready.pop_front()
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.assembling.clear();
        self.ready.clear();
        self.ack_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(sequence: u32, data: &'static [u8]) -> SegmentFrame {
        fragment(sequence, 0, data)
    }

    fn fragment(sequence: u32, fragment: u8, data: &'static [u8]) -> SegmentFrame {
        SegmentFrame {
            sequence,
            fragment,
            payload: Bytes::from_static(data),
        }
    }

    fn drain(window: &mut ReceiveWindow) -> Vec<Bytes> {
        std::iter::from_fn(|| window.pop_message()).collect()
    }

    #[test]
    fn test_in_order_delivery() {
        let mut window = ReceiveWindow::new(16);
        assert_eq!(window.insert(segment(0, b"a")), ReceiveOutcome::Accepted);
        assert_eq!(window.insert(segment(1, b"b")), ReceiveOutcome::Accepted);

        assert_eq!(drain(&mut window), vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(window.cursor(), 2);
    }

    #[test]
    fn test_out_of_order_held_until_gap_filled() {
        let mut window = ReceiveWindow::new(16);
        window.insert(segment(2, b"c"));
        window.insert(segment(1, b"b"));
        assert!(window.pop_message().is_none());

        let ack = window.ack_header();
        assert_eq!(ack.cursor, 0);
        assert_eq!(ack.bits, 0b11);
        assert_eq!(ack.window, 14);

        window.insert(segment(0, b"a"));
        assert_eq!(drain(&mut window), vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
        assert_eq!(window.ack_header().bits, 0);
    }

    #[test]
    fn test_duplicates_dropped() {
        let mut window = ReceiveWindow::new(16);
        window.insert(segment(0, b"a"));
        window.insert(segment(2, b"c"));

        assert_eq!(window.insert(segment(0, b"a")), ReceiveOutcome::Duplicate);
        assert_eq!(window.insert(segment(2, b"c")), ReceiveOutcome::Duplicate);
        assert_eq!(drain(&mut window), vec![&b"a"[..]]);
    }

    #[test]
    fn test_outside_window_rejected() {
        let mut window = ReceiveWindow::new(4);
        assert_eq!(window.insert(segment(4, b"x")), ReceiveOutcome::OutOfWindow);
        assert_eq!(window.insert(segment(3, b"x")), ReceiveOutcome::Accepted);
    }

    #[test]
    fn test_reassembles_fragments() {
        let mut window = ReceiveWindow::new(16);
        window.insert(fragment(2, 0, b"!"));
        window.insert(fragment(0, 2, b"hel"));
        assert!(window.pop_message().is_none());
        window.insert(fragment(1, 1, b"lo"));
        window.insert(segment(3, b"next"));

        assert_eq!(drain(&mut window), vec![&b"hello!"[..], &b"next"[..]]);
    }

    #[test]
    fn test_any_permutation_with_duplicates_delivers_in_order() {
        let messages: Vec<&'static [u8]> = vec![b"m0", b"m1", b"m2", b"m3", b"m4", b"m5"];
        let orders: [&[u32]; 4] = [
            &[5, 4, 3, 2, 1, 0],
            &[1, 1, 0, 3, 2, 2, 5, 0, 4],
            &[0, 2, 4, 1, 3, 5, 5, 3],
            &[3, 0, 0, 5, 1, 4, 2, 1],
        ];

        for order in orders {
            let mut window = ReceiveWindow::new(8);
            let mut delivered = Vec::new();
            for &sequence in order {
                window.insert(segment(sequence, messages[sequence as usize]));
                delivered.extend(drain(&mut window));
            }
            assert_eq!(delivered, messages, "order {:?}", order);
        }
    }

    #[test]
    fn test_sequence_wraps() {
        let mut window = ReceiveWindow::new(8);
        window.cursor = u32::MAX - 1;

        window.insert(segment(0, b"c"));
        window.insert(segment(u32::MAX, b"b"));
        window.insert(segment(u32::MAX - 1, b"a"));

        assert_eq!(drain(&mut window), vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
        assert_eq!(window.cursor(), 1);
    }

    #[test]
    fn test_ack_pending_set_by_duplicates() {
        let mut window = ReceiveWindow::new(8);
        window.insert(segment(0, b"a"));
        assert!(window.take_ack_pending());
        assert!(!window.ack_pending());

        window.insert(segment(0, b"a"));
        assert!(window.take_ack_pending());
    }
}
