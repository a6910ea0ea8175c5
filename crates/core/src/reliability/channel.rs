use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::receive_window::{ReceiveOutcome, ReceiveWindow};
use super::send_window::SendWindow;
use super::{ChannelConfig, SendError};
use crate::net::{
    AckHeader, MAX_SEGMENTS_PER_PACKET, PACKET_HEADER_SIZE, RELIABLE_HEADER_SIZE, ReliableFrame,
    SegmentFrame,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Acknowledged, retransmitted and delivered in send order.
    Reliable,
    /// Best effort, delivered as received.
    Unreliable,
}

#[derive(Debug, Default)]
pub struct ReliableFlush {
    pub frames: Vec<ReliableFrame>,
    pub retransmits: u32,
    pub fast_retransmits: u32,
    pub dead_link: bool,
}

/// Reliable-ordered channel: a send window and a receive window sharing one
/// ack stream.
#[derive(Debug)]
pub struct ReliableChannel {
    send: SendWindow,
    receive: ReceiveWindow,
    frame_budget: usize,
}

impl ReliableChannel {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            send: SendWindow::new(config),
            receive: ReceiveWindow::new(config.receive_window_size),
            frame_budget: config
                .mtu
                .saturating_sub(PACKET_HEADER_SIZE + RELIABLE_HEADER_SIZE),
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.send.max_message_size()
    }

    pub fn send(&mut self, data: &[u8]) -> Result<usize, SendError> {
        self.send.queue_message(data)
    }

    /// Applies the peer's ack and buffers the carried segments. Returns the
    /// number of our segments the ack released.
    pub fn on_frame(&mut self, frame: ReliableFrame) -> u32 {
        let acked = self.send.process_ack(&frame.ack);
        for segment in frame.segments {
            let sequence = segment.sequence;
            if self.receive.insert(segment) != ReceiveOutcome::Accepted {
                log::trace!("Dropped reliable segment {}", sequence);
            }
        }
        acked
    }

    pub fn pop_message(&mut self) -> Option<Bytes> {
        self.receive.pop_message()
    }

    /// Packs everything due at `now` into frames that each fit one datagram.
    /// A pending ack with nothing to send yields a single empty frame.
    pub fn flush(&mut self, now: Duration, estimate: Option<(f64, f64)>) -> ReliableFlush {
        let out = self.send.flush(now, estimate);
        let ack_pending = self.receive.take_ack_pending();

        let mut flush = ReliableFlush {
            frames: Vec::new(),
            retransmits: out.retransmits,
            fast_retransmits: out.fast_retransmits,
            dead_link: out.dead_link,
        };
        if out.segments.is_empty() && !ack_pending {
            return flush;
        }

        flush.frames = pack_frames(self.receive.ack_header(), out.segments, self.frame_budget);
        flush
    }

    pub fn in_flight(&self) -> usize {
        self.send.in_flight()
    }

    pub fn is_idle(&self) -> bool {
        self.send.is_idle()
    }

    pub fn congestion_window(&self) -> Option<u32> {
        self.send.congestion_window()
    }

    pub fn clear(&mut self) {
        self.send.clear();
        self.receive.clear();
    }
}

/// Splits `segments` into frames of at most `budget` segment bytes and
/// `MAX_SEGMENTS_PER_PACKET` segments, each carrying `ack`. Always yields at
/// least one frame.
fn pack_frames(
    ack: AckHeader,
    segments: Vec<SegmentFrame>,
    budget: usize,
) -> Vec<ReliableFrame> {
    let mut frames = Vec::new();
    let mut frame = ReliableFrame {
        ack,
        segments: Vec::new(),
    };
    let mut used = 0;
    for segment in segments {
        let len = segment.encoded_len();
        let full = used + len > budget || frame.segments.len() == MAX_SEGMENTS_PER_PACKET;
        if full && !frame.segments.is_empty() {
            frames.push(std::mem::replace(
                &mut frame,
                ReliableFrame {
                    ack,
                    segments: Vec::new(),
                },
            ));
            used = 0;
        }
        used += len;
        frame.segments.push(segment);
    }
    frames.push(frame);
    frames
}

/// Unreliable channel. Outgoing payloads wait only for the next flush and
/// are never retransmitted.
#[derive(Debug)]
pub struct UnreliableChannel {
    max_payload: usize,
    outgoing: VecDeque<Bytes>,
}

impl UnreliableChannel {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            max_payload: config.max_unreliable_size(),
            outgoing: VecDeque::new(),
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_payload
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), SendError> {
        if data.is_empty() {
            return Err(SendError::Empty);
        }
        if data.len() > self.max_payload {
            return Err(SendError::Oversized {
                size: data.len(),
                max: self.max_payload,
            });
        }
        self.outgoing.push_back(Bytes::copy_from_slice(data));
        Ok(())
    }

    pub fn take_outgoing(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.outgoing.drain(..)
    }

    pub fn clear(&mut self) {
        self.outgoing.clear();
    }
}
