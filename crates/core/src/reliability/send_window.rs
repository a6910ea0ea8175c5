use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;

use super::congestion::CongestionWindow;
use super::rto::RtoPolicy;
use super::{ChannelConfig, SendError};
use crate::net::{ACK_BITS, AckHeader, SegmentFrame, sequence_diff, sequence_greater_than};

/// Fragments of one message; the header counts the ones that follow in a u8.
pub const MAX_FRAGMENTS: usize = u8::MAX as usize;

/// Widest window the peer can acknowledge: its cursor plus the ack bitmap.
pub const MAX_SEND_WINDOW: u32 = ACK_BITS + 1;

/// A segment that has been handed a sequence number and waits for its ack.
#[derive(Debug, Clone)]
pub struct InFlightSegment {
    pub sequence: u32,
    pub fragment: u8,
    pub payload: Bytes,
    pub last_sent: Duration,
    pub resend_at: Duration,
    pub rto: Duration,
    pub transmissions: u32,
    pub skipped_acks: u32,
}

#[derive(Debug, Default)]
pub struct SendFlush {
    pub segments: Vec<SegmentFrame>,
    pub retransmits: u32,
    pub fast_retransmits: u32,
    pub dead_link: bool,
}

/// Sender half of the reliable channel.
///
/// Fragments wait in `queue` until the effective window has room; only then
/// do they get a sequence number and move to `in_flight`, where they stay
/// until acknowledged or cleared on teardown.
#[derive(Debug)]
pub struct SendWindow {
    queue: VecDeque<(u8, Bytes)>,
    in_flight: VecDeque<InFlightSegment>,
    next_sequence: u32,
    window_size: u32,
    remote_window: u32,
    // newest ack cursor seen, older headers carry a stale window
    remote_cursor: Option<u32>,
    mss: usize,
    fast_resend: u32,
    dead_link: u32,
    policy: RtoPolicy,
    congestion: Option<CongestionWindow>,
}

impl SendWindow {
    pub fn new(config: &ChannelConfig) -> Self {
        let requested = u32::from(config.send_window_size.max(1));
        let window_size = requested.min(MAX_SEND_WINDOW);
        if window_size < requested {
            log::debug!(
                "Send window {} clamped to {} segments",
                requested,
                window_size
            );
        }
        Self {
            queue: VecDeque::new(),
            in_flight: VecDeque::with_capacity(window_size as usize),
            next_sequence: 0,
            window_size,
            remote_window: u32::from(config.receive_window_size.max(1)),
            remote_cursor: None,
            mss: config.max_segment_size(),
            fast_resend: config.fast_resend,
            dead_link: config.dead_link,
            policy: RtoPolicy::new(config.no_delay),
            congestion: config
                .congestion_window
                .then(|| CongestionWindow::new(window_size)),
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.mss * MAX_FRAGMENTS
    }

    /// Splits `data` into fragments and queues them behind earlier messages.
    pub fn queue_message(&mut self, data: &[u8]) -> Result<usize, SendError> {
        if data.is_empty() {
            return Err(SendError::Empty);
        }
        if data.len() > self.max_message_size() {
            return Err(SendError::Oversized {
                size: data.len(),
                max: self.max_message_size(),
            });
        }

        let count = data.len().div_ceil(self.mss);
        for (index, chunk) in data.chunks(self.mss).enumerate() {
            let remaining = (count - index - 1) as u8;
            self.queue.push_back((remaining, Bytes::copy_from_slice(chunk)));
        }

        Ok(count)
    }

    /// Drops every segment `ack` covers and records skipped acks for the rest.
    /// Returns the number of segments newly acknowledged.
    pub fn process_ack(&mut self, ack: &AckHeader) -> u32 {
        let fresh = self
            .remote_cursor
            .is_none_or(|newest| !sequence_greater_than(newest, ack.cursor));
        if fresh {
            self.remote_cursor = Some(ack.cursor);
            self.remote_window = u32::from(ack.window);
        }

        let before = self.in_flight.len();
        self.in_flight.retain(|segment| !ack.acknowledges(segment.sequence));
        let acked = (before - self.in_flight.len()) as u32;

        if let Some(highest) = ack.highest_acked() {
            for segment in &mut self.in_flight {
                if sequence_greater_than(highest, segment.sequence) {
                    segment.skipped_acks += 1;
                }
            }
        }

        if acked > 0 {
            if let Some(cc) = &mut self.congestion {
                cc.on_ack(acked);
            }
        }

        acked
    }

    /// Oldest unacknowledged sequence number, or the next one to be assigned.
    pub fn una(&self) -> u32 {
        self.in_flight
            .front()
            .map_or(self.next_sequence, |segment| segment.sequence)
    }

    pub fn effective_window(&self) -> u32 {
        let mut window = self.window_size.min(self.remote_window.max(1));
        if let Some(cc) = &self.congestion {
            window = window.min(cc.window());
        }
        window
    }

    /// Moves queued fragments into the window and collects everything that
    /// has to go on the wire at `now`: first transmissions, timeouts and fast
    /// retransmissions. `estimate` is `(rtt, rtt_sd)` in seconds.
    pub fn flush(&mut self, now: Duration, estimate: Option<(f64, f64)>) -> SendFlush {
        let base_rto = self.policy.timeout(estimate);
        let window = self.effective_window();

        while sequence_diff(self.next_sequence, self.una()) < window as i32 {
            let Some((fragment, payload)) = self.queue.pop_front() else {
                break;
            };
            self.in_flight.push_back(InFlightSegment {
                sequence: self.next_sequence,
                fragment,
                payload,
                last_sent: now,
                resend_at: now,
                rto: base_rto,
                transmissions: 0,
                skipped_acks: 0,
            });
            self.next_sequence = self.next_sequence.wrapping_add(1);
        }

        let mut out = SendFlush::default();
        for segment in &mut self.in_flight {
            let send = if segment.transmissions == 0 {
                true
            } else if now >= segment.resend_at {
                segment.rto = self.policy.backoff(segment.rto);
                out.retransmits += 1;
                true
            } else if self.fast_resend > 0 && segment.skipped_acks >= self.fast_resend {
                out.fast_retransmits += 1;
                true
            } else {
                false
            };

            if send {
                segment.transmissions += 1;
                segment.skipped_acks = 0;
                segment.last_sent = now;
                segment.resend_at = now + segment.rto;
                out.segments.push(SegmentFrame {
                    sequence: segment.sequence,
                    fragment: segment.fragment,
                    payload: segment.payload.clone(),
                });

                if self.dead_link > 0 && segment.transmissions >= self.dead_link {
                    out.dead_link = true;
                }
            }
        }

        let in_flight = self.in_flight.len() as u32;
        if let Some(cc) = &mut self.congestion {
            if out.retransmits > 0 {
                cc.on_timeout(in_flight);
            } else if out.fast_retransmits > 0 {
                cc.on_fast_resend(in_flight, out.fast_retransmits);
            }
        }

        out
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    pub fn congestion_window(&self) -> Option<u32> {
        self.congestion.as_ref().map(CongestionWindow::window)
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_flight.clear();
    }
}
