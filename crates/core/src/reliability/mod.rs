mod channel;
pub mod congestion;
mod receive_window;
pub mod rto;
mod send_window;

pub use channel::{Channel, ReliableChannel, ReliableFlush, UnreliableChannel};
pub use congestion::CongestionWindow;
pub use receive_window::{ReceiveOutcome, ReceiveWindow};
pub use rto::RtoPolicy;
pub use send_window::{InFlightSegment, MAX_FRAGMENTS, MAX_SEND_WINDOW, SendFlush, SendWindow};

use crate::net::{
    DEFAULT_MTU, PACKET_HEADER_SIZE, RELIABLE_HEADER_SIZE, SEGMENT_HEADER_SIZE,
};

pub const DEFAULT_SEND_WINDOW: u16 = 32;
pub const DEFAULT_RECEIVE_WINDOW: u16 = 128;
pub const DEFAULT_DEAD_LINK: u32 = 20;

/// Per-connection settings of both channels, derived from the connect
/// options and the client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Capped at `MAX_SEND_WINDOW`.
    pub send_window_size: u16,
    pub receive_window_size: u16,
    /// Skipped acks before a segment is resent early, 0 disables.
    pub fast_resend: u32,
    /// Transmissions of one segment before the link is declared dead, 0 disables.
    pub dead_link: u32,
    pub no_delay: bool,
    pub congestion_window: bool,
    pub mtu: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            send_window_size: DEFAULT_SEND_WINDOW,
            receive_window_size: DEFAULT_RECEIVE_WINDOW,
            fast_resend: 0,
            dead_link: DEFAULT_DEAD_LINK,
            no_delay: true,
            congestion_window: true,
            mtu: DEFAULT_MTU,
        }
    }
}

impl ChannelConfig {
    pub fn max_segment_size(&self) -> usize {
        self.mtu
            .saturating_sub(PACKET_HEADER_SIZE + RELIABLE_HEADER_SIZE + SEGMENT_HEADER_SIZE)
            .max(1)
    }

    pub fn max_unreliable_size(&self) -> usize {
        self.mtu.saturating_sub(PACKET_HEADER_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("empty payload")]
    Empty,
    #[error("payload of {size} bytes exceeds the limit of {max}")]
    Oversized { size: usize, max: usize },
    #[error("not connected")]
    NotConnected,
}
