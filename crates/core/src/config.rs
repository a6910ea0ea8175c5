use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::DEFAULT_MTU;
use crate::reliability::{
    ChannelConfig, DEFAULT_DEAD_LINK, DEFAULT_RECEIVE_WINDOW, DEFAULT_SEND_WINDOW,
};
use crate::sync::{DEFAULT_PING_FREQUENCY, DEFAULT_PING_WINDOW_SIZE};

/// Transport options chosen per `connect` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Flush on every send instead of waiting for the next internal update.
    pub no_delay: bool,
    /// Spacing of internal updates in milliseconds.
    pub interval_ms: u32,
    /// Skipped acks that trigger an early retransmit, 0 disables.
    pub fast_resend: u32,
    pub congestion_window: bool,
    pub send_window_size: u16,
    pub receive_window_size: u16,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            no_delay: true,
            interval_ms: 10,
            fast_resend: 0,
            congestion_window: true,
            send_window_size: DEFAULT_SEND_WINDOW,
            receive_window_size: DEFAULT_RECEIVE_WINDOW,
        }
    }
}

impl ConnectOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms.max(1)))
    }

    pub fn channel_config(&self, config: &ClientConfig) -> ChannelConfig {
        ChannelConfig {
            send_window_size: self.send_window_size,
            receive_window_size: self.receive_window_size,
            fast_resend: self.fast_resend,
            dead_link: config.dead_link,
            no_delay: self.no_delay,
            congestion_window: self.congestion_window,
            mtu: config.mtu,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub ping_frequency: Duration,
    pub ping_window_size: usize,
    pub handshake_timeout: Duration,
    pub handshake_resend_interval: Duration,
    pub idle_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub mtu: usize,
    pub dead_link: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ping_frequency: DEFAULT_PING_FREQUENCY,
            ping_window_size: DEFAULT_PING_WINDOW_SIZE,
            handshake_timeout: Duration::from_secs(10),
            handshake_resend_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(1),
            mtu: DEFAULT_MTU,
            dead_link: DEFAULT_DEAD_LINK,
        }
    }
}
