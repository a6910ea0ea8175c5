//! Loss-based congestion window, counted in segments.
//!
//! Slow start grows the window by one segment per acknowledged segment until
//! `ssthresh`, after which it grows by one segment per window's worth of
//! acknowledgments. A retransmission timeout collapses the window to one
//! segment; a fast retransmission only halves it.

pub const INITIAL_SSTHRESH: u32 = 2;
pub const MIN_SSTHRESH: u32 = 2;

#[derive(Debug, Clone)]
pub struct CongestionWindow {
    cwnd: u32,
    ssthresh: u32,
    acked_in_avoidance: u32,
    max_window: u32,
}

impl CongestionWindow {
    pub fn new(max_window: u32) -> Self {
        Self {
            cwnd: 1,
            ssthresh: INITIAL_SSTHRESH,
            acked_in_avoidance: 0,
            max_window: max_window.max(1),
        }
    }

    pub fn window(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    pub fn on_ack(&mut self, acked: u32) {
        for _ in 0..acked {
            if self.cwnd >= self.max_window {
                self.cwnd = self.max_window;
                return;
            }
            if self.in_slow_start() {
                self.cwnd += 1;
            } else {
                self.acked_in_avoidance += 1;
                if self.acked_in_avoidance >= self.cwnd {
                    self.acked_in_avoidance = 0;
                    self.cwnd += 1;
                }
            }
        }
    }

    pub fn on_timeout(&mut self, in_flight: u32) {
        self.ssthresh = (in_flight / 2).max(MIN_SSTHRESH);
        self.cwnd = 1;
        self.acked_in_avoidance = 0;
        log::trace!("Congestion timeout: ssthresh {}", self.ssthresh);
    }

    pub fn on_fast_resend(&mut self, in_flight: u32, resent: u32) {
        self.ssthresh = (in_flight / 2).max(MIN_SSTHRESH);
        self.cwnd = (self.ssthresh + resent).min(self.max_window);
        self.acked_in_avoidance = 0;
        log::trace!(
            "Congestion fast resend: cwnd {} ssthresh {}",
            self.cwnd,
            self.ssthresh
        );
    }
}
