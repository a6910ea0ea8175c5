use std::time::Duration;

use crate::average::MovingAverage;

pub const DEFAULT_PING_FREQUENCY: Duration = Duration::from_secs(2);
pub const DEFAULT_PING_WINDOW_SIZE: usize = 10;

/// Estimates round trip time and the offset between the local and the remote
/// clock from periodic ping/pong exchanges.
///
/// All times are in seconds on the local monotonic clock unless noted
/// otherwise. Until the first reply arrives the offset and rtt read as zero.
#[derive(Debug, Clone)]
pub struct NetworkTime {
    ping_frequency: Duration,
    window_size: usize,
    last_ping: Option<Duration>,
    // send time of the probe still waiting for its reply
    outstanding: Option<f64>,
    rtt: MovingAverage,
    offset: MovingAverage,
    // the true offset is guaranteed to be in this range
    offset_min: f64,
    offset_max: f64,
}

impl Default for NetworkTime {
    fn default() -> Self {
        Self::new(DEFAULT_PING_FREQUENCY, DEFAULT_PING_WINDOW_SIZE)
    }
}

impl NetworkTime {
    pub fn new(ping_frequency: Duration, window_size: usize) -> Self {
        Self {
            ping_frequency,
            window_size,
            last_ping: None,
            outstanding: None,
            rtt: MovingAverage::new(window_size),
            offset: MovingAverage::new(window_size),
            offset_min: f64::MIN,
            offset_max: f64::MAX,
        }
    }

    pub fn reset(&mut self) {
        self.last_ping = None;
        self.outstanding = None;
        self.rtt.reset(self.window_size);
        self.offset.reset(self.window_size);
        self.offset_min = f64::MIN;
        self.offset_max = f64::MAX;
    }

    pub fn ping_frequency(&self) -> Duration {
        self.ping_frequency
    }

    /// Returns true when a probe is due and records `now` as the send time.
    /// The probe must carry `now.as_secs_f64()` for its reply to be accepted.
    pub fn poll_ping(&mut self, now: Duration) -> bool {
        let due = self
            .last_ping
            .is_none_or(|last| now.saturating_sub(last) >= self.ping_frequency);
        if due {
            self.last_ping = Some(now);
            self.outstanding = Some(now.as_secs_f64());
        }
        due
    }

    /// Feeds one completed round trip. `sent_at` is the echoed local send time,
    /// `remote_time` the peer's clock when it answered. Returns false when the
    /// reply does not answer the outstanding probe (stale, duplicated or
    /// unsolicited) or is impossible, and was ignored.
    pub fn on_pong(&mut self, now: Duration, sent_at: f64, remote_time: f64) -> bool {
        if self.outstanding != Some(sent_at) {
            return false;
        }
        let now = now.as_secs_f64();
        let rtt = now - sent_at;
        if !rtt.is_finite() || rtt < 0.0 || !remote_time.is_finite() {
            return false;
        }

        self.outstanding = None;
        self.rtt.observe(rtt);

        let new_offset = now - rtt * 0.5 - remote_time;
        let new_offset_min = now - rtt - remote_time;
        let new_offset_max = now - remote_time;
        self.offset_min = self.offset_min.max(new_offset_min);
        self.offset_max = self.offset_max.min(new_offset_max);

        let current = self.offset.value();
        if !self.offset.is_initialized() || current < self.offset_min || current > self.offset_max
        {
            // the old estimate fell out of range, start over from this sample
            self.offset.reset(self.window_size);
            self.offset.observe(new_offset);
        } else if new_offset >= self.offset_min && new_offset <= self.offset_max {
            self.offset.observe(new_offset);
        }

        true
    }

    pub fn has_sample(&self) -> bool {
        self.rtt.is_initialized()
    }

    /// Synchronized time: local clock minus the smoothed offset.
    pub fn time(&self, now: Duration) -> f64 {
        now.as_secs_f64() - self.offset.value()
    }

    pub fn time_var(&self) -> f64 {
        self.offset.variance()
    }

    pub fn time_sd(&self) -> f64 {
        self.offset.std_dev()
    }

    pub fn offset(&self) -> f64 {
        self.offset.value()
    }

    pub fn offset_bounds(&self) -> (f64, f64) {
        (self.offset_min, self.offset_max)
    }

    pub fn rtt(&self) -> f64 {
        self.rtt.value()
    }

    pub fn rtt_var(&self) -> f64 {
        self.rtt.variance()
    }

    pub fn rtt_sd(&self) -> f64 {
        self.rtt.std_dev()
    }
}
