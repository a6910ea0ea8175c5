//! Retransmission timeout policy.
//!
//! `RTO = srtt + 4 * rtt_sd`, clamped to `[min, MAX_RTO]`. The floor is lower
//! in no-delay mode, and so is the per-retransmission backoff factor.

use std::time::Duration;

pub const INITIAL_RTO: Duration = Duration::from_millis(200);
pub const MIN_RTO: Duration = Duration::from_millis(100);
pub const MIN_RTO_NO_DELAY: Duration = Duration::from_millis(30);
pub const MAX_RTO: Duration = Duration::from_secs(60);

const VARIANCE_WEIGHT: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtoPolicy {
    no_delay: bool,
}

impl RtoPolicy {
    pub fn new(no_delay: bool) -> Self {
        Self { no_delay }
    }

    pub fn min_rto(&self) -> Duration {
        if self.no_delay {
            MIN_RTO_NO_DELAY
        } else {
            MIN_RTO
        }
    }

    /// Base timeout for a fresh transmission. `estimate` is `(rtt, rtt_sd)` in
    /// seconds, `None` until the first round trip was measured.
    pub fn timeout(&self, estimate: Option<(f64, f64)>) -> Duration {
        let Some((rtt, rtt_sd)) = estimate else {
            return INITIAL_RTO;
        };

        let secs = rtt + VARIANCE_WEIGHT * rtt_sd;
        if !secs.is_finite() || secs <= 0.0 {
            return self.min_rto();
        }
        Duration::from_secs_f64(secs.min(MAX_RTO.as_secs_f64())).clamp(self.min_rto(), MAX_RTO)
    }

    /// Timeout after one more unanswered retransmission.
    pub fn backoff(&self, rto: Duration) -> Duration {
        let next = if self.no_delay {
            rto + rto / 2
        } else {
            rto * 2
        };
        next.min(MAX_RTO)
    }
}
