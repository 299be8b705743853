use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const INITIAL_RTT: Duration = Duration::from_secs(1);
pub const INITIAL_RTTVAR: Duration = Duration::from_secs(1);
pub const INITIAL_RTO: Duration = Duration::from_secs(1);
pub const MIN_RTO: Duration = Duration::from_millis(200);
pub const MAX_RTO: Duration = Duration::from_secs(5);

/// Smoothed RTT / RTO estimator in the RFC 6298 family, kept in exact
/// integer arithmetic: weight 7/8 EWMA for the mean, 4x the deviation
/// in the timeout, timeout clamped to [200 ms, 5 s].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RttEstimator {
    rtt: Duration,
    rttvar: Duration,
    rto: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            rtt: INITIAL_RTT,
            rttvar: INITIAL_RTTVAR,
            rto: INITIAL_RTO,
        }
    }

    /// Feed one sample from a never-retransmitted packet. The deviation
    /// is taken against the pre-update mean.
    pub fn update(&mut self, sample: Duration) {
        let error = if sample > self.rtt {
            sample - self.rtt
        } else {
            self.rtt - sample
        };
        self.rtt = (sample + 7 * self.rtt) / 8;
        self.rttvar = (error + 7 * self.rttvar) / 8;
        self.rto = (self.rtt + 4 * self.rttvar).clamp(MIN_RTO, MAX_RTO);
    }

    /// Exponential backoff on retransmission timeout.
    pub fn on_timeout(&mut self) {
        self.rto = (self.rto * 2).clamp(MIN_RTO, MAX_RTO);
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }
}
