// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::api::Options;
use crate::api::PathState;
use crate::api::SocketTime;
use crate::timer::BackoffAlgorithm;
use crate::timer::Timer;
use std::net::SocketAddr;
use std::time::Duration;

// https://datatracker.ietf.org/doc/html/rfc9260#section-16
const RTO_ALPHA: f64 = 0.125;
const RTO_BETA: f64 = 0.25;

// A factor that the `min_rtt_variance` configuration option will be divided by (before later
// multiplied by K, which is 4 according to RFC 6298). When this value was introduced, it was
// unintentionally divided by 8 since that code worked with scaled numbers (to avoid floating
// point math). That behavior is kept as downstream users have measured good values for their
// use-cases.
const HEURISTIC_VARIANCE_ADJUSTMENT: f64 = 8.0;

/// Manages updating of the Retransmission Timeout (RTO) SCTP variable of one path, which is used
/// directly as the base timeout for T3-rtx and for other timers, such as delayed ack.
///
/// When a round-trip-time (RTT) is calculated (outside this struct), `observe_rto` should be
/// called, and it will update the RTO. See
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-6.3.1>.
pub(crate) struct RetransmissionTimeout {
    min_rto: f64,
    max_rto: f64,
    max_rtt: f64,
    min_rtt_variance: f64,
    first_measurement: bool,
    srtt: f64,
    rtt_var: f64,
    rto: f64,
}

impl RetransmissionTimeout {
    pub fn new(options: &Options) -> Self {
        Self {
            min_rto: options.rto_min.as_secs_f64(),
            max_rto: options.rto_max.as_secs_f64(),
            max_rtt: options.rtt_max.as_secs_f64(),
            min_rtt_variance: options.min_rtt_variance.as_secs_f64()
                / HEURISTIC_VARIANCE_ADJUSTMENT,
            first_measurement: true,
            srtt: options.rto_initial.as_secs_f64(),
            rtt_var: 0.0,
            rto: options.rto_initial.as_secs_f64(),
        }
    }

    pub fn observe_rto(&mut self, measured_rtt: Duration) {
        let rtt = measured_rtt.as_secs_f64();

        // Unrealistic values will be skipped. If a wrongly measured (or otherwise corrupt) value
        // was processed, it could change the state in a way that would take a very long time to
        // recover from.
        if rtt < 0.0 || rtt > self.max_rtt {
            return;
        }

        if self.first_measurement {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
            self.first_measurement = false;
        } else {
            let rtt_diff = (self.srtt - rtt).abs();
            self.rtt_var = (1.0 - RTO_BETA) * self.rtt_var + RTO_BETA * rtt_diff;
            self.srtt = (1.0 - RTO_ALPHA) * self.srtt + RTO_ALPHA * rtt;
        }

        if self.rtt_var < self.min_rtt_variance {
            self.rtt_var = self.min_rtt_variance;
        }

        self.rto = (self.srtt + 4.0 * self.rtt_var).clamp(self.min_rto, self.max_rto);
    }

    pub fn rto(&self) -> Duration {
        Duration::from_secs_f64(self.rto)
    }

    pub fn srtt(&self) -> Duration {
        Duration::from_secs_f64(self.srtt)
    }
}

/// One destination transport address of the peer, and what is known about the path to it.
pub(crate) struct Transport {
    pub address: SocketAddr,
    pub rto: RetransmissionTimeout,

    /// Consecutive failures (timeouts, unanswered heartbeats) on this path.
    pub error_count: u32,
    pub state: PathState,

    /// Fires when it's time to probe the path with a HEARTBEAT.
    pub hb_timer: Timer,

    /// The nonce of the HEARTBEAT that hasn't been acknowledged yet. Doubles as the "RTT
    /// measurement pending" flag of the path.
    pub hb_pending: Option<u64>,
    pub last_hb_sent: Option<SocketTime>,
}

impl Transport {
    pub fn new(address: SocketAddr, options: &Options) -> Self {
        Self {
            address,
            rto: RetransmissionTimeout::new(options),
            error_count: 0,
            state: PathState::Active,
            hb_timer: Timer::new(options.heartbeat_interval, BackoffAlgorithm::Fixed, None),
            hb_pending: None,
            last_hb_sent: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == PathState::Active
    }

    /// The time between heartbeats on this path, or zero if heartbeats are disabled.
    pub fn heartbeat_interval(&self, options: &Options) -> Duration {
        if options.heartbeat_interval.is_zero() {
            Duration::ZERO
        } else if options.heartbeat_interval_include_rtt {
            options.heartbeat_interval + self.rto.rto()
        } else {
            options.heartbeat_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DURATION_ACCURACY: Duration = Duration::from_millis(1);

    fn make_options() -> Options {
        Options {
            rto_initial: Duration::from_millis(200),
            rtt_max: Duration::from_millis(8_000),
            rto_max: Duration::from_millis(800),
            rto_min: Duration::from_millis(120),
            min_rtt_variance: Duration::from_millis(220),
            ..Default::default()
        }
    }

    fn assert_near(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        let diff = if actual > expected { actual - expected } else { expected - actual };
        assert!(diff <= DURATION_ACCURACY, "{actual:?} is not near {expected:?}");
    }

    #[test]
    fn has_valid_initial_rto() {
        let rto = RetransmissionTimeout::new(&make_options());
        assert_eq!(rto.rto(), Duration::from_millis(200));
    }

    #[test]
    fn will_never_go_below_minimum_rto() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        for _ in 0..1000 {
            rto.observe_rto(Duration::from_millis(1));
        }
        assert!(rto.rto() >= Duration::from_millis(120));
    }

    #[test]
    fn will_never_go_above_maximum_rto() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        for _ in 0..1000 {
            rto.observe_rto(Duration::from_millis(3_000));
        }
        assert_near(rto.rto(), 800);
    }

    #[test]
    fn calculates_rto_for_stable_rtt() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rto(Duration::from_millis(124));
        assert_near(rto.rto(), 372);
        rto.observe_rto(Duration::from_millis(128));
        assert_near(rto.rto(), 314);
        rto.observe_rto(Duration::from_millis(123));
        assert_near(rto.rto(), 268);
        rto.observe_rto(Duration::from_millis(125));
        assert_near(rto.rto(), 234);
        rto.observe_rto(Duration::from_millis(127));
        assert_near(rto.rto(), 234);
    }

    #[test]
    fn will_always_stay_above_rtt() {
        // In simulations, it's quite common to have a very stable RTT, and having an RTO at the
        // same value will cause issues as expiry timers will be scheduled to be expire exactly
        // when a packet is supposed to arrive. The RTO must be larger than the RTT. In non-
        // simulated environments, this is a non-issue as any jitter will increase the RTO.
        let mut rto = RetransmissionTimeout::new(&make_options());
        for _ in 0..1000 {
            rto.observe_rto(Duration::from_millis(124));
        }
        assert_near(rto.rto(), 234);
    }

    #[test]
    fn can_specify_smaller_minimum_rtt_variance() {
        let options = Options { min_rtt_variance: Duration::from_millis(100), ..make_options() };
        let mut rto = RetransmissionTimeout::new(&options);
        for _ in 0..1000 {
            rto.observe_rto(Duration::from_millis(124));
        }
        assert_near(rto.rto(), 174);
    }

    #[test]
    fn can_specify_larger_minimum_rtt_variance() {
        let options = Options { min_rtt_variance: Duration::from_millis(320), ..make_options() };
        let mut rto = RetransmissionTimeout::new(&options);
        for _ in 0..1000 {
            rto.observe_rto(Duration::from_millis(124));
        }
        assert_near(rto.rto(), 284);
    }

    #[test]
    fn ignores_unrealistic_rtt() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rto(Duration::from_millis(9_000));
        assert_eq!(rto.rto(), Duration::from_millis(200));
        assert_eq!(rto.srtt(), Duration::from_millis(200));
    }

    #[test]
    fn heartbeat_interval_includes_rto() {
        let options = Options {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_interval_include_rtt: true,
            ..make_options()
        };
        let t = Transport::new("10.0.0.1:5000".parse().unwrap(), &options);
        assert_eq!(t.heartbeat_interval(&options), Duration::from_millis(30_200));

        let disabled = Options { heartbeat_interval: Duration::ZERO, ..options };
        assert_eq!(t.heartbeat_interval(&disabled), Duration::ZERO);
    }
}
