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

use crate::api::SocketTime;
use std::cmp::min;
use std::time::Duration;

/// An unreasonable long time, for SCTP purposes. Mainly used as upper bound.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 3600);

// The upper limit for the exponential backoff, to avoid overflow.
const MAX_BACKOFF_COUNT: u32 = 10;

#[derive(Clone, Copy, Debug)]
pub enum BackoffAlgorithm {
    Fixed,
    Exponential,
}

/// A one-shot deadline.
///
/// Unlike a periodic timer, an expired timer stays stopped: whoever handles the expiry decides
/// whether it should run again by calling [`Timer::restart`], which applies the backoff algorithm,
/// or [`Timer::start`], which doesn't. A base duration of zero disables the timer.
#[derive(Debug)]
pub struct Timer {
    base_duration: Duration,
    backoff_algorithm: BackoffAlgorithm,
    max_backoff_duration: Duration,
    backoff_count: u32,
    deadline: Option<SocketTime>,
}

impl Timer {
    pub fn new(
        duration: Duration,
        backoff_algorithm: BackoffAlgorithm,
        max_backoff_duration: Option<Duration>,
    ) -> Self {
        Self {
            base_duration: duration,
            backoff_algorithm,
            max_backoff_duration: min(max_backoff_duration.unwrap_or(MAX_DURATION), MAX_DURATION),
            backoff_count: 0,
            deadline: None,
        }
    }

    fn current_duration(&self) -> Duration {
        let duration = match self.backoff_algorithm {
            BackoffAlgorithm::Fixed => self.base_duration,
            BackoffAlgorithm::Exponential => {
                self.base_duration.saturating_mul(1 << self.backoff_count.min(MAX_BACKOFF_COUNT))
            }
        };
        min(duration, self.max_backoff_duration)
    }

    fn arm(&mut self, now: SocketTime) {
        self.deadline = (self.base_duration != Duration::ZERO).then(|| now + self.current_duration());
    }

    /// Starts the timer from `now` with its base duration, forgetting any previous backoff.
    pub fn start(&mut self, now: SocketTime) {
        self.backoff_count = 0;
        self.arm(now);
    }

    /// Starts the timer from `now` with one more step of backoff than last time.
    pub fn restart(&mut self, now: SocketTime) {
        self.backoff_count = self.backoff_count.saturating_add(1);
        self.arm(now);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Makes the timer fire at `now`, without touching the backoff.
    pub fn rearm_at(&mut self, now: SocketTime) {
        self.deadline = Some(now);
    }

    /// Returns true, and stops the timer, if its deadline has been reached.
    pub fn fire(&mut self, now: SocketTime) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn next_expiry(&self) -> Option<SocketTime> {
        self.deadline
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Updates the base duration. A running timer keeps its current deadline.
    pub fn set_duration(&mut self, duration: Duration) {
        self.base_duration = duration;
    }

    pub fn duration(&self) -> Duration {
        self.base_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START_TIME: SocketTime = SocketTime::zero();

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn new_timer_is_not_running() {
        let t = Timer::new(ms(1000), BackoffAlgorithm::Fixed, None);
        assert_eq!(t.duration(), ms(1000));
        assert!(!t.is_running());
        assert!(t.next_expiry().is_none());
    }

    #[test]
    fn fires_once_at_deadline() {
        let mut t = Timer::new(ms(1000), BackoffAlgorithm::Fixed, None);
        t.start(START_TIME);
        assert!(!t.fire(START_TIME + ms(999)));
        assert!(t.fire(START_TIME + ms(1000)));
        assert!(!t.is_running());
        assert!(!t.fire(START_TIME + ms(5000)));
    }

    #[test]
    fn stopped_timer_does_not_fire() {
        let mut t = Timer::new(ms(1000), BackoffAlgorithm::Fixed, None);
        t.start(START_TIME);
        t.stop();
        assert!(!t.fire(START_TIME + ms(1000)));
    }

    #[test]
    fn zero_duration_disables_timer() {
        let mut t = Timer::new(Duration::ZERO, BackoffAlgorithm::Fixed, None);
        t.start(START_TIME);
        assert!(!t.is_running());
    }

    #[test]
    fn restart_backs_off_exponentially() {
        let mut t = Timer::new(ms(1000), BackoffAlgorithm::Exponential, None);
        t.start(START_TIME);
        assert_eq!(t.next_expiry(), Some(START_TIME + ms(1000)));

        let now = START_TIME + ms(1000);
        assert!(t.fire(now));
        t.restart(now);
        assert_eq!(t.next_expiry(), Some(now + ms(2000)));

        let now = now + ms(2000);
        assert!(t.fire(now));
        t.restart(now);
        assert_eq!(t.next_expiry(), Some(now + ms(4000)));

        // Starting forgets the backoff.
        t.start(now);
        assert_eq!(t.next_expiry(), Some(now + ms(1000)));
    }

    #[test]
    fn fixed_restart_keeps_duration() {
        let mut t = Timer::new(ms(300), BackoffAlgorithm::Fixed, None);
        t.start(START_TIME);
        t.restart(START_TIME + ms(300));
        assert_eq!(t.next_expiry(), Some(START_TIME + ms(600)));
    }

    #[test]
    fn backoff_is_capped() {
        let mut t = Timer::new(ms(1000), BackoffAlgorithm::Exponential, Some(ms(3000)));
        t.start(START_TIME);
        t.restart(START_TIME);
        t.restart(START_TIME);
        assert_eq!(t.next_expiry(), Some(START_TIME + ms(3000)));
    }

    #[test]
    fn does_not_overflow_when_restarted_many_times() {
        let mut t = Timer::new(ms(1000), BackoffAlgorithm::Exponential, None);
        let mut now = START_TIME;
        t.start(now);
        for _ in 0..1000 {
            now = t.next_expiry().unwrap();
            assert!(t.fire(now));
            t.restart(now);
        }
        assert_eq!(t.next_expiry(), Some(now + ms(1000 << MAX_BACKOFF_COUNT)));
    }

    #[test]
    fn rearm_fires_immediately() {
        let mut t = Timer::new(ms(1000), BackoffAlgorithm::Fixed, None);
        t.rearm_at(START_TIME + ms(5));
        assert!(t.fire(START_TIME + ms(5)));
    }
}
