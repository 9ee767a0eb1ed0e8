use std::time::Duration;

/// Client-driven confirmation polling: a fixed number of attempts spaced by
/// a constant interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub max_attempts: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Retry { after: Duration },
    GiveUp,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_secs(2),
        }
    }
}

impl PollSchedule {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval }
    }

    /// What to do after `attempts_made` unsuccessful polls.
    pub fn decide(&self, attempts_made: u32) -> PollDecision {
        if attempts_made >= self.max_attempts {
            PollDecision::GiveUp
        } else {
            PollDecision::Retry { after: self.interval }
        }
    }

    /// Upper bound on time spent waiting between polls.
    pub fn total_wait(&self) -> Duration {
        self.interval
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }
}
