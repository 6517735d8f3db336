//! Poll policy and per-operation poll plans.

use crate::errors::{CloudError, CloudResult};
use crate::resources::ResourceRef;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Delays between operation polls and the overall wait budget.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay before the first poll.
    pub initial_delay: Duration,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Budget measured from the end of submit.
    pub max_total_wait: Duration,
    /// Each delay is scaled by `uniform(1 - jitter, 1 + jitter)`.
    pub jitter: f64,
    /// Poll with the blocking `/wait` method where the operations
    /// collection offers one, instead of a plain GET.
    pub server_wait: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
            multiplier: 1.3,
            max_total_wait: Duration::from_secs(30 * 60),
            jitter: 0.5,
            server_wait: false,
        }
    }
}

impl PollPolicy {
    /// Polls back to back, without sleeping.
    pub fn no_wait() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            ..Default::default()
        }
    }

    /// Uses server-side waiting where available.
    pub fn with_server_wait(mut self) -> Self {
        self.server_wait = true;
        self
    }

    /// Sets the overall wait budget.
    pub fn with_max_total_wait(mut self, max_total_wait: Duration) -> Self {
        self.max_total_wait = max_total_wait;
        self
    }

    /// Validates the policy.
    pub fn validate(&self) -> CloudResult<()> {
        if !(self.multiplier >= 1.0) {
            return Err(CloudError::configuration("poll multiplier must be >= 1.0"));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(CloudError::configuration("poll jitter must be in [0, 1)"));
        }
        if self.max_delay < self.initial_delay {
            return Err(CloudError::configuration(
                "max_delay must not be smaller than initial_delay",
            ));
        }
        if self.max_total_wait.is_zero() {
            return Err(CloudError::configuration("max_total_wait must be positive"));
        }
        Ok(())
    }

    /// Un-jittered delay before poll number `n` (0-based).
    pub fn base_delay(&self, n: u32) -> Duration {
        let exp = self.multiplier.powi(n.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * exp;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Jittered delay before poll number `n`, never above `max_delay`.
    pub fn delay(&self, n: u32) -> Duration {
        let base = self.base_delay(n).as_secs_f64();
        if base <= 0.0 || self.jitter <= 0.0 {
            return Duration::from_secs_f64(base);
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        Duration::from_secs_f64((base * factor).min(self.max_delay.as_secs_f64()))
    }
}

/// Polling state of one operation: where to poll, how long to wait, and
/// when to give up.
#[derive(Debug, Clone)]
pub struct PollPlan {
    poll: ResourceRef,
    policy: PollPolicy,
    started: Instant,
    deadline: Instant,
    polls: u32,
    cancel: CancellationToken,
}

impl PollPlan {
    /// Starts the wait budget now.
    pub fn new(poll: ResourceRef, policy: PollPolicy, cancel: CancellationToken) -> Self {
        let started = Instant::now();
        Self {
            poll,
            deadline: started + policy.max_total_wait,
            policy,
            started,
            polls: 0,
            cancel,
        }
    }

    /// Reference into the operations collection.
    pub fn poll_ref(&self) -> &ResourceRef {
        &self.poll
    }

    /// Whether polls go through the collection's `/wait` method.
    pub fn uses_server_wait(&self) -> bool {
        self.policy.server_wait && self.poll.collection().supports_wait()
    }

    /// Cancellation token of the invocation.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of delays handed out so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Time since the plan was created.
    pub fn waited(&self) -> Duration {
        self.started.elapsed()
    }

    /// Budget left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns true once the budget is spent.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Delay before the next poll, clipped to the remaining budget.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.polls).min(self.remaining());
        self.polls = self.polls.saturating_add(1);
        delay
    }
}
