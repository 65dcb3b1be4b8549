use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

const HOUR: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limiter wait cancelled: deadline elapsed before a token was available")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct Bucket {
    /// Goes negative while reservations are queued for future refills.
    tokens: f64,
    refilled_at: Instant,
}

/// Token bucket shared by every enrichment invocation.
///
/// Slots are handed out by [`RateLimiter::reserve`], which is synchronous:
/// the order of `reserve` calls is the order tokens are granted in. The bucket
/// starts full.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_every: Duration,
    bucket: Mutex<Bucket>,
}

/// A place in the limiter queue, taken by [`RateLimiter::reserve`].
#[must_use = "a reservation does nothing until it is waited on"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reservation {
    Granted { ready_at: Instant },
    /// No token would be free before the deadline. Nothing was consumed.
    Refused { deadline: Instant },
}

impl Reservation {
    /// Sleeps until the reserved token is due, or until the deadline for a
    /// refused reservation.
    pub async fn wait(self) -> Result<(), RateLimitError> {
        match self {
            Self::Granted { ready_at } => {
                if ready_at > Instant::now() {
                    sleep_until(ready_at).await;
                }
                Ok(())
            }
            Self::Refused { deadline } => {
                sleep_until(deadline).await;
                Err(RateLimitError::DeadlineExceeded)
            }
        }
    }
}

impl RateLimiter {
    pub fn per_hour(quota: u32) -> Self {
        let quota = quota.max(1);
        Self::new(quota, HOUR / quota)
    }

    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_every: refill_every.max(Duration::from_nanos(1)),
            bucket: Mutex::new(Bucket { tokens: capacity, refilled_at: Instant::now() }),
        }
    }

    /// Queues for the next token. A reservation that could only be served
    /// after `deadline` is refused and consumes nothing.
    pub fn reserve(&self, deadline: Instant) -> Reservation {
        let now = Instant::now();
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket, now);

        let remaining = bucket.tokens - 1.0;
        let ready_at =
            if remaining >= 0.0 { now } else { now + self.refill_every.mul_f64(-remaining) };
        if ready_at > deadline {
            debug!(
                wait_ms = ready_at.saturating_duration_since(now).as_millis() as u64,
                "no token before deadline; reservation refused"
            );
            return Reservation::Refused { deadline };
        }

        bucket.tokens = remaining;
        if ready_at > now {
            debug!(
                wait_ms = ready_at.saturating_duration_since(now).as_millis() as u64,
                "rate limiter exhausted; waiting for refill"
            );
        }
        Reservation::Granted { ready_at }
    }

    /// Reserves and waits in one step.
    pub async fn wait(&self, deadline: Instant) -> Result<(), RateLimitError> {
        self.reserve(deadline).wait().await
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.refilled_at);
        let earned = elapsed.as_secs_f64() / self.refill_every.as_secs_f64();
        bucket.tokens = (bucket.tokens + earned).min(self.capacity);
        bucket.refilled_at = now;
    }
}
