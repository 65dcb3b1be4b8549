pub mod bus;
pub mod config;
pub mod domain;
pub mod errors;
pub mod priority;
pub mod rate_limit;
pub mod retry;

pub use bus::{BusError, EventBus, Subscriber, Subscription, Topic};
pub use domain::alert::{AlertEvent, AlertPayload, EventId, OutputValue, ThreadHandle};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use priority::Priority;
pub use rate_limit::{RateLimitError, RateLimiter, Reservation};
pub use retry::{AttemptError, RetryAttempt, RetryDecision, RetryError, RetryPolicy};
