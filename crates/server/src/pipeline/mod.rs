//! The two processing stages behind the ingress.
//!
//! ```text
//! raw-alert ─▶ Notifier ─▶ chat post ─▶ enrich ─▶ Enricher ─▶ limiter ─▶ completion ─▶ threaded reply
//! ```
//!
//! Both stages own their failures: anything that survives the retry policy is
//! logged and the event is dropped. Nothing is requeued.

pub mod enrichment;
pub mod notifier;

use vigil_core::bus::EventBus;
use vigil_core::domain::AlertEvent;

pub use enrichment::{EnrichOutcome, Enricher};
pub use notifier::{NotifyOutcome, Notifier};

pub type AlertBus = EventBus<AlertEvent>;
