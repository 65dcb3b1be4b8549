pub mod alert;

pub use alert::{AlertEvent, AlertPayload, EventId, OutputValue, ThreadHandle};
