use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use vigil_core::bus::Topic;

use crate::pipeline::AlertBus;

const PIPELINE_TOPICS: [Topic; 2] = [Topic::RAW_ALERT, Topic::ENRICH];

#[derive(Clone)]
pub struct HealthState {
    bus: AlertBus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TopicCheck {
    pub topic: &'static str,
    pub subscribers: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BusCheck {
    pub status: &'static str,
    pub closed: bool,
    pub topics: Vec<TopicCheck>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub bus: BusCheck,
    pub checked_at: String,
}

pub fn router(bus: AlertBus) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { bus })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let bus = bus_check(&state.bus);
    let ready = bus.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        bus,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn bus_check(bus: &AlertBus) -> BusCheck {
    let closed = bus.is_closed();
    let topics: Vec<TopicCheck> = PIPELINE_TOPICS
        .iter()
        .map(|topic| TopicCheck { topic: topic.name(), subscribers: bus.subscriber_count(*topic) })
        .collect();
    let wired = topics.iter().all(|check| check.subscribers > 0);

    BusCheck { status: if !closed && wired { "ready" } else { "degraded" }, closed, topics }
}
