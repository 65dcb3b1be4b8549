use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use vigil_core::bus::{BusError, Topic};
use vigil_core::domain::{AlertEvent, EventId};
use vigil_core::errors::{ApplicationError, InterfaceError};
use vigil_core::priority::Priority;

use crate::health;
use crate::pipeline::AlertBus;

#[derive(Clone)]
pub struct IngressState {
    pub bus: AlertBus,
    pub min_priority: Priority,
    pub channel: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Queued,
    BelowFloor,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    detail: &'a str,
    correlation_id: &'a str,
}

pub struct ApiError(pub InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.user_message(),
            detail: self.0.message(),
            correlation_id: self.0.correlation_id(),
        };
        (status, Json(body)).into_response()
    }
}

/// `POST /` takes one alert; `/health` reports pipeline readiness. Any other
/// method on `/` is answered with 405 by the router.
pub fn router(state: IngressState) -> Router {
    let bus = state.bus.clone();
    Router::new()
        .route("/", post(ingest))
        .with_state(state)
        .merge(health::router(bus))
        .layer(TraceLayer::new_for_http())
}

pub async fn ingest(State(state): State<IngressState>, body: Bytes) -> Result<StatusCode, ApiError> {
    match admit(&state, &body) {
        Ok(Admission::Queued) => Ok(StatusCode::CREATED),
        Ok(Admission::BelowFloor) => Ok(StatusCode::NO_CONTENT),
        Err((correlation_id, application_error)) => {
            let interface = application_error.into_interface(correlation_id);
            warn!(
                event_name = "ingress.rejected",
                correlation_id = %interface.correlation_id(),
                status = interface.status_code(),
                error = %interface,
                "alert rejected at ingress"
            );
            Err(ApiError(interface))
        }
    }
}

/// Parses, classifies and, when the priority clears the floor, publishes one
/// alert on `raw-alert`. Errors carry the correlation id to report.
pub fn admit(state: &IngressState, raw: &[u8]) -> Result<Admission, (String, ApplicationError)> {
    let event = AlertEvent::from_raw(raw)
        .map_err(|domain_error| (EventId::new().to_string(), ApplicationError::from(domain_error)))?
        .with_channel(state.channel.as_str());
    let correlation_id = event.id().to_string();

    if !event.priority().admits(state.min_priority) {
        debug!(
            event_name = "ingress.below_floor",
            correlation_id = %correlation_id,
            rule = %event.rule(),
            priority = %event.priority(),
            floor = %state.min_priority,
            "alert below priority floor; not queued"
        );
        return Ok(Admission::BelowFloor);
    }

    let rule = event.rule().to_owned();
    let priority = event.priority();
    let delivered = state
        .bus
        .publish(Topic::RAW_ALERT, event)
        .map_err(|bus_error| (correlation_id.clone(), ApplicationError::from(bus_error)))?;
    if delivered == 0 {
        let bus_error = BusError::NoSubscribers { topic: Topic::RAW_ALERT.name() };
        return Err((correlation_id, ApplicationError::from(bus_error)));
    }

    info!(
        event_name = "ingress.admitted",
        correlation_id = %correlation_id,
        rule = %rule,
        priority = %priority,
        "alert admitted"
    );
    Ok(Admission::Queued)
}
