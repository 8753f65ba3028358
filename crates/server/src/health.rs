use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use parley_bus::InMemoryBus;
use parley_core::domain::conversation::ConversationStats;
use parley_core::domain::message::ConversationId;
use parley_core::errors::{ApplicationError, InterfaceError};
use parley_core::flow::FlowCoordinator;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::bootstrap::Application;

#[derive(Clone)]
pub struct HealthState {
    coordinator: Arc<FlowCoordinator>,
    bus: InMemoryBus,
    topic: String,
    agents: usize,
}

impl HealthState {
    pub fn new(
        coordinator: Arc<FlowCoordinator>,
        bus: InMemoryBus,
        topic: impl Into<String>,
        agents: usize,
    ) -> Self {
        Self { coordinator, bus, topic: topic.into(), agents }
    }

    pub fn from_application(app: &Application) -> Self {
        Self::new(
            app.coordinator.clone(),
            app.bus.clone(),
            app.config.bus.topic.clone(),
            app.fleet.len(),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub bus: HealthCheck,
    pub agents: usize,
    pub checked_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

/// Maps an [`InterfaceError`] onto an HTTP status with a user-safe body.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            detail: self.0.to_string(),
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/conversations/{conversation_id}/stats", get(conversation_stats))
        .with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let bus = bus_check(&state);
    let ready = bus.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "parley-server runtime initialized".to_string(),
        },
        bus,
        agents: state.agents,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

/// Ingress plus one subscription per agent must be attached to the topic.
fn bus_check(state: &HealthState) -> HealthCheck {
    let expected = state.agents + 1;
    let subscribed = state.bus.subscriber_count(&state.topic);
    let detail = format!("{subscribed} of {expected} consumers subscribed to `{}`", state.topic);
    if subscribed >= expected {
        HealthCheck { status: "ready", detail }
    } else {
        HealthCheck { status: "degraded", detail }
    }
}

pub async fn conversation_stats(
    State(state): State<HealthState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ConversationStats>, ApiError> {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    state.coordinator.stats(&ConversationId::from(conversation_id)).map(Json).map_err(|error| {
        warn!(
            event_name = "system.http.stats_rejected",
            correlation_id = %correlation_id,
            error = %error,
            "conversation stats request rejected"
        );
        ApiError(ApplicationError::from(error).into_interface(correlation_id))
    })
}
