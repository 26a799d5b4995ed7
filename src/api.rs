//! HTTP handlers for the operator console.
//!
//! The console is a local presentation surface over the [`Monitor`]: it
//! reads the status snapshot published by the status loop, lists history and
//! notices, and forwards operator actions. It binds to loopback only.
//!
//! # Endpoints
//!
//! - `GET /health`: liveness
//! - `GET /status`: latest [`StatusSnapshot`]
//! - `GET /history?days=N`: detection records, oldest first
//! - `GET /notices`: recent operator notices, oldest first
//! - `POST /chat`: talk to the assistant
//! - `POST /alarm/silence`, `POST /alarm/test`: alarm actions
//! - `POST /reports?period=week|month`: write a report file

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::alarm::ActuatorStatus;
use crate::assistant::Assistant;
use crate::model::{
    ActionResponse, ChatRequest, ChatResponse, DetectionRecord, HistoryQuery, Notice, ReportQuery,
    ReportResponse, StatusSnapshot,
};
use crate::monitor::{Monitor, SilenceOutcome};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub assistant: Arc<Assistant>,
    pub status: watch::Receiver<StatusSnapshot>,
}

impl AppState {
    pub fn new(monitor: Arc<Monitor>, status: watch::Receiver<StatusSnapshot>) -> Self {
        Self {
            assistant: Arc::new(Assistant::new(monitor.clone())),
            monitor,
            status,
        }
    }
}

/// Build the console router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/history", get(get_history))
        .route("/notices", get(get_notices))
        .route("/chat", post(post_chat))
        .route("/alarm/silence", post(post_silence))
        .route("/alarm/test", post(post_test))
        .route("/reports", post(post_report))
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// GET /status - Latest snapshot from the status loop.
///
/// # Response
///
/// ```json
/// {
///     "phase": "onset",
///     "fire_detected": true,
///     "detection_count": 4,
///     "continuous_duration": 1.8,
///     "confidence": 82.4,
///     "alarm_active": false,
///     "alarm_remaining_secs": null,
///     "actuator_connected": true,
///     "camera_online": true,
///     "updated_at": "2025-03-02T14:05:11.201Z"
/// }
/// ```
pub async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status.borrow().clone())
}

/// GET /history - Detection records from the last `days` days.
///
/// # Query Parameters
///
/// - `days` (optional): Lookback window in days (default: 7)
#[instrument(skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<DetectionRecord>> {
    let records = state.monitor.history(query.days);
    info!(days = query.days, records = records.len(), "History queried");
    Json(records)
}

/// GET /notices - Recent operator notices.
pub async fn get_notices(State(state): State<AppState>) -> Json<Vec<Notice>> {
    Json(state.monitor.notices())
}

/// POST /chat - Send a message to the assistant.
///
/// # Request Body
///
/// ```json
/// { "message": "silence the alarm" }
/// ```
#[instrument(skip(state, request))]
pub async fn post_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let reply = state.assistant.respond(&request.message).await;
    Json(ChatResponse { reply })
}

/// POST /alarm/silence - Operator silence.
#[instrument(skip(state))]
pub async fn post_silence(State(state): State<AppState>) -> Json<ActionResponse> {
    let response = match state.monitor.silence_alarm().await {
        SilenceOutcome::AlreadyOff => ActionResponse {
            performed: false,
            message: "Alarm is already off".to_string(),
        },
        SilenceOutcome::Silenced { fire_present } => {
            info!(fire_present, "Alarm silenced from console");
            ActionResponse {
                performed: true,
                message: if fire_present {
                    "Alarm silenced; fire still in view, silence logged".to_string()
                } else {
                    "Alarm silenced".to_string()
                },
            }
        }
    };
    Json(response)
}

/// POST /alarm/test - Sound the actuator's self-test.
///
/// The test is always queued; the message says whether the link was
/// healthy at the time.
#[instrument(skip(state))]
pub async fn post_test(State(state): State<AppState>) -> Json<ActionResponse> {
    let message = match state.monitor.test_alarm() {
        ActuatorStatus::Connected => "Test command sent",
        ActuatorStatus::Disconnected => "Test command queued; actuator last reported disconnected",
    };
    Json(ActionResponse {
        performed: true,
        message: message.to_string(),
    })
}

/// POST /reports - Write a report for the last week or month.
///
/// # Query Parameters
///
/// - `period` (optional): `week` or `month` (default: `week`)
///
/// # Response
///
/// ```json
/// {
///     "path": "reports/fire_report_weekly_20250302_140511.json",
///     "period": "week",
///     "detections": 3
/// }
/// ```
#[instrument(skip(state))]
pub async fn post_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<ReportResponse>, StatusCode> {
    match state.monitor.generate_report(query.period).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            warn!(
                period = query.period.label(),
                error = %e,
                "Failed to generate report"
            );
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
