//! Integration tests for the Firewatch operator console.
//!
//! These tests drive the full request/response cycle through the HTTP API
//! against a monitor backed by a temporary history file and a recording
//! actuator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum_test::TestServer;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::Instant;
use tower::ServiceExt;

use firewatch::actuator::{ActuatorLink, AlarmCommand};
use firewatch::alarm::AlarmCoordinator;
use firewatch::api::{AppState, router};
use firewatch::config::MonitorConfig;
use firewatch::history::EventLog;
use firewatch::model::{BoundingBox, Frame, RawDetection};
use firewatch::monitor::Monitor;

#[derive(Default)]
struct RecordingLink {
    sent: Mutex<Vec<AlarmCommand>>,
    offline: bool,
}

impl ActuatorLink for RecordingLink {
    fn submit(&self, command: AlarmCommand) {
        self.sent.lock().unwrap().push(command);
    }

    fn is_connected(&self) -> bool {
        !self.offline
    }
}

struct Console {
    server: TestServer,
    monitor: Arc<Monitor>,
    link: Arc<RecordingLink>,
    _dir: TempDir,
}

fn create_console(link: RecordingLink) -> Console {
    let dir = TempDir::new().unwrap();
    let config = MonitorConfig {
        history_path: dir.path().join("history.json"),
        evidence_dir: dir.path().join("evidence"),
        reports_dir: dir.path().join("reports"),
        ..MonitorConfig::default()
    };

    let link = Arc::new(link);
    let alarm = AlarmCoordinator::new(link.clone(), config.alarm_duration);
    let log = Arc::new(EventLog::open(
        &config.history_path,
        &config.evidence_dir,
        config.location.clone(),
    ));
    let monitor = Arc::new(Monitor::new(&config, alarm, log));

    // No status loop here; the console serves the initial snapshot
    let (_, status_rx) = watch::channel(monitor.status());

    let app = router(AppState::new(monitor.clone(), status_rx));

    Console {
        server: TestServer::new(app).unwrap(),
        monitor,
        link,
        _dir: dir,
    }
}

fn fire_frame() -> Frame {
    Frame {
        detections: vec![RawDetection {
            class_id: 0,
            confidence: 0.85,
            bbox: BoundingBox::new(100.0, 100.0, 180.0, 200.0),
            fire_ratio: 0.5,
        }],
        image: Some(b"jpeg".to_vec()),
    }
}

/// Run continuous fire frames past the arm delay.
async fn confirm_fire(monitor: &Monitor) {
    let start = Instant::now();
    for i in 0..100u32 {
        monitor
            .process(fire_frame(), start + Duration::from_millis(33) * i)
            .await;
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let console = create_console(RecordingLink::default());

    let response = console.server.get("/health").await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_router_serves_without_test_server() {
    let dir = TempDir::new().unwrap();
    let config = MonitorConfig {
        history_path: dir.path().join("history.json"),
        ..MonitorConfig::default()
    };
    let alarm = AlarmCoordinator::new(Arc::new(RecordingLink::default()), config.alarm_duration);
    let log = Arc::new(EventLog::open(
        &config.history_path,
        dir.path().join("evidence"),
        config.location.clone(),
    ));
    let monitor = Arc::new(Monitor::new(&config, alarm, log));
    let (_, status_rx) = watch::channel(monitor.status());

    let response = router(AppState::new(monitor, status_rx))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_idle() {
    let console = create_console(RecordingLink::default());

    let response = console.server.get("/status").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["fire_detected"], false);
    assert_eq!(body["alarm_active"], false);
    assert_eq!(body["actuator_connected"], true);
    assert!(body["alarm_remaining_secs"].is_null());
}

#[tokio::test]
async fn test_history_empty() {
    let console = create_console(RecordingLink::default());

    let response = console.server.get("/history").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_confirmed_fire_appears_in_history() {
    let console = create_console(RecordingLink::default());
    confirm_fire(&console.monitor).await;

    let response = console.server.get("/history?days=1").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["confidence"], 85.0);
    assert_eq!(records[0]["alarm_triggered"], true);
    assert_eq!(records[0]["manual_silence"], false);
    assert!(records[0]["image_path"].as_str().unwrap().ends_with(".jpg"));
}

#[tokio::test]
async fn test_silence_when_off() {
    let console = create_console(RecordingLink::default());

    let response = console.server.post("/alarm/silence").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["performed"], false);
    assert!(console.link.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_silence_during_fire_logs_manual_silence() {
    let console = create_console(RecordingLink::default());
    confirm_fire(&console.monitor).await;

    let response = console.server.post("/alarm/silence").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["performed"], true);
    assert_eq!(
        console.link.sent.lock().unwrap().clone(),
        vec![AlarmCommand::On, AlarmCommand::Off]
    );

    let history: serde_json::Value = console.server.get("/history").await.json();
    let records = history.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["manual_silence"], true);
}

#[tokio::test]
async fn test_alarm_test_endpoint() {
    let console = create_console(RecordingLink::default());

    let response = console.server.post("/alarm/test").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["performed"], true);
    assert_eq!(console.link.sent.lock().unwrap().clone(), vec![AlarmCommand::Test]);
}

#[tokio::test]
async fn test_alarm_test_without_actuator() {
    let console = create_console(RecordingLink {
        offline: true,
        ..RecordingLink::default()
    });

    let response = console.server.post("/alarm/test").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    // Still queued so a recovered board can answer it
    assert_eq!(body["performed"], true);
    assert!(body["message"].as_str().unwrap().contains("disconnected"));
    assert_eq!(console.link.sent.lock().unwrap().clone(), vec![AlarmCommand::Test]);

    let notices: serde_json::Value = console.server.get("/notices").await.json();
    assert_eq!(notices[0]["kind"], "connectivity");
}

#[tokio::test]
async fn test_chat_replies() {
    let console = create_console(RecordingLink::default());

    let response = console
        .server
        .post("/chat")
        .json(&json!({ "message": "¿hay fuego?" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(
        body["reply"]
            .as_str()
            .unwrap()
            .starts_with("No fire detected")
    );
}

#[tokio::test]
async fn test_chat_unknown_text_gets_fallback() {
    let console = create_console(RecordingLink::default());

    let response = console
        .server
        .post("/chat")
        .json(&json!({ "message": "lorem ipsum dolor" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["reply"].as_str().unwrap().contains("help"));
}

#[tokio::test]
async fn test_chat_missing_message_is_rejected() {
    let console = create_console(RecordingLink::default());

    let response = console
        .server
        .post("/chat")
        .json(&json!({ "text": "hello" }))
        .expect_failure()
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_report_default_period() {
    let console = create_console(RecordingLink::default());
    confirm_fire(&console.monitor).await;

    let response = console.server.post("/reports").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["period"], "week");
    assert_eq!(body["detections"], 1);
    assert!(std::path::Path::new(body["path"].as_str().unwrap()).is_file());
}

#[tokio::test]
async fn test_report_monthly() {
    let console = create_console(RecordingLink::default());

    let response = console.server.post("/reports?period=month").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["period"], "month");
    assert_eq!(body["detections"], 0);
}

#[tokio::test]
async fn test_report_invalid_period() {
    let console = create_console(RecordingLink::default());

    let response = console
        .server
        .post("/reports?period=year")
        .expect_failure()
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}
