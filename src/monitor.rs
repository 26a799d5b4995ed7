//! The monitor: everything wired together.
//!
//! [`Monitor`] owns the shared fire state and reacts to its events. It
//! drives the alarm, writes the event log and keeps a short feed of
//! operator notices. It also runs the two background loops:
//!
//! - the sampling loop, which pulls frames from a [`DetectionSource`] at
//!   roughly 30 Hz and feeds them through the filter and state machine;
//! - the status loop, which publishes a [`StatusSnapshot`] at roughly 10 Hz
//!   on a `watch` channel for the console.
//!
//! Operator actions (silence, test, history, reports) go through the
//! methods here so the console and the chat assistant share one code path.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alarm::{ActuatorStatus, AlarmCoordinator, AlarmStatus};
use crate::config::MonitorConfig;
use crate::detector::{FireEvent, FireListener, FireSnapshot, FireStateMachine, SharedFireState};
use crate::error::SourceError;
use crate::filter::CandidateFilter;
use crate::history::EventLog;
use crate::model::{
    DetectionRecord, Frame, LocationInfo, Notice, NoticeKind, ReportPeriod, ReportResponse,
    StatusSnapshot, TriggerReport,
};
use crate::report;
use crate::source::DetectionSource;

/// Consecutive source failures before the camera is reported offline.
pub const OFFLINE_AFTER_FAILURES: u32 = 30;

/// Notices kept for the console.
const NOTICE_CAPACITY: usize = 100;

/// Result of an operator silence request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceOutcome {
    /// The alarm was not sounding; nothing was done.
    AlreadyOff,
    /// The alarm was turned off. When fire was still in view a
    /// manual-silence record was also written.
    Silenced { fire_present: bool },
}

/// Bounded feed of operator-facing messages.
#[derive(Debug)]
pub struct NoticeBoard {
    capacity: usize,
    entries: Mutex<VecDeque<Notice>>,
}

impl NoticeBoard {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, kind: NoticeKind, message: impl Into<String>) {
        let notice = Notice {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
        };
        info!(kind = ?notice.kind, message = %notice.message, "Operator notice");

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(notice);
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<Notice> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

pub struct Monitor {
    fire: SharedFireState,
    filter: CandidateFilter,
    alarm: AlarmCoordinator,
    log: Arc<EventLog>,
    notices: NoticeBoard,
    camera_online: AtomicBool,
    reports_dir: PathBuf,
    sample_interval: Duration,
    status_interval: Duration,
}

impl Monitor {
    pub fn new(config: &MonitorConfig, alarm: AlarmCoordinator, log: Arc<EventLog>) -> Self {
        let notices = NoticeBoard::new(NOTICE_CAPACITY);
        if alarm.actuator_status() == ActuatorStatus::Disconnected {
            notices.push(
                NoticeKind::Connectivity,
                "Alarm actuator not connected; alarms will be logged but not sounded",
            );
        }

        Self {
            fire: SharedFireState::new(FireStateMachine::new(config.arm_delay)),
            filter: CandidateFilter::from_config(config),
            alarm,
            log,
            notices,
            camera_online: AtomicBool::new(true),
            reports_dir: config.reports_dir.clone(),
            sample_interval: config.sample_interval,
            status_interval: config.status_interval,
        }
    }

    pub fn alarm(&self) -> &AlarmCoordinator {
        &self.alarm
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn location(&self) -> &LocationInfo {
        self.log.location()
    }

    pub fn fire_snapshot(&self) -> FireSnapshot {
        self.fire.snapshot()
    }

    pub fn alarm_status(&self) -> AlarmStatus {
        self.alarm.status()
    }

    pub fn camera_online(&self) -> bool {
        self.camera_online.load(Ordering::Relaxed)
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.recent()
    }

    /// Run one frame through the filter and state machine.
    ///
    /// When the frame confirms a fire, the triggering record is written
    /// (with the frame's image as evidence) before this returns.
    pub async fn process(&self, frame: Frame, now: Instant) -> Vec<FireEvent> {
        let sample = self.filter.sample(&frame.detections);
        let events = self.fire.step(&sample, now, self);

        for event in &events {
            if let FireEvent::AlarmShouldTrigger {
                confidence,
                duration,
            } = *event
            {
                let report = TriggerReport {
                    confidence: confidence * 100.0,
                    duration,
                    alarm_triggered: self.alarm.is_active(),
                    manual_silence: false,
                };
                self.record(report, frame.image.clone()).await;
            }
        }

        events
    }

    pub fn status(&self) -> StatusSnapshot {
        let fire = self.fire.snapshot();
        let alarm = self.alarm.status();

        StatusSnapshot {
            phase: fire.phase,
            fire_detected: fire.fire_detected(),
            detection_count: fire.detection_count,
            continuous_duration: fire.continuous_duration,
            confidence: fire.current_confidence * 100.0,
            alarm_active: alarm.active,
            alarm_remaining_secs: alarm.remaining.map(|d| d.as_secs_f64()),
            actuator_connected: alarm.actuator == ActuatorStatus::Connected,
            camera_online: self.camera_online(),
            updated_at: Utc::now(),
        }
    }

    /// Operator silence. Writes a manual-silence record if fire is still in
    /// view when the alarm is turned off.
    pub async fn silence_alarm(&self) -> SilenceOutcome {
        if !self.alarm.deactivate() {
            return SilenceOutcome::AlreadyOff;
        }
        self.notices
            .push(NoticeKind::AlarmSilenced, "Alarm silenced by operator");

        let fire = self.fire.snapshot();
        if !fire.fire_detected() {
            return SilenceOutcome::Silenced {
                fire_present: false,
            };
        }

        let report = TriggerReport {
            confidence: fire.current_confidence * 100.0,
            duration: fire.continuous_duration,
            alarm_triggered: true,
            manual_silence: true,
        };
        self.record(report, None).await;
        SilenceOutcome::Silenced { fire_present: true }
    }

    /// Queue a self-test on the actuator and report the link state.
    pub fn test_alarm(&self) -> ActuatorStatus {
        self.alarm.test()
    }

    pub fn history(&self, days: u32) -> Vec<DetectionRecord> {
        self.log.query(days)
    }

    /// Write a report for `period` into the reports directory.
    pub async fn generate_report(&self, period: ReportPeriod) -> anyhow::Result<ReportResponse> {
        let log = self.log.clone();
        let dir = self.reports_dir.clone();
        tokio::task::spawn_blocking(move || {
            report::generate_report(&log, period, &dir, Utc::now())
        })
        .await
        .context("report task failed")?
    }

    /// Sample `source` until it is exhausted or `shutdown` fires.
    pub async fn run_detection_loop<S: DetectionSource>(
        self: Arc<Self>,
        mut source: S,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures: u32 = 0;

        info!(
            interval_ms = self.sample_interval.as_millis() as u64,
            "Detection loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            match source.next_frame() {
                Ok(frame) => {
                    if failures >= OFFLINE_AFTER_FAILURES {
                        self.notices
                            .push(NoticeKind::Source, "Camera back online");
                    }
                    failures = 0;
                    self.camera_online.store(true, Ordering::Relaxed);
                    self.process(frame, Instant::now()).await;
                }
                Err(SourceError::Exhausted) => {
                    info!("Detection source exhausted");
                    break;
                }
                Err(e) => {
                    failures += 1;
                    if failures == 1 || failures % OFFLINE_AFTER_FAILURES == 0 {
                        warn!(error = %e, consecutive = failures, "Frame skipped");
                    } else {
                        debug!(error = %e, consecutive = failures, "Frame skipped");
                    }
                    if failures == OFFLINE_AFTER_FAILURES {
                        self.camera_online.store(false, Ordering::Relaxed);
                        self.notices.push(
                            NoticeKind::Source,
                            format!("Camera offline after {failures} failed frames: {e}"),
                        );
                    }
                }
            }
        }

        info!("Detection loop stopped");
    }

    /// Publish a status snapshot every status interval until `shutdown`
    /// fires.
    pub async fn run_status_loop(
        self: Arc<Self>,
        status: watch::Sender<StatusSnapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = time::interval(self.status_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    status.send_replace(self.status());
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("Status loop stopped");
    }

    async fn record(&self, report: TriggerReport, image: Option<Vec<u8>>) -> Option<DetectionRecord> {
        let log = self.log.clone();
        let result =
            tokio::task::spawn_blocking(move || log.record_trigger(report, image.as_deref())).await;

        match result {
            Ok(Ok(record)) => Some(record),
            Ok(Err(e)) => {
                warn!(error = %e, "Detection kept in memory only");
                self.notices
                    .push(NoticeKind::Persistence, format!("History not saved: {e}"));
                None
            }
            Err(e) => {
                warn!(error = %e, "History writer task failed");
                None
            }
        }
    }
}

impl FireListener for Monitor {
    fn on_fire_detected(&self, confidence: f64) {
        warn!(confidence = confidence * 100.0, "Fire detected");
        self.notices.push(
            NoticeKind::FireDetected,
            format!("Fire detected ({:.0}% confidence)", confidence * 100.0),
        );
    }

    fn on_alarm_should_trigger(&self, confidence: f64, duration: f64) {
        let activated = self.alarm.activate();
        warn!(
            confidence = confidence * 100.0,
            duration,
            activated,
            "Fire confirmed, alarm requested"
        );
        self.notices.push(
            NoticeKind::AlarmTriggered,
            format!(
                "Fire confirmed after {duration:.1}s ({:.0}% confidence), alarm on",
                confidence * 100.0
            ),
        );
    }

    fn on_fire_cleared(&self, was_triggered: bool) {
        info!(was_triggered, "Fire cleared");
        self.notices.push(NoticeKind::FireCleared, "Fire no longer detected");
    }
}
