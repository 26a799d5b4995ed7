//! Alarm coordinator.
//!
//! Owns the logical alarm state and drives the actuator from it. The alarm
//! is latched on by [`AlarmCoordinator::activate`] and released either by an
//! operator or by the auto-off timer, whichever comes first. Activation is
//! idempotent: a second call while sounding neither restarts the timer nor
//! extends the deadline.
//!
//! Commands are queued to the actuator while the state lock is held, so the
//! order the board sees always matches the order of state changes.
//!
//! The logical state never depends on the actuator. If the board is missing
//! or a write fails the alarm is still recorded as active, so the console and
//! the event log reflect what the monitor decided.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::actuator::{ActuatorLink, AlarmCommand};

/// Time allowed for queued actuator commands to drain at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorStatus {
    Connected,
    Disconnected,
}

/// Public view of the alarm state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmStatus {
    pub active: bool,
    /// Time left before auto-off, while active.
    pub remaining: Option<Duration>,
    pub actuator: ActuatorStatus,
    pub activations: u64,
}

#[derive(Debug, Default)]
struct AlarmState {
    active: bool,
    auto_off_deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    activations: u64,
}

struct AlarmInner {
    state: Mutex<AlarmState>,
    actuator: Arc<dyn ActuatorLink>,
    alarm_duration: Duration,
}

/// Cheaply cloneable handle to the single alarm.
#[derive(Clone)]
pub struct AlarmCoordinator {
    inner: Arc<AlarmInner>,
}

impl AlarmCoordinator {
    pub fn new(actuator: Arc<dyn ActuatorLink>, alarm_duration: Duration) -> Self {
        Self {
            inner: Arc::new(AlarmInner {
                state: Mutex::new(AlarmState::default()),
                actuator,
                alarm_duration,
            }),
        }
    }

    pub fn alarm_duration(&self) -> Duration {
        self.inner.alarm_duration
    }

    /// Turn the alarm on and schedule auto-off.
    ///
    /// Returns `false` if the alarm was already sounding. Must be called
    /// from within a tokio runtime.
    pub fn activate(&self) -> bool {
        let mut state = self.lock();
        if state.active {
            debug!("Alarm already active, activation ignored");
            return false;
        }

        let deadline = Instant::now() + self.inner.alarm_duration;
        state.active = true;
        state.auto_off_deadline = Some(deadline);
        state.activations += 1;

        let generation = state.activations;
        let coordinator = self.clone();
        state.timer = Some(tokio::spawn(async move {
            time::sleep_until(deadline).await;
            coordinator.auto_off(generation);
        }));

        self.inner.actuator.submit(AlarmCommand::On);
        info!(
            activation = generation,
            auto_off_secs = self.inner.alarm_duration.as_secs_f64(),
            "Alarm activated"
        );
        true
    }

    /// Turn the alarm off. Returns `false` if it was not sounding.
    pub fn deactivate(&self) -> bool {
        let mut state = self.lock();
        if !state.active {
            return false;
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        Self::release(&mut state);
        self.inner.actuator.submit(AlarmCommand::Off);
        drop(state);

        info!("Alarm deactivated");
        true
    }

    /// Queue the actuator's self-test.
    ///
    /// The command is queued even when the link last reported a failure,
    /// since a successful test is how a recovered board shows up again.
    /// Returns the link state as it was when the test was queued.
    pub fn test(&self) -> ActuatorStatus {
        let status = self.actuator_status();
        self.inner.actuator.submit(AlarmCommand::Test);
        match status {
            ActuatorStatus::Connected => info!("Alarm test sent"),
            ActuatorStatus::Disconnected => {
                warn!("Alarm test queued but actuator last reported disconnected")
            }
        }
        status
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn remaining(&self) -> Option<Duration> {
        let state = self.lock();
        state
            .auto_off_deadline
            .filter(|_| state.active)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn actuator_status(&self) -> ActuatorStatus {
        if self.inner.actuator.is_connected() {
            ActuatorStatus::Connected
        } else {
            ActuatorStatus::Disconnected
        }
    }

    pub fn status(&self) -> AlarmStatus {
        let (active, activations) = {
            let state = self.lock();
            (state.active, state.activations)
        };
        AlarmStatus {
            active,
            remaining: self.remaining(),
            actuator: self.actuator_status(),
            activations,
        }
    }

    /// Cancel the timer, silence the board if needed and wait for the
    /// actuator to drain its queue.
    pub async fn shutdown(&self) {
        let was_active = {
            let mut state = self.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            let was_active = state.active;
            Self::release(&mut state);
            if was_active {
                self.inner.actuator.submit(AlarmCommand::Off);
            }
            was_active
        };

        if was_active {
            info!("Alarm silenced for shutdown");
        }

        let Some(worker) = self.inner.actuator.close() else {
            return;
        };
        let join = tokio::task::spawn_blocking(move || worker.join());
        match time::timeout(DRAIN_TIMEOUT, join).await {
            Ok(Ok(Ok(()))) => debug!("Actuator drained"),
            Ok(_) => warn!("Actuator worker ended abnormally"),
            Err(_) => warn!(
                timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "Actuator did not drain in time"
            ),
        }
    }

    fn auto_off(&self, generation: u64) {
        let mut state = self.lock();
        // A manual release followed by a fresh activation supersedes this timer
        if !state.active || state.activations != generation {
            return;
        }

        state.timer = None;
        Self::release(&mut state);
        self.inner.actuator.submit(AlarmCommand::Off);
        drop(state);

        info!(activation = generation, "Alarm auto-off");
    }

    fn release(state: &mut AlarmState) {
        state.active = false;
        state.auto_off_deadline = None;
    }

    fn lock(&self) -> MutexGuard<'_, AlarmState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
