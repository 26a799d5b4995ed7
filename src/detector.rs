//! Fire state machine.
//!
//! Turns the per-frame "is there fire" signal into a handful of lifecycle
//! events. A fire has to be seen continuously for the arm delay before the
//! alarm is requested, and the request is made once per continuous episode.
//!
//! ```text
//!          fire                 fire, elapsed >= arm_delay
//!  Idle ─────────► Onset ──────────────────────────────► Triggered
//!   ▲                │                                       │
//!   │   no fire      │              no fire                  │
//!   └────────────────┴───────────────────────────────────────┘
//! ```
//!
//! - `Idle → Onset` emits [`FireEvent::Detected`].
//! - `Onset → Triggered` emits [`FireEvent::AlarmShouldTrigger`], exactly once.
//! - `Onset | Triggered → Idle` emits [`FireEvent::Cleared`].
//!
//! Elapsed time is measured on the monotonic clock between samples, so a
//! variable frame rate still yields the configured delay.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::model::{DetectionSample, FirePhase};

/// A lifecycle transition produced by [`FireStateMachine::observe`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FireEvent {
    /// Fire appeared after an idle period. Confidence in `[0, 1]`.
    Detected { confidence: f64 },

    /// Fire has persisted for the arm delay.
    AlarmShouldTrigger { confidence: f64, duration: f64 },

    /// Fire is gone. `was_triggered` tells whether the episode reached the
    /// alarm stage.
    Cleared { was_triggered: bool },
}

impl FireEvent {
    pub fn dispatch(&self, listener: &dyn FireListener) {
        match *self {
            FireEvent::Detected { confidence } => listener.on_fire_detected(confidence),
            FireEvent::AlarmShouldTrigger {
                confidence,
                duration,
            } => listener.on_alarm_should_trigger(confidence, duration),
            FireEvent::Cleared { was_triggered } => listener.on_fire_cleared(was_triggered),
        }
    }
}

/// Subscriber to fire lifecycle events.
///
/// Called after the state lock is released, so implementations may read a
/// [`FireSnapshot`] but must not block for long: they run on the sampling
/// loop.
pub trait FireListener: Send + Sync {
    fn on_fire_detected(&self, confidence: f64);
    fn on_alarm_should_trigger(&self, confidence: f64, duration: f64);
    fn on_fire_cleared(&self, was_triggered: bool);
}

#[derive(Debug, Clone, Copy)]
struct Episode {
    started: Instant,
    started_at: DateTime<Utc>,
    triggered: bool,
}

/// Copy of the state machine's fields at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireSnapshot {
    pub phase: FirePhase,
    pub fire_start_time: Option<Instant>,
    pub fire_started_at: Option<DateTime<Utc>>,
    pub continuous_duration: f64,
    pub current_confidence: f64,
    pub detection_count: u64,
}

impl FireSnapshot {
    pub fn fire_detected(&self) -> bool {
        self.phase != FirePhase::Idle
    }
}

#[derive(Debug)]
pub struct FireStateMachine {
    arm_delay: Duration,
    episode: Option<Episode>,
    continuous_duration: f64,
    current_confidence: f64,
    detection_count: u64,
}

impl FireStateMachine {
    pub fn new(arm_delay: Duration) -> Self {
        Self {
            arm_delay,
            episode: None,
            continuous_duration: 0.0,
            current_confidence: 0.0,
            detection_count: 0,
        }
    }

    pub fn arm_delay(&self) -> Duration {
        self.arm_delay
    }

    pub fn phase(&self) -> FirePhase {
        match self.episode {
            None => FirePhase::Idle,
            Some(Episode {
                triggered: false, ..
            }) => FirePhase::Onset,
            Some(Episode {
                triggered: true, ..
            }) => FirePhase::Triggered,
        }
    }

    pub fn snapshot(&self) -> FireSnapshot {
        FireSnapshot {
            phase: self.phase(),
            fire_start_time: self.episode.map(|e| e.started),
            fire_started_at: self.episode.map(|e| e.started_at),
            continuous_duration: self.continuous_duration,
            current_confidence: self.current_confidence,
            detection_count: self.detection_count,
        }
    }

    /// Feed one sample taken at `now` and return the transitions it caused.
    ///
    /// With a zero arm delay the first fire sample yields both `Detected`
    /// and `AlarmShouldTrigger`; otherwise at most one event is returned.
    pub fn observe(&mut self, sample: &DetectionSample, now: Instant) -> Vec<FireEvent> {
        let fire = sample.fire_detected_now();
        let confidence = sample.max_confidence();
        let mut events = Vec::new();

        if !fire {
            if let Some(episode) = self.episode.take() {
                self.continuous_duration = 0.0;
                self.current_confidence = 0.0;
                events.push(FireEvent::Cleared {
                    was_triggered: episode.triggered,
                });
            }
            return events;
        }

        if self.episode.is_none() {
            self.episode = Some(Episode {
                started: now,
                started_at: Utc::now(),
                triggered: false,
            });
            self.detection_count += 1;
            events.push(FireEvent::Detected { confidence });
        }

        if let Some(episode) = self.episode.as_mut() {
            let elapsed = now.saturating_duration_since(episode.started);
            self.continuous_duration = elapsed.as_secs_f64();
            self.current_confidence = confidence;

            if !episode.triggered && elapsed >= self.arm_delay {
                episode.triggered = true;
                events.push(FireEvent::AlarmShouldTrigger {
                    confidence,
                    duration: self.continuous_duration,
                });
            }
        }

        events
    }
}

/// The process-wide fire state, shared between the sampling loop, the
/// status loop and operator commands.
#[derive(Debug)]
pub struct SharedFireState {
    machine: Mutex<FireStateMachine>,
}

impl SharedFireState {
    pub fn new(machine: FireStateMachine) -> Self {
        Self {
            machine: Mutex::new(machine),
        }
    }

    /// Run one transition under the lock, then notify `listener` of every
    /// event it produced.
    pub fn step(
        &self,
        sample: &DetectionSample,
        now: Instant,
        listener: &dyn FireListener,
    ) -> Vec<FireEvent> {
        let events = self.lock().observe(sample, now);
        for event in &events {
            event.dispatch(listener);
        }
        events
    }

    pub fn snapshot(&self) -> FireSnapshot {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, FireStateMachine> {
        // observe() never panics mid-update, so a poisoned lock still holds
        // consistent state.
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_nanos(1_000_000_000 / 30);

    fn machine() -> FireStateMachine {
        FireStateMachine::new(Duration::from_secs(3))
    }

    fn fire() -> DetectionSample {
        DetectionSample::with_fire(0.8)
    }

    fn triggers(events: &[FireEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, FireEvent::AlarmShouldTrigger { .. }))
            .count()
    }

    fn assert_invariants(m: &FireStateMachine) {
        let snap = m.snapshot();
        assert_eq!(snap.fire_start_time.is_some(), snap.phase != FirePhase::Idle);
        assert_eq!(snap.fire_started_at.is_some(), snap.phase != FirePhase::Idle);
        assert!(snap.continuous_duration >= 0.0);
        if snap.phase == FirePhase::Idle {
            assert_eq!(snap.continuous_duration, 0.0);
        }
    }

    #[test]
    fn test_idle_stays_idle_without_fire() {
        let mut m = machine();
        let t0 = Instant::now();
        assert!(m.observe(&DetectionSample::clear(), t0).is_empty());
        assert!(m.observe(&DetectionSample::clear(), t0 + FRAME).is_empty());
        assert_eq!(m.phase(), FirePhase::Idle);
        assert_eq!(m.snapshot().detection_count, 0);
    }

    #[test]
    fn test_first_fire_sample_is_onset() {
        let mut m = machine();
        let t0 = Instant::now();

        let events = m.observe(&DetectionSample::with_fire(0.74), t0);

        assert_eq!(events, vec![FireEvent::Detected { confidence: 0.74 }]);
        assert_eq!(m.phase(), FirePhase::Onset);
        assert_eq!(m.snapshot().fire_start_time, Some(t0));
        assert_eq!(m.snapshot().detection_count, 1);
        assert_invariants(&m);
    }

    #[test]
    fn test_continuous_fire_triggers_once_at_arm_delay() {
        let mut m = machine();
        let t0 = Instant::now();
        let mut trigger_at = Vec::new();

        // 0..=5 s at 30 Hz
        for i in 0..=150u32 {
            let now = t0 + FRAME * i;
            for event in m.observe(&fire(), now) {
                if let FireEvent::AlarmShouldTrigger { duration, .. } = event {
                    trigger_at.push((now - t0, duration));
                }
            }
            assert_invariants(&m);
        }

        assert_eq!(trigger_at.len(), 1);
        let (at, duration) = trigger_at[0];
        assert!(at >= Duration::from_secs(3));
        assert!(at < Duration::from_secs(3) + FRAME);
        assert!((duration - 3.0).abs() < FRAME.as_secs_f64());
        assert_eq!(m.phase(), FirePhase::Triggered);
    }

    #[test]
    fn test_does_not_trigger_before_arm_delay() {
        let mut m = machine();
        let t0 = Instant::now();
        m.observe(&fire(), t0);

        let events = m.observe(&fire(), t0 + Duration::from_millis(2999));
        assert!(events.is_empty());
        assert_eq!(m.phase(), FirePhase::Onset);
        assert!((m.snapshot().continuous_duration - 2.999).abs() < 1e-9);
    }

    #[test]
    fn test_interrupted_run_restarts_the_timer() {
        let mut m = machine();
        let t0 = Instant::now();
        let mut trigger_at = Vec::new();

        // Fire 0..1.5 s, clear 1.5..2.0 s, fire again 2.0..6.0 s.
        for i in 0..=180u32 {
            let elapsed = FRAME * i;
            let secs = elapsed.as_secs_f64();
            let sample = if (1.5..2.0).contains(&secs) {
                DetectionSample::clear()
            } else {
                fire()
            };
            for event in m.observe(&sample, t0 + elapsed) {
                if matches!(event, FireEvent::AlarmShouldTrigger { .. }) {
                    trigger_at.push(secs);
                }
            }
            assert_invariants(&m);
        }

        assert_eq!(trigger_at.len(), 1);
        assert!(trigger_at[0] >= 5.0, "triggered at {}", trigger_at[0]);
        assert_eq!(m.snapshot().detection_count, 2);
    }

    #[test]
    fn test_triggered_does_not_repeat() {
        let mut m = machine();
        let t0 = Instant::now();
        m.observe(&fire(), t0);
        assert_eq!(triggers(&m.observe(&fire(), t0 + Duration::from_secs(3))), 1);

        // Another two full arm delays later, still no repeat
        assert!(m.observe(&fire(), t0 + Duration::from_secs(6)).is_empty());
        assert!(m.observe(&fire(), t0 + Duration::from_secs(9)).is_empty());
        assert_eq!(m.phase(), FirePhase::Triggered);
        assert!((m.snapshot().continuous_duration - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear_after_trigger_reports_it() {
        let mut m = machine();
        let t0 = Instant::now();
        m.observe(&fire(), t0);
        m.observe(&fire(), t0 + Duration::from_secs(4));

        let events = m.observe(&DetectionSample::clear(), t0 + Duration::from_secs(5));

        assert_eq!(
            events,
            vec![FireEvent::Cleared {
                was_triggered: true
            }]
        );
        assert_eq!(m.phase(), FirePhase::Idle);
        assert_eq!(m.snapshot().current_confidence, 0.0);
        assert_invariants(&m);
    }

    #[test]
    fn test_clear_during_onset_reports_untriggered() {
        let mut m = machine();
        let t0 = Instant::now();
        m.observe(&fire(), t0);

        let events = m.observe(&DetectionSample::clear(), t0 + Duration::from_secs(1));
        assert_eq!(
            events,
            vec![FireEvent::Cleared {
                was_triggered: false
            }]
        );
    }

    #[test]
    fn test_rearms_after_clear() {
        let mut m = machine();
        let t0 = Instant::now();

        m.observe(&fire(), t0);
        assert_eq!(triggers(&m.observe(&fire(), t0 + Duration::from_secs(3))), 1);
        m.observe(&DetectionSample::clear(), t0 + Duration::from_secs(4));

        let t1 = t0 + Duration::from_secs(10);
        m.observe(&fire(), t1);
        assert_eq!(triggers(&m.observe(&fire(), t1 + Duration::from_secs(3))), 1);
        assert_eq!(m.snapshot().detection_count, 2);
    }

    #[test]
    fn test_zero_arm_delay_triggers_on_onset() {
        let mut m = FireStateMachine::new(Duration::ZERO);
        let events = m.observe(&fire(), Instant::now());
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], FireEvent::Detected { .. }));
        assert!(matches!(events[1], FireEvent::AlarmShouldTrigger { .. }));
    }

    #[test]
    fn test_confidence_tracks_latest_sample() {
        let mut m = machine();
        let t0 = Instant::now();
        m.observe(&DetectionSample::with_fire(0.6), t0);
        m.observe(&DetectionSample::with_fire(0.9), t0 + FRAME);
        assert!((m.snapshot().current_confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_invariants_hold_for_arbitrary_sequences() {
        // Small LCG so the sequence is reproducible without extra crates
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            seed >> 33
        };

        let mut m = FireStateMachine::new(Duration::from_millis(500));
        let mut now = Instant::now();
        let mut in_run = false;
        let mut triggers_this_run = 0;

        for _ in 0..5000 {
            now += Duration::from_millis(5 + next() % 60);
            let fire_now = next() % 4 != 0;
            let sample = if fire_now {
                DetectionSample::with_fire(0.5 + (next() % 50) as f64 / 100.0)
            } else {
                DetectionSample::clear()
            };

            if !fire_now {
                in_run = false;
                triggers_this_run = 0;
            } else if !in_run {
                in_run = true;
            }

            triggers_this_run += triggers(&m.observe(&sample, now));
            assert!(triggers_this_run <= 1);
            assert_invariants(&m);
        }
    }

    struct Recorder(Mutex<Vec<FireEvent>>);

    impl FireListener for Recorder {
        fn on_fire_detected(&self, confidence: f64) {
            self.0.lock().unwrap().push(FireEvent::Detected { confidence });
        }
        fn on_alarm_should_trigger(&self, confidence: f64, duration: f64) {
            self.0.lock().unwrap().push(FireEvent::AlarmShouldTrigger {
                confidence,
                duration,
            });
        }
        fn on_fire_cleared(&self, was_triggered: bool) {
            self.0
                .lock()
                .unwrap()
                .push(FireEvent::Cleared { was_triggered });
        }
    }

    #[test]
    fn test_shared_state_dispatches_events_to_listener() {
        let state = SharedFireState::new(machine());
        let recorder = Recorder(Mutex::new(Vec::new()));
        let t0 = Instant::now();

        state.step(&fire(), t0, &recorder);
        state.step(&fire(), t0 + Duration::from_secs(3), &recorder);
        state.step(&DetectionSample::clear(), t0 + Duration::from_secs(4), &recorder);

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], FireEvent::Detected { .. }));
        assert!(matches!(seen[1], FireEvent::AlarmShouldTrigger { .. }));
        assert_eq!(
            seen[2],
            FireEvent::Cleared {
                was_triggered: true
            }
        );
        assert_eq!(state.snapshot().phase, FirePhase::Idle);
    }

    struct SnapshotReader<'a>(&'a SharedFireState, Mutex<Vec<FirePhase>>);

    impl FireListener for SnapshotReader<'_> {
        fn on_fire_detected(&self, _confidence: f64) {
            self.1.lock().unwrap().push(self.0.snapshot().phase);
        }
        fn on_alarm_should_trigger(&self, _confidence: f64, _duration: f64) {
            self.1.lock().unwrap().push(self.0.snapshot().phase);
        }
        fn on_fire_cleared(&self, _was_triggered: bool) {
            self.1.lock().unwrap().push(self.0.snapshot().phase);
        }
    }

    #[test]
    fn test_listener_can_read_state_during_dispatch() {
        let state = SharedFireState::new(machine());
        let reader = SnapshotReader(&state, Mutex::new(Vec::new()));
        let t0 = Instant::now();

        state.step(&fire(), t0, &reader);
        state.step(&fire(), t0 + Duration::from_secs(3), &reader);

        assert_eq!(
            *reader.1.lock().unwrap(),
            vec![FirePhase::Onset, FirePhase::Triggered]
        );
    }
}
