//! Firewatch - a single-camera fire monitor.
//!
//! # Overview
//!
//! Firewatch reads object-detector output for one camera, decides when a
//! fire is real, and sounds an alarm over a serial line. A fire must be seen
//! continuously for the arm delay (3 s by default) before the alarm sounds;
//! the alarm then silences itself after a fixed duration (5 s by default) or
//! when the operator asks. Every confirmed fire is written to a JSON history
//! file together with an evidence image.
//!
//! # Pipeline
//!
//! ```text
//! DetectionSource -> CandidateFilter -> FireStateMachine -> Monitor
//!                                                            |-> AlarmCoordinator -> actuator
//!                                                            |-> EventLog
//!                                                            `-> notices
//! ```
//!
//! # Modules
//!
//! - [`model`]: Data types shared across the crate
//! - [`config`]: Environment configuration
//! - [`source`]: Detection sources (replay and synthetic)
//! - [`filter`]: Candidate filtering of raw detections
//! - [`detector`]: The fire state machine
//! - [`actuator`]: Serial alarm board and its worker thread
//! - [`alarm`]: Alarm coordination and auto-off
//! - [`history`]: Detection history and evidence images
//! - [`report`]: Period statistics and report files
//! - [`monitor`]: Wiring, background loops and operator actions
//! - [`assistant`]: Rule-based chat assistant
//! - [`api`]: HTTP operator console

pub mod actuator;
pub mod alarm;
pub mod api;
pub mod assistant;
pub mod config;
pub mod detector;
pub mod error;
pub mod filter;
pub mod history;
pub mod model;
pub mod monitor;
pub mod report;
pub mod source;
