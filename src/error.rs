//! Error types for the monitor's fallible boundaries.
//!
//! The fire state machine itself cannot fail. Everything that touches the
//! outside world (the serial actuator, the history file, the detection
//! source) reports through one of these enums so callers can decide between
//! recovering locally and surfacing the problem to the operator.

use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the alarm actuator.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuator is not connected")]
    NotConnected,

    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to write to actuator: {0}")]
    Write(#[from] std::io::Error),
}

/// Failures loading or saving the detection history.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to read history file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to save history to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures pulling a frame from the detection source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The camera or detector produced nothing for this tick.
    #[error("detection source unavailable: {0}")]
    Unavailable(String),

    /// A frame arrived but could not be decoded.
    #[error("malformed frame at line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A finite source has no more frames.
    #[error("detection source exhausted")]
    Exhausted,
}
