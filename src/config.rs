//! Runtime configuration.
//!
//! All settings come from `FIREWATCH_*` environment variables and fall back
//! to the defaults below. Values that fail to parse are logged and replaced
//! by the default rather than aborting startup.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::model::LocationInfo;

/// Default console port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Continuous detection required before the alarm is requested.
pub const DEFAULT_ARM_DELAY: Duration = Duration::from_secs(3);

/// How long one alarm activation sounds before silencing itself.
pub const DEFAULT_ALARM_DURATION: Duration = Duration::from_secs(5);

/// Time the actuator board needs after the port opens before it listens.
pub const DEFAULT_SERIAL_SETTLE: Duration = Duration::from_secs(2);

/// Serial port value that disables the physical actuator.
pub const SERIAL_DISABLED: &str = "none";

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub port: u16,

    pub history_path: PathBuf,
    pub evidence_dir: PathBuf,
    pub reports_dir: PathBuf,

    /// Serial device of the alarm board, or [`SERIAL_DISABLED`].
    pub serial_port: String,
    pub serial_baud: u32,
    pub serial_settle: Duration,

    pub arm_delay: Duration,
    pub alarm_duration: Duration,

    /// Model class index that means "fire".
    pub fire_class_id: u32,
    /// Minimum model confidence for a box to count.
    pub model_confidence: f64,
    /// Minimum share of flame-coloured pixels inside a box.
    pub min_fire_ratio: f64,

    /// Producer loop cadence (~30 Hz).
    pub sample_interval: Duration,
    /// Presentation loop cadence (~10 Hz).
    pub status_interval: Duration,

    /// JSON-lines file to replay instead of the synthetic source.
    pub replay_path: Option<PathBuf>,
    pub replay_loop: bool,

    pub location: LocationInfo,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            history_path: PathBuf::from("firewatch_history.json"),
            evidence_dir: PathBuf::from("detections"),
            reports_dir: PathBuf::from("reports"),
            serial_port: "/dev/ttyUSB0".to_string(),
            serial_baud: 9600,
            serial_settle: DEFAULT_SERIAL_SETTLE,
            arm_delay: DEFAULT_ARM_DELAY,
            alarm_duration: DEFAULT_ALARM_DURATION,
            fire_class_id: 0,
            model_confidence: 0.5,
            min_fire_ratio: 0.15,
            sample_interval: Duration::from_millis(33),
            status_interval: Duration::from_millis(100),
            replay_path: None,
            replay_loop: false,
            location: LocationInfo::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let location = LocationInfo {
            zone: env_string("FIREWATCH_ZONE", &defaults.location.zone),
            building: env_string("FIREWATCH_BUILDING", &defaults.location.building),
            camera_id: env_string("FIREWATCH_CAMERA_ID", &defaults.location.camera_id),
            latitude: env_parse("FIREWATCH_LATITUDE", defaults.location.latitude),
            longitude: env_parse("FIREWATCH_LONGITUDE", defaults.location.longitude),
        };

        Self {
            port: env_parse("FIREWATCH_PORT", defaults.port),
            history_path: env_path("FIREWATCH_HISTORY_PATH", defaults.history_path),
            evidence_dir: env_path("FIREWATCH_EVIDENCE_DIR", defaults.evidence_dir),
            reports_dir: env_path("FIREWATCH_REPORTS_DIR", defaults.reports_dir),
            serial_port: env_string("FIREWATCH_SERIAL_PORT", &defaults.serial_port),
            serial_baud: env_parse("FIREWATCH_SERIAL_BAUD", defaults.serial_baud),
            serial_settle: env_secs("FIREWATCH_SERIAL_SETTLE_SECS", defaults.serial_settle),
            arm_delay: env_secs("FIREWATCH_ARM_DELAY_SECS", defaults.arm_delay),
            alarm_duration: env_secs("FIREWATCH_ALARM_DURATION_SECS", defaults.alarm_duration),
            fire_class_id: env_parse("FIREWATCH_FIRE_CLASS_ID", defaults.fire_class_id),
            model_confidence: env_parse("FIREWATCH_MODEL_CONFIDENCE", defaults.model_confidence),
            min_fire_ratio: env_parse("FIREWATCH_MIN_FIRE_RATIO", defaults.min_fire_ratio),
            sample_interval: defaults.sample_interval,
            status_interval: defaults.status_interval,
            replay_path: env::var("FIREWATCH_REPLAY_PATH").ok().map(PathBuf::from),
            replay_loop: env_parse("FIREWATCH_REPLAY_LOOP", defaults.replay_loop),
            location,
        }
    }

    pub fn serial_enabled(&self) -> bool {
        !self.serial_port.eq_ignore_ascii_case(SERIAL_DISABLED)
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    secs_or(key, env_parse(key, default.as_secs_f64()), default)
}

fn secs_or(key: &str, secs: f64, default: Duration) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) => duration,
        Err(e) => {
            warn!(key, secs, error = %e, "Duration out of range, using default");
            default
        }
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, raw: &str, default: T) -> T {
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "Unparseable setting, using default");
            default
        }
    }
}
