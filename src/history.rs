//! Detection history.
//!
//! Every confirmed fire (and every manual silence while one is burning) is
//! appended to an in-memory list and the whole list is written back to a
//! pretty-printed JSON file. Records are never edited after they are written.
//!
//! The file is replaced atomically: the new contents go to a sibling temp
//! file which is then renamed over the old one, so a crash mid-write leaves
//! the previous save intact.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::HistoryError;
use crate::model::{DetectionRecord, LocationInfo, TriggerReport};

/// Suffixed names tried before giving up on a free file name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Append-only event log backed by a JSON file.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    evidence_dir: PathBuf,
    location: LocationInfo,
    records: Mutex<Vec<DetectionRecord>>,
}

impl EventLog {
    /// Open the log at `path`, loading whatever history is already there.
    ///
    /// Never fails. A missing file starts an empty history. A file that
    /// cannot be read or parsed is moved aside to `<name>.corrupt` and the
    /// history starts empty.
    pub fn open(
        path: impl Into<PathBuf>,
        evidence_dir: impl Into<PathBuf>,
        location: LocationInfo,
    ) -> Self {
        let path = path.into();
        let records = match read_history(&path) {
            Ok(records) => {
                info!(path = %path.display(), records = records.len(), "History loaded");
                records
            }
            Err(e) => {
                warn!(error = %e, "Starting with empty history");
                quarantine(&path);
                Vec::new()
            }
        };

        Self {
            path,
            evidence_dir: evidence_dir.into(),
            location,
            records: Mutex::new(records),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn location(&self) -> &LocationInfo {
        &self.location
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Append a record and rewrite the history file.
    ///
    /// The evidence image is saved on a best-effort basis; if that fails the
    /// record is kept without an image. If the history file cannot be
    /// written the record stays in memory and the error is returned.
    pub fn record_trigger(
        &self,
        report: TriggerReport,
        image: Option<&[u8]>,
    ) -> Result<DetectionRecord, HistoryError> {
        let timestamp = Utc::now();
        let image_path = image.and_then(|bytes| self.save_evidence(timestamp, bytes));

        let record = DetectionRecord {
            timestamp,
            confidence: report.confidence,
            duration: report.duration,
            alarm_triggered: report.alarm_triggered,
            manual_silence: report.manual_silence,
            image_path,
            location_name: format!("{} - {}", self.location.zone, self.location.building),
            latitude: self.location.latitude,
            longitude: self.location.longitude,
        };

        let mut records = self.lock();
        records.push(record.clone());
        write_history(&self.path, &records).map_err(|source| HistoryError::Persist {
            path: self.path.clone(),
            source,
        })?;

        debug!(
            records = records.len(),
            confidence = record.confidence,
            manual_silence = record.manual_silence,
            "Detection recorded"
        );
        Ok(record)
    }

    /// Records from the last `days` days, oldest first.
    pub fn query(&self, days: u32) -> Vec<DetectionRecord> {
        self.query_at(days, Utc::now())
    }

    pub fn query_at(&self, days: u32, now: DateTime<Utc>) -> Vec<DetectionRecord> {
        // A window reaching past the representable range covers everything
        let cutoff = now.checked_sub_signed(Duration::days(i64::from(days)));
        self.lock()
            .iter()
            .filter(|r| cutoff.is_none_or(|cutoff| r.timestamp >= cutoff))
            .cloned()
            .collect()
    }

    /// The `limit` most recent records of the last `days` days, newest first.
    pub fn latest(&self, days: u32, limit: usize) -> Vec<DetectionRecord> {
        let mut records = self.query(days);
        records.reverse();
        records.truncate(limit);
        records
    }

    /// Whether the record's evidence image is still on disk.
    pub fn evidence_available(&self, record: &DetectionRecord) -> bool {
        record
            .image_path
            .as_deref()
            .is_some_and(|p| Path::new(p).is_file())
    }

    fn save_evidence(&self, timestamp: DateTime<Utc>, bytes: &[u8]) -> Option<String> {
        let stem = format!("fire_{}", timestamp.format("%Y%m%d_%H%M%S_%3f"));

        let saved = fs::create_dir_all(&self.evidence_dir)
            .and_then(|_| write_new(&self.evidence_dir, &stem, "jpg", bytes));
        match saved {
            Ok(path) => {
                debug!(path = %path.display(), bytes = bytes.len(), "Evidence saved");
                Some(path.to_string_lossy().into_owned())
            }
            Err(e) => {
                warn!(dir = %self.evidence_dir.display(), error = %e, "Failed to save evidence image");
                None
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DetectionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_history(path: &Path) -> Result<Vec<DetectionRecord>, HistoryError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(HistoryError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_slice(&bytes).map_err(|source| HistoryError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_history(path: &Path, records: &[DetectionRecord]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec_pretty(records).map_err(io::Error::other)?;
    let tmp = sibling(path, "tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}

/// Move an unusable history file out of the way so the next save does not
/// overwrite it.
fn quarantine(path: &Path) {
    let target = sibling(path, "corrupt");
    match fs::rename(path, &target) {
        Ok(()) => warn!(
            from = %path.display(),
            to = %target.display(),
            "Unreadable history moved aside"
        ),
        Err(e) => warn!(path = %path.display(), error = %e, "Could not move unreadable history aside"),
    }
}

/// Write `bytes` to a new file `<stem>.<ext>` in `dir`, falling back to
/// `<stem>_1.<ext>`, `<stem>_2.<ext>`, ... when the name is taken. Never
/// overwrites an existing file.
pub(crate) fn write_new(dir: &Path, stem: &str, ext: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = match attempt {
            0 => format!("{stem}.{ext}"),
            n => format!("{stem}_{n}.{ext}"),
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(bytes)?;
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {stem}.{ext} in {}", dir.display()),
    ))
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
