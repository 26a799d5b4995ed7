//! Detection sources.
//!
//! A source hands the sampling loop one [`Frame`] per tick: the raw boxes
//! the detector found, plus the encoded image when one is available. Two
//! implementations ship with the crate:
//!
//! - [`ReplaySource`] plays back recorded detector output from a JSON-lines
//!   file, one frame per line.
//! - [`SyntheticSource`] generates a repeating quiet/fire cycle so the whole
//!   pipeline can run without a camera.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::SourceError;
use crate::model::{BoundingBox, Frame, RawDetection};

/// Anything that can produce frames of detector output.
pub trait DetectionSource: Send {
    /// Produce the next frame.
    ///
    /// Transient failures return [`SourceError::Unavailable`] or
    /// [`SourceError::Malformed`] and the caller skips the tick.
    /// [`SourceError::Exhausted`] means no further frames will come.
    fn next_frame(&mut self) -> Result<Frame, SourceError>;
}

impl<S: DetectionSource + ?Sized> DetectionSource for Box<S> {
    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        (**self).next_frame()
    }
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(default)]
    detections: Vec<RawDetection>,
    /// Image file for this frame, relative to the replay file.
    #[serde(default)]
    image: Option<PathBuf>,
}

/// Plays back a JSON-lines recording.
#[derive(Debug)]
pub struct ReplaySource {
    /// `(line number, contents)` of every non-blank line.
    lines: Vec<(usize, String)>,
    base_dir: PathBuf,
    cursor: usize,
    looping: bool,
}

impl ReplaySource {
    pub fn open(path: &Path, looping: bool) -> Result<Self, SourceError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            SourceError::Unavailable(format!("cannot read replay file {}: {e}", path.display()))
        })?;

        let source = Self::from_lines(&contents, looping)
            .with_base_dir(path.parent().unwrap_or(Path::new(".")));
        info!(
            path = %path.display(),
            frames = source.lines.len(),
            looping,
            "Replay source opened"
        );
        Ok(source)
    }

    pub fn from_lines(contents: &str, looping: bool) -> Self {
        let lines = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| (i + 1, line.to_string()))
            .collect();

        Self {
            lines,
            base_dir: PathBuf::from("."),
            cursor: 0,
            looping,
        }
    }

    fn with_base_dir(mut self, dir: &Path) -> Self {
        self.base_dir = dir.to_path_buf();
        self
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn load_image(&self, image: &Path) -> Option<Vec<u8>> {
        let path = self.base_dir.join(image);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Replay image unavailable");
                None
            }
        }
    }
}

impl DetectionSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if self.cursor >= self.lines.len() {
            if !self.looping || self.lines.is_empty() {
                return Err(SourceError::Exhausted);
            }
            self.cursor = 0;
        }

        let (line_no, raw) = &self.lines[self.cursor];
        self.cursor += 1;

        let line: ReplayLine = serde_json::from_str(raw).map_err(|source| SourceError::Malformed {
            line: *line_no,
            source,
        })?;

        Ok(Frame {
            image: line.image.as_deref().and_then(|p| self.load_image(p)),
            detections: line.detections,
        })
    }
}

/// Deterministic stand-in for a live camera.
///
/// Alternates between a quiet stretch and a fire stretch. Quiet stretches
/// occasionally contain a fire-class box with too little flame colour, the
/// kind of false positive the candidate filter exists to reject.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    quiet_frames: u64,
    fire_frames: u64,
    frame: u64,
}

impl SyntheticSource {
    /// Every this many quiet frames a decoy box appears.
    const DECOY_EVERY: u64 = 45;

    pub fn new(quiet_frames: u64, fire_frames: u64) -> Self {
        Self {
            quiet_frames,
            fire_frames,
            frame: 0,
        }
    }

    fn cycle_len(&self) -> u64 {
        (self.quiet_frames + self.fire_frames).max(1)
    }

    fn fire_detection(&self, step: u64) -> RawDetection {
        let wobble = (step as f64 * 0.2).sin().abs();
        let grow = (step as f64).min(60.0);
        RawDetection {
            class_id: 0,
            confidence: 0.65 + 0.25 * wobble,
            bbox: BoundingBox::new(200.0 - grow, 150.0 - grow, 280.0 + grow, 260.0 + grow),
            fire_ratio: 0.35 + 0.2 * wobble,
        }
    }

    fn decoy_detection() -> RawDetection {
        RawDetection {
            class_id: 0,
            confidence: 0.72,
            bbox: BoundingBox::new(40.0, 40.0, 90.0, 120.0),
            fire_ratio: 0.04,
        }
    }
}

impl Default for SyntheticSource {
    /// Ten quiet seconds then six seconds of fire, at 30 frames per second.
    fn default() -> Self {
        Self::new(300, 180)
    }
}

impl DetectionSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let position = self.frame % self.cycle_len();
        self.frame += 1;

        let detections = if position >= self.quiet_frames {
            vec![self.fire_detection(position - self.quiet_frames)]
        } else if position > 0 && position % Self::DECOY_EVERY == 0 {
            vec![Self::decoy_detection()]
        } else {
            Vec::new()
        };

        Ok(Frame {
            detections,
            image: None,
        })
    }
}
