//! Period statistics and report files.
//!
//! A report covers the last week or month of detection history. It is
//! written as a pretty-printed JSON document into the reports directory and
//! carries the camera location, summary figures and the most recent events.

use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::history::{EventLog, write_new};
use crate::model::{DetectionRecord, HistoryStats, LocationInfo, ReportPeriod, ReportResponse};

/// Number of individual events listed in a report.
pub const RECENT_EVENTS: usize = 5;

/// Contents of a report file.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodReport {
    pub period: ReportPeriod,
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub location: LocationInfo,
    pub stats: HistoryStats,
    /// Newest first.
    pub recent_events: Vec<DetectionRecord>,
}

/// Compute summary figures over a set of records.
///
/// An empty set yields all zeros.
pub fn stats(records: &[DetectionRecord]) -> HistoryStats {
    if records.is_empty() {
        return HistoryStats::default();
    }

    let total_confidence: f64 = records.iter().map(|r| r.confidence).sum();

    HistoryStats {
        total_detections: records.len(),
        alarms_triggered: records.iter().filter(|r| r.alarm_triggered).count(),
        avg_confidence: total_confidence / records.len() as f64,
        total_duration: records.iter().map(|r| r.duration).sum(),
    }
}

/// Build the report for `period` ending at `now`.
///
/// # Arguments
///
/// * `log` - Detection history to summarize
/// * `period` - Week or month
/// * `now` - End of the reporting window (typically current time)
pub fn summarize(log: &EventLog, period: ReportPeriod, now: DateTime<Utc>) -> PeriodReport {
    let records = log.query_at(period.days(), now);
    let stats = stats(&records);
    let recent_events = records.iter().rev().take(RECENT_EVENTS).cloned().collect();

    PeriodReport {
        period,
        title: format!("Fire detection {} report", period.label()),
        generated_at: now,
        location: log.location().clone(),
        stats,
        recent_events,
    }
}

/// Summarize `period` and write the report into `reports_dir`.
///
/// # Returns
///
/// The written file's path and how many records the period contained.
pub fn generate_report(
    log: &EventLog,
    period: ReportPeriod,
    reports_dir: &Path,
    now: DateTime<Utc>,
) -> anyhow::Result<ReportResponse> {
    let report = summarize(log, period, now);

    fs::create_dir_all(reports_dir)
        .with_context(|| format!("creating reports directory {}", reports_dir.display()))?;

    let stem = format!(
        "fire_report_{}_{}",
        period.label(),
        now.format("%Y%m%d_%H%M%S")
    );
    let json = serde_json::to_vec_pretty(&report).context("serializing report")?;
    let path = write_new(reports_dir, &stem, "json", &json)
        .with_context(|| format!("writing report {stem} in {}", reports_dir.display()))?;

    info!(
        path = %path.display(),
        period = period.label(),
        detections = report.stats.total_detections,
        "Report generated"
    );

    Ok(ReportResponse {
        path: path.to_string_lossy().into_owned(),
        period,
        detections: report.stats.total_detections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(days_ago: i64, confidence: f64, duration: f64, alarm: bool) -> DetectionRecord {
        DetectionRecord {
            timestamp: Utc::now() - Duration::days(days_ago),
            confidence,
            duration,
            alarm_triggered: alarm,
            manual_silence: !alarm,
            image_path: None,
            location_name: "Lab".to_string(),
            latitude: 0.0,
            longitude: 0.0,
        }
    }

    fn seeded_log(dir: &TempDir, records: &[DetectionRecord]) -> EventLog {
        let path = dir.path().join("history.json");
        fs::write(&path, serde_json::to_vec_pretty(records).unwrap()).unwrap();
        EventLog::open(path, dir.path().join("evidence"), LocationInfo::default())
    }

    #[test]
    fn test_stats_empty() {
        assert_eq!(stats(&[]), HistoryStats::default());
    }

    #[test]
    fn test_stats_values() {
        let records = vec![
            record(1, 80.0, 3.0, true),
            record(2, 60.0, 4.5, true),
            record(3, 70.0, 1.5, false),
        ];

        let s = stats(&records);
        assert_eq!(s.total_detections, 3);
        assert_eq!(s.alarms_triggered, 2);
        assert!((s.avg_confidence - 70.0).abs() < 1e-9);
        assert!((s.total_duration - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_respects_period() {
        let dir = TempDir::new().unwrap();
        let log = seeded_log(
            &dir,
            &[
                record(20, 50.0, 3.0, true),
                record(5, 60.0, 3.0, true),
                record(1, 90.0, 3.0, true),
            ],
        );

        let week = summarize(&log, ReportPeriod::Week, Utc::now());
        assert_eq!(week.stats.total_detections, 2);
        assert_eq!(week.recent_events[0].confidence, 90.0);

        let month = summarize(&log, ReportPeriod::Month, Utc::now());
        assert_eq!(month.stats.total_detections, 3);
        assert_eq!(month.title, "Fire detection monthly report");
    }

    #[test]
    fn test_generate_report_writes_file() {
        let dir = TempDir::new().unwrap();
        let log = seeded_log(&dir, &[record(1, 75.0, 3.5, true)]);
        let reports = dir.path().join("reports");

        let response =
            generate_report(&log, ReportPeriod::Week, &reports, Utc::now()).unwrap();
        assert_eq!(response.detections, 1);
        assert_eq!(response.period, ReportPeriod::Week);

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&response.path).unwrap()).unwrap();
        assert_eq!(written["period"], "week");
        assert_eq!(written["stats"]["total_detections"], 1);
        assert_eq!(written["location"]["camera_id"], "CAM_01");
        assert_eq!(written["recent_events"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_reports_in_same_second_get_distinct_files() {
        let dir = TempDir::new().unwrap();
        let log = seeded_log(&dir, &[]);
        let reports = dir.path().join("reports");
        let now = Utc::now();

        let first = generate_report(&log, ReportPeriod::Week, &reports, now).unwrap();
        let second = generate_report(&log, ReportPeriod::Week, &reports, now).unwrap();

        assert_ne!(first.path, second.path);
        assert!(Path::new(&first.path).is_file());
        assert!(Path::new(&second.path).is_file());
        assert_eq!(fs::read_dir(&reports).unwrap().count(), 2);
    }

    #[test]
    fn test_generate_report_fails_on_unwritable_dir() {
        let dir = TempDir::new().unwrap();
        let log = seeded_log(&dir, &[]);
        let blocker = dir.path().join("reports");
        fs::write(&blocker, "file").unwrap();

        assert!(generate_report(&log, ReportPeriod::Month, &blocker, Utc::now()).is_err());
    }
}
