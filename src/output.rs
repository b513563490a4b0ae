// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Persistence of closed signal events.
//!
//! Each closed event becomes an [`EventRecord`] stamped with the session that
//! produced it and wall-clock start/end times derived from the stream clock.
//! Sinks append, so one file can collect several sessions.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use signal_tracker::{FeatureSet, SignalEvent};
use uuid::Uuid;

/// Identity and wall-clock origin of one monitoring run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Session {
    pub id: Uuid,
    /// Wall-clock time of stream time zero
    pub started_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    /// Wall-clock time of a stream timestamp.
    #[must_use]
    pub fn wall_clock(&self, stream_seconds: f64) -> DateTime<Utc> {
        self.started_at + Duration::microseconds((stream_seconds * 1e6).round() as i64)
    }
}

/// A closed event ready to be written out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub session_id: Uuid,
    pub stream: String,
    pub event_id: u64,
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Stream time of the first detection in seconds
    pub start_time_s: f64,
    /// Stream time of closure in seconds
    pub end_time_s: f64,
    pub hit_count: u32,
    pub last_center_hz: f64,
    pub last_bandwidth_hz: f64,
    pub features: Option<FeatureSet>,
}

impl EventRecord {
    #[must_use]
    pub fn from_event(event: &SignalEvent, stream: &str, session: &Session) -> Self {
        let end_time_s = event.end_time().unwrap_or_else(|| event.last_seen());
        Self {
            session_id: session.id,
            stream: stream.to_string(),
            event_id: event.id(),
            label: event.label(),
            started_at: session.wall_clock(event.start_time()),
            ended_at: session.wall_clock(end_time_s),
            start_time_s: event.start_time(),
            end_time_s,
            hit_count: event.hit_count(),
            last_center_hz: event.last_center_hz(),
            last_bandwidth_hz: event.last_bandwidth_hz(),
            features: event.features().cloned(),
        }
    }
}

/// Destination for closed events.
pub trait EventSink {
    fn write(&mut self, record: &EventRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// File or endpoint the sink writes to, for log output.
    fn describe(&self) -> String;
}

fn open_append(path: &Path) -> Result<(File, bool)> {
    let fresh = std::fs::metadata(path).map_or(true, |m| m.len() == 0);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open event log {}", path.display()))?;
    Ok((file, fresh))
}

/// One JSON object per line, with the full feature set nested.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self> {
        let (file, _) = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }
}

impl EventSink for JsonLinesSink {
    fn write(&mut self, record: &EventRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record).context("Failed to encode event")?;
        self.writer
            .write_all(b"\n")
            .context("Failed to write event log")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush event log")
    }

    fn describe(&self) -> String {
        format!("JSON Lines {}", self.path.display())
    }
}

/// Flat row for spreadsheet use; feature columns are empty when extraction failed.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    session_id: Uuid,
    stream: &'a str,
    event_id: u64,
    label: &'a str,
    started_at: String,
    ended_at: String,
    duration_s: f64,
    hit_count: u32,
    center_hz: Option<f64>,
    freq_std_hz: Option<f64>,
    drift_hz_per_s: Option<f64>,
    bandwidth_hz: Option<f64>,
    burst_type: Option<String>,
    duty_cycle: Option<f64>,
    avg_power_db: Option<f64>,
    peak_power_db: Option<f64>,
    snr_db: Option<f64>,
    fading: Option<String>,
    stability: Option<f64>,
    confidence: Option<f64>,
}

impl<'a> CsvRow<'a> {
    fn from_record(record: &'a EventRecord) -> Self {
        let f = record.features.as_ref();
        Self {
            session_id: record.session_id,
            stream: &record.stream,
            event_id: record.event_id,
            label: &record.label,
            started_at: record.started_at.to_rfc3339(),
            ended_at: record.ended_at.to_rfc3339(),
            duration_s: record.end_time_s - record.start_time_s,
            hit_count: record.hit_count,
            center_hz: f.map(|f| f.frequency.center_hz),
            freq_std_hz: f.map(|f| f.frequency.std_hz),
            drift_hz_per_s: f.map(|f| f.frequency.drift_hz_per_s),
            bandwidth_hz: f.map(|f| f.bandwidth.mean_hz),
            burst_type: f.map(|f| f.time_structure.burst_type.to_string()),
            duty_cycle: f.map(|f| f.time_structure.duty_cycle),
            avg_power_db: f.map(|f| f.power.avg_power_db),
            peak_power_db: f.map(|f| f.power.peak_power_db),
            snr_db: f.map(|f| f.noise.snr_db),
            fading: f.map(|f| f.signal_dynamics.fading.to_string()),
            stability: f.map(|f| f.stability.score),
            confidence: f.map(|f| f.confidence.frequency),
        }
    }
}

/// Comma-separated event log with a header row.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl std::fmt::Debug for CsvSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CsvSink {
    /// Open for appending; the header is written only to an empty file.
    pub fn open(path: &Path) -> Result<Self> {
        let (file, fresh) = open_append(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(fresh)
            .from_writer(file);
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }
}

impl EventSink for CsvSink {
    fn write(&mut self, record: &EventRecord) -> Result<()> {
        self.writer
            .serialize(CsvRow::from_record(record))
            .context("Failed to write CSV row")
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush CSV log")
    }

    fn describe(&self) -> String {
        format!("CSV {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_tracker::segmenter::FrequencySegment;
    use signal_tracker::{EventBuilder, EventBuilderConfig};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rf-monitor-{}-{name}", std::process::id()))
    }

    fn segment(center_hz: f64) -> FrequencySegment {
        FrequencySegment {
            low_hz: center_hz - 25_000.0,
            high_hz: center_hz + 25_000.0,
            center_hz,
            bandwidth_hz: 50_000.0,
            peak_db: -40.0,
            confidence: 1.0,
            bins: 26,
        }
    }

    fn closed_event() -> SignalEvent {
        let mut builder = EventBuilder::new(EventBuilderConfig::default()).unwrap();
        let mut t = 1.0;
        for _ in 0..4 {
            builder.process(t, true, vec![segment(100_000.0)]);
            t += 0.01;
        }
        for _ in 0..10 {
            builder.process(t, false, Vec::new());
            t += 0.01;
        }
        let mut closed = builder.drain_closed();
        assert_eq!(closed.len(), 1);
        closed.remove(0)
    }

    fn fixed_session() -> Session {
        Session {
            id: Uuid::nil(),
            started_at: DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn test_record_wall_clock() {
        let record = EventRecord::from_event(&closed_event(), "test", &fixed_session());
        assert_eq!(record.event_id, 1);
        assert_eq!(record.label, "sig_000001");
        assert_eq!(record.hit_count, 4);
        assert_eq!(record.started_at.to_rfc3339(), "2025-06-01T12:00:01+00:00");
        assert!((record.end_time_s - 1.13).abs() < 1e-9);
        assert_eq!(
            (record.ended_at - record.started_at).num_milliseconds(),
            130
        );
        assert!(record.features.is_some());
    }

    #[test]
    fn test_json_lines_append() {
        let path = temp_path("events.jsonl");
        let _ = std::fs::remove_file(&path);
        let record = EventRecord::from_event(&closed_event(), "test", &fixed_session());

        for _ in 0..2 {
            let mut sink = JsonLinesSink::open(&path).unwrap();
            sink.write(&record).unwrap();
            sink.flush().unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(value["label"], "sig_000001");
        assert_eq!(value["features"]["time_structure"]["burst_type"], "continuous");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_csv_single_header() {
        let path = temp_path("events.csv");
        let _ = std::fs::remove_file(&path);
        let record = EventRecord::from_event(&closed_event(), "test", &fixed_session());

        for _ in 0..2 {
            let mut sink = CsvSink::open(&path).unwrap();
            sink.write(&record).unwrap();
            sink.flush().unwrap();
        }

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[3], "label");
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][3], "sig_000001");
        assert_eq!(&rows[0][12], "continuous");

        std::fs::remove_file(&path).unwrap();
    }
}
