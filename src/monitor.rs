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

//! The capture consumer.
//!
//! A [`Monitor`] owns one signal pipeline and one spectrum analyzer for a
//! single stream. Chunks are fed to both in arrival order; closed events are
//! drained after every chunk and written to the configured sinks.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use signal_tracker::{SignalPipeline, SpectrumAnalyzer, SpectrumStats};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{AppConfig, MonitorConfig};
use crate::output::{EventRecord, EventSink, Session};
use crate::sdr::{IqChunk, IqProcessor};

/// End-of-run totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSummary {
    pub session_id: Uuid,
    pub stream: String,
    pub chunks: u64,
    /// Stream time covered, in seconds
    pub stream_seconds: f64,
    pub events_closed: u64,
    pub events_written: u64,
    /// Events still open when the stream ended
    pub events_open: usize,
    pub sink_errors: u64,
    pub noise_floor_db: f64,
    pub detector_transitions: u64,
    pub baseline_captured: bool,
}

pub struct Monitor {
    pipeline: SignalPipeline,
    spectrum: SpectrumAnalyzer,
    sinks: Vec<Box<dyn EventSink>>,
    session: Session,
    config: MonitorConfig,
    baseline_remaining: u32,
    chunks: u64,
    events_closed: u64,
    events_written: u64,
    sink_errors: u64,
    last_spectrum: SpectrumStats,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("stream", &self.pipeline.label())
            .field("session", &self.session.id)
            .field("chunks", &self.chunks)
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(config: &AppConfig, sinks: Vec<Box<dyn EventSink>>, session: Session) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let pipeline =
            SignalPipeline::new(config.pipeline_config()).context("Failed to build pipeline")?;
        let mut spectrum = SpectrumAnalyzer::new(config.spectrum_config())
            .context("Failed to build spectrum analyzer")?;

        let baseline_remaining = config.monitor.baseline_chunks;
        if baseline_remaining > 0 {
            spectrum.start_baseline_capture();
        }

        for sink in &sinks {
            info!("Writing events to {}", sink.describe());
        }

        Ok(Self {
            pipeline,
            spectrum,
            sinks,
            session,
            config: config.monitor.clone(),
            baseline_remaining,
            chunks: 0,
            events_closed: 0,
            events_written: 0,
            sink_errors: 0,
            last_spectrum: SpectrumStats::default(),
        })
    }

    /// Apply the rate and tuning the capture source actually opened with.
    pub fn retune(&mut self, sample_rate: f64, center_frequency_hz: f64) -> Result<()> {
        self.pipeline
            .set_sample_rate(sample_rate)
            .context("Rejected sample rate")?;
        self.pipeline.set_center_frequency(center_frequency_hz);
        self.spectrum
            .set_sample_rate(sample_rate)
            .context("Rejected sample rate")?;
        self.spectrum.set_center_frequency(center_frequency_hz);
        info!(
            "[{}] tuned to {:.3} MHz at {:.3} MS/s",
            self.pipeline.label(),
            center_frequency_hz / 1e6,
            sample_rate / 1e6
        );
        Ok(())
    }

    /// Run one chunk through the spectrum analyzer and the event pipeline.
    pub fn process(&mut self, chunk: &IqChunk) {
        if chunk.samples.is_empty() {
            return;
        }

        let spectrum_db = self.spectrum.compute_fft_db(&chunk.samples);
        self.last_spectrum = self.spectrum.update(&spectrum_db);
        self.advance_baseline();

        let present = self
            .pipeline
            .process_chunk(&chunk.samples, chunk.timestamp)
            .detection
            .present;
        if present {
            debug!(
                "[{}] chunk {} at {:.6} s: signal present",
                self.pipeline.label(),
                chunk.index,
                chunk.timestamp
            );
        }

        let closed = self.pipeline.drain_closed();
        for event in &closed {
            let record = EventRecord::from_event(event, self.pipeline.label(), &self.session);
            self.write_record(&record);
        }
        self.events_closed += closed.len() as u64;
        self.chunks += 1;

        if self.config.stats_interval_chunks > 0
            && self.chunks % self.config.stats_interval_chunks == 0
        {
            self.log_stats();
        }
    }

    fn advance_baseline(&mut self) {
        if self.baseline_remaining == 0 {
            return;
        }
        self.baseline_remaining -= 1;
        if self.baseline_remaining == 0 {
            if let Some(baseline) = self.spectrum.finish_baseline_capture() {
                let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
                info!(
                    "[{}] baseline captured over {} spectra (mean {:.1} dB)",
                    self.pipeline.label(),
                    self.config.baseline_chunks,
                    mean
                );
            }
        }
    }

    fn write_record(&mut self, record: &EventRecord) {
        let mut written = false;
        for sink in &mut self.sinks {
            match sink.write(record) {
                Ok(()) => written = true,
                Err(e) => {
                    self.sink_errors += 1;
                    warn!("Failed to write {} to {}: {e:#}", record.label, sink.describe());
                }
            }
        }
        if written {
            self.events_written += 1;
        }
    }

    fn log_stats(&self) {
        let stats = self.pipeline.stats();
        info!(
            "[{}] {} chunks, {:.1} s: floor {:.1} dB, {} active, {} closed, spectrum floor {:.1} dB, {} peaks, {} anomalous bins",
            stats.label,
            stats.chunk_count,
            stats.elapsed_s,
            self.pipeline.noise_floor_db(),
            stats.active_events,
            self.events_closed,
            self.last_spectrum.noise_floor_db,
            self.last_spectrum.peaks.len(),
            self.last_spectrum.anomaly_bins
        );
    }

    /// Consume chunks until the stream ends or `cancel_token` fires.
    pub async fn run(
        &mut self,
        processor: &mut IqProcessor,
        cancel_token: &CancellationToken,
    ) -> Result<MonitorSummary> {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("[{}] monitor cancelled", self.pipeline.label());
                    break;
                }
                chunk = processor.recv() => match chunk {
                    Some(chunk) => self.process(&chunk),
                    None => break,
                },
            }
        }
        self.finish()
    }

    /// Flush every sink and report totals.
    pub fn finish(&mut self) -> Result<MonitorSummary> {
        for sink in &mut self.sinks {
            sink.flush()
                .with_context(|| format!("Failed to flush {}", sink.describe()))?;
        }
        let summary = self.summary();
        if summary.events_open > 0 {
            info!(
                "[{}] {} events still open at end of stream",
                summary.stream, summary.events_open
            );
        }
        Ok(summary)
    }

    #[must_use]
    pub fn summary(&self) -> MonitorSummary {
        let stats = self.pipeline.stats();
        MonitorSummary {
            session_id: self.session.id,
            stream: stats.label,
            chunks: self.chunks,
            stream_seconds: stats.elapsed_s,
            events_closed: self.events_closed,
            events_written: self.events_written,
            events_open: stats.active_events,
            sink_errors: self.sink_errors,
            noise_floor_db: self.pipeline.noise_floor_db(),
            detector_transitions: stats.detector.transitions,
            baseline_captured: self.spectrum.baseline().is_some(),
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &SignalPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn spectrum(&self) -> &SpectrumAnalyzer {
        &self.spectrum
    }

    /// Statistics of the most recent spectrum update.
    #[must_use]
    pub fn last_spectrum(&self) -> &SpectrumStats {
        &self.last_spectrum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use signal_tracker::features::BurstType;
    use signal_tracker::testing::{pulse_chunk, silent_chunk, tone_chunk, CHUNK_LEN, SAMPLE_RATE};
    use signal_tracker::{Complex32, PipelineConfig};

    /// Complex Gaussian noise at -100 dB mean power.
    fn noise_chunk(rng: &mut StdRng) -> Vec<Complex32> {
        let normal = Normal::new(0.0f32, 0.5e-10f32.sqrt()).unwrap();
        (0..CHUNK_LEN)
            .map(|_| Complex32::new(normal.sample(rng), normal.sample(rng)))
            .collect()
    }

    /// Gaussian floor with the 22-tone pulse keyed for 8 chunks.
    fn noisy_burst_stream(seed: u64) -> Vec<Vec<Complex32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let tones = tone_chunk(600);
        let mut chunks: Vec<Vec<Complex32>> = (0..20).map(|_| noise_chunk(&mut rng)).collect();
        for _ in 0..8 {
            let noise = noise_chunk(&mut rng);
            chunks.push(noise.iter().zip(&tones).map(|(n, t)| *n + *t).collect());
        }
        chunks.extend((0..12).map(|_| noise_chunk(&mut rng)));
        chunks
    }

    #[derive(Default)]
    struct MemorySink {
        records: Rc<RefCell<Vec<EventRecord>>>,
        fail: bool,
    }

    impl EventSink for MemorySink {
        fn write(&mut self, record: &EventRecord) -> Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.records.borrow_mut().push(record.clone());
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline = PipelineConfig::default();
        config.monitor.baseline_chunks = 5;
        config.monitor.stats_interval_chunks = 10;
        config
    }

    fn feed(monitor: &mut Monitor, chunks: &[Vec<Complex32>]) {
        for (i, samples) in chunks.iter().enumerate() {
            monitor.process(&IqChunk {
                index: i as u64,
                timestamp: i as f64 * CHUNK_LEN as f64 / SAMPLE_RATE,
                samples: samples.clone(),
            });
        }
    }

    fn burst_stream() -> Vec<Vec<Complex32>> {
        let mut chunks = vec![silent_chunk(); 20];
        chunks.extend(std::iter::repeat(pulse_chunk(600)).take(8));
        chunks.extend(std::iter::repeat(silent_chunk()).take(12));
        chunks
    }

    #[test]
    fn test_closed_event_reaches_sink() {
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = MemorySink {
            records: Rc::clone(&records),
            fail: false,
        };
        let mut monitor =
            Monitor::new(&test_config(), vec![Box::new(sink)], Session::start()).unwrap();

        feed(&mut monitor, &burst_stream());

        let records = records.borrow();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hit_count, 8);
        assert_eq!(records[0].stream, "stream");
        let features = records[0].features.as_ref().unwrap();
        assert_eq!(features.time_structure.burst_type, BurstType::Continuous);

        let summary = monitor.finish().unwrap();
        assert_eq!(summary.chunks, 40);
        assert_eq!(summary.events_closed, 1);
        assert_eq!(summary.events_written, 1);
        assert_eq!(summary.events_open, 0);
        assert_eq!(summary.detector_transitions, 2);
        assert!(summary.baseline_captured);
        assert_eq!(monitor.pipeline().stats().pending_closed, 0);
    }

    #[test]
    fn test_sink_failure_does_not_stop_stream() {
        let sink = MemorySink {
            fail: true,
            ..MemorySink::default()
        };
        let mut monitor =
            Monitor::new(&test_config(), vec![Box::new(sink)], Session::start()).unwrap();

        feed(&mut monitor, &burst_stream());

        let summary = monitor.summary();
        assert_eq!(summary.chunks, 40);
        assert_eq!(summary.events_closed, 1);
        assert_eq!(summary.events_written, 0);
        assert_eq!(summary.sink_errors, 1);
    }

    #[test]
    fn test_spectrum_tracks_the_pulse() {
        let mut monitor = Monitor::new(&test_config(), Vec::new(), Session::start()).unwrap();

        feed(&mut monitor, &vec![silent_chunk(); 5]);
        assert!(monitor.spectrum().baseline().is_some());
        assert_eq!(monitor.last_spectrum().anomaly_bins, 0);

        feed(&mut monitor, &[pulse_chunk(600)]);
        let stats = monitor.last_spectrum();
        assert!(stats.anomaly_bins >= 22);
        assert!(stats.peak_power_db - stats.noise_floor_db > 20.0);
        assert_eq!(monitor.spectrum().update_count(), 6);
    }

    #[test]
    fn test_retune_moves_event_frequencies() {
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = MemorySink {
            records: Rc::clone(&records),
            fail: false,
        };
        let mut monitor =
            Monitor::new(&test_config(), vec![Box::new(sink)], Session::start()).unwrap();
        monitor.retune(SAMPLE_RATE, 915e6).unwrap();
        assert!(monitor.retune(0.0, 915e6).is_err());

        feed(&mut monitor, &burst_stream());

        let bin_hz = SAMPLE_RATE / CHUNK_LEN as f64;
        // unshifted bins 600..621 sit below the center
        let expected = 915e6 + (98.5 - 512.0) * bin_hz;
        let center = records.borrow()[0].last_center_hz;
        assert!((center - expected).abs() < bin_hz, "center {center}");
    }

    fn records_for(config: &AppConfig, chunks: &[Vec<Complex32>]) -> Vec<EventRecord> {
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = MemorySink {
            records: Rc::clone(&records),
            fail: false,
        };
        let mut monitor = Monitor::new(config, vec![Box::new(sink)], Session::start()).unwrap();
        feed(&mut monitor, chunks);
        let records = records.borrow().clone();
        records
    }

    #[test]
    fn test_gaussian_floor_burst_is_one_event() {
        let mut config = test_config();
        config.pipeline = AppConfig::default().pipeline;
        let bin_hz = SAMPLE_RATE / CHUNK_LEN as f64;

        for seed in 0..3 {
            let records = records_for(&config, &noisy_burst_stream(seed));
            assert_eq!(records.len(), 1, "seed {seed}");
            assert_eq!(records[0].hit_count, 8, "seed {seed}");
            let features = records[0].features.as_ref().unwrap();
            assert_eq!(features.time_structure.burst_type, BurstType::Continuous);
            assert!(
                (features.bandwidth.mean_hz - 50_000.0).abs() < 8.0 * bin_hz,
                "seed {seed}: bandwidth {}",
                features.bandwidth.mean_hz
            );
        }
    }

    #[test]
    fn test_library_segmentation_defaults_split_gaussian_floor() {
        // 6 dB over a 3-bin boxcar lets periodogram fluctuations through
        let records = records_for(&test_config(), &noisy_burst_stream(0));
        assert!(records.len() > 1, "{} events", records.len());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.pipeline.detector.snr_exit_db = 20.0;
        assert!(Monitor::new(&config, Vec::new(), Session::start()).is_err());
    }
}
