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

//! Real-time signal detection and tracking over complex baseband samples.
//!
//! The crate is split into small synchronous components that can be used on
//! their own or chained through [`SignalPipeline`]:
//!
//! - **Detector**: presence gate with a median noise floor and hysteresis
//! - **Segmenter**: windowed FFT split into occupied frequency segments
//! - **`EventBuilder`**: stitches segments into long-lived [`SignalEvent`]s
//! - **`FeatureExtractor`**: summarises closed events into a [`FeatureSet`]
//! - **`SpectrumAnalyzer`**: running average, peak hold, baseline and peaks
//!
//! None of the components perform I/O or spawn threads. Each instance must be
//! fed one stream's chunks in arrival order by a single owner.
//!
//! # Quick Start
//!
//! ```
//! use signal_tracker::{Complex32, PipelineConfig, SignalPipeline};
//!
//! let mut pipeline = SignalPipeline::new(PipelineConfig::default())?;
//!
//! // A quiet -100 dB carrier never rises above its own noise floor.
//! let chunk = vec![Complex32::new(1e-5, 0.0); 1024];
//! for i in 0..10 {
//!     let output = pipeline.process_chunk(&chunk, f64::from(i) * 512e-6);
//!     assert!(!output.detection.present);
//!     assert!(output.closed.is_empty());
//! }
//! assert_eq!(pipeline.stats().chunk_count, 10);
//! # Ok::<(), signal_tracker::SignalError>(())
//! ```
//!
//! # Spectrum Statistics
//!
//! ```
//! use signal_tracker::spectrum::{SpectrumAnalyzer, SpectrumConfig};
//!
//! let mut analyzer = SpectrumAnalyzer::new(SpectrumConfig::default())?;
//! analyzer.start_baseline_capture();
//! analyzer.update(&vec![-100.0; 1024]);
//! analyzer.finish_baseline_capture();
//!
//! let mut spectrum = vec![-100.0; 1024];
//! spectrum[300] = -70.0;
//! let stats = analyzer.update(&spectrum);
//! assert_eq!(stats.anomaly_bins, 1);
//! assert_eq!(stats.peaks[0].bin_index, 300);
//! # Ok::<(), signal_tracker::SignalError>(())
//! ```

pub mod detector;
pub mod dsp;
pub mod error;
pub mod events;
pub mod features;
pub mod segmenter;
pub mod spectrum;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use log::{debug, info};
use serde::{Deserialize, Serialize};

pub use detector::{DetectionResult, Detector, DetectorConfig, DetectorState, DetectorStats};
pub use dsp::WindowFunction;
pub use error::SignalError;
pub use events::{EventBuilder, EventBuilderConfig, EventUpdate, SignalEvent};
pub use features::{FeatureExtractor, FeatureSet};
pub use num_complex::Complex32;
pub use segmenter::{FrequencySegment, Segmenter, SegmenterConfig};
pub use spectrum::{SpectrumAnalyzer, SpectrumConfig, SpectrumStats};

fn default_label() -> String {
    "stream".to_string()
}

/// Configuration for a [`SignalPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stream name used to tag log output.
    pub label: String,
    pub detector: DetectorConfig,
    pub segmenter: SegmenterConfig,
    pub events: EventBuilderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            detector: DetectorConfig::default(),
            segmenter: SegmenterConfig::default(),
            events: EventBuilderConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), SignalError> {
        self.detector.validate()?;
        self.segmenter.validate()?;
        self.events.validate()
    }
}

/// Everything produced for one chunk.
#[derive(Debug)]
pub struct PipelineOutput<'a> {
    pub timestamp: f64,
    pub detection: DetectionResult,
    /// Segments found in this chunk; empty unless a signal was present.
    pub segments: Vec<FrequencySegment>,
    pub active: Vec<&'a SignalEvent>,
    /// Events closed by this chunk, with features attached.
    pub closed: Vec<SignalEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub label: String,
    pub chunk_count: u64,
    pub detector: DetectorStats,
    pub active_events: usize,
    /// Closed events still held by the pipeline.
    pub pending_closed: usize,
    /// Events closed since creation or the last reset.
    pub total_closed: u64,
    /// Stream time covered so far, in seconds.
    pub elapsed_s: f64,
}

/// Detector, segmenter and event builder wired together for one stream.
#[derive(Debug)]
pub struct SignalPipeline {
    label: String,
    detector: Detector,
    segmenter: Segmenter,
    events: EventBuilder,
    chunk_count: u64,
    total_closed: u64,
    first_timestamp: Option<f64>,
    last_timestamp: f64,
}

impl SignalPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, SignalError> {
        config.validate()?;
        info!(
            "[{}] pipeline ready: {:.0} S/s, FFT {}, SNR {:.1}/{:.1} dB",
            config.label,
            config.segmenter.sample_rate,
            config.segmenter.fft_size,
            config.detector.snr_enter_db,
            config.detector.snr_exit_db
        );
        Ok(Self {
            detector: Detector::new(config.detector)?,
            segmenter: Segmenter::new(config.segmenter)?,
            events: EventBuilder::new(config.events)?,
            label: config.label,
            chunk_count: 0,
            total_closed: 0,
            first_timestamp: None,
            last_timestamp: 0.0,
        })
    }

    /// Run one chunk through detection, segmentation and event tracking.
    ///
    /// `timestamp` is the chunk's stream time in seconds. An empty chunk
    /// leaves every component untouched.
    pub fn process_chunk(&mut self, chunk: &[Complex32], timestamp: f64) -> PipelineOutput<'_> {
        if chunk.is_empty() {
            debug!("[{}] ignoring empty chunk at {:.6} s", self.label, timestamp);
            return PipelineOutput {
                timestamp,
                detection: self.detector.last_result(),
                segments: Vec::new(),
                active: self.events.active_events().iter().collect(),
                closed: Vec::new(),
            };
        }

        self.chunk_count += 1;
        self.first_timestamp.get_or_insert(timestamp);
        self.last_timestamp = timestamp;

        let detection = self.detector.process(chunk);
        let segments = if detection.present {
            self.segmenter.process(chunk)
        } else {
            Vec::new()
        };

        let update = self
            .events
            .process(timestamp, detection.present, segments.clone());
        self.total_closed += update.closed.len() as u64;
        for event in &update.closed {
            debug!(
                "[{}] {} closed: {} hits, features {}",
                self.label,
                event.label(),
                event.hit_count(),
                if event.features().is_some() { "ok" } else { "missing" }
            );
        }

        PipelineOutput {
            timestamp,
            detection,
            segments,
            active: update.active,
            closed: update.closed,
        }
    }

    /// Propagate a retune of the capture source.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<(), SignalError> {
        self.segmenter.set_sample_rate(sample_rate)
    }

    pub fn set_center_frequency(&mut self, center_frequency_hz: f64) {
        self.segmenter.set_center_frequency(center_frequency_hz);
    }

    pub fn set_thresholds(&mut self, enter_db: f64, exit_db: f64) -> Result<(), SignalError> {
        self.detector.set_thresholds(enter_db, exit_db)
    }

    #[must_use]
    pub fn noise_floor_db(&self) -> f64 {
        self.detector.noise_floor_db()
    }

    /// SNR needed to start a detection.
    #[must_use]
    pub fn threshold_db(&self) -> f64 {
        self.detector.config().snr_enter_db
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            label: self.label.clone(),
            chunk_count: self.chunk_count,
            detector: self.detector.stats(),
            active_events: self.events.active_events().len(),
            pending_closed: self.events.closed_events().len(),
            total_closed: self.total_closed,
            elapsed_s: self
                .first_timestamp
                .map_or(0.0, |first| (self.last_timestamp - first).max(0.0)),
        }
    }

    #[must_use]
    pub fn active_events(&self) -> &[SignalEvent] {
        self.events.active_events()
    }

    #[must_use]
    pub fn closed_events(&self) -> &[SignalEvent] {
        self.events.closed_events()
    }

    pub fn drain_closed(&mut self) -> Vec<SignalEvent> {
        self.events.drain_closed()
    }

    #[must_use]
    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    #[must_use]
    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    /// Live access for segmentation tuning.
    pub fn segmenter_mut(&mut self) -> &mut Segmenter {
        &mut self.segmenter
    }

    #[must_use]
    pub fn event_builder(&self) -> &EventBuilder {
        &self.events
    }

    /// Live access for matching tuning.
    pub fn event_builder_mut(&mut self) -> &mut EventBuilder {
        &mut self.events
    }

    /// Reset every component. Undrained closed events are lost.
    pub fn reset(&mut self) {
        self.detector.reset();
        self.segmenter.reset();
        self.events.reset();
        self.chunk_count = 0;
        self.total_closed = 0;
        self.first_timestamp = None;
        self.last_timestamp = 0.0;
    }
}
