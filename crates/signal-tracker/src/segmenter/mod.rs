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

//! Spectral segmentation of a chunk into occupied frequency regions.

use std::fmt;

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::dsp::{
    boxcar_smooth, db_to_power, percentile, power_to_db, shifted_frequencies, SpectralEngine,
    WindowFunction,
};
use crate::error::SignalError;

/// Percentile of the PSD taken as the noise floor.
const NOISE_FLOOR_PERCENTILE: f64 = 30.0;

/// Run length at which segment confidence saturates.
const FULL_CONFIDENCE_BINS: f64 = 10.0;

fn default_sample_rate() -> f64 {
    2.0e6
}

fn default_fft_size() -> usize {
    1024
}

fn default_bw_threshold_db() -> f64 {
    6.0
}

fn default_min_segment_bins() -> usize {
    3
}

fn default_psd_smooth_bins() -> usize {
    3
}

/// Segmenter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Maximum FFT length; shorter chunks use their own length.
    pub fft_size: usize,
    /// Margin above the noise floor for a bin to count as occupied.
    pub bw_threshold_db: f64,
    /// Shortest run of occupied bins reported as a segment.
    pub min_segment_bins: usize,
    /// Boxcar width applied to the PSD, 1 or 0 to disable.
    pub psd_smooth_bins: usize,
    pub window: WindowFunction,
    /// Tuned frequency, added to every bin frequency.
    pub center_frequency_hz: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            fft_size: default_fft_size(),
            bw_threshold_db: default_bw_threshold_db(),
            min_segment_bins: default_min_segment_bins(),
            psd_smooth_bins: default_psd_smooth_bins(),
            window: WindowFunction::default(),
            center_frequency_hz: 0.0,
        }
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> Result<(), SignalError> {
        validate_sample_rate(self.sample_rate)?;
        if self.fft_size < 2 {
            return Err(SignalError::config("fft_size must be at least 2"));
        }
        if !self.bw_threshold_db.is_finite() {
            return Err(SignalError::config("bw_threshold_db must be finite"));
        }
        if self.min_segment_bins == 0 {
            return Err(SignalError::config("min_segment_bins must be at least 1"));
        }
        if !self.center_frequency_hz.is_finite() {
            return Err(SignalError::config("center_frequency_hz must be finite"));
        }
        Ok(())
    }
}

pub(crate) fn validate_sample_rate(sample_rate: f64) -> Result<(), SignalError> {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        Ok(())
    } else {
        Err(SignalError::config(format!(
            "sample rate must be positive, got {sample_rate}"
        )))
    }
}

/// A contiguous band of occupied FFT bins within one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencySegment {
    pub low_hz: f64,
    pub high_hz: f64,
    /// Power-weighted centroid of the run.
    pub center_hz: f64,
    pub bandwidth_hz: f64,
    pub peak_db: f64,
    /// Run-length heuristic in `0..=1`.
    pub confidence: f64,
    pub bins: u32,
}

/// The most recent PSD, kept for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PsdSnapshot {
    pub frequencies: Vec<f64>,
    pub psd_db: Vec<f64>,
}

/// Splits a chunk's spectrum into [`FrequencySegment`]s.
pub struct Segmenter {
    config: SegmenterConfig,
    engine: SpectralEngine,
    frequencies: Option<Vec<f64>>,
    last_psd: Option<PsdSnapshot>,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self, SignalError> {
        config.validate()?;
        Ok(Self {
            engine: SpectralEngine::new(config.fft_size, config.window, false),
            config,
            frequencies: None,
            last_psd: None,
        })
    }

    /// Segment the most recent `fft_size` samples of `chunk`.
    pub fn process(&mut self, chunk: &[Complex32]) -> Vec<FrequencySegment> {
        if chunk.is_empty() {
            return Vec::new();
        }

        let n = chunk.len().min(self.config.fft_size);
        let frame = &chunk[chunk.len() - n..];
        if self.engine.len() != n {
            self.engine.resize(n);
            self.frequencies = None;
        }

        let psd: Vec<f64> = self.engine.power(frame).into_iter().map(power_to_db).collect();
        let psd = boxcar_smooth(&psd, self.config.psd_smooth_bins);

        let frequencies = match self.frequencies.take() {
            Some(f) if f.len() == n => f,
            _ => shifted_frequencies(n, self.config.sample_rate, self.config.center_frequency_hz),
        };

        let segments = self.extract_segments(&frequencies, &psd);
        self.frequencies = Some(frequencies.clone());
        self.last_psd = Some(PsdSnapshot {
            frequencies,
            psd_db: psd,
        });
        segments
    }

    /// Find occupied runs in an already computed PSD.
    ///
    /// The bin width is `sample_rate / psd.len()`. Mismatched or empty
    /// inputs yield no segments.
    #[must_use]
    pub fn extract_segments(&self, frequencies: &[f64], psd_db: &[f64]) -> Vec<FrequencySegment> {
        if psd_db.is_empty() || frequencies.len() != psd_db.len() {
            return Vec::new();
        }
        let Some(noise_floor) = percentile(psd_db, NOISE_FLOOR_PERCENTILE) else {
            return Vec::new();
        };
        let threshold = noise_floor + self.config.bw_threshold_db;
        let bin_hz = self.config.sample_rate / psd_db.len() as f64;

        let mut segments = Vec::new();
        let mut run_start = None;
        for (i, &level) in psd_db.iter().enumerate() {
            match (level > threshold, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    self.push_run(&mut segments, frequencies, psd_db, start, i, bin_hz);
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            self.push_run(&mut segments, frequencies, psd_db, start, psd_db.len(), bin_hz);
        }
        segments
    }

    fn push_run(
        &self,
        segments: &mut Vec<FrequencySegment>,
        frequencies: &[f64],
        psd_db: &[f64],
        start: usize,
        end: usize,
        bin_hz: f64,
    ) {
        let len = end - start;
        if len < self.config.min_segment_bins {
            return;
        }

        let freqs = &frequencies[start..end];
        let levels = &psd_db[start..end];
        let weights: Vec<f64> = levels.iter().map(|&db| db_to_power(db)).collect();
        let total: f64 = weights.iter().sum();
        let center_hz = if total > 0.0 {
            freqs.iter().zip(&weights).map(|(f, w)| f * w).sum::<f64>() / total
        } else {
            (freqs[0] + freqs[len - 1]) / 2.0
        };

        segments.push(FrequencySegment {
            low_hz: freqs[0] - bin_hz / 2.0,
            high_hz: freqs[len - 1] + bin_hz / 2.0,
            center_hz,
            bandwidth_hz: bin_hz.max(len as f64 * bin_hz),
            peak_db: levels.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            confidence: (len as f64 / FULL_CONFIDENCE_BINS).min(1.0),
            bins: u32::try_from(len).unwrap_or(u32::MAX),
        });
    }

    /// Change the sample rate; the frequency axis is rebuilt on the next chunk.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<(), SignalError> {
        validate_sample_rate(sample_rate)?;
        self.config.sample_rate = sample_rate;
        self.frequencies = None;
        Ok(())
    }

    pub fn set_center_frequency(&mut self, center_frequency_hz: f64) {
        self.config.center_frequency_hz = center_frequency_hz;
        self.frequencies = None;
    }

    pub fn set_bw_threshold_db(&mut self, threshold_db: f64) {
        self.config.bw_threshold_db = threshold_db;
    }

    pub fn set_min_segment_bins(&mut self, bins: usize) -> Result<(), SignalError> {
        if bins == 0 {
            return Err(SignalError::config("min_segment_bins must be at least 1"));
        }
        self.config.min_segment_bins = bins;
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// PSD of the last processed chunk.
    #[must_use]
    pub fn last_psd(&self) -> Option<&PsdSnapshot> {
        self.last_psd.as_ref()
    }

    pub fn reset(&mut self) {
        self.last_psd = None;
    }
}

impl fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segmenter")
            .field("config", &self.config)
            .field("fft_len", &self.engine.len())
            .finish_non_exhaustive()
    }
}
