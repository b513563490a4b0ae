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

//! Running spectrum statistics for display and anomaly flagging.
//!
//! The analyzer keeps a bounded history of spectra, an exponential moving
//! average, elementwise peak/min hold traces and an optional baseline. Each
//! [`SpectrumAnalyzer::update`] call returns fresh [`SpectrumStats`] with the
//! noise floor, detected peaks and the number of bins above the baseline.

pub mod peaks;
pub mod smoothing;

use std::fmt;

use log::info;
use num_complex::Complex32;
use ringbuf::{HeapRb, Rb};
use serde::{Deserialize, Serialize};

use crate::dsp::{
    mean, percentile, power_to_db, resample_linear, shifted_frequencies, SpectralEngine,
    WindowFunction,
};
use crate::error::SignalError;
use crate::segmenter::validate_sample_rate;

pub use peaks::{detect_peaks, PeakDetectorConfig, SpectrumPeak};
pub use smoothing::{smooth, SmoothingWindow};

/// Initial level of the average trace and of empty statistics.
pub const FLOOR_DB: f64 = -120.0;
const PEAK_HOLD_MAX_INIT_DB: f64 = -200.0;
const PEAK_HOLD_MIN_INIT_DB: f64 = 200.0;
const NOISE_FLOOR_PERCENTILE: f64 = 30.0;

fn default_fft_size() -> usize {
    1024
}

fn default_sample_rate() -> f64 {
    2.0e6
}

fn default_history_size() -> usize {
    50
}

fn default_anomaly_threshold_db() -> f64 {
    6.0
}

/// Spectrum analyzer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    pub fft_size: usize,
    pub sample_rate: f64,
    pub center_frequency_hz: f64,
    pub window: WindowFunction,
    /// Spectra kept in the history ring; also caps the EMA length.
    pub history_size: usize,
    /// Excess over the baseline that marks a bin anomalous.
    pub anomaly_threshold_db: f64,
    pub peak: PeakDetectorConfig,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            sample_rate: default_sample_rate(),
            center_frequency_hz: 0.0,
            window: WindowFunction::default(),
            history_size: default_history_size(),
            anomaly_threshold_db: default_anomaly_threshold_db(),
            peak: PeakDetectorConfig::default(),
        }
    }
}

impl SpectrumConfig {
    pub fn validate(&self) -> Result<(), SignalError> {
        validate_fft_size(self.fft_size)?;
        validate_sample_rate(self.sample_rate)?;
        validate_history_size(self.history_size)?;
        if !self.anomaly_threshold_db.is_finite() {
            return Err(SignalError::config("anomaly_threshold_db must be finite"));
        }
        self.peak.validate()
    }
}

fn validate_fft_size(fft_size: usize) -> Result<(), SignalError> {
    if fft_size < 2 {
        return Err(SignalError::config(format!(
            "fft_size must be at least 2, got {fft_size}"
        )));
    }
    Ok(())
}

fn validate_history_size(history_size: usize) -> Result<(), SignalError> {
    if history_size == 0 {
        return Err(SignalError::config("history_size must be at least 1"));
    }
    Ok(())
}

/// Statistics for one spectrum update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumStats {
    pub noise_floor_db: f64,
    pub peak_power_db: f64,
    pub mean_power_db: f64,
    pub peaks: Vec<SpectrumPeak>,
    /// Bins above the baseline by more than the anomaly threshold.
    pub anomaly_bins: u32,
}

impl Default for SpectrumStats {
    fn default() -> Self {
        Self {
            noise_floor_db: FLOOR_DB,
            peak_power_db: FLOOR_DB,
            mean_power_db: FLOOR_DB,
            peaks: Vec::new(),
            anomaly_bins: 0,
        }
    }
}

/// A bin exceeding the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Anomaly {
    pub frequency_hz: f64,
    pub power_db: f64,
    pub excess_db: f64,
}

struct BaselineCapture {
    sum: Vec<f64>,
    count: u32,
}

/// Windowed FFT plus running statistics over successive spectra.
pub struct SpectrumAnalyzer {
    config: SpectrumConfig,
    engine: SpectralEngine,
    freq_axis: Vec<f64>,
    history: HeapRb<Vec<f64>>,
    average: Vec<f64>,
    peak_hold_max: Vec<f64>,
    peak_hold_min: Vec<f64>,
    update_count: u64,
    baseline: Option<Vec<f64>>,
    capture: Option<BaselineCapture>,
}

impl SpectrumAnalyzer {
    pub fn new(config: SpectrumConfig) -> Result<Self, SignalError> {
        config.validate()?;
        let n = config.fft_size;
        Ok(Self {
            engine: SpectralEngine::new(n, config.window, true),
            freq_axis: shifted_frequencies(n, config.sample_rate, config.center_frequency_hz),
            history: HeapRb::new(config.history_size),
            average: vec![FLOOR_DB; n],
            peak_hold_max: vec![PEAK_HOLD_MAX_INIT_DB; n],
            peak_hold_min: vec![PEAK_HOLD_MIN_INIT_DB; n],
            update_count: 0,
            baseline: None,
            capture: None,
            config,
        })
    }

    /// Gain-compensated power spectrum in dB, normalised by `fft_size^2`.
    ///
    /// Input is truncated or zero-padded to `fft_size` samples.
    pub fn compute_fft_db(&mut self, samples: &[Complex32]) -> Vec<f64> {
        let scale = self.norm_scale();
        self.engine
            .power(samples)
            .into_iter()
            .map(|p| power_to_db(p / scale))
            .collect()
    }

    /// Average the spectra of every whole `fft_size` frame in `block`.
    ///
    /// Averaging happens in linear power. A block shorter than one frame is
    /// zero-padded into a single frame.
    pub fn compute_averaged_fft_db(&mut self, block: &[Complex32]) -> Vec<f64> {
        let n = self.config.fft_size;
        if block.len() < n {
            return self.compute_fft_db(block);
        }

        let mut accum = vec![0.0; n];
        let mut frames = 0usize;
        for frame in block.chunks_exact(n) {
            for (acc, p) in accum.iter_mut().zip(self.engine.power(frame)) {
                *acc += p;
            }
            frames += 1;
        }

        let scale = self.norm_scale() * frames as f64;
        accum.into_iter().map(|p| power_to_db(p / scale)).collect()
    }

    fn norm_scale(&self) -> f64 {
        let n = self.config.fft_size as f64;
        n * n
    }

    /// Fold a dB spectrum into the running statistics.
    ///
    /// Spectra of a different length are linearly resampled to `fft_size`.
    /// An empty spectrum changes nothing and returns default statistics.
    pub fn update(&mut self, power_db: &[f64]) -> SpectrumStats {
        if power_db.is_empty() {
            return SpectrumStats::default();
        }
        let n = self.config.fft_size;
        let spectrum = if power_db.len() == n {
            power_db.to_vec()
        } else {
            resample_linear(power_db, n)
        };

        self.update_count += 1;
        self.history.push_overwrite(spectrum.clone());

        if self.update_count == 1 {
            self.average.clone_from(&spectrum);
        } else {
            let span = self.update_count.min(self.config.history_size as u64) as f64;
            let alpha = 2.0 / (span + 1.0);
            for (avg, x) in self.average.iter_mut().zip(&spectrum) {
                *avg = alpha * x + (1.0 - alpha) * *avg;
            }
        }

        for ((hi, lo), &x) in self
            .peak_hold_max
            .iter_mut()
            .zip(self.peak_hold_min.iter_mut())
            .zip(&spectrum)
        {
            *hi = hi.max(x);
            *lo = lo.min(x);
        }

        if let Some(capture) = self.capture.as_mut() {
            for (acc, x) in capture.sum.iter_mut().zip(&spectrum) {
                *acc += x;
            }
            capture.count += 1;
        }

        self.compute_stats(&spectrum)
    }

    fn compute_stats(&self, spectrum: &[f64]) -> SpectrumStats {
        let noise_floor_db = percentile(spectrum, NOISE_FLOOR_PERCENTILE).unwrap_or(FLOOR_DB);
        let peak_power_db = spectrum.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let anomaly_bins = self.baseline.as_ref().map_or(0, |baseline| {
            spectrum
                .iter()
                .zip(baseline)
                .filter(|(x, b)| *x - *b > self.config.anomaly_threshold_db)
                .count()
        });

        SpectrumStats {
            noise_floor_db,
            peak_power_db,
            mean_power_db: mean(spectrum).unwrap_or(FLOOR_DB),
            peaks: self.detect_peaks(spectrum, Some(noise_floor_db)),
            anomaly_bins: u32::try_from(anomaly_bins).unwrap_or(u32::MAX),
        }
    }

    /// Peaks of `spectrum`; the noise floor defaults to its 30th percentile.
    #[must_use]
    pub fn detect_peaks(&self, spectrum: &[f64], noise_floor_db: Option<f64>) -> Vec<SpectrumPeak> {
        let Some(noise_floor_db) =
            noise_floor_db.or_else(|| percentile(spectrum, NOISE_FLOOR_PERCENTILE))
        else {
            return Vec::new();
        };
        let bin_hz = self.config.sample_rate / spectrum.len() as f64;
        if spectrum.len() == self.freq_axis.len() {
            detect_peaks(spectrum, noise_floor_db, &self.freq_axis, bin_hz, &self.config.peak)
        } else {
            let axis = shifted_frequencies(
                spectrum.len(),
                self.config.sample_rate,
                self.config.center_frequency_hz,
            );
            detect_peaks(spectrum, noise_floor_db, &axis, bin_hz, &self.config.peak)
        }
    }

    /// Begin accumulating spectra for a new baseline.
    pub fn start_baseline_capture(&mut self) {
        self.capture = Some(BaselineCapture {
            sum: vec![0.0; self.config.fft_size],
            count: 0,
        });
    }

    /// Average the captured spectra into the baseline.
    ///
    /// Returns `None` (and keeps capturing) when nothing has been captured yet.
    pub fn finish_baseline_capture(&mut self) -> Option<Vec<f64>> {
        if !self.capture.as_ref().is_some_and(|c| c.count > 0) {
            return None;
        }
        let capture = self.capture.take()?;
        let count = f64::from(capture.count);
        let baseline: Vec<f64> = capture.sum.into_iter().map(|s| s / count).collect();
        info!(
            "Baseline captured over {} spectra ({} bins)",
            capture.count,
            baseline.len()
        );
        self.baseline = Some(baseline.clone());
        Some(baseline)
    }

    #[must_use]
    pub fn is_capturing_baseline(&self) -> bool {
        self.capture.is_some()
    }

    pub fn set_baseline(&mut self, baseline_db: &[f64]) -> Result<(), SignalError> {
        if baseline_db.len() != self.config.fft_size {
            return Err(SignalError::config(format!(
                "baseline has {} bins, expected {}",
                baseline_db.len(),
                self.config.fft_size
            )));
        }
        self.baseline = Some(baseline_db.to_vec());
        Ok(())
    }

    /// Drop the baseline and any capture in progress.
    pub fn clear_baseline(&mut self) {
        self.baseline = None;
        self.capture = None;
    }

    /// Bins of `power_db` exceeding the baseline by more than the threshold.
    #[must_use]
    pub fn anomalies(&self, power_db: &[f64]) -> Vec<Anomaly> {
        let Some(baseline) = self.baseline.as_ref() else {
            return Vec::new();
        };
        if power_db.len() != baseline.len() {
            return Vec::new();
        }
        power_db
            .iter()
            .zip(baseline)
            .zip(&self.freq_axis)
            .filter_map(|((&level, &base), &frequency_hz)| {
                let excess_db = level - base;
                (excess_db > self.config.anomaly_threshold_db).then_some(Anomaly {
                    frequency_hz,
                    power_db: level,
                    excess_db,
                })
            })
            .collect()
    }

    pub fn set_window(&mut self, window: WindowFunction) {
        self.config.window = window;
        self.engine.set_window(window);
    }

    pub fn set_window_by_name(&mut self, name: &str) -> Result<(), SignalError> {
        let window = name.parse::<WindowFunction>()?;
        self.set_window(window);
        Ok(())
    }

    /// Change the FFT size. Clears all statistics and the baseline.
    pub fn set_fft_size(&mut self, fft_size: usize) -> Result<(), SignalError> {
        validate_fft_size(fft_size)?;
        self.config.fft_size = fft_size;
        self.engine.resize(fft_size);
        self.rebuild_freq_axis();
        self.clear_baseline();
        self.reset();
        Ok(())
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<(), SignalError> {
        validate_sample_rate(sample_rate)?;
        self.config.sample_rate = sample_rate;
        self.rebuild_freq_axis();
        Ok(())
    }

    pub fn set_center_frequency(&mut self, center_frequency_hz: f64) {
        self.config.center_frequency_hz = center_frequency_hz;
        self.rebuild_freq_axis();
    }

    /// Resize the history ring, keeping the most recent spectra.
    pub fn set_history_size(&mut self, history_size: usize) -> Result<(), SignalError> {
        validate_history_size(history_size)?;
        let mut history = HeapRb::new(history_size);
        for spectrum in self.history.iter() {
            history.push_overwrite(spectrum.clone());
        }
        self.history = history;
        self.config.history_size = history_size;
        Ok(())
    }

    pub fn set_anomaly_threshold_db(&mut self, threshold_db: f64) {
        self.config.anomaly_threshold_db = threshold_db;
    }

    pub fn set_peak_config(&mut self, peak: PeakDetectorConfig) -> Result<(), SignalError> {
        peak.validate()?;
        self.config.peak = peak;
        Ok(())
    }

    fn rebuild_freq_axis(&mut self) {
        self.freq_axis = shifted_frequencies(
            self.config.fft_size,
            self.config.sample_rate,
            self.config.center_frequency_hz,
        );
    }

    /// Clear history, the average and the hold traces. The baseline is kept.
    pub fn reset(&mut self) {
        let n = self.config.fft_size;
        self.history.clear();
        self.average = vec![FLOOR_DB; n];
        self.update_count = 0;
        self.reset_peak_hold();
    }

    pub fn reset_peak_hold(&mut self) {
        let n = self.config.fft_size;
        self.peak_hold_max = vec![PEAK_HOLD_MAX_INIT_DB; n];
        self.peak_hold_min = vec![PEAK_HOLD_MIN_INIT_DB; n];
    }

    #[must_use]
    pub fn config(&self) -> &SpectrumConfig {
        &self.config
    }

    #[must_use]
    pub fn average(&self) -> &[f64] {
        &self.average
    }

    #[must_use]
    pub fn peak_hold_max(&self) -> &[f64] {
        &self.peak_hold_max
    }

    #[must_use]
    pub fn peak_hold_min(&self) -> &[f64] {
        &self.peak_hold_min
    }

    #[must_use]
    pub fn baseline(&self) -> Option<&[f64]> {
        self.baseline.as_deref()
    }

    #[must_use]
    pub fn freq_axis(&self) -> &[f64] {
        &self.freq_axis
    }

    /// Stored spectra, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &[f64]> {
        self.history.iter().map(Vec::as_slice)
    }

    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.update_count
    }
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("config", &self.config)
            .field("update_count", &self.update_count)
            .field("has_baseline", &self.baseline.is_some())
            .field("capturing_baseline", &self.capture.is_some())
            .finish_non_exhaustive()
    }
}
