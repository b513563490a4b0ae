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

//! Numeric helpers shared by the pipeline components.

pub mod window;

use std::fmt;
use std::sync::Arc;

use num_complex::Complex32;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

pub use window::WindowFunction;

/// Added to linear power before taking the log so silence maps to a finite dB value.
pub const POWER_EPSILON: f64 = 1e-20;

/// Convert linear power to decibels.
#[must_use]
pub fn power_to_db(power: f64) -> f64 {
    10.0 * (power + POWER_EPSILON).log10()
}

/// Convert decibels back to linear power.
#[must_use]
pub fn db_to_power(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Mean `|x|^2` of a chunk, computed in double precision.
#[must_use]
pub fn mean_power(samples: &[Complex32]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let total: f64 = samples
        .iter()
        .map(|s| {
            let re = f64::from(s.re);
            let im = f64::from(s.im);
            re * re + im * im
        })
        .sum();
    Some(total / samples.len() as f64)
}

#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population variance.
#[must_use]
pub fn variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
#[must_use]
pub fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

/// Percentile with linear interpolation between closest ranks.
///
/// `q` is in percent and clamped to `0..=100`.
///
/// ```
/// use signal_tracker::dsp::percentile;
///
/// assert_eq!(percentile(&[4.0, 1.0, 3.0, 2.0], 50.0), Some(2.5));
/// assert_eq!(percentile(&[], 50.0), None);
/// ```
#[must_use]
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = (sorted.len() - 1) as f64 * q.clamp(0.0, 100.0) / 100.0;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Frequencies of FFT-shifted bins: bin `k` sits at
/// `(k - n/2) * sample_rate / n + offset`.
#[must_use]
pub fn shifted_frequencies(n: usize, sample_rate: f64, offset: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let bin_hz = sample_rate / n as f64;
    let half = (n / 2) as f64;
    (0..n).map(|k| (k as f64 - half) * bin_hz + offset).collect()
}

/// Move the DC bin to the center, in place.
pub fn fft_shift<T>(data: &mut [T]) {
    let half = data.len() / 2;
    data.rotate_right(half);
}

/// Moving average over `width` bins with same-length output.
///
/// Even widths are widened to the next odd value. Near the edges the
/// average only covers the bins that exist, so the ends are not pulled
/// toward zero. A width of one or less returns the input unchanged.
#[must_use]
pub fn boxcar_smooth(data: &[f64], width: usize) -> Vec<f64> {
    if width <= 1 || data.is_empty() {
        return data.to_vec();
    }
    let half = (width | 1) / 2;
    let n = data.len();

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for v in data {
        acc += v;
        prefix.push(acc);
    }

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// Linear interpolation of `data` onto `len` evenly spaced points spanning
/// the same range.
#[must_use]
pub fn resample_linear(data: &[f64], len: usize) -> Vec<f64> {
    match (data.len(), len) {
        (_, 0) | (0, _) => return Vec::new(),
        (m, n) if m == n => return data.to_vec(),
        (1, n) => return vec![data[0]; n],
        (_, 1) => return vec![data[0]],
        _ => {}
    }

    let last = data.len() - 1;
    let step = last as f64 / (len - 1) as f64;
    (0..len)
        .map(|i| {
            let x = i as f64 * step;
            let lo = (x.floor() as usize).min(last);
            let hi = (lo + 1).min(last);
            let frac = x - lo as f64;
            data[lo] + (data[hi] - data[lo]) * frac
        })
        .collect()
}

/// Windowed FFT producing FFT-shifted linear power `|X|^2`.
///
/// Frames shorter than the engine length are zero-padded and longer
/// frames are truncated to their first `len` samples. The plan and
/// window are cached and only rebuilt when the length or window changes.
pub struct SpectralEngine {
    window_fn: WindowFunction,
    gain_compensated: bool,
    window: Vec<f64>,
    planner: FftPlanner<f64>,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
}

impl SpectralEngine {
    #[must_use]
    pub fn new(len: usize, window_fn: WindowFunction, gain_compensated: bool) -> Self {
        let len = len.max(1);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(len);
        let mut engine = Self {
            window_fn,
            gain_compensated,
            window: Vec::new(),
            planner,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); len],
        };
        engine.rebuild_window();
        engine
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn window_function(&self) -> WindowFunction {
        self.window_fn
    }

    pub fn set_window(&mut self, window_fn: WindowFunction) {
        if window_fn != self.window_fn {
            self.window_fn = window_fn;
            self.rebuild_window();
        }
    }

    /// Change the transform length, re-planning the FFT if needed.
    pub fn resize(&mut self, len: usize) {
        let len = len.max(1);
        if len == self.len() {
            return;
        }
        self.fft = self.planner.plan_fft_forward(len);
        self.buffer = vec![Complex::new(0.0, 0.0); len];
        self.rebuild_window();
    }

    fn rebuild_window(&mut self) {
        let len = self.buffer.len();
        self.window = if self.gain_compensated {
            self.window_fn.compensated_coefficients(len)
        } else {
            self.window_fn.coefficients(len)
        };
    }

    /// FFT-shifted `|X|^2` of the windowed frame.
    pub fn power(&mut self, samples: &[Complex32]) -> Vec<f64> {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            *slot = match samples.get(i) {
                Some(s) => Complex::new(f64::from(s.re), f64::from(s.im)) * self.window[i],
                None => Complex::new(0.0, 0.0),
            };
        }

        self.fft.process(&mut self.buffer);

        let mut power: Vec<f64> = self.buffer.iter().map(Complex::norm_sqr).collect();
        fft_shift(&mut power);
        power
    }
}

impl fmt::Debug for SpectralEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralEngine")
            .field("len", &self.len())
            .field("window_fn", &self.window_fn)
            .field("gain_compensated", &self.gain_compensated)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 30.0).unwrap() - 1.9).abs() < 1e-12);
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 100.0), Some(4.0));
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    }

    #[test]
    fn test_population_std_dev() {
        let sd = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.0).abs() < 1e-12);
        assert_eq!(std_dev(&[]), None);
    }

    #[test]
    fn test_fft_shift_even_and_odd() {
        let mut even = [0, 1, 2, 3];
        fft_shift(&mut even);
        assert_eq!(even, [2, 3, 0, 1]);

        let mut odd = [0, 1, 2, -2, -1];
        fft_shift(&mut odd);
        assert_eq!(odd, [-2, -1, 0, 1, 2]);
    }

    #[test]
    fn test_shifted_frequencies() {
        assert_eq!(shifted_frequencies(4, 4.0, 0.0), vec![-2.0, -1.0, 0.0, 1.0]);
        assert_eq!(shifted_frequencies(4, 4.0, 100.0)[2], 100.0);
    }

    #[test]
    fn test_boxcar_keeps_edges_unbiased() {
        let flat = vec![-100.0; 16];
        let smoothed = boxcar_smooth(&flat, 3);
        assert!(smoothed.iter().all(|v| (v + 100.0).abs() < 1e-9));

        let step = [0.0, 0.0, 3.0, 0.0, 0.0];
        assert_eq!(boxcar_smooth(&step, 3), vec![0.0, 1.0, 1.0, 1.0, 0.0]);
        assert_eq!(boxcar_smooth(&step, 1), step.to_vec());
    }

    #[test]
    fn test_resample_linear() {
        assert_eq!(resample_linear(&[0.0, 10.0], 3), vec![0.0, 5.0, 10.0]);
        assert_eq!(resample_linear(&[1.0, 2.0, 3.0], 3), vec![1.0, 2.0, 3.0]);
        assert_eq!(resample_linear(&[7.0], 4), vec![7.0; 4]);
        assert!(resample_linear(&[], 4).is_empty());
    }

    #[test]
    fn test_tone_lands_in_shifted_bin() {
        let n = 64;
        let bin = 5;
        let samples: Vec<Complex32> = (0..n)
            .map(|i| {
                let phase = 2.0 * PI * bin as f32 * i as f32 / n as f32;
                Complex32::new(phase.cos(), phase.sin())
            })
            .collect();

        let mut engine = SpectralEngine::new(n, WindowFunction::Rectangular, false);
        let power = engine.power(&samples);
        let peak = power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, n / 2 + bin);
        assert!((power[peak] / (n * n) as f64 - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_engine_zero_pads_short_frames() {
        let mut engine = SpectralEngine::new(8, WindowFunction::Rectangular, false);
        let power = engine.power(&[Complex32::new(1.0, 0.0)]);
        assert_eq!(power.len(), 8);
        assert!(power.iter().all(|p| (p - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_power_db_floor() {
        assert!((power_to_db(0.0) + 200.0).abs() < 1e-9);
        assert!(power_to_db(1.0).abs() < 1e-9);
        assert!((db_to_power(-30.0) - 1e-3).abs() < 1e-15);
    }
}
