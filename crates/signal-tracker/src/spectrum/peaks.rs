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

//! Prominence-filtered peak detection over a dB spectrum.

use serde::{Deserialize, Serialize};

use crate::error::SignalError;

/// Drop from the peak level that bounds its bandwidth estimate.
const HALF_POWER_DB: f64 = 3.0;

fn default_min_prominence_db() -> f64 {
    6.0
}

fn default_min_distance_bins() -> usize {
    5
}

fn default_min_snr_db() -> f64 {
    3.0
}

fn default_max_peaks() -> usize {
    20
}

/// Peak detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakDetectorConfig {
    /// Minimum height above the higher neighbouring valley.
    pub min_prominence_db: f64,
    /// Half-width of the local-maximum window.
    pub min_distance_bins: usize,
    /// Minimum height above the noise floor.
    pub min_snr_db: f64,
    /// Strongest peaks kept.
    pub max_peaks: usize,
}

impl Default for PeakDetectorConfig {
    fn default() -> Self {
        Self {
            min_prominence_db: default_min_prominence_db(),
            min_distance_bins: default_min_distance_bins(),
            min_snr_db: default_min_snr_db(),
            max_peaks: default_max_peaks(),
        }
    }
}

impl PeakDetectorConfig {
    pub fn validate(&self) -> Result<(), SignalError> {
        if self.min_distance_bins == 0 {
            return Err(SignalError::config("min_distance_bins must be at least 1"));
        }
        if !self.min_prominence_db.is_finite() || !self.min_snr_db.is_finite() {
            return Err(SignalError::config("peak thresholds must be finite"));
        }
        Ok(())
    }
}

/// A detected spectral peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumPeak {
    pub frequency_hz: f64,
    pub power_db: f64,
    pub prominence_db: f64,
    /// Width of the contiguous region within 3 dB of the peak.
    pub bandwidth_hz: f64,
    pub bin_index: u32,
    pub snr_db: f64,
}

/// Find local maxima in `spectrum`, strongest first.
///
/// A bin is a candidate when it is the maximum of the
/// `2 * min_distance_bins + 1` window centred on it; on equal levels the
/// lowest bin wins. Prominence is measured against the valleys found within
/// `3 * min_distance_bins` bins on either side. `frequencies` must match
/// `spectrum` in length, otherwise nothing is reported.
#[must_use]
pub fn detect_peaks(
    spectrum: &[f64],
    noise_floor_db: f64,
    frequencies: &[f64],
    bin_hz: f64,
    config: &PeakDetectorConfig,
) -> Vec<SpectrumPeak> {
    let n = spectrum.len();
    let d = config.min_distance_bins.max(1);
    if frequencies.len() != n || n < 2 * d + 1 {
        return Vec::new();
    }

    let mut peaks = Vec::new();
    for i in d..n - d {
        let level = spectrum[i];
        if spectrum[i - d..i].iter().any(|&v| v >= level)
            || spectrum[i + 1..=i + d].iter().any(|&v| v > level)
        {
            continue;
        }

        let left_min = min_of(&spectrum[i.saturating_sub(3 * d)..i]);
        let right_min = min_of(&spectrum[i + 1..n.min(i + 3 * d + 1)]);
        let prominence = level - left_min.max(right_min);
        if prominence < config.min_prominence_db {
            continue;
        }

        let snr = level - noise_floor_db;
        if snr < config.min_snr_db {
            continue;
        }

        let half_power = level - HALF_POWER_DB;
        let right = spectrum[i + 1..n.min(i + 5 * d)]
            .iter()
            .take_while(|&&v| v >= half_power)
            .count();
        let left = spectrum[i.saturating_sub(5 * d) + 1..i]
            .iter()
            .rev()
            .take_while(|&&v| v >= half_power)
            .count();

        peaks.push(SpectrumPeak {
            frequency_hz: frequencies[i],
            power_db: level,
            prominence_db: prominence,
            bandwidth_hz: (1 + left + right) as f64 * bin_hz,
            bin_index: u32::try_from(i).unwrap_or(u32::MAX),
            snr_db: snr,
        });
    }

    peaks.sort_by(|a, b| b.power_db.total_cmp(&a.power_db));
    peaks.truncate(config.max_peaks);
    peaks
}

fn min_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::shifted_frequencies;

    const N: usize = 256;
    const BIN_HZ: f64 = 1000.0;

    fn axis() -> Vec<f64> {
        shifted_frequencies(N, BIN_HZ * N as f64, 0.0)
    }

    fn flat() -> Vec<f64> {
        vec![-100.0; N]
    }

    #[test]
    fn test_adjacent_bins_yield_one_peak() {
        let mut spectrum = flat();
        spectrum[100] = -50.0;
        spectrum[101] = -50.1;
        let peaks = detect_peaks(&spectrum, -100.0, &axis(), BIN_HZ, &PeakDetectorConfig::default());
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].bin_index, 100);
        assert!((peaks[0].prominence_db - 50.0).abs() < 1e-12);
        assert!((peaks[0].snr_db - 50.0).abs() < 1e-12);
        assert!((peaks[0].bandwidth_hz - 2.0 * BIN_HZ).abs() < 1e-9);
        assert!((peaks[0].frequency_hz - axis()[100]).abs() < 1e-9);
    }

    #[test]
    fn test_equal_adjacent_bins_keep_first() {
        let mut spectrum = flat();
        spectrum[60] = -40.0;
        spectrum[61] = -40.0;
        let peaks = detect_peaks(&spectrum, -100.0, &axis(), BIN_HZ, &PeakDetectorConfig::default());
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].bin_index, 60);
    }

    #[test]
    fn test_flat_spectrum_has_no_peaks() {
        let peaks = detect_peaks(&flat(), -100.0, &axis(), BIN_HZ, &PeakDetectorConfig::default());
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_prominence_and_snr_filters() {
        let mut spectrum = flat();
        spectrum[50] = -96.0; // prominence 4 dB
        spectrum[150] = -80.0;
        let peaks = detect_peaks(&spectrum, -100.0, &axis(), BIN_HZ, &PeakDetectorConfig::default());
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].bin_index, 150);

        // Above the prominence limit but too close to a high noise floor.
        let peaks = detect_peaks(&spectrum, -82.0, &axis(), BIN_HZ, &PeakDetectorConfig::default());
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_sorted_and_truncated() {
        let mut spectrum = flat();
        for (k, bin) in (20..240).step_by(20).enumerate() {
            spectrum[bin] = -90.0 + k as f64;
        }
        let config = PeakDetectorConfig {
            max_peaks: 3,
            ..PeakDetectorConfig::default()
        };
        let peaks = detect_peaks(&spectrum, -100.0, &axis(), BIN_HZ, &config);
        assert_eq!(peaks.len(), 3);
        assert!(peaks[0].power_db > peaks[1].power_db);
        assert!(peaks[1].power_db > peaks[2].power_db);
        assert_eq!(peaks[0].bin_index, 220);
    }

    #[test]
    fn test_wide_peak_bandwidth() {
        let mut spectrum = flat();
        for bin in 120..125 {
            spectrum[bin] = -61.0;
        }
        spectrum[122] = -60.0;
        let peaks = detect_peaks(&spectrum, -100.0, &axis(), BIN_HZ, &PeakDetectorConfig::default());
        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].bandwidth_hz - 5.0 * BIN_HZ).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_axis_or_short_spectrum() {
        let spectrum = flat();
        assert!(detect_peaks(&spectrum, -100.0, &axis()[1..], BIN_HZ, &PeakDetectorConfig::default()).is_empty());
        assert!(detect_peaks(&[-10.0; 5], -100.0, &[0.0; 5], BIN_HZ, &PeakDetectorConfig::default()).is_empty());
    }
}
