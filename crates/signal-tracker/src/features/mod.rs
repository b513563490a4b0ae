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

//! Feature summaries of closed events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dsp::{mean, percentile, std_dev, variance};
use crate::error::SignalError;
use crate::events::SignalEvent;

/// Drift (Hz/s) at which the drift component of the stability score reaches zero.
const DRIFT_SCALE_HZ_PER_S: f64 = 1000.0;
/// Relative bandwidth spread above which bandwidth is flagged unstable.
const UNSTABLE_BW_RATIO: f64 = 0.3;
/// SNR (dB) at which the SNR factor of the confidence saturates.
const CONFIDENT_SNR_DB: f64 = 5.0;
const FAST_FADING_MAX_DURATION_S: f64 = 0.2;
const FAST_FADING_MIN_VARIANCE: f64 = 0.5;
const NOISE_PERCENTILE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BurstType {
    Continuous,
    Bursty,
}

impl fmt::Display for BurstType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuous => f.write_str("continuous"),
            Self::Bursty => f.write_str("bursty"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fading {
    Fast,
    Slow,
}

impl fmt::Display for Fading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => f.write_str("fast"),
            Self::Slow => f.write_str("slow"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFeatures {
    pub start_time: f64,
    pub end_time: f64,
    pub duration_s: f64,
    /// Chunks in which the event was detected.
    pub chunks_seen: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyFeatures {
    pub center_hz: f64,
    pub std_hz: f64,
    /// Least-squares slope of centre frequency over time.
    pub drift_hz_per_s: f64,
    pub min_hz: f64,
    pub max_hz: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthFeatures {
    pub mean_hz: f64,
    pub std_hz: f64,
    pub min_hz: f64,
    pub max_hz: f64,
    pub unstable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStructure {
    pub burst_type: BurstType,
    /// Fraction of evaluated chunks (excluding the closing run of misses) with a hit.
    pub duty_cycle: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerFeatures {
    pub avg_power_db: f64,
    pub peak_power_db: f64,
    pub papr_db: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseFeatures {
    pub noise_floor_db: f64,
    pub snr_db: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDynamics {
    pub power_var: f64,
    pub fading: Fading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stability {
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub frequency: f64,
}

/// Summary of a closed [`SignalEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub meta: MetaFeatures,
    pub frequency: FrequencyFeatures,
    pub bandwidth: BandwidthFeatures,
    pub time_structure: TimeStructure,
    pub power: PowerFeatures,
    pub noise: NoiseFeatures,
    pub signal_dynamics: SignalDynamics,
    pub stability: Stability,
    pub confidence: Confidence,
}

/// Stateless feature computation over an event's history.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Summarise a closed event.
    ///
    /// Returns [`SignalError::InvalidState`] if the event is still active.
    pub fn extract(&self, event: &SignalEvent) -> Result<FeatureSet, SignalError> {
        let Some(end_time) = event.end_time() else {
            return Err(SignalError::InvalidState(format!(
                "event {} is still active",
                event.label()
            )));
        };
        let duration_s = end_time - event.start_time();

        let centers: Vec<f64> = event.center_history().collect();
        let bandwidths: Vec<f64> = event.bandwidth_history().collect();
        let powers: Vec<f64> = event.power_history().collect();
        let hit_times: Vec<f64> = event.hit_times().map(|t| t - event.start_time()).collect();

        let drift = drift_hz_per_s(&hit_times, &centers, duration_s);
        let frequency = FrequencyFeatures {
            center_hz: mean(&centers).unwrap_or(0.0),
            std_hz: if centers.len() > 1 {
                std_dev(&centers).unwrap_or(0.0)
            } else {
                0.0
            },
            drift_hz_per_s: drift,
            min_hz: min_of(&centers),
            max_hz: max_of(&centers),
        };

        let bw_mean = mean(&bandwidths).unwrap_or(0.0);
        let bw_std = std_dev(&bandwidths).unwrap_or(0.0);
        let bandwidth = BandwidthFeatures {
            mean_hz: bw_mean,
            std_hz: bw_std,
            min_hz: min_of(&bandwidths),
            max_hz: max_of(&bandwidths),
            unstable: bw_mean > 0.0 && bw_std / bw_mean > UNSTABLE_BW_RATIO,
        };

        let hits = f64::from(event.hit_count());
        let evaluated = hits + f64::from(event.gap_misses());
        let time_structure = TimeStructure {
            burst_type: if event.gap_misses() == 0 {
                BurstType::Continuous
            } else {
                BurstType::Bursty
            },
            duty_cycle: if evaluated > 0.0 { hits / evaluated } else { 0.0 },
        };

        let avg_power = mean(&powers).unwrap_or(0.0);
        let peak_power = if powers.is_empty() { 0.0 } else { max_of(&powers) };
        let noise_floor = percentile(&powers, NOISE_PERCENTILE).unwrap_or(0.0);
        let snr = avg_power - noise_floor;

        let power_var = variance(&powers).unwrap_or(0.0);
        let fading = if duration_s < FAST_FADING_MAX_DURATION_S && power_var > FAST_FADING_MIN_VARIANCE
        {
            Fading::Fast
        } else {
            Fading::Slow
        };

        let drift_score = (1.0 - drift.abs() / DRIFT_SCALE_HZ_PER_S).clamp(0.0, 1.0);
        let bw_score = if bw_mean > 0.0 {
            (1.0 - bw_std / bw_mean).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let stability = (0.6 * drift_score + 0.4 * bw_score).clamp(0.0, 1.0);
        let freq_confidence = ((snr / CONFIDENT_SNR_DB).clamp(0.0, 1.0) * bw_score).clamp(0.0, 1.0);

        Ok(FeatureSet {
            meta: MetaFeatures {
                start_time: event.start_time(),
                end_time,
                duration_s,
                chunks_seen: event.hit_count(),
            },
            frequency,
            bandwidth,
            time_structure,
            power: PowerFeatures {
                avg_power_db: avg_power,
                peak_power_db: peak_power,
                papr_db: peak_power - avg_power,
            },
            noise: NoiseFeatures {
                noise_floor_db: noise_floor,
                snr_db: snr,
            },
            signal_dynamics: SignalDynamics { power_var, fading },
            stability: Stability { score: stability },
            confidence: Confidence {
                frequency: freq_confidence,
            },
        })
    }
}

/// Least-squares slope of `values` against `times`.
fn drift_hz_per_s(times: &[f64], values: &[f64], duration_s: f64) -> f64 {
    if values.len() <= 2 || times.len() != values.len() || duration_s <= 0.0 {
        return 0.0;
    }
    let (Some(t_mean), Some(v_mean)) = (mean(times), mean(values)) else {
        return 0.0;
    };
    let mut covariance = 0.0;
    let mut t_var = 0.0;
    for (t, v) in times.iter().zip(values) {
        covariance += (t - t_mean) * (v - v_mean);
        t_var += (t - t_mean) * (t - t_mean);
    }
    if t_var > 0.0 {
        covariance / t_var
    } else {
        0.0
    }
}

fn min_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::FrequencySegment;

    fn segment(center_hz: f64, bandwidth_hz: f64, peak_db: f64) -> FrequencySegment {
        FrequencySegment {
            low_hz: center_hz - bandwidth_hz / 2.0,
            high_hz: center_hz + bandwidth_hz / 2.0,
            center_hz,
            bandwidth_hz,
            peak_db,
            confidence: 1.0,
            bins: 5,
        }
    }

    /// Build a closed event from `(timestamp, Some(segment))` hits and
    /// `(timestamp, None)` misses.
    fn event_from(steps: &[(f64, Option<FrequencySegment>)], end_time: f64) -> SignalEvent {
        let (t0, first) = &steps[0];
        let first = first.as_ref().unwrap();
        let mut event = SignalEvent::from_segment(1, *t0, first);
        for (t, step) in &steps[1..] {
            match step {
                Some(seg) => event.record_hit(*t, seg),
                None => event.record_miss(*t),
            }
        }
        event.close(end_time);
        event
    }

    #[test]
    fn test_active_event_is_invalid_state() {
        let event = SignalEvent::from_segment(7, 0.0, &segment(100.0e6, 10.0e3, -50.0));
        let err = FeatureExtractor.extract(&event).unwrap_err();
        assert!(matches!(err, SignalError::InvalidState(_)));
    }

    #[test]
    fn test_steady_continuous_event() {
        let steps: Vec<_> = (0..5)
            .map(|i| (f64::from(i) * 0.1, Some(segment(100.0e6, 10.0e3, -50.0))))
            .collect();
        let features = FeatureExtractor.extract(&event_from(&steps, 1.0)).unwrap();

        assert_eq!(features.meta.chunks_seen, 5);
        assert!((features.meta.duration_s - 1.0).abs() < 1e-12);
        assert!((features.frequency.center_hz - 100.0e6).abs() < 1e-6);
        assert!(features.frequency.drift_hz_per_s.abs() < 1e-9);
        assert_eq!(features.time_structure.burst_type, BurstType::Continuous);
        assert!((features.time_structure.duty_cycle - 1.0).abs() < 1e-12);
        assert!(!features.bandwidth.unstable);
        assert!((features.stability.score - 1.0).abs() < 1e-12);
        assert_eq!(features.signal_dynamics.fading, Fading::Slow);
        // Constant power means no SNR spread and therefore no confidence.
        assert!(features.confidence.frequency.abs() < 1e-12);
    }

    #[test]
    fn test_linear_drift() {
        let steps: Vec<_> = (0..5)
            .map(|i| {
                let t = f64::from(i) * 0.25;
                (t, Some(segment(100.0e6 + 100.0 * t, 10.0e3, -50.0)))
            })
            .collect();
        let features = FeatureExtractor.extract(&event_from(&steps, 1.0)).unwrap();
        assert!((features.frequency.drift_hz_per_s - 100.0).abs() < 1e-3);
        assert!((features.stability.score - (0.6 * 0.9 + 0.4)).abs() < 1e-6);
        assert!((features.frequency.max_hz - features.frequency.min_hz - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_two_hits_have_no_drift() {
        let steps = vec![
            (0.0, Some(segment(100.0e6, 10.0e3, -50.0))),
            (0.5, Some(segment(100.01e6, 10.0e3, -50.0))),
        ];
        let features = FeatureExtractor.extract(&event_from(&steps, 1.0)).unwrap();
        assert!(features.frequency.drift_hz_per_s.abs() < f64::EPSILON);
    }

    #[test]
    fn test_gaps_make_event_bursty() {
        let steps = vec![
            (0.0, Some(segment(100.0e6, 10.0e3, -50.0))),
            (0.1, None),
            (0.2, None),
            (0.3, Some(segment(100.0e6, 10.0e3, -50.0))),
            (0.4, None),
        ];
        let event = event_from(&steps, 0.5);
        assert_eq!(event.gap_misses(), 2);
        let features = FeatureExtractor.extract(&event).unwrap();
        assert_eq!(features.time_structure.burst_type, BurstType::Bursty);
        assert!((features.time_structure.duty_cycle - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_power_statistics() {
        let steps = vec![
            (0.0, Some(segment(100.0e6, 10.0e3, -60.0))),
            (0.05, Some(segment(100.0e6, 10.0e3, -50.0))),
            (0.1, Some(segment(100.0e6, 10.0e3, -40.0))),
        ];
        let features = FeatureExtractor.extract(&event_from(&steps, 0.15)).unwrap();
        assert!((features.power.avg_power_db + 50.0).abs() < 1e-9);
        assert!((features.power.peak_power_db + 40.0).abs() < 1e-9);
        assert!((features.power.papr_db - 10.0).abs() < 1e-9);
        assert!((features.noise.noise_floor_db + 56.0).abs() < 1e-9);
        assert!((features.noise.snr_db - 6.0).abs() < 1e-9);
        assert!((features.confidence.frequency - 1.0).abs() < 1e-9);
        // Short and strongly varying.
        assert_eq!(features.signal_dynamics.fading, Fading::Fast);
    }

    #[test]
    fn test_unstable_bandwidth_and_bounds() {
        let bandwidths = [1.0e3, 40.0e3, 2.0e3, 80.0e3, 5.0e3];
        let steps: Vec<_> = bandwidths
            .iter()
            .enumerate()
            .map(|(i, &bw)| {
                let t = i as f64 * 0.01;
                (t, Some(segment(100.0e6 + 5.0e5 * t, bw, -30.0 - 7.0 * i as f64)))
            })
            .collect();
        let features = FeatureExtractor.extract(&event_from(&steps, 0.05)).unwrap();
        assert!(features.bandwidth.unstable);
        for value in [
            features.stability.score,
            features.confidence.frequency,
            features.time_structure.duty_cycle,
        ] {
            assert!((0.0..=1.0).contains(&value), "{value} out of range");
        }
    }
}
