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

//! Presence detection with a median noise floor and hysteresis.
//!
//! Every chunk contributes its mean power (in dB) to a bounded history. The
//! noise floor is the median of that history, so short bursts do not drag it
//! upward. Presence switches on when the SNR rises above `snr_enter_db` and
//! only switches off again once it drops below the lower `snr_exit_db`.

use std::fmt;

use log::debug;
use num_complex::Complex32;
use ringbuf::{HeapRb, Rb};
use serde::{Deserialize, Serialize};

use crate::dsp::{mean_power, median, power_to_db};
use crate::error::SignalError;

/// Value reported for power and noise floor before anything has been measured.
pub const NO_MEASUREMENT_DB: f64 = -100.0;

/// Number of transitions reported by [`Detector::stats`].
const RECENT_TRANSITIONS: usize = 5;

fn default_snr_enter_db() -> f64 {
    8.0
}

fn default_snr_exit_db() -> f64 {
    4.0
}

fn default_noise_history_size() -> usize {
    500
}

fn default_transition_log_size() -> usize {
    64
}

/// Detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// SNR (dB) that must be exceeded to enter the active state.
    pub snr_enter_db: f64,
    /// SNR (dB) below which an active detection ends. Must be below `snr_enter_db`.
    pub snr_exit_db: f64,
    /// Number of chunk powers kept for the noise floor median.
    pub noise_history_size: usize,
    /// Number of state transitions kept for diagnostics.
    pub transition_log_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            snr_enter_db: default_snr_enter_db(),
            snr_exit_db: default_snr_exit_db(),
            noise_history_size: default_noise_history_size(),
            transition_log_size: default_transition_log_size(),
        }
    }
}

impl DetectorConfig {
    /// Reject configurations that would break the hysteresis or the history buffers.
    pub fn validate(&self) -> Result<(), SignalError> {
        validate_thresholds(self.snr_enter_db, self.snr_exit_db)?;
        if self.noise_history_size == 0 {
            return Err(SignalError::config("noise_history_size must be at least 1"));
        }
        if self.transition_log_size == 0 {
            return Err(SignalError::config("transition_log_size must be at least 1"));
        }
        Ok(())
    }
}

fn validate_thresholds(enter_db: f64, exit_db: f64) -> Result<(), SignalError> {
    if !enter_db.is_finite() || !exit_db.is_finite() {
        return Err(SignalError::config("SNR thresholds must be finite"));
    }
    if exit_db >= enter_db {
        return Err(SignalError::config(format!(
            "snr_exit_db ({exit_db}) must be below snr_enter_db ({enter_db})"
        )));
    }
    Ok(())
}

/// Detector state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorState {
    #[default]
    Idle,
    Active,
}

/// A logged state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    /// Index of the chunk (1-based) that caused the change.
    pub chunk: u64,
    pub from: DetectorState,
    pub to: DetectorState,
    pub snr_db: f64,
}

/// Result of evaluating one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionResult {
    pub present: bool,
    pub power_db: f64,
    pub noise_floor_db: f64,
    pub snr_db: f64,
}

impl Default for DetectionResult {
    fn default() -> Self {
        Self {
            present: false,
            power_db: NO_MEASUREMENT_DB,
            noise_floor_db: NO_MEASUREMENT_DB,
            snr_db: 0.0,
        }
    }
}

/// Diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorStats {
    pub state: DetectorState,
    pub chunk_count: u64,
    pub noise_history_len: usize,
    /// Total transitions since the last reset.
    pub transitions: u64,
    /// The most recent transitions, oldest first.
    pub recent_transitions: Vec<Transition>,
}

/// Binary presence gate over chunk power.
pub struct Detector {
    config: DetectorConfig,
    history: HeapRb<f64>,
    state: DetectorState,
    chunk_count: u64,
    transition_log: HeapRb<Transition>,
    transition_total: u64,
    last: DetectionResult,
}

impl Detector {
    /// Create a detector, rejecting invalid configuration.
    pub fn new(config: DetectorConfig) -> Result<Self, SignalError> {
        config.validate()?;
        Ok(Self {
            history: HeapRb::new(config.noise_history_size),
            transition_log: HeapRb::new(config.transition_log_size),
            config,
            state: DetectorState::Idle,
            chunk_count: 0,
            transition_total: 0,
            last: DetectionResult::default(),
        })
    }

    /// Evaluate a chunk.
    ///
    /// An empty chunk is a no-op: the previous result is returned and no
    /// state is touched.
    pub fn process(&mut self, chunk: &[Complex32]) -> DetectionResult {
        self.try_process(chunk).unwrap_or(self.last)
    }

    /// Evaluate a chunk, reporting an empty chunk as [`SignalError::DegenerateInput`].
    pub fn try_process(&mut self, chunk: &[Complex32]) -> Result<DetectionResult, SignalError> {
        let power = mean_power(chunk).ok_or(SignalError::DegenerateInput("empty sample chunk"))?;
        let power_db = power_to_db(power);

        self.chunk_count += 1;
        self.history.push_overwrite(power_db);
        let noise_floor_db = self.noise_floor_db();
        let snr_db = power_db - noise_floor_db;

        match self.state {
            DetectorState::Idle if snr_db > self.config.snr_enter_db => {
                self.transition(DetectorState::Active, snr_db);
            }
            DetectorState::Active if snr_db < self.config.snr_exit_db => {
                self.transition(DetectorState::Idle, snr_db);
            }
            _ => {}
        }

        self.last = DetectionResult {
            present: self.state == DetectorState::Active,
            power_db,
            noise_floor_db,
            snr_db,
        };
        Ok(self.last)
    }

    fn transition(&mut self, to: DetectorState, snr_db: f64) {
        debug!(
            "Detector {:?} -> {:?} at chunk {} (SNR {:.1} dB)",
            self.state, to, self.chunk_count, snr_db
        );
        self.transition_log.push_overwrite(Transition {
            chunk: self.chunk_count,
            from: self.state,
            to,
            snr_db,
        });
        self.transition_total += 1;
        self.state = to;
    }

    /// Median of the power history, or [`NO_MEASUREMENT_DB`] when empty.
    #[must_use]
    pub fn noise_floor_db(&self) -> f64 {
        let values: Vec<f64> = self.history.iter().copied().collect();
        median(&values).unwrap_or(NO_MEASUREMENT_DB)
    }

    /// Update both thresholds at once.
    pub fn set_thresholds(&mut self, enter_db: f64, exit_db: f64) -> Result<(), SignalError> {
        validate_thresholds(enter_db, exit_db)?;
        self.config.snr_enter_db = enter_db;
        self.config.snr_exit_db = exit_db;
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> DetectorState {
        self.state
    }

    #[must_use]
    pub fn last_result(&self) -> DetectionResult {
        self.last
    }

    /// Logged transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transition_log.iter()
    }

    #[must_use]
    pub fn stats(&self) -> DetectorStats {
        let skip = self.transition_log.len().saturating_sub(RECENT_TRANSITIONS);
        DetectorStats {
            state: self.state,
            chunk_count: self.chunk_count,
            noise_history_len: self.history.len(),
            transitions: self.transition_total,
            recent_transitions: self.transition_log.iter().skip(skip).cloned().collect(),
        }
    }

    /// Clear history and return to idle.
    pub fn reset(&mut self) {
        self.history.clear();
        self.transition_log.clear();
        self.state = DetectorState::Idle;
        self.chunk_count = 0;
        self.transition_total = 0;
        self.last = DetectionResult::default();
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("chunk_count", &self.chunk_count)
            .field("noise_history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::constant_chunk;

    fn chunk_at(power_db: f64) -> Vec<Complex32> {
        constant_chunk(power_db, 256)
    }

    fn detector() -> Detector {
        Detector::new(DetectorConfig::default()).unwrap()
    }

    #[test]
    fn test_initial_result() {
        let det = detector();
        assert_eq!(det.last_result(), DetectionResult::default());
        assert!((det.noise_floor_db() - NO_MEASUREMENT_DB).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hysteresis_single_transition_each_way() {
        let mut det = detector();
        for _ in 0..400 {
            let result = det.process(&chunk_at(-100.0));
            assert!(!result.present);
        }
        assert!((det.noise_floor_db() + 100.0).abs() < 1e-3);

        // -99.5 .. -60.5 dB and back down again.
        let ramp_up: Vec<f64> = (0..40).map(|k| -99.5 + f64::from(k)).collect();
        let ramp_down: Vec<f64> = ramp_up.iter().rev().copied().collect();

        let mut entered_at = None;
        for &p in &ramp_up {
            let result = det.process(&chunk_at(p));
            if result.present && entered_at.is_none() {
                entered_at = Some(p);
            }
            assert!((result.noise_floor_db + 100.0).abs() < 1e-3);
        }
        assert_eq!(entered_at, Some(-91.5));

        let mut exited_at = None;
        for &p in &ramp_down {
            let result = det.process(&chunk_at(p));
            if !result.present && exited_at.is_none() {
                exited_at = Some(p);
            }
            // Between the thresholds while active, presence holds.
            if exited_at.is_none() && result.snr_db > 4.0 && result.snr_db < 8.0 {
                assert!(result.present);
            }
        }
        assert_eq!(exited_at, Some(-96.5));

        let transitions: Vec<_> = det.transitions().cloned().collect();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].from, DetectorState::Idle);
        assert_eq!(transitions[0].to, DetectorState::Active);
        assert_eq!(transitions[1].to, DetectorState::Idle);
        assert_eq!(det.stats().transitions, 2);
    }

    #[test]
    fn test_mid_band_snr_does_not_enter() {
        let mut det = detector();
        for _ in 0..50 {
            det.process(&chunk_at(-100.0));
        }
        let result = det.process(&chunk_at(-94.5));
        assert!(!result.present);
        assert_eq!(det.state(), DetectorState::Idle);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut det = detector();
        det.process(&chunk_at(-100.0));
        let before = det.last_result();
        let stats_before = det.stats();

        assert_eq!(
            det.try_process(&[]),
            Err(SignalError::DegenerateInput("empty sample chunk"))
        );
        assert_eq!(det.process(&[]), before);
        assert_eq!(det.stats(), stats_before);
    }

    #[test]
    fn test_zero_power_is_finite() {
        let mut det = detector();
        let result = det.process(&[Complex32::new(0.0, 0.0); 16]);
        assert!(result.power_db.is_finite());
        assert!((result.power_db + 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_validation() {
        let config = DetectorConfig {
            snr_exit_db: 8.0,
            ..DetectorConfig::default()
        };
        assert!(matches!(
            Detector::new(config),
            Err(SignalError::Configuration(_))
        ));

        let mut det = detector();
        assert!(det.set_thresholds(5.0, 5.0).is_err());
        assert!(det.set_thresholds(10.0, 3.0).is_ok());
        assert!((det.config().snr_enter_db - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_history_is_bounded_and_reset() {
        let config = DetectorConfig {
            noise_history_size: 8,
            ..DetectorConfig::default()
        };
        let mut det = Detector::new(config).unwrap();
        for _ in 0..20 {
            det.process(&chunk_at(-90.0));
        }
        assert_eq!(det.stats().noise_history_len, 8);
        assert_eq!(det.stats().chunk_count, 20);

        det.reset();
        assert_eq!(det.state(), DetectorState::Idle);
        assert_eq!(det.stats().noise_history_len, 0);
        assert_eq!(det.last_result(), DetectionResult::default());
    }
}
