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

//! Temporal tracking of segments into long-lived signal events.
//!
//! Each chunk's segments are matched against the active events in creation
//! order; the first event whose last centre frequency lies within
//! `match_bw_factor * max(last_bandwidth, min_match_bandwidth_hz)` of the
//! segment takes it. Unmatched segments start new events. Events that go
//! `max_misses` chunks without a match are closed, summarised by the
//! [`FeatureExtractor`] and handed back to the caller.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::features::{FeatureExtractor, FeatureSet};
use crate::segmenter::FrequencySegment;

fn default_match_bw_factor() -> f64 {
    2.0
}

fn default_max_misses() -> u32 {
    10
}

fn default_min_match_bandwidth_hz() -> f64 {
    1000.0
}

/// Event builder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBuilderConfig {
    /// Matching tolerance as a multiple of the event's last bandwidth.
    pub match_bw_factor: f64,
    /// Consecutive missed chunks after which an event is closed.
    pub max_misses: u32,
    /// Lower bound on the bandwidth used for the matching tolerance.
    pub min_match_bandwidth_hz: f64,
}

impl Default for EventBuilderConfig {
    fn default() -> Self {
        Self {
            match_bw_factor: default_match_bw_factor(),
            max_misses: default_max_misses(),
            min_match_bandwidth_hz: default_min_match_bandwidth_hz(),
        }
    }
}

impl EventBuilderConfig {
    pub fn validate(&self) -> Result<(), SignalError> {
        validate_match_bw_factor(self.match_bw_factor)?;
        validate_max_misses(self.max_misses)?;
        if !self.min_match_bandwidth_hz.is_finite() || self.min_match_bandwidth_hz < 0.0 {
            return Err(SignalError::config(
                "min_match_bandwidth_hz must be zero or positive",
            ));
        }
        Ok(())
    }
}

fn validate_match_bw_factor(factor: f64) -> Result<(), SignalError> {
    if factor.is_finite() && factor > 0.0 {
        Ok(())
    } else {
        Err(SignalError::config(format!(
            "match_bw_factor must be positive, got {factor}"
        )))
    }
}

fn validate_max_misses(max_misses: u32) -> Result<(), SignalError> {
    if max_misses == 0 {
        Err(SignalError::config("max_misses must be at least 1"))
    } else {
        Ok(())
    }
}

/// What was measured for an event in a chunk where it was detected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub center_hz: f64,
    pub bandwidth_hz: f64,
    pub power_db: f64,
}

/// One evaluation of an event. Misses carry no measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: f64,
    pub present: bool,
    pub measurement: Option<Measurement>,
}

/// A signal tracked across chunks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalEvent {
    id: u64,
    start_time: f64,
    end_time: Option<f64>,
    last_center_hz: f64,
    last_bandwidth_hz: f64,
    last_seen: f64,
    hit_count: u32,
    miss_count: u32,
    gap_misses: u32,
    observations: Vec<Observation>,
    features: Option<FeatureSet>,
}

impl SignalEvent {
    pub(crate) fn from_segment(id: u64, timestamp: f64, segment: &FrequencySegment) -> Self {
        let mut event = Self {
            id,
            start_time: timestamp,
            end_time: None,
            last_center_hz: segment.center_hz,
            last_bandwidth_hz: segment.bandwidth_hz,
            last_seen: timestamp,
            hit_count: 0,
            miss_count: 0,
            gap_misses: 0,
            observations: Vec::new(),
            features: None,
        };
        event.record_hit(timestamp, segment);
        event
    }

    pub(crate) fn record_hit(&mut self, timestamp: f64, segment: &FrequencySegment) {
        self.gap_misses += self.miss_count;
        self.miss_count = 0;
        self.hit_count += 1;
        self.last_center_hz = segment.center_hz;
        self.last_bandwidth_hz = segment.bandwidth_hz;
        self.last_seen = timestamp;
        self.observations.push(Observation {
            timestamp,
            present: true,
            measurement: Some(Measurement {
                center_hz: segment.center_hz,
                bandwidth_hz: segment.bandwidth_hz,
                power_db: segment.peak_db,
            }),
        });
    }

    pub(crate) fn record_miss(&mut self, timestamp: f64) {
        self.miss_count += 1;
        self.observations.push(Observation {
            timestamp,
            present: false,
            measurement: None,
        });
    }

    pub(crate) fn close(&mut self, timestamp: f64) {
        self.end_time = Some(timestamp);
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Display label, e.g. `sig_000042`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("sig_{:06}", self.id)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    #[must_use]
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    #[must_use]
    pub fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    /// Time from start to close, or to `now` while still active.
    #[must_use]
    pub fn duration(&self, now: f64) -> f64 {
        (self.end_time.unwrap_or(now) - self.start_time).max(0.0)
    }

    #[must_use]
    pub fn last_center_hz(&self) -> f64 {
        self.last_center_hz
    }

    #[must_use]
    pub fn last_bandwidth_hz(&self) -> f64 {
        self.last_bandwidth_hz
    }

    #[must_use]
    pub fn last_seen(&self) -> f64 {
        self.last_seen
    }

    #[must_use]
    pub fn hit_count(&self) -> u32 {
        self.hit_count
    }

    /// Consecutive misses since the last hit.
    #[must_use]
    pub fn miss_count(&self) -> u32 {
        self.miss_count
    }

    /// Misses that were followed by a later hit.
    #[must_use]
    pub fn gap_misses(&self) -> u32 {
        self.gap_misses
    }

    #[must_use]
    pub fn features(&self) -> Option<&FeatureSet> {
        self.features.as_ref()
    }

    /// Every evaluation in order, hits and misses alike.
    #[must_use]
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        self.observations.iter().map(|o| o.timestamp)
    }

    pub fn presence(&self) -> impl Iterator<Item = bool> + '_ {
        self.observations.iter().map(|o| o.present)
    }

    fn measurements(&self) -> impl Iterator<Item = (f64, &Measurement)> + '_ {
        self.observations
            .iter()
            .filter_map(|o| o.measurement.as_ref().map(|m| (o.timestamp, m)))
    }

    /// Timestamps of hits.
    pub fn hit_times(&self) -> impl Iterator<Item = f64> + '_ {
        self.measurements().map(|(t, _)| t)
    }

    /// Centre frequency per hit.
    pub fn center_history(&self) -> impl Iterator<Item = f64> + '_ {
        self.measurements().map(|(_, m)| m.center_hz)
    }

    /// Bandwidth per hit.
    pub fn bandwidth_history(&self) -> impl Iterator<Item = f64> + '_ {
        self.measurements().map(|(_, m)| m.bandwidth_hz)
    }

    /// Peak power per hit.
    pub fn power_history(&self) -> impl Iterator<Item = f64> + '_ {
        self.measurements().map(|(_, m)| m.power_db)
    }
}

/// Result of one [`EventBuilder::process`] call.
#[derive(Debug)]
pub struct EventUpdate<'a> {
    /// Events still open after this chunk, in creation order.
    pub active: Vec<&'a SignalEvent>,
    /// Events closed by this chunk. Copies also stay in the builder until drained.
    pub closed: Vec<SignalEvent>,
}

/// Stitches per-chunk segments into [`SignalEvent`]s.
#[derive(Debug)]
pub struct EventBuilder {
    config: EventBuilderConfig,
    extractor: FeatureExtractor,
    active: Vec<SignalEvent>,
    closed: Vec<SignalEvent>,
    next_id: u64,
}

impl EventBuilder {
    pub fn new(config: EventBuilderConfig) -> Result<Self, SignalError> {
        config.validate()?;
        Ok(Self {
            config,
            extractor: FeatureExtractor,
            active: Vec::new(),
            closed: Vec::new(),
            next_id: 1,
        })
    }

    /// Fold one chunk's detection into the event set.
    ///
    /// Segments are ignored unless `detected` is set. Chunks must arrive in
    /// order; closed events accumulate until [`drain_closed`](Self::drain_closed).
    pub fn process(
        &mut self,
        timestamp: f64,
        detected: bool,
        segments: Vec<FrequencySegment>,
    ) -> EventUpdate<'_> {
        let mut matched = vec![false; self.active.len()];

        if detected {
            for segment in segments {
                if let Some(idx) = self.find_match(segment.center_hz) {
                    self.active[idx].record_hit(timestamp, &segment);
                    matched[idx] = true;
                } else {
                    let event = SignalEvent::from_segment(self.next_id, timestamp, &segment);
                    debug!(
                        "New event {} at {:.0} Hz ({:.0} Hz wide)",
                        event.label(),
                        segment.center_hz,
                        segment.bandwidth_hz
                    );
                    self.next_id += 1;
                    self.active.push(event);
                    matched.push(true);
                }
            }
        }

        for (event, hit) in self.active.iter_mut().zip(&matched) {
            if !hit {
                event.record_miss(timestamp);
            }
        }

        let max_misses = self.config.max_misses;
        let (expired, still_active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|event| event.miss_count >= max_misses);
        self.active = still_active;

        let mut closed = Vec::with_capacity(expired.len());
        for mut event in expired {
            event.close(timestamp);
            match self.extractor.extract(&event) {
                Ok(features) => event.features = Some(features),
                Err(e) => warn!("Feature extraction failed for {}: {}", event.label(), e),
            }
            info!(
                "Closed event {} at {:.0} Hz after {:.3} s ({} hits)",
                event.label(),
                event.last_center_hz,
                event.duration(timestamp),
                event.hit_count
            );
            closed.push(event.clone());
            self.closed.push(event);
        }

        EventUpdate {
            active: self.active.iter().collect(),
            closed,
        }
    }

    fn find_match(&self, center_hz: f64) -> Option<usize> {
        self.active.iter().position(|event| {
            let tolerance = self.config.match_bw_factor
                * event.last_bandwidth_hz.max(self.config.min_match_bandwidth_hz);
            (center_hz - event.last_center_hz).abs() < tolerance
        })
    }

    #[must_use]
    pub fn active_events(&self) -> &[SignalEvent] {
        &self.active
    }

    /// Closed events not yet drained.
    #[must_use]
    pub fn closed_events(&self) -> &[SignalEvent] {
        &self.closed
    }

    /// Take ownership of all closed events.
    pub fn drain_closed(&mut self) -> Vec<SignalEvent> {
        std::mem::take(&mut self.closed)
    }

    pub fn set_match_bw_factor(&mut self, factor: f64) -> Result<(), SignalError> {
        validate_match_bw_factor(factor)?;
        self.config.match_bw_factor = factor;
        Ok(())
    }

    /// Takes effect on the next chunk; events already past the new limit close then.
    pub fn set_max_misses(&mut self, max_misses: u32) -> Result<(), SignalError> {
        validate_max_misses(max_misses)?;
        self.config.max_misses = max_misses;
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &EventBuilderConfig {
        &self.config
    }

    /// Drop every event, open or closed, and restart ids at 1.
    pub fn reset(&mut self) {
        self.active.clear();
        self.closed.clear();
        self.next_id = 1;
    }
}
