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

//! Synthetic IQ source for running without hardware.
//!
//! Produces a Gaussian noise floor with a few keyed carriers on top. Each
//! carrier is on for part of its period and may drift, so the demo exercises
//! event creation, matching and closure end to end.

use std::f64::consts::TAU;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use signal_tracker::Complex32;

use super::IqSource;

/// Total noise power of the synthetic floor (-60 dBFS).
const NOISE_POWER: f64 = 1e-6;

/// A keyed carrier in the demo scene.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitter {
    /// Offset from the tuned center in Hz
    pub offset_hz: f64,
    /// Linear drift of the offset while keyed, in Hz per second
    pub drift_hz_per_s: f64,
    /// Peak amplitude (1.0 = full scale)
    pub amplitude: f64,
    /// Keying period in seconds
    pub period_s: f64,
    /// On-time within each period in seconds
    pub on_s: f64,
    /// Delay before the first key-up in seconds
    pub start_s: f64,
}

impl Emitter {
    fn is_keyed(&self, t: f64) -> bool {
        t >= self.start_s && (t - self.start_s) % self.period_s < self.on_s
    }

    fn frequency_at(&self, t: f64) -> f64 {
        let into_burst = (t - self.start_s).max(0.0) % self.period_s;
        self.offset_hz + self.drift_hz_per_s * into_burst
    }
}

/// Default scene: three bursty carriers at different offsets and cadences.
#[must_use]
pub fn default_emitters() -> Vec<Emitter> {
    vec![
        Emitter {
            offset_hz: 250_000.0,
            drift_hz_per_s: 0.0,
            amplitude: 0.05,
            period_s: 1.0,
            on_s: 0.2,
            start_s: 0.1,
        },
        Emitter {
            offset_hz: -400_000.0,
            drift_hz_per_s: 2_000.0,
            amplitude: 0.03,
            period_s: 2.5,
            on_s: 0.5,
            start_s: 0.6,
        },
        Emitter {
            offset_hz: -150_000.0,
            drift_hz_per_s: 0.0,
            amplitude: 0.04,
            period_s: 0.7,
            on_s: 0.05,
            start_s: 0.3,
        },
    ]
}

/// Endless synthetic stream.
pub struct DemoSource {
    sample_rate: f64,
    emitters: Vec<Emitter>,
    phases: Vec<f64>,
    rng: StdRng,
    noise: Normal<f32>,
    sample_index: u64,
}

impl std::fmt::Debug for DemoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoSource")
            .field("sample_rate", &self.sample_rate)
            .field("emitters", &self.emitters.len())
            .field("sample_index", &self.sample_index)
            .finish_non_exhaustive()
    }
}

impl DemoSource {
    pub fn new(sample_rate: f64, emitters: Vec<Emitter>, seed: u64) -> Result<Self> {
        // per I/Q component
        let noise_std = (NOISE_POWER / 2.0).sqrt() as f32;
        let noise = Normal::new(0.0, noise_std).context("Invalid noise level")?;
        Ok(Self {
            sample_rate,
            phases: vec![0.0; emitters.len()],
            emitters,
            rng: StdRng::seed_from_u64(seed),
            noise,
            sample_index: 0,
        })
    }

    #[must_use]
    pub fn emitters(&self) -> &[Emitter] {
        &self.emitters
    }
}

impl IqSource for DemoSource {
    fn name(&self) -> &'static str {
        "demo"
    }

    fn read(&mut self, buf: &mut [Complex32]) -> Result<usize> {
        for slot in buf.iter_mut() {
            let t = self.sample_index as f64 / self.sample_rate;
            let mut i = f64::from(self.noise.sample(&mut self.rng));
            let mut q = f64::from(self.noise.sample(&mut self.rng));

            for (emitter, phase) in self.emitters.iter().zip(self.phases.iter_mut()) {
                if emitter.is_keyed(t) {
                    i += emitter.amplitude * phase.cos();
                    q += emitter.amplitude * phase.sin();
                }
                *phase = (*phase + TAU * emitter.frequency_at(t) / self.sample_rate) % TAU;
            }

            *slot = Complex32::new(i as f32, q as f32);
            self.sample_index += 1;
        }
        Ok(buf.len())
    }

    fn sample_rate(&self) -> Option<f64> {
        Some(self.sample_rate)
    }
}
