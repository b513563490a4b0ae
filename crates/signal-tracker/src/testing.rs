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

//! Deterministic synthetic chunks for tests.
//!
//! Built into the library's own tests and, with the `test-util` feature,
//! exported for crates that drive a pipeline in their tests.

use std::f64::consts::PI;

use num_complex::Complex32;

pub const CHUNK_LEN: usize = 1024;
pub const SAMPLE_RATE: f64 = 2.0e6;

/// Number of bin-centred tones in [`pulse_chunk`]; spans ~50 kHz at 2 MS/s.
pub const PULSE_TONES: usize = 22;

/// Impulse amplitude giving a mean chunk power of -100 dB.
fn floor_amplitude() -> f64 {
    (CHUNK_LEN as f64 * 1e-10).sqrt()
}

/// A chunk whose spectrum is perfectly flat and whose power is -100 dB.
#[must_use]
pub fn silent_chunk() -> Vec<Complex32> {
    let mut chunk = vec![Complex32::new(0.0, 0.0); CHUNK_LEN];
    chunk[CHUNK_LEN / 2] = Complex32::new(0.0, floor_amplitude() as f32);
    chunk
}

/// [`PULSE_TONES`] bin-centred tones starting at unshifted FFT bin
/// `first_bin`, with no floor. Total power is -80.04 dB.
#[must_use]
pub fn tone_chunk(first_bin: usize) -> Vec<Complex32> {
    let n = CHUNK_LEN as f64;
    let ratio = 99.0 * n / PULSE_TONES as f64;
    let amplitude = floor_amplitude() * ratio.sqrt() / n;

    (0..CHUNK_LEN)
        .map(|i| {
            let mut re = 0.0;
            let mut im = 0.0;
            for k in first_bin..first_bin + PULSE_TONES {
                // Phase offset of pi*k centres the pulse in the frame.
                let phase = 2.0 * PI * k as f64 * i as f64 / n + PI * k as f64;
                re += phase.cos();
                im += phase.sin();
            }
            Complex32::new((amplitude * re) as f32, (amplitude * im) as f32)
        })
        .collect()
}

/// The silent floor plus [`tone_chunk`]. Total power is -80 dB, so the
/// chunk SNR is 20 dB.
#[must_use]
pub fn pulse_chunk(first_bin: usize) -> Vec<Complex32> {
    silent_chunk()
        .into_iter()
        .zip(tone_chunk(first_bin))
        .map(|(floor, tone)| floor + tone)
        .collect()
}

/// Constant-envelope chunk at the given mean power.
#[must_use]
pub fn constant_chunk(power_db: f64, len: usize) -> Vec<Complex32> {
    let amplitude = 10f64.powf(power_db / 20.0) as f32;
    vec![Complex32::new(amplitude, 0.0); len]
}
