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

//! WAV file IQ source.
//!
//! Reads 16-bit stereo WAV files and outputs `Complex32` IQ samples.
//! Left channel = I (in-phase), Right channel = Q (quadrature).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use hound::WavReader;
use signal_tracker::Complex32;

use super::IqSource;

/// WAV file source.
///
/// Converts int16 samples to normalized float32 complex values.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    sample_rate: u32,
}

impl std::fmt::Debug for WavSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSource")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl WavSource {
    /// Open a WAV file.
    ///
    /// # Errors
    /// Returns error if file cannot be opened or is not a 16-bit stereo WAV
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file {}", path.display()))?;

        let spec = reader.spec();

        if spec.channels != 2 {
            bail!(
                "WAV file must be stereo (2 channels), found {} channels",
                spec.channels
            );
        }

        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            bail!(
                "WAV file must be 16-bit integer, found {} bits per sample",
                spec.bits_per_sample
            );
        }

        log::info!(
            "Opened WAV file {}: {} Hz, {:.2} seconds",
            path.display(),
            spec.sample_rate,
            f64::from(reader.duration()) / f64::from(spec.sample_rate)
        );

        Ok(Self {
            sample_rate: spec.sample_rate,
            reader,
        })
    }
}

impl IqSource for WavSource {
    fn name(&self) -> &'static str {
        "wav file"
    }

    fn read(&mut self, buf: &mut [Complex32]) -> Result<usize> {
        // Interleaved stereo samples (I, Q, I, Q, ...)
        let mut samples = self.reader.samples::<i16>();
        let mut produced = 0;

        for slot in buf.iter_mut() {
            let (Some(i_sample), Some(q_sample)) = (samples.next(), samples.next()) else {
                break;
            };
            let i_sample = i_sample.context("Failed to read WAV sample")?;
            let q_sample = q_sample.context("Failed to read WAV sample")?;

            // Normalize int16 to float32: -32768..32767 -> -1.0..1.0
            *slot = Complex32::new(
                f32::from(i_sample) / 32768.0,
                f32::from(q_sample) / 32768.0,
            );
            produced += 1;
        }

        Ok(produced)
    }

    fn sample_rate(&self) -> Option<f64> {
        Some(f64::from(self.sample_rate))
    }
}
