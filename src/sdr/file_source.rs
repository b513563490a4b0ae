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

//! Raw complex float32 file source.
//!
//! Reads interleaved little-endian `f32` I/Q pairs (`.cf32`, `.iq`, `.cfile`).
//! A recording may carry a JSON sidecar with the same stem describing how it
//! was captured; when present its sample rate and tuning take precedence.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use signal_tracker::Complex32;

use super::IqSource;

const BYTES_PER_SAMPLE: usize = 8;

/// Capture description stored next to a recording as `<stem>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub sample_rate_hz: f64,
    #[serde(default)]
    pub center_freq_hz: f64,
    #[serde(default = "default_sample_format")]
    pub sample_format: String,
    #[serde(default)]
    pub samples_written: u64,
}

fn default_sample_format() -> String {
    "complex64".to_string()
}

impl RecordingMetadata {
    #[must_use]
    pub fn new(sample_rate_hz: f64, center_freq_hz: f64, samples_written: u64) -> Self {
        Self {
            sample_rate_hz,
            center_freq_hz,
            sample_format: default_sample_format(),
            samples_written,
        }
    }

    /// Sidecar path for a recording.
    #[must_use]
    pub fn sidecar_path(recording: &Path) -> PathBuf {
        recording.with_extension("json")
    }

    /// Read the sidecar for `recording`, if one exists.
    pub fn load_for(recording: &Path) -> Result<Option<Self>> {
        let path = Self::sidecar_path(recording);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path)
            .with_context(|| format!("Failed to open metadata {}", path.display()))?;
        let metadata: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid metadata in {}", path.display()))?;
        if !(metadata.sample_rate_hz.is_finite() && metadata.sample_rate_hz > 0.0) {
            bail!(
                "Invalid sample rate {} Hz in {}",
                metadata.sample_rate_hz,
                path.display()
            );
        }
        Ok(Some(metadata))
    }

    pub fn save_for(&self, recording: &Path) -> Result<()> {
        let path = Self::sidecar_path(recording);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create metadata {}", path.display()))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write metadata")?;
        Ok(())
    }
}

/// Streams samples from a raw complex float32 file.
#[derive(Debug)]
pub struct Cf32FileSource {
    reader: BufReader<File>,
    metadata: Option<RecordingMetadata>,
    bytes: Vec<u8>,
}

impl Cf32FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("IQ file not found: {}", path.display()))?;
        let metadata = RecordingMetadata::load_for(path)?;

        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        log::info!(
            "Opened IQ file {} ({} samples{})",
            path.display(),
            size / BYTES_PER_SAMPLE as u64,
            if metadata.is_some() { ", with metadata" } else { "" }
        );

        Ok(Self {
            reader: BufReader::new(file),
            metadata,
            bytes: Vec::new(),
        })
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&RecordingMetadata> {
        self.metadata.as_ref()
    }

    fn fill(&mut self, wanted: usize) -> Result<usize> {
        self.bytes.resize(wanted, 0);
        let mut filled = 0;
        while filled < wanted {
            match self.reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e).context("Failed to read IQ file"),
            }
        }
        Ok(filled)
    }
}

impl IqSource for Cf32FileSource {
    fn name(&self) -> &'static str {
        "cf32 file"
    }

    fn read(&mut self, buf: &mut [Complex32]) -> Result<usize> {
        let filled = self.fill(buf.len() * BYTES_PER_SAMPLE)?;
        if filled % BYTES_PER_SAMPLE != 0 {
            log::warn!(
                "Dropping {} trailing bytes of an incomplete sample",
                filled % BYTES_PER_SAMPLE
            );
        }

        let samples = filled / BYTES_PER_SAMPLE;
        for (slot, raw) in buf
            .iter_mut()
            .zip(self.bytes[..samples * BYTES_PER_SAMPLE].chunks_exact(BYTES_PER_SAMPLE))
        {
            let i = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let q = f32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
            *slot = Complex32::new(i, q);
        }
        Ok(samples)
    }

    fn sample_rate(&self) -> Option<f64> {
        self.metadata().map(|m| m.sample_rate_hz)
    }

    fn center_frequency_hz(&self) -> Option<f64> {
        self.metadata().map(|m| m.center_freq_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rf-monitor-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_reads_interleaved_pairs() {
        let path = temp_path("pairs.cf32");
        let mut file = File::create(&path).unwrap();
        for v in [0.5f32, -0.25, 1.0, 0.0, -1.0, 0.125] {
            file.write_all(&v.to_le_bytes()).unwrap();
        }
        // trailing half sample
        file.write_all(&0.75f32.to_le_bytes()).unwrap();
        drop(file);

        let mut source = Cf32FileSource::open(&path).unwrap();
        assert!(source.metadata().is_none());
        assert!(source.sample_rate().is_none());

        let mut buf = vec![Complex32::default(); 2];
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, vec![Complex32::new(0.5, -0.25), Complex32::new(1.0, 0.0)]);

        assert_eq!(source.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], Complex32::new(-1.0, 0.125));
        assert_eq!(source.read(&mut buf).unwrap(), 0);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_sidecar_metadata() {
        let path = temp_path("sidecar.iq");
        File::create(&path).unwrap();
        RecordingMetadata::new(2_400_000.0, 915e6, 0)
            .save_for(&path)
            .unwrap();

        let source = Cf32FileSource::open(&path).unwrap();
        assert_eq!(source.sample_rate(), Some(2_400_000.0));
        assert_eq!(source.center_frequency_hz(), Some(915e6));
        assert_eq!(source.metadata().unwrap().sample_format, "complex64");

        std::fs::remove_file(RecordingMetadata::sidecar_path(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_sidecar_with_zero_rate_rejected() {
        let path = temp_path("zero-rate.cf32");
        File::create(&path).unwrap();
        RecordingMetadata::new(0.0, 915e6, 0).save_for(&path).unwrap();

        let err = Cf32FileSource::open(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid sample rate"), "{err}");

        std::fs::remove_file(RecordingMetadata::sidecar_path(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = Cf32FileSource::open(&temp_path("missing.cf32")).unwrap_err();
        assert!(err.to_string().contains("IQ file not found"));
    }
}
