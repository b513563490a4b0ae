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

//! SDR (Software Defined Radio) capture sources.
//!
//! This module provides:
//! - IQ sample ingestion from synthetic, file or hardware sources
//! - A capture thread that cuts the stream into timestamped chunks
//! - An ordered channel delivering those chunks to the monitor

pub mod demo_source;
pub mod file_source;
pub mod iq_processor;
pub mod rtlsdr_source;
pub mod wav_source;

use anyhow::Result;
use signal_tracker::Complex32;

pub use iq_processor::{create_test_iq_file, IqChunk, IqProcessor, ProcessorConfig, SourceType};
pub use rtlsdr_source::{list_devices, GainMode};

/// A blocking producer of complex baseband samples.
///
/// Sources are opened and driven entirely on the capture thread, so they do
/// not need to be `Send`.
pub trait IqSource {
    /// Short human-readable name for log output.
    fn name(&self) -> &'static str;

    /// Fill `buf` from the start and return the number of samples written.
    ///
    /// `Ok(0)` marks the end of the stream.
    fn read(&mut self, buf: &mut [Complex32]) -> Result<usize>;

    /// Native sample rate, when the source knows it better than the configuration.
    fn sample_rate(&self) -> Option<f64> {
        None
    }

    /// Tuned center frequency, when recorded alongside the samples.
    fn center_frequency_hz(&self) -> Option<f64> {
        None
    }
}
