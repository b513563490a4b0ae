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

//! IQ capture thread and chunk delivery.
//!
//! The source is opened and read on a dedicated thread. Its stream is cut into
//! fixed-size chunks stamped with their index and stream-relative time, then
//! handed over a bounded single-producer channel. Chunks therefore reach the
//! consumer exactly in capture order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use signal_tracker::Complex32;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::demo_source::{default_emitters, DemoSource, Emitter};
use super::file_source::{Cf32FileSource, RecordingMetadata};
use super::rtlsdr_source::{self, GainMode, RtlSdrConfig};
use super::wav_source::WavSource;
use super::IqSource;

const INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Source type for IQ data.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceType {
    /// Synthetic noise floor with keyed carriers
    Demo {
        /// RNG seed for the noise floor
        seed: u64,
    },
    /// Read from IQ file (`.wav`, or raw complex float32 otherwise)
    File {
        /// Path to IQ file
        path: PathBuf,
    },
    /// Stream from RTL-SDR hardware
    RtlSdr {
        /// Device index (0-based)
        device_index: u32,
        /// Tuner gain mode
        gain_mode: GainMode,
        /// Frequency correction in PPM
        ppm_correction: i32,
    },
}

/// Configuration for the IQ processor
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub source: SourceType,
    /// Sample rate in Hz, unless the source reports its own
    pub sample_rate: f64,
    /// Center frequency in Hz, unless the source reports its own
    pub center_frequency_hz: f64,
    /// Samples per chunk
    pub chunk_size: usize,
    /// Chunks buffered before the capture thread blocks
    pub channel_buffer_size: usize,
    /// Pace delivery to the sample rate instead of reading as fast as possible
    pub realtime: bool,
    /// Stop after this much stream time
    pub max_duration_s: Option<f64>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            source: SourceType::Demo { seed: 0 },
            sample_rate: 2_000_000.0,
            center_frequency_hz: 0.0,
            chunk_size: 1024,
            channel_buffer_size: 64,
            realtime: true,
            max_duration_s: None,
        }
    }
}

/// One block of consecutive samples.
#[derive(Debug, Clone, PartialEq)]
pub struct IqChunk {
    /// Position in the stream, starting at 0
    pub index: u64,
    /// Stream time of the first sample in seconds
    pub timestamp: f64,
    pub samples: Vec<Complex32>,
}

/// What the capture thread opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub name: &'static str,
    pub sample_rate: f64,
    pub center_frequency_hz: f64,
}

/// Totals reported when the capture thread exits.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CaptureReport {
    pub chunks: u64,
    pub samples: u64,
    /// Stopped by request rather than by the end of the stream
    pub cancelled: bool,
}

/// Handle to a running capture.
///
/// Dropping the handle stops the capture thread without waiting for it.
pub struct IqProcessor {
    chunk_rx: mpsc::Receiver<IqChunk>,
    cancel_token: CancellationToken,
    thread: Option<JoinHandle<Result<CaptureReport>>>,
    info: SourceInfo,
}

impl std::fmt::Debug for IqProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IqProcessor")
            .field("info", &self.info)
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl IqProcessor {
    /// Open the source on a new thread and start capturing.
    ///
    /// Returns once the source has opened, so configuration errors (missing
    /// file, absent device) surface here rather than as an empty stream.
    pub fn spawn(config: ProcessorConfig) -> Result<Self> {
        if config.chunk_size == 0 || config.channel_buffer_size == 0 {
            bail!("chunk_size and channel_buffer_size must be at least 1");
        }

        let (chunk_tx, chunk_rx) = mpsc::channel(config.channel_buffer_size);
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<SourceInfo>>();
        let cancel_token = CancellationToken::new();
        let thread_cancel = cancel_token.clone();

        let thread = std::thread::Builder::new()
            .name("iq-capture".to_string())
            .spawn(move || {
                let mut source = match open_source(&config) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return Ok(CaptureReport::default());
                    }
                };
                let info = SourceInfo {
                    name: source.name(),
                    sample_rate: source.sample_rate().unwrap_or(config.sample_rate),
                    center_frequency_hz: source
                        .center_frequency_hz()
                        .unwrap_or(config.center_frequency_hz),
                };
                let sample_rate = info.sample_rate;
                let _ = init_tx.send(Ok(info));
                capture_loop(source.as_mut(), &config, sample_rate, &chunk_tx, &thread_cancel)
            })
            .context("Failed to spawn capture thread")?;

        let info = match init_rx.recv_timeout(INIT_TIMEOUT) {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(e) => {
                cancel_token.cancel();
                bail!("Capture source did not initialize: {e}");
            }
        };

        log::info!(
            "Capture started: {} source, {:.3} MS/s, center {:.3} MHz",
            info.name,
            info.sample_rate / 1e6,
            info.center_frequency_hz / 1e6
        );

        Ok(Self {
            chunk_rx,
            cancel_token,
            thread: Some(thread),
            info,
        })
    }

    /// Receive the next chunk.
    ///
    /// Returns `None` once the stream has ended or the capture was stopped.
    pub async fn recv(&mut self) -> Option<IqChunk> {
        self.chunk_rx.recv().await
    }

    /// The source actually opened, with its effective rate and tuning.
    #[must_use]
    pub fn source_info(&self) -> &SourceInfo {
        &self.info
    }

    /// Token that stops the capture when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Stop capturing and wait for the capture thread to exit.
    pub fn finish(&mut self) -> Result<CaptureReport> {
        self.cancel_token.cancel();
        self.chunk_rx.close();
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|panic| anyhow!("Capture thread panicked: {panic:?}"))?,
            None => Ok(CaptureReport::default()),
        }
    }
}

impl Drop for IqProcessor {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.chunk_rx.close();
    }
}

fn open_source(config: &ProcessorConfig) -> Result<Box<dyn IqSource>> {
    match &config.source {
        SourceType::Demo { seed } => {
            let source = DemoSource::new(config.sample_rate, default_emitters(), *seed)?;
            log::info!(
                "Running in demo mode (seed {seed}, {} emitters)",
                source.emitters().len()
            );
            for emitter in source.emitters() {
                log::debug!(
                    "Demo emitter at {:+.0} Hz: {:.2} s on every {:.2} s",
                    emitter.offset_hz,
                    emitter.on_s,
                    emitter.period_s
                );
            }
            Ok(Box::new(source))
        }
        SourceType::File { path } => {
            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .to_lowercase();
            match extension.as_str() {
                "wav" => Ok(Box::new(WavSource::open(path)?)),
                "cf32" | "iq" | "cfile" => Ok(Box::new(Cf32FileSource::open(path)?)),
                other => {
                    log::warn!("Unknown file extension '.{other}', assuming raw IQ format");
                    Ok(Box::new(Cf32FileSource::open(path)?))
                }
            }
        }
        SourceType::RtlSdr {
            device_index,
            gain_mode,
            ppm_correction,
        } => {
            let frequency = config.center_frequency_hz;
            if !(0.0..=f64::from(u32::MAX)).contains(&frequency) {
                bail!("Center frequency {frequency} Hz is out of range for RTL-SDR");
            }
            rtlsdr_source::open_source(RtlSdrConfig {
                device_index: *device_index,
                center_frequency: frequency as u64,
                sample_rate: config.sample_rate as u32,
                gain_mode: *gain_mode,
                ppm_correction: *ppm_correction,
            })
        }
    }
}

fn capture_loop(
    source: &mut dyn IqSource,
    config: &ProcessorConfig,
    sample_rate: f64,
    chunk_tx: &mpsc::Sender<IqChunk>,
    cancel_token: &CancellationToken,
) -> Result<CaptureReport> {
    let max_samples = config
        .max_duration_s
        .map(|duration| (duration * sample_rate).round() as u64);
    let started = Instant::now();
    let mut report = CaptureReport::default();

    loop {
        if cancel_token.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let mut wanted = config.chunk_size;
        if let Some(max) = max_samples {
            let left = max.saturating_sub(report.samples);
            if left == 0 {
                break;
            }
            wanted = wanted.min(usize::try_from(left).unwrap_or(usize::MAX));
        }

        let mut samples = vec![Complex32::default(); wanted];
        let mut filled = 0;
        while filled < wanted {
            let n = source.read(&mut samples[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        samples.truncate(filled);

        let chunk = IqChunk {
            index: report.chunks,
            timestamp: report.samples as f64 / sample_rate,
            samples,
        };
        report.chunks += 1;
        report.samples += filled as u64;

        if config.realtime {
            let due = Duration::from_secs_f64(report.samples as f64 / sample_rate);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }

        if chunk_tx.blocking_send(chunk).is_err() {
            // Receiver closed: either finish() or the consumer went away.
            report.cancelled = true;
            break;
        }

        if filled < wanted {
            break;
        }
    }

    log::info!(
        "Capture {}: {} chunks, {} samples ({:.3} s)",
        if report.cancelled { "stopped" } else { "ended" },
        report.chunks,
        report.samples,
        report.samples as f64 / sample_rate
    );
    Ok(report)
}

/// Write a synthetic raw IQ recording plus its JSON sidecar.
///
/// Each tone becomes a carrier keyed `on_s` out of every `period_s` seconds
/// over a -60 dBFS noise floor. Returns the number of samples written.
///
/// # Errors
/// Returns error if file creation fails
pub fn create_test_iq_file(
    path: &Path,
    sample_rate: f64,
    center_frequency_hz: f64,
    duration_secs: f64,
    tones: &[TestTone],
) -> Result<u64> {
    if sample_rate <= 0.0 || duration_secs <= 0.0 {
        bail!("sample rate and duration must be positive");
    }

    let emitters = tones
        .iter()
        .map(|tone| Emitter {
            offset_hz: tone.offset_hz,
            drift_hz_per_s: 0.0,
            amplitude: tone.amplitude,
            period_s: tone.period_s,
            on_s: tone.on_s,
            start_s: tone.start_s,
        })
        .collect();
    let mut source = DemoSource::new(sample_rate, emitters, 1)?;

    let total = (sample_rate * duration_secs) as u64;
    let file = File::create(path)
        .with_context(|| format!("Failed to create IQ file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut block = vec![Complex32::default(); 8192];
    let mut written = 0u64;

    while written < total {
        let n = usize::try_from(total - written).map_or(block.len(), |left| left.min(block.len()));
        source.read(&mut block[..n])?;
        for sample in &block[..n] {
            writer
                .write_all(&sample.re.to_le_bytes())
                .context("Failed to write I sample")?;
            writer
                .write_all(&sample.im.to_le_bytes())
                .context("Failed to write Q sample")?;
        }
        written += n as u64;
    }
    writer.flush().context("Failed to flush IQ file")?;

    RecordingMetadata::new(sample_rate, center_frequency_hz, written).save_for(path)?;
    Ok(written)
}

/// A keyed carrier for [`create_test_iq_file`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestTone {
    pub offset_hz: f64,
    pub amplitude: f64,
    pub on_s: f64,
    pub period_s: f64,
    pub start_s: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rf-monitor-{}-{name}", std::process::id()))
    }

    fn demo_config() -> ProcessorConfig {
        ProcessorConfig {
            source: SourceType::Demo { seed: 3 },
            sample_rate: 100_000.0,
            chunk_size: 1000,
            channel_buffer_size: 2,
            realtime: false,
            max_duration_s: Some(0.05),
            ..ProcessorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let mut processor = IqProcessor::spawn(demo_config()).unwrap();
        assert_eq!(processor.source_info().name, "demo");

        let mut chunks = Vec::new();
        while let Some(chunk) = processor.recv().await {
            chunks.push(chunk);
        }

        assert_eq!(chunks.len(), 5);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as u64);
            assert_eq!(chunk.samples.len(), 1000);
            assert!((chunk.timestamp - i as f64 * 0.01).abs() < 1e-12);
        }

        let report = processor.finish().unwrap();
        assert_eq!(report.chunks, 5);
        assert_eq!(report.samples, 5000);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_file_tail_and_sidecar_rate() {
        let path = temp_path("tail.cf32");
        let tone = TestTone {
            offset_hz: 10_000.0,
            amplitude: 0.1,
            on_s: 0.01,
            period_s: 0.02,
            start_s: 0.0,
        };
        let written = create_test_iq_file(&path, 50_000.0, 915e6, 0.05, &[tone]).unwrap();
        assert_eq!(written, 2500);

        let mut processor = IqProcessor::spawn(ProcessorConfig {
            source: SourceType::File { path: path.clone() },
            sample_rate: 1.0,
            chunk_size: 1000,
            realtime: false,
            ..ProcessorConfig::default()
        })
        .unwrap();
        assert_eq!(processor.source_info().sample_rate, 50_000.0);
        assert_eq!(processor.source_info().center_frequency_hz, 915e6);

        let mut lengths = Vec::new();
        let mut timestamps = Vec::new();
        while let Some(chunk) = processor.recv().await {
            lengths.push(chunk.samples.len());
            timestamps.push(chunk.timestamp);
        }
        assert_eq!(lengths, vec![1000, 1000, 500]);
        assert!((timestamps[2] - 0.04).abs() < 1e-12);
        processor.finish().unwrap();

        std::fs::remove_file(RecordingMetadata::sidecar_path(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_fails_at_spawn() {
        let result = IqProcessor::spawn(ProcessorConfig {
            source: SourceType::File {
                path: temp_path("does-not-exist.cf32"),
            },
            ..ProcessorConfig::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_finish_stops_endless_source() {
        let mut processor = IqProcessor::spawn(ProcessorConfig {
            max_duration_s: None,
            ..demo_config()
        })
        .unwrap();

        assert!(processor.recv().await.is_some());
        assert!(processor.recv().await.is_some());

        let report = processor.finish().unwrap();
        assert!(report.cancelled);
        assert!(report.chunks >= 2);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = IqProcessor::spawn(ProcessorConfig {
            chunk_size: 0,
            ..ProcessorConfig::default()
        });
        assert!(result.is_err());
    }
}
