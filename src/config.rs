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

//! Application configuration management.
//!
//! Settings are persisted as TOML through `confy`. The capture section is the
//! single source of truth for sample rate and tuning; it is copied into the
//! segmenter and spectrum sections whenever those configs are built, so the
//! two analysis paths can never disagree about the frequency axis.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use signal_tracker::{PipelineConfig, SignalError, SpectrumConfig};

const APP_NAME: &str = "rf-monitor";
const CONFIG_NAME: &str = "config";

/// Capture settings shared by every source type.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Tuned center frequency in Hz (0 keeps baseband-relative frequencies)
    #[serde(default = "default_center_frequency")]
    pub center_frequency_hz: f64,

    /// Samples per chunk handed to the pipeline
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks buffered between the capture thread and the monitor
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,

    /// RTL-SDR device index
    #[serde(default)]
    pub device_index: u32,

    /// Manual tuner gain in tenths of dB; automatic gain when unset
    #[serde(default)]
    pub gain_tenths_db: Option<i32>,

    /// Frequency correction in PPM
    #[serde(default)]
    pub ppm_correction: i32,
}

/// Behaviour of the monitor loop.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Spectra averaged into the anomaly baseline at startup (0 disables)
    #[serde(default = "default_baseline_chunks")]
    pub baseline_chunks: u32,

    /// Chunks between periodic statistics log lines (0 disables)
    #[serde(default = "default_stats_interval_chunks")]
    pub stats_interval_chunks: u64,
}

/// Where closed events are written.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct OutputConfig {
    /// JSON Lines event log
    #[serde(default)]
    pub jsonl_path: Option<PathBuf>,

    /// CSV event log
    #[serde(default)]
    pub csv_path: Option<PathBuf>,
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    #[serde(default)]
    pub capture: CaptureConfig,

    /// Detector, segmenter and event builder settings
    #[serde(default = "default_pipeline")]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub spectrum: SpectrumConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_sample_rate() -> f64 {
    2_000_000.0
}

fn default_center_frequency() -> f64 {
    0.0
}

fn default_chunk_size() -> usize {
    1024
}

fn default_channel_buffer_size() -> usize {
    64
}

/// Live receivers see a Gaussian noise floor, whose per-bin spread breaks a
/// 6 dB margin over 3 smoothed bins into dozens of false segments per chunk.
fn default_pipeline() -> PipelineConfig {
    let mut pipeline = PipelineConfig {
        label: "rx0".to_string(),
        ..PipelineConfig::default()
    };
    pipeline.segmenter.bw_threshold_db = 10.0;
    pipeline.segmenter.psd_smooth_bins = 9;
    pipeline
}

fn default_baseline_chunks() -> u32 {
    20
}

fn default_stats_interval_chunks() -> u64 {
    2000
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            center_frequency_hz: default_center_frequency(),
            chunk_size: default_chunk_size(),
            channel_buffer_size: default_channel_buffer_size(),
            device_index: 0,
            gain_tenths_db: None,
            ppm_correction: 0,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            baseline_chunks: default_baseline_chunks(),
            stats_interval_chunks: default_stats_interval_chunks(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            capture: CaptureConfig::default(),
            pipeline: default_pipeline(),
            spectrum: SpectrumConfig::default(),
            monitor: MonitorConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults for missing keys
    pub fn load() -> Result<Self, confy::ConfyError> {
        let config: AppConfig = confy::load(APP_NAME, CONFIG_NAME)?;
        if config.config_version < default_config_version() {
            log::warn!(
                "Configuration version {} is older than {}, missing settings use defaults",
                config.config_version,
                default_config_version()
            );
        }
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Pipeline settings with the capture rate and tuning applied.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut pipeline = self.pipeline.clone();
        pipeline.segmenter.sample_rate = self.capture.sample_rate;
        pipeline.segmenter.center_frequency_hz = self.capture.center_frequency_hz;
        pipeline
    }

    /// Spectrum settings with the capture rate and tuning applied.
    #[must_use]
    pub fn spectrum_config(&self) -> SpectrumConfig {
        let mut spectrum = self.spectrum.clone();
        spectrum.sample_rate = self.capture.sample_rate;
        spectrum.center_frequency_hz = self.capture.center_frequency_hz;
        spectrum
    }

    /// Reject settings that would fail at the first chunk instead of at startup.
    pub fn validate(&self) -> Result<(), SignalError> {
        if self.capture.chunk_size == 0 {
            return Err(SignalError::Configuration(
                "capture.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.capture.channel_buffer_size == 0 {
            return Err(SignalError::Configuration(
                "capture.channel_buffer_size must be at least 1".to_string(),
            ));
        }
        self.pipeline_config().validate()?;
        self.spectrum_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.config_version, 1);
        assert_eq!(config.capture.chunk_size, 1024);
        assert!(config.output.jsonl_path.is_none());
    }

    #[test]
    fn test_capture_settings_flow_into_components() {
        let mut config = AppConfig::default();
        config.capture.sample_rate = 2_400_000.0;
        config.capture.center_frequency_hz = 433_920_000.0;

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.segmenter.sample_rate, 2_400_000.0);
        assert_eq!(pipeline.segmenter.center_frequency_hz, 433_920_000.0);

        let spectrum = config.spectrum_config();
        assert_eq!(spectrum.sample_rate, 2_400_000.0);
        assert_eq!(spectrum.center_frequency_hz, 433_920_000.0);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.detector.snr_enter_db = 4.0;
        config.pipeline.detector.snr_exit_db = 8.0;
        assert!(matches!(
            config.validate(),
            Err(SignalError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut config = AppConfig::default();
        config.capture.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.channel_buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.sample_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"capture": {"sample_rate": 1000000.0}}"#).unwrap();
        assert_eq!(config.capture.sample_rate, 1_000_000.0);
        assert_eq!(config.capture.chunk_size, 1024);
        assert_eq!(config.monitor.baseline_chunks, 20);
        assert_eq!(config.pipeline, default_pipeline());
        assert_eq!(config.pipeline.segmenter.psd_smooth_bins, 9);
    }
}
