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

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::AppConfig;
use crate::sdr::{GainMode, SourceType};

/// rf-monitor: detect, segment and track signals in an IQ stream.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level: error, warn, info, debug, trace. RUST_LOG overrides it.
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture from a source and log closed signal events
    Run(RunArgs),
    /// Write a synthetic cf32 recording with keyed tones over a noise floor
    GenTestFile(GenTestFileArgs),
    /// List attached RTL-SDR devices
    Devices,
    /// Print the configuration file path and its effective contents
    Config {
        /// Write the effective configuration back to disk
        #[arg(long, default_value_t = false)]
        save: bool,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// IQ recording: .wav (16-bit stereo) or raw complex float32 (.cf32, .iq, .cfile)
    #[arg(long, conflicts_with = "rtlsdr")]
    pub file: Option<PathBuf>,

    /// Capture from RTL-SDR hardware. Requires --features hardware.
    #[arg(long, default_value_t = false)]
    pub rtlsdr: bool,

    /// Seed for the demo source, used when neither --file nor --rtlsdr is given
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<f64>,

    /// Center frequency in Hz
    #[arg(long)]
    pub center_freq: Option<f64>,

    /// RTL-SDR device index
    #[arg(long)]
    pub device: Option<u32>,

    /// Manual tuner gain in tenths of dB (automatic when omitted)
    #[arg(long)]
    pub gain: Option<i32>,

    /// Frequency correction in PPM
    #[arg(long)]
    pub ppm: Option<i32>,

    /// SNR in dB to enter the detected state
    #[arg(long)]
    pub snr_enter: Option<f64>,

    /// SNR in dB to leave the detected state
    #[arg(long)]
    pub snr_exit: Option<f64>,

    /// Stop after this many seconds of stream time
    #[arg(long)]
    pub duration: Option<f64>,

    /// Pace file playback to the sample rate
    #[arg(long, default_value_t = false)]
    pub realtime: bool,

    /// Append closed events to this JSON Lines file
    #[arg(long)]
    pub jsonl: Option<PathBuf>,

    /// Append closed events to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Stream name used in logs and event records
    #[arg(long)]
    pub label: Option<String>,
}

impl RunArgs {
    /// Overlay command-line values on the persisted configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(rate) = self.sample_rate {
            config.capture.sample_rate = rate;
        }
        if let Some(freq) = self.center_freq {
            config.capture.center_frequency_hz = freq;
        }
        if let Some(device) = self.device {
            config.capture.device_index = device;
        }
        if self.gain.is_some() {
            config.capture.gain_tenths_db = self.gain;
        }
        if let Some(ppm) = self.ppm {
            config.capture.ppm_correction = ppm;
        }
        if let Some(enter) = self.snr_enter {
            config.pipeline.detector.snr_enter_db = enter;
        }
        if let Some(exit) = self.snr_exit {
            config.pipeline.detector.snr_exit_db = exit;
        }
        if self.jsonl.is_some() {
            config.output.jsonl_path.clone_from(&self.jsonl);
        }
        if self.csv.is_some() {
            config.output.csv_path.clone_from(&self.csv);
        }
        if let Some(label) = &self.label {
            config.pipeline.label.clone_from(label);
        }
    }

    #[must_use]
    pub fn source(&self, config: &AppConfig) -> SourceType {
        if let Some(path) = &self.file {
            SourceType::File { path: path.clone() }
        } else if self.rtlsdr {
            SourceType::RtlSdr {
                device_index: config.capture.device_index,
                gain_mode: GainMode::from_tenths_db(config.capture.gain_tenths_db),
                ppm_correction: config.capture.ppm_correction,
            }
        } else {
            SourceType::Demo { seed: self.seed }
        }
    }
}

#[derive(Args, Debug)]
pub struct GenTestFileArgs {
    /// Output path; a .json sidecar with the capture parameters is written next to it
    #[arg(short, long, default_value = "test_signal.cf32")]
    pub output: PathBuf,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 2_000_000.0)]
    pub sample_rate: f64,

    /// Center frequency recorded in the sidecar, in Hz
    #[arg(long, default_value_t = 0.0)]
    pub center_freq: f64,

    /// Length of the recording in seconds
    #[arg(long, default_value_t = 5.0)]
    pub duration: f64,

    /// Tone offset from the center in Hz; repeat for several tones
    #[arg(long = "tone", default_values_t = [250_000.0], allow_negative_numbers = true)]
    pub tones: Vec<f64>,

    /// Tone amplitude (1.0 = full scale)
    #[arg(long, default_value_t = 0.05)]
    pub amplitude: f64,

    /// Seconds each tone is keyed per period
    #[arg(long, default_value_t = 0.2)]
    pub on: f64,

    /// Keying period in seconds
    #[arg(long, default_value_t = 1.0)]
    pub period: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::parse_from([
            "rf-monitor",
            "run",
            "--sample-rate",
            "2400000",
            "--center-freq",
            "433920000",
            "--snr-enter",
            "12",
            "--snr-exit",
            "6",
            "--csv",
            "events.csv",
            "--label",
            "ism",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(config.capture.sample_rate, 2_400_000.0);
        assert_eq!(config.capture.center_frequency_hz, 433_920_000.0);
        assert_eq!(config.pipeline.detector.snr_enter_db, 12.0);
        assert_eq!(config.pipeline.detector.snr_exit_db, 6.0);
        assert_eq!(config.output.csv_path, Some(PathBuf::from("events.csv")));
        assert!(config.output.jsonl_path.is_none());
        assert_eq!(config.pipeline.label, "ism");
        assert_eq!(args.source(&config), SourceType::Demo { seed: 0 });
    }

    #[test]
    fn test_source_selection() {
        let cli = Cli::parse_from(["rf-monitor", "run", "--file", "capture.wav"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            args.source(&AppConfig::default()),
            SourceType::File {
                path: PathBuf::from("capture.wav")
            }
        );

        let cli = Cli::parse_from(["rf-monitor", "run", "--rtlsdr", "--gain", "496"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(
            args.source(&config),
            SourceType::RtlSdr {
                device_index: 0,
                gain_mode: GainMode::Manual(496),
                ppm_correction: 0,
            }
        );

        assert!(Cli::try_parse_from(["rf-monitor", "run", "--file", "a.iq", "--rtlsdr"]).is_err());
    }

    #[test]
    fn test_gen_test_file_tones() {
        let cli = Cli::parse_from([
            "rf-monitor",
            "gen-test-file",
            "--tone",
            "100000",
            "--tone",
            "-300000",
        ]);
        let Command::GenTestFile(args) = cli.command else {
            panic!("expected gen-test-file");
        };
        assert_eq!(args.tones, vec![100_000.0, -300_000.0]);
        assert_eq!(args.output, PathBuf::from("test_signal.cf32"));
    }
}
