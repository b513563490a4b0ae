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

mod cli;
mod config;
mod monitor;
mod output;
mod sdr;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use crate::cli::{Cli, Command, GenTestFileArgs, RunArgs};
use crate::config::{AppConfig, OutputConfig};
use crate::monitor::Monitor;
use crate::output::{CsvSink, EventSink, JsonLinesSink, Session};
use crate::sdr::iq_processor::TestTone;
use crate::sdr::{create_test_iq_file, list_devices, IqProcessor, ProcessorConfig, SourceType};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .parse_default_env()
        .format_timestamp_millis()
        .init();

    match cli.command {
        Command::Run(args) => run(&args).await,
        Command::GenTestFile(args) => gen_test_file(&args),
        Command::Devices => {
            show_devices();
            Ok(())
        }
        Command::Config { save } => show_config(save),
    }
}

fn load_config() -> AppConfig {
    AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load configuration ({e}), using defaults");
        AppConfig::default()
    })
}

fn open_sinks(output: &OutputConfig) -> Result<Vec<Box<dyn EventSink>>> {
    let mut sinks: Vec<Box<dyn EventSink>> = Vec::new();
    if let Some(path) = &output.jsonl_path {
        sinks.push(Box::new(JsonLinesSink::open(path)?));
    }
    if let Some(path) = &output.csv_path {
        sinks.push(Box::new(CsvSink::open(path)?));
    }
    if sinks.is_empty() {
        info!("No event log configured; closed events are only logged");
    }
    Ok(sinks)
}

async fn run(args: &RunArgs) -> Result<()> {
    let mut config = load_config();
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let source = args.source(&config);
    let realtime = args.realtime || matches!(source, SourceType::Demo { .. });
    let mut processor = IqProcessor::spawn(ProcessorConfig {
        source,
        sample_rate: config.capture.sample_rate,
        center_frequency_hz: config.capture.center_frequency_hz,
        chunk_size: config.capture.chunk_size,
        channel_buffer_size: config.capture.channel_buffer_size,
        realtime,
        max_duration_s: args.duration,
    })?;

    let session = Session::start();
    info!("Session {} started", session.id);
    let mut monitor = Monitor::new(&config, open_sinks(&config.output)?, session)?;
    let source_info = processor.source_info().clone();
    monitor.retune(source_info.sample_rate, source_info.center_frequency_hz)?;

    let cancel_token = processor.cancel_token();
    let ctrl_c = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping capture");
            ctrl_c.cancel();
        }
    });

    let summary = monitor.run(&mut processor, &cancel_token).await;
    let report = processor.finish()?;
    let summary = summary?;

    let spectrum = monitor.last_spectrum();
    info!(
        "Last spectrum after {} updates: floor {:.1} dB, peak {:.1} dB, {} peaks (detector threshold {:.1} dB)",
        monitor.spectrum().update_count(),
        spectrum.noise_floor_db,
        spectrum.peak_power_db,
        spectrum.peaks.len(),
        monitor.pipeline().threshold_db()
    );
    info!(
        "Session {} finished: {} chunks ({} samples), {} events closed, {} written",
        summary.session_id, summary.chunks, report.samples, summary.events_closed, summary.events_written
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to encode summary")?
    );
    Ok(())
}

fn gen_test_file(args: &GenTestFileArgs) -> Result<()> {
    let count = args.tones.len().max(1) as f64;
    let tones: Vec<TestTone> = args
        .tones
        .iter()
        .enumerate()
        .map(|(i, &offset_hz)| TestTone {
            offset_hz,
            amplitude: args.amplitude,
            on_s: args.on,
            period_s: args.period,
            // leave the detector half a second of clean floor, then stagger
            start_s: 0.5 + i as f64 * args.period / count,
        })
        .collect();

    let written = create_test_iq_file(
        &args.output,
        args.sample_rate,
        args.center_freq,
        args.duration,
        &tones,
    )?;
    info!(
        "Wrote {} samples ({:.2} s, {} tones) to {}",
        written,
        written as f64 / args.sample_rate,
        tones.len(),
        args.output.display()
    );
    Ok(())
}

fn show_devices() {
    let devices = list_devices();
    if devices.is_empty() {
        println!("No RTL-SDR devices found");
    }
    for device in devices {
        println!("{}: {} (serial {})", device.index, device.name, device.serial);
    }
}

fn show_config(save: bool) -> Result<()> {
    let path = AppConfig::get_config_path().context("Failed to locate configuration")?;
    let config = load_config();
    config.validate().context("Invalid configuration")?;

    println!("# {}", path.display());
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("Failed to encode configuration")?
    );

    if save {
        config.save().context("Failed to save configuration")?;
        info!("Configuration saved to {}", path.display());
    }
    Ok(())
}
