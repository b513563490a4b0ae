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

//! RTL-SDR hardware interface.
//!
//! Device enumeration, configuration and a blocking sample source.
//! Enable the `hardware` feature to compile with RTL-SDR support.

use anyhow::Result;

/// Information about an RTL-SDR device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Device index (0-based)
    pub index: u32,
    /// Device name (manufacturer + product)
    pub name: String,
    /// Device serial number
    pub serial: String,
}

/// Gain mode for RTL-SDR tuner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainMode {
    /// Automatic gain control
    Auto,
    /// Manual gain (value in tenths of dB, e.g. 496 = 49.6 dB)
    Manual(i32),
}

impl GainMode {
    #[must_use]
    pub fn from_tenths_db(gain: Option<i32>) -> Self {
        gain.map_or(Self::Auto, Self::Manual)
    }
}

impl std::fmt::Display for GainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Manual(tenths) => write!(f, "{:.1} dB", f64::from(*tenths) / 10.0),
        }
    }
}

/// RTL-SDR source configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RtlSdrConfig {
    /// Device index to open
    pub device_index: u32,
    /// Center frequency in Hz
    pub center_frequency: u64,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Tuner gain mode
    pub gain_mode: GainMode,
    /// Frequency correction in PPM
    pub ppm_correction: i32,
}

impl Default for RtlSdrConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            center_frequency: 433_920_000,
            sample_rate: 2_000_000,
            gain_mode: GainMode::Auto,
            ppm_correction: 0,
        }
    }
}

/// Convert interleaved unsigned 8-bit I/Q into normalized complex samples.
///
/// Values are 0-255 centered at 127.5.
#[cfg(any(feature = "hardware", test))]
pub fn convert_u8_iq(raw: &[u8], out: &mut Vec<signal_tracker::Complex32>) {
    out.extend(raw.chunks_exact(2).map(|pair| {
        signal_tracker::Complex32::new(
            (f32::from(pair[0]) - 127.5) / 127.5,
            (f32::from(pair[1]) - 127.5) / 127.5,
        )
    }));
}

/// Enumerate available RTL-SDR devices.
///
/// Returns a list of device information for all connected RTL-SDR dongles.
#[cfg(feature = "hardware")]
#[must_use]
pub fn list_devices() -> Vec<DeviceInfo> {
    let count = rtlsdr::get_device_count();
    let mut devices = Vec::new();

    for i in 0..count {
        let name = rtlsdr::get_device_name(i);
        if let Ok(usb_strings) = rtlsdr::get_device_usb_strings(i) {
            devices.push(DeviceInfo {
                index: i as u32,
                name,
                serial: usb_strings.serial,
            });
        }
    }

    devices
}

/// Enumerate available RTL-SDR devices (stub when hardware feature is disabled).
#[cfg(not(feature = "hardware"))]
#[must_use]
pub fn list_devices() -> Vec<DeviceInfo> {
    log::warn!("RTL-SDR hardware support not compiled (enable 'hardware' feature)");
    Vec::new()
}

#[cfg(feature = "hardware")]
pub use hardware::RtlSdrSource;

#[cfg(feature = "hardware")]
mod hardware {
    use anyhow::{anyhow, Result};
    use signal_tracker::Complex32;

    use super::{convert_u8_iq, GainMode, RtlSdrConfig};
    use crate::sdr::IqSource;

    /// RTL-SDR requires multiples of 512 bytes (USB packet size); 256KB = 512 packets.
    const READ_SIZE: usize = 262_144;

    /// Blocking RTL-SDR reader. Must stay on the thread that opened it.
    pub struct RtlSdrSource {
        device: rtlsdr::RTLSDRDevice,
        config: RtlSdrConfig,
        pending: Vec<Complex32>,
        position: usize,
        read_count: u64,
    }

    impl std::fmt::Debug for RtlSdrSource {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RtlSdrSource")
                .field("config", &self.config)
                .field("read_count", &self.read_count)
                .finish_non_exhaustive()
        }
    }

    impl RtlSdrSource {
        /// Open and configure a device.
        ///
        /// # Errors
        /// Returns error if device cannot be opened or configured
        pub fn open(config: RtlSdrConfig) -> Result<Self> {
            log::info!("Opening RTL-SDR device {}...", config.device_index);

            let index = i32::try_from(config.device_index)
                .map_err(|e| anyhow!("Invalid device index {}: {e}", config.device_index))?;
            let mut device = rtlsdr::open(index).map_err(|e| {
                anyhow!("Failed to open RTL-SDR device {}: {}", config.device_index, e)
            })?;

            let center_freq = u32::try_from(config.center_frequency).map_err(|e| {
                anyhow!(
                    "Center frequency {} Hz is too large for RTL-SDR: {e}",
                    config.center_frequency
                )
            })?;

            device
                .set_center_freq(center_freq)
                .map_err(|e| anyhow!("Failed to set center frequency: {}", e))?;
            device
                .set_sample_rate(config.sample_rate)
                .map_err(|e| anyhow!("Failed to set sample rate: {}", e))?;

            match config.gain_mode {
                GainMode::Auto => {
                    // false = automatic
                    device
                        .set_tuner_gain_mode(false)
                        .map_err(|e| anyhow!("Failed to set gain mode: {}", e))?;
                }
                GainMode::Manual(gain_tenths_db) => {
                    device
                        .set_tuner_gain_mode(true)
                        .map_err(|e| anyhow!("Failed to set gain mode: {}", e))?;
                    device
                        .set_tuner_gain(gain_tenths_db)
                        .map_err(|e| anyhow!("Failed to set gain: {}", e))?;
                }
            }

            if config.ppm_correction != 0 {
                device
                    .set_freq_correction(config.ppm_correction)
                    .map_err(|e| anyhow!("Failed to set PPM correction: {}", e))?;
            }

            device
                .reset_buffer()
                .map_err(|e| anyhow!("Failed to reset buffer: {}", e))?;

            log::info!(
                "RTL-SDR configured: {:.3} MHz, {:.3} MS/s, gain {}, {} ppm",
                config.center_frequency as f64 / 1e6,
                f64::from(config.sample_rate) / 1e6,
                config.gain_mode,
                config.ppm_correction
            );

            Ok(Self {
                device,
                config,
                pending: Vec::with_capacity(READ_SIZE / 2),
                position: 0,
                read_count: 0,
            })
        }
    }

    impl IqSource for RtlSdrSource {
        fn name(&self) -> &'static str {
            "rtl-sdr"
        }

        fn read(&mut self, buf: &mut [Complex32]) -> Result<usize> {
            if self.position >= self.pending.len() {
                let raw = self.device.read_sync(READ_SIZE).map_err(|e| {
                    anyhow!("RTL-SDR read error after {} reads: {}", self.read_count, e)
                })?;
                self.read_count += 1;
                if self.read_count % 100 == 0 {
                    log::debug!("RTL-SDR read #{}: {} bytes", self.read_count, raw.len());
                }
                self.pending.clear();
                self.position = 0;
                convert_u8_iq(&raw, &mut self.pending);
            }

            let n = buf.len().min(self.pending.len() - self.position);
            buf[..n].copy_from_slice(&self.pending[self.position..self.position + n]);
            self.position += n;
            Ok(n)
        }

        fn sample_rate(&self) -> Option<f64> {
            Some(f64::from(self.config.sample_rate))
        }

        fn center_frequency_hz(&self) -> Option<f64> {
            Some(self.config.center_frequency as f64)
        }
    }

    impl Drop for RtlSdrSource {
        fn drop(&mut self) {
            log::info!(
                "Closing RTL-SDR device {} after {} reads",
                self.config.device_index,
                self.read_count
            );
        }
    }
}

/// Open an RTL-SDR source (stub when hardware feature is disabled).
#[cfg(not(feature = "hardware"))]
pub fn open_source(_config: RtlSdrConfig) -> Result<Box<dyn crate::sdr::IqSource>> {
    anyhow::bail!("RTL-SDR hardware support not compiled (enable 'hardware' feature)")
}

/// Open an RTL-SDR source.
#[cfg(feature = "hardware")]
pub fn open_source(config: RtlSdrConfig) -> Result<Box<dyn crate::sdr::IqSource>> {
    Ok(Box::new(RtlSdrSource::open(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_tracker::Complex32;

    #[test]
    fn test_u8_conversion() {
        let mut out = Vec::new();
        convert_u8_iq(&[0, 255, 127, 128, 9], &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Complex32::new(-1.0, 1.0));
        assert!((out[1].re + 0.5 / 127.5).abs() < 1e-6);
        assert!((out[1].im - 0.5 / 127.5).abs() < 1e-6);
    }

    #[test]
    fn test_gain_mode() {
        assert_eq!(GainMode::from_tenths_db(None), GainMode::Auto);
        assert_eq!(GainMode::from_tenths_db(Some(496)), GainMode::Manual(496));
        assert_eq!(GainMode::Manual(496).to_string(), "49.6 dB");
        assert_eq!(GainMode::Auto.to_string(), "auto");
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn test_stub_without_hardware() {
        assert!(list_devices().is_empty());
        let Err(err) = open_source(RtlSdrConfig::default()) else {
            panic!("opened an RTL-SDR without hardware support");
        };
        assert!(err.to_string().contains("hardware"));
    }
}
