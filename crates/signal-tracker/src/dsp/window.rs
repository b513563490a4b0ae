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

//! FFT window functions.
//!
//! Coefficients follow the symmetric definitions used by most spectrum tools
//! (denominator `N - 1`), so a window of length `N` starts and ends on the
//! same value. Each window also carries an amplitude gain-compensation factor
//! that restores the coherent gain lost to tapering.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SignalError;

/// Window applied to a frame before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    /// No tapering.
    Rectangular,
    /// Hann window (default).
    #[default]
    #[serde(alias = "hanning")]
    Hann,
    /// Hamming window.
    Hamming,
    /// Blackman window.
    Blackman,
    /// Triangular (Bartlett) window.
    Bartlett,
    /// Kaiser window with beta = 16.
    #[serde(rename = "kaiser_16", alias = "kaiser16")]
    Kaiser16,
}

const KAISER_BETA: f64 = 16.0;

impl WindowFunction {
    /// All supported windows, in display order.
    pub const ALL: [Self; 6] = [
        Self::Rectangular,
        Self::Hann,
        Self::Hamming,
        Self::Blackman,
        Self::Bartlett,
        Self::Kaiser16,
    ];

    /// Canonical configuration name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Rectangular => "rectangular",
            Self::Hann => "hann",
            Self::Hamming => "hamming",
            Self::Blackman => "blackman",
            Self::Bartlett => "bartlett",
            Self::Kaiser16 => "kaiser_16",
        }
    }

    /// Amplitude gain compensation (inverse of the window's coherent gain).
    #[must_use]
    pub fn gain_compensation(self) -> f64 {
        match self {
            Self::Rectangular => 1.0,
            Self::Hann => 1.0 / 0.68,
            Self::Hamming => 1.0 / 0.67,
            Self::Blackman | Self::Bartlett => 1.0 / 0.55,
            Self::Kaiser16 => 1.0 / 0.48,
        }
    }

    /// Generate `size` window coefficients.
    #[must_use]
    pub fn coefficients(self, size: usize) -> Vec<f64> {
        match size {
            0 => return Vec::new(),
            1 => return vec![1.0],
            _ => {}
        }

        let m = (size - 1) as f64;
        (0..size)
            .map(|i| {
                let x = i as f64;
                match self {
                    Self::Rectangular => 1.0,
                    Self::Hann => 0.5 - 0.5 * (2.0 * PI * x / m).cos(),
                    Self::Hamming => 0.54 - 0.46 * (2.0 * PI * x / m).cos(),
                    Self::Blackman => {
                        0.42 - 0.5 * (2.0 * PI * x / m).cos() + 0.08 * (4.0 * PI * x / m).cos()
                    }
                    Self::Bartlett => 1.0 - (2.0 * x / m - 1.0).abs(),
                    Self::Kaiser16 => {
                        let r = 2.0 * x / m - 1.0;
                        bessel_i0(KAISER_BETA * (1.0 - r * r).max(0.0).sqrt())
                            / bessel_i0(KAISER_BETA)
                    }
                }
            })
            .collect()
    }

    /// Coefficients scaled by [`gain_compensation`](Self::gain_compensation).
    #[must_use]
    pub fn compensated_coefficients(self, size: usize) -> Vec<f64> {
        let gain = self.gain_compensation();
        self.coefficients(size).into_iter().map(|w| w * gain).collect()
    }
}

/// Zeroth-order modified Bessel function of the first kind (power series).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    let mut k = 1.0;
    loop {
        term *= (half / k) * (half / k);
        sum += term;
        if term < sum * 1e-16 {
            return sum;
        }
        k += 1.0;
    }
}

impl fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowFunction {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rectangular" | "rect" | "boxcar" | "none" => Ok(Self::Rectangular),
            "hann" | "hanning" => Ok(Self::Hann),
            "hamming" => Ok(Self::Hamming),
            "blackman" => Ok(Self::Blackman),
            "bartlett" | "triangular" => Ok(Self::Bartlett),
            "kaiser_16" | "kaiser16" | "kaiser" => Ok(Self::Kaiser16),
            other => Err(SignalError::config(format!("unknown window function '{other}'"))),
        }
    }
}
