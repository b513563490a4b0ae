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

//! Edge-reflected convolution smoothing for display traces.

use serde::{Deserialize, Serialize};

use crate::dsp::WindowFunction;

/// Kernel shape for [`smooth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingWindow {
    Flat,
    #[default]
    Hanning,
    Hamming,
    Blackman,
}

impl SmoothingWindow {
    fn kernel(self, len: usize) -> Vec<f64> {
        let window = match self {
            Self::Flat => WindowFunction::Rectangular,
            Self::Hanning => WindowFunction::Hann,
            Self::Hamming => WindowFunction::Hamming,
            Self::Blackman => WindowFunction::Blackman,
        };
        window.coefficients(len)
    }
}

/// Smooth `data` with a normalised `window_len`-tap kernel.
///
/// Returns the input unchanged when `window_len` is below 3 or longer than
/// the data. Otherwise even lengths are widened by one, and the data is
/// mirrored about its first and last samples so the ends are not pulled
/// toward zero.
#[must_use]
pub fn smooth(data: &[f64], window_len: usize, kind: SmoothingWindow) -> Vec<f64> {
    let n = data.len();
    if window_len < 3 || window_len > n {
        return data.to_vec();
    }
    let window_len = window_len | 1;
    if window_len > n {
        return data.to_vec();
    }

    let kernel = kind.kernel(window_len);
    let total: f64 = kernel.iter().sum();
    if total <= 0.0 {
        return data.to_vec();
    }

    let half = window_len / 2;
    let last = n - 1;
    let reflect = |j: isize| -> f64 {
        let idx = if j < 0 {
            j.unsigned_abs()
        } else if j.unsigned_abs() > last {
            2 * last - j.unsigned_abs()
        } else {
            j.unsigned_abs()
        };
        data[idx]
    };

    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let j = i as isize + k as isize - half as isize;
                    w * reflect(j)
                })
                .sum::<f64>()
                / total
        })
        .collect()
}
