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

//! Error types shared by all pipeline components.

use thiserror::Error;

/// Errors produced by the signal tracking components.
///
/// Numerical edge cases (zero power, empty slices) are never reported here;
/// they are absorbed by epsilon guards and "no detection" results.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    /// An operation was called on an object in the wrong lifecycle state,
    /// e.g. extracting features from an event that is still active.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Input carried nothing to measure (an empty sample chunk).
    #[error("degenerate input: {0}")]
    DegenerateInput(&'static str),

    /// A configuration value would make a component non-functional.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SignalError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
