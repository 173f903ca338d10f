// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Ping finder settings sent to the drone before a tracking run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PingFinderError {
    #[error("At least one target frequency is required")]
    NoTargetFrequencies,
    #[error("Sampling rate must be > 0")]
    InvalidSamplingRate,
    #[error("Target frequency {0} Hz is outside the sampled band")]
    TargetOutOfBand(u32),
    #[error("Gain must be a finite, non-negative number")]
    InvalidGain,
    #[error("Ping length multipliers must be positive with min <= max")]
    InvalidLengthMultipliers,
    #[error("Ping width must be > 0 ms")]
    InvalidPingWidth,
}

/// SDR and detector parameters for the ping finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingFinderConfig {
    /// Receiver gain in dB
    pub gain: f64,
    /// Samples per second
    pub sampling_rate: u32,
    /// Tuned frequency in Hz
    pub center_frequency: u32,
    /// Let the drone inject synthetic pings
    pub enable_test_data: bool,
    pub ping_width_ms: u32,
    pub ping_min_snr: u32,
    pub ping_max_len_mult: f64,
    pub ping_min_len_mult: f64,
    /// Transmitter frequencies to look for, in Hz
    pub target_frequencies: Vec<u32>,
}

impl Default for PingFinderConfig {
    fn default() -> Self {
        Self {
            gain: 56.0,
            sampling_rate: 2_500_000,
            center_frequency: 173_500_000,
            enable_test_data: false,
            ping_width_ms: 25,
            ping_min_snr: 25,
            ping_max_len_mult: 1.5,
            ping_min_len_mult: 0.5,
            target_frequencies: vec![173_043_000],
        }
    }
}

impl PingFinderConfig {
    /// Every target has to fall within `center_frequency ± sampling_rate / 2`.
    pub fn validate(&self) -> Result<(), PingFinderError> {
        if self.target_frequencies.is_empty() {
            return Err(PingFinderError::NoTargetFrequencies);
        }
        if self.sampling_rate == 0 {
            return Err(PingFinderError::InvalidSamplingRate);
        }
        if !self.gain.is_finite() || self.gain < 0.0 {
            return Err(PingFinderError::InvalidGain);
        }
        if self.ping_width_ms == 0 {
            return Err(PingFinderError::InvalidPingWidth);
        }
        let (min, max) = (self.ping_min_len_mult, self.ping_max_len_mult);
        if !(min.is_finite() && max.is_finite() && min > 0.0 && min <= max) {
            return Err(PingFinderError::InvalidLengthMultipliers);
        }

        let half_band = u64::from(self.sampling_rate / 2);
        let center = u64::from(self.center_frequency);
        let band = center.saturating_sub(half_band)..=center + half_band;
        if let Some(&out) = self
            .target_frequencies
            .iter()
            .find(|f| !band.contains(&u64::from(**f)))
        {
            return Err(PingFinderError::TargetOutOfBand(out));
        }
        Ok(())
    }

    /// Wrap into the request sent to the drone. `run_num` tags the run in
    /// the drone's logs.
    pub fn to_request(&self, run_num: u64) -> ConfigRequest {
        ConfigRequest {
            config: self.clone(),
            run_num,
        }
    }
}

/// Wire form of a config request: the settings plus the run number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRequest {
    #[serde(flatten)]
    pub config: PingFinderConfig,
    pub run_num: u64,
}
