// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Connection form model and its validation.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CommsRequest;

pub const ACK_TIMEOUT_MS_RANGE: RangeInclusive<u32> = 100..=5000;
pub const MAX_RETRIES_RANGE: RangeInclusive<u32> = 1..=10;

/// How the backend reaches the drone radio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    #[default]
    Serial,
    Simulated,
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Simulated => write!(f, "simulated"),
        }
    }
}

impl FromStr for InterfaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "simulated" => Ok(Self::Simulated),
            other => Err(format!("unknown interface type '{other}'")),
        }
    }
}

/// A required field was missing or out of bounds.
///
/// The `Display` text is what the connection form shows next to the field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select a serial port")]
    MissingSerialPort,
    #[error("Please enter a valid baud rate")]
    InvalidBaudRate,
    #[error("Please enter a host address")]
    MissingHost,
    #[error("Please enter a valid TCP port (1-65535)")]
    InvalidTcpPort,
    #[error("Acknowledgement timeout must be between 100 and 5000 ms (got {0})")]
    AckTimeoutOutOfRange(u32),
    #[error("Max retries must be between 1 and 10 (got {0})")]
    MaxRetriesOutOfRange(u32),
}

impl ValidationError {
    /// Name of the offending form field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingSerialPort => "selected_port",
            Self::InvalidBaudRate => "baud_rate",
            Self::MissingHost => "host",
            Self::InvalidTcpPort => "tcp_port",
            Self::AckTimeoutOutOfRange(_) => "ack_timeout_ms",
            Self::MaxRetriesOutOfRange(_) => "max_retries",
        }
    }
}

/// User-edited connection settings. Never persisted by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub interface_type: InterfaceType,
    /// Serial device path (serial only)
    pub selected_port: String,
    /// Serial baud rate (serial only)
    pub baud_rate: Option<u32>,
    /// Simulator host (simulated only)
    pub host: String,
    /// Simulator TCP port (simulated only)
    pub tcp_port: Option<u16>,
    pub ack_timeout_ms: u32,
    pub max_retries: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            interface_type: InterfaceType::Serial,
            selected_port: String::new(),
            baud_rate: Some(57_600),
            host: "localhost".to_string(),
            tcp_port: Some(50_000),
            ack_timeout_ms: 2_000,
            max_retries: 5,
        }
    }
}

impl ConnectionConfig {
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            interface_type: InterfaceType::Serial,
            selected_port: port.into(),
            baud_rate: Some(baud_rate),
            ..Self::default()
        }
    }

    pub fn simulated(host: impl Into<String>, tcp_port: u16) -> Self {
        Self {
            interface_type: InterfaceType::Simulated,
            host: host.into(),
            tcp_port: Some(tcp_port),
            ..Self::default()
        }
    }

    pub fn with_timing(mut self, ack_timeout_ms: u32, max_retries: u32) -> Self {
        self.ack_timeout_ms = ack_timeout_ms;
        self.max_retries = max_retries;
        self
    }

    /// Check the field group selected by `interface_type`, then the timing bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.interface_type {
            InterfaceType::Serial => {
                if self.selected_port.trim().is_empty() {
                    return Err(ValidationError::MissingSerialPort);
                }
                if !matches!(self.baud_rate, Some(baud) if baud > 0) {
                    return Err(ValidationError::InvalidBaudRate);
                }
            }
            InterfaceType::Simulated => {
                if self.host.trim().is_empty() {
                    return Err(ValidationError::MissingHost);
                }
                if !matches!(self.tcp_port, Some(port) if port > 0) {
                    return Err(ValidationError::InvalidTcpPort);
                }
            }
        }
        if !ACK_TIMEOUT_MS_RANGE.contains(&self.ack_timeout_ms) {
            return Err(ValidationError::AckTimeoutOutOfRange(self.ack_timeout_ms));
        }
        if !MAX_RETRIES_RANGE.contains(&self.max_retries) {
            return Err(ValidationError::MaxRetriesOutOfRange(self.max_retries));
        }
        Ok(())
    }

    /// How long to wait for the sync answer before offering to cancel.
    pub fn sync_deadline(&self) -> Duration {
        Duration::from_millis(u64::from(self.ack_timeout_ms) * u64::from(self.max_retries))
    }

    /// Translate into the backend request. The timeout goes out in seconds.
    pub fn to_request(&self) -> CommsRequest {
        let mut request = CommsRequest {
            interface_type: self.interface_type,
            ack_timeout: f64::from(self.ack_timeout_ms) / 1000.0,
            max_retries: self.max_retries,
            port: None,
            baudrate: None,
            host: None,
            tcp_port: None,
        };
        match self.interface_type {
            InterfaceType::Serial => {
                request.port = Some(self.selected_port.trim().to_string());
                request.baudrate = self.baud_rate;
            }
            InterfaceType::Simulated => {
                request.host = Some(self.host.trim().to_string());
                request.tcp_port = self.tcp_port;
            }
        }
        request
    }
}
