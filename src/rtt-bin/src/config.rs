// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for rtt-gcs.
//!
//! Settings live under `[rtt-gcs]` in `rtt-gcs.toml`, searched in this order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./rtt-gcs.toml` (current directory)
//! 3. `~/.config/rtt-gcs/rtt-gcs.toml` (XDG config)
//! 4. `/etc/rtt-gcs/rtt-gcs.toml` (system-wide)
//!
//! CLI arguments override config file values.

use serde::{Deserialize, Serialize};

use rtt_app::ConfigFile;
use rtt_backend::SimulatorSettings;
use rtt_core::comms::config::{ACK_TIMEOUT_MS_RANGE, MAX_RETRIES_RANGE};
use rtt_core::{ConnectionConfig, InterfaceType, PingFinderConfig};

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    /// Initial connection form values
    pub connection: ConnectionConfig,
    /// Simulated drone behaviour
    pub simulator: SimulatorSettings,
    /// Settings sent with the config request
    pub ping_finder: PingFinderConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

impl ConfigFile for Config {
    fn section_key() -> &'static str {
        "rtt-gcs"
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        let conn = &self.connection;
        if !ACK_TIMEOUT_MS_RANGE.contains(&conn.ack_timeout_ms) {
            return Err(format!(
                "[connection].ack_timeout_ms must be in range {}..={} (got {})",
                ACK_TIMEOUT_MS_RANGE.start(),
                ACK_TIMEOUT_MS_RANGE.end(),
                conn.ack_timeout_ms
            ));
        }
        if !MAX_RETRIES_RANGE.contains(&conn.max_retries) {
            return Err(format!(
                "[connection].max_retries must be in range {}..={} (got {})",
                MAX_RETRIES_RANGE.start(),
                MAX_RETRIES_RANGE.end(),
                conn.max_retries
            ));
        }
        if conn.baud_rate == Some(0) {
            return Err("[connection].baud_rate must be > 0".to_string());
        }
        if conn.tcp_port == Some(0) {
            return Err("[connection].tcp_port must be > 0".to_string());
        }

        self.ping_finder
            .validate()
            .map_err(|e| format!("[ping_finder] {}", e))?;

        self.simulator.validate()
    }

    /// Example configuration wrapped under the `[rtt-gcs]` section header.
    pub fn example_combined_toml() -> String {
        #[derive(Serialize)]
        struct Wrapper {
            #[serde(rename = "rtt-gcs")]
            inner: Config,
        }
        let example = Config {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            connection: ConnectionConfig {
                interface_type: InterfaceType::Simulated,
                ..ConnectionConfig::default()
            },
            simulator: SimulatorSettings::default(),
            ping_finder: PingFinderConfig::default(),
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}
