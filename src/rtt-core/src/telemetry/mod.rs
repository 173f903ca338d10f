// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Drone telemetry as mirrored by the ground station.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod quality;

pub use quality::{LinkMetrics, LinkQualityTracker};

/// Coarse link grade shown next to the drone marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Great,
    Good,
    Ok,
    Bad,
    Critical,
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Great => "great",
            Self::Good => "good",
            Self::Ok => "ok",
            Self::Bad => "bad",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ConnectionQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "great" => Ok(Self::Great),
            "good" => Ok(Self::Good),
            "ok" => Ok(Self::Ok),
            "bad" => Ok(Self::Bad),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown connection quality: {}", other)),
        }
    }
}

/// Last known drone position and link health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneTelemetrySnapshot {
    pub lat: f64,
    pub long: f64,
    pub ping_time_ms: u32,
    pub packet_loss_pct: f64,
    pub connection_quality: ConnectionQuality,
}

impl DroneTelemetrySnapshot {
    pub fn new(lat: f64, long: f64, metrics: &LinkMetrics) -> Self {
        Self {
            lat,
            long,
            ping_time_ms: metrics.ping_time_ms,
            packet_loss_pct: metrics.packet_loss_pct,
            connection_quality: metrics.quality,
        }
    }
}

/// Payload of `drone_data_updated`: a full snapshot, or the
/// `{"disconnected": true}` marker.
#[derive(Debug, Clone, PartialEq)]
pub enum DroneDataUpdate {
    Snapshot(DroneTelemetrySnapshot),
    Disconnected,
}

impl DroneDataUpdate {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.get("disconnected").and_then(Value::as_bool) == Some(true) {
            return Ok(Self::Disconnected);
        }
        serde_json::from_value(value).map(Self::Snapshot)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Snapshot(snapshot) => serde_json::to_value(snapshot).unwrap_or(Value::Null),
            Self::Disconnected => serde_json::json!({ "disconnected": true }),
        }
    }

    pub fn snapshot(&self) -> Option<&DroneTelemetrySnapshot> {
        match self {
            Self::Snapshot(snapshot) => Some(snapshot),
            Self::Disconnected => None,
        }
    }
}
