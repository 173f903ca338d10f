// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Radio tracking data streamed by the drone: its GPS fix, detected pings
//! and the per-frequency transmitter location estimates.
//!
//! [`TrackingData`] mirrors what the backend pushes and turns every change
//! into a [`TrackingUpdate`] for the map layers. Pings and estimates are kept
//! per frequency until the user clears them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::comms::controller::BackendSignal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsData {
    pub lat: f64,
    pub long: f64,
    /// Metres above takeoff
    pub altitude: f64,
    /// Degrees from north
    pub heading: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub packet_id: u64,
}

/// One detected transmitter pulse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingData {
    /// Hz
    pub frequency: u32,
    /// dB
    pub amplitude: f64,
    pub lat: f64,
    pub long: f64,
    pub timestamp: u64,
    pub packet_id: u64,
}

/// Where the drone currently places the transmitter on `frequency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocEstData {
    pub frequency: u32,
    pub lat: f64,
    pub long: f64,
    pub timestamp: u64,
    pub packet_id: u64,
}

/// Change notification for the view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingUpdate {
    Gps(GpsData),
    Ping(PingData),
    LocEst(LocEstData),
    /// All pings and the estimate for `frequency` were dropped
    FrequencyCleared { frequency: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct TrackingData {
    gps: Option<GpsData>,
    pings: BTreeMap<u32, Vec<PingData>>,
    estimates: BTreeMap<u32, LocEstData>,
}

impl TrackingData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest drone fix.
    pub fn gps(&self) -> Option<&GpsData> {
        self.gps.as_ref()
    }

    pub fn pings(&self, frequency: u32) -> &[PingData] {
        self.pings.get(&frequency).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ping_count(&self) -> usize {
        self.pings.values().map(Vec::len).sum()
    }

    pub fn estimate(&self, frequency: u32) -> Option<&LocEstData> {
        self.estimates.get(&frequency)
    }

    /// Frequencies with pings or an estimate, ascending.
    pub fn frequencies(&self) -> Vec<u32> {
        self.pings
            .keys()
            .chain(self.estimates.keys())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn update_gps(&mut self, gps: GpsData) -> TrackingUpdate {
        self.gps = Some(gps.clone());
        TrackingUpdate::Gps(gps)
    }

    pub fn add_ping(&mut self, ping: PingData) -> TrackingUpdate {
        self.pings
            .entry(ping.frequency)
            .or_default()
            .push(ping.clone());
        TrackingUpdate::Ping(ping)
    }

    pub fn update_location_estimate(&mut self, estimate: LocEstData) -> TrackingUpdate {
        self.estimates.insert(estimate.frequency, estimate.clone());
        TrackingUpdate::LocEst(estimate)
    }

    /// Drop the drone fix when the session ends. Pings stay on the map.
    pub fn clear_gps(&mut self) {
        self.gps = None;
    }

    /// Drop pings and the estimate for one frequency. The update is produced
    /// even if nothing was stored, so every view resets its layer.
    pub fn clear_frequency(&mut self, frequency: u32) -> TrackingUpdate {
        let pings = self.pings.remove(&frequency).map_or(0, |p| p.len());
        self.estimates.remove(&frequency);
        debug!("Cleared {} pings on {} Hz", pings, frequency);
        TrackingUpdate::FrequencyCleared { frequency }
    }

    /// Drop every frequency's data, one update per frequency.
    pub fn clear_all(&mut self) -> Vec<TrackingUpdate> {
        let frequencies = self.frequencies();
        self.pings.clear();
        self.estimates.clear();
        frequencies
            .into_iter()
            .map(|frequency| TrackingUpdate::FrequencyCleared { frequency })
            .collect()
    }

    /// Apply a backend signal. Returns the resulting update, if the signal
    /// carried tracking data.
    pub fn handle_signal(&mut self, signal: &BackendSignal) -> Option<TrackingUpdate> {
        match signal {
            BackendSignal::GpsUpdated(gps) => Some(self.update_gps(gps.clone())),
            BackendSignal::PingDetected(ping) => Some(self.add_ping(ping.clone())),
            BackendSignal::LocationEstimated(estimate) => {
                Some(self.update_location_estimate(estimate.clone()))
            }
            _ => None,
        }
    }
}
