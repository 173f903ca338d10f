// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod comms;
pub mod poi;
pub mod telemetry;
pub mod tracking;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use comms::config::{ConnectionConfig, InterfaceType, ValidationError};
pub use comms::controller::{
    BackendSignal, ConnectionController, ConnectionPhase, ConnectionState, MissionStage, PhaseKind,
    RequestPhase, SignalHub, Subscription, UserCommand,
};
pub use comms::error::ControllerError;
pub use comms::ping_finder::{ConfigRequest, PingFinderConfig, PingFinderError};
pub use comms::{BackendFuture, CommsRequest, DeviceBackend, DroneRequest, RequestKind};
pub use poi::{Poi, PoiBackend, PoiError, PoiManager, PoiStore};
pub use telemetry::{
    ConnectionQuality, DroneDataUpdate, DroneTelemetrySnapshot, LinkMetrics, LinkQualityTracker,
};
pub use tracking::{GpsData, LocEstData, PingData, TrackingData, TrackingUpdate};
