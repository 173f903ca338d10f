// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Drone communications: the backend bridge contract and the connection
//! lifecycle built on top of it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::DynResult;

pub mod config;
pub mod controller;
pub mod error;
pub mod ping_finder;

use config::InterfaceType;
use controller::SignalHub;
use ping_finder::ConfigRequest;

/// Alias to reduce type complexity in DeviceBackend.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = DynResult<T>> + Send + 'a>>;

/// Status text the backend emits once the drone has answered the sync handshake.
pub const SYNC_SUCCESS_STATUS: &str = "Drone connected successfully";

/// Status text the backend emits after tearing a session down on its own.
pub const DISCONNECTED_STATUS: &str = "Disconnected";

/// Prefix marking an error message as a non-fatal advisory.
pub const WARNING_PREFIX: &str = "Warning:";

/// Returns true when `message` is an advisory rather than a fatal error.
pub fn is_advisory(message: &str) -> bool {
    message.starts_with(WARNING_PREFIX)
}

/// Parameters handed to `initialize_comms`.
///
/// Only the field group selected by `interface_type` is populated; the other
/// keys are left out of the serialized form entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommsRequest {
    pub interface_type: InterfaceType,
    /// Per-packet acknowledgement timeout in seconds.
    pub ack_timeout: f64,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baudrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_port: Option<u16>,
}

/// Which acknowledged request a response or timeout belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Config,
    Start,
    Stop,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Request sent to a synced drone. The drone answers each one with a
/// success or failure response, or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum DroneRequest {
    Config(ConfigRequest),
    Start,
    Stop,
}

impl DroneRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Config(_) => RequestKind::Config,
            Self::Start => RequestKind::Start,
            Self::Stop => RequestKind::Stop,
        }
    }
}

/// Host-side bridge to the drone.
///
/// Calls are asynchronous request/response; everything the device reports on
/// its own arrives through the [`SignalHub`] returned by `signals`.
pub trait DeviceBackend: Send + Sync {
    /// List serial port identifiers the host can open.
    fn get_serial_ports<'a>(&'a self) -> BackendFuture<'a, Vec<String>>;

    /// Open the link and start the sync handshake.
    /// `Ok(false)` means the backend refused the configuration.
    fn initialize_comms<'a>(&'a self, request: CommsRequest) -> BackendFuture<'a, bool>;

    /// Abort an in-progress connection attempt.
    fn cancel_connection<'a>(&'a self) -> BackendFuture<'a, ()>;

    /// Stop the drone session and release the link.
    fn disconnect<'a>(&'a self) -> BackendFuture<'a, ()>;

    /// Send a config, start or stop request.
    /// `Ok(false)` means the request never went out.
    fn send_request<'a>(&'a self, request: DroneRequest) -> BackendFuture<'a, bool>;

    /// Stop listening for the answer to a pending request.
    fn cancel_request<'a>(&'a self, kind: RequestKind) -> BackendFuture<'a, ()>;

    fn signals(&self) -> &SignalHub;
}
