// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Backend signal fan-out.
//!
//! The backend pushes notifications through a [`SignalHub`]; every consumer
//! holds its own [`Subscription`], which stops receiving as soon as it is
//! dropped or disposed.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::comms::RequestKind;
use crate::poi::Poi;
use crate::telemetry::DroneDataUpdate;
use crate::tracking::{GpsData, LocEstData, PingData};

const DEFAULT_CAPACITY: usize = 256;

/// Unique identifier for a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Notifications the backend may push at any time.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSignal {
    /// Human-readable link status.
    ConnectionStatus(String),
    /// The backend gave up waiting for the sync answer.
    SyncTimeout,
    /// Error or `"Warning:"` advisory text.
    ErrorMessage(String),
    /// New telemetry, or the drone went away.
    DroneDataUpdated(DroneDataUpdate),
    /// Full POI list after any change.
    PoisUpdated(Vec<Poi>),
    /// The drone accepted a config, start or stop request.
    RequestSucceeded { kind: RequestKind, message: String },
    /// The drone answered a request with failure.
    RequestFailed { kind: RequestKind, message: String },
    /// The backend gave up waiting for a request's answer.
    RequestTimeout(RequestKind),
    GpsUpdated(GpsData),
    PingDetected(PingData),
    LocationEstimated(LocEstData),
}

/// Multi-subscriber signal emitter owned by a backend.
///
/// Clones share the same channel, so background tasks can emit too.
#[derive(Clone)]
pub struct SignalHub {
    tx: broadcast::Sender<BackendSignal>,
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds how far a slow subscriber may fall behind before
    /// it starts losing signals.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Start receiving every signal emitted from now on.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId::new();
        debug!("Signal subscription {:?} opened", id);
        Subscription {
            id,
            rx: self.tx.subscribe(),
        }
    }

    /// Get the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver a signal to all subscribers. Returns how many received it.
    pub fn emit(&self, signal: BackendSignal) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }

    pub fn emit_connection_status(&self, text: impl Into<String>) -> usize {
        self.emit(BackendSignal::ConnectionStatus(text.into()))
    }

    pub fn emit_sync_timeout(&self) -> usize {
        self.emit(BackendSignal::SyncTimeout)
    }

    pub fn emit_error_message(&self, text: impl Into<String>) -> usize {
        self.emit(BackendSignal::ErrorMessage(text.into()))
    }

    pub fn emit_drone_data(&self, update: DroneDataUpdate) -> usize {
        self.emit(BackendSignal::DroneDataUpdated(update))
    }

    pub fn emit_pois(&self, pois: Vec<Poi>) -> usize {
        self.emit(BackendSignal::PoisUpdated(pois))
    }

    pub fn emit_request_succeeded(&self, kind: RequestKind, message: impl Into<String>) -> usize {
        self.emit(BackendSignal::RequestSucceeded {
            kind,
            message: message.into(),
        })
    }

    pub fn emit_request_failed(&self, kind: RequestKind, message: impl Into<String>) -> usize {
        self.emit(BackendSignal::RequestFailed {
            kind,
            message: message.into(),
        })
    }

    pub fn emit_request_timeout(&self, kind: RequestKind) -> usize {
        self.emit(BackendSignal::RequestTimeout(kind))
    }

    pub fn emit_gps(&self, gps: GpsData) -> usize {
        self.emit(BackendSignal::GpsUpdated(gps))
    }

    pub fn emit_ping(&self, ping: PingData) -> usize {
        self.emit(BackendSignal::PingDetected(ping))
    }

    pub fn emit_location_estimate(&self, estimate: LocEstData) -> usize {
        self.emit(BackendSignal::LocationEstimated(estimate))
    }
}

/// Receiving end of a [`SignalHub`]. Released on drop.
pub struct Subscription {
    id: SubscriptionId,
    rx: broadcast::Receiver<BackendSignal>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next signal. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<BackendSignal> {
        loop {
            match self.rx.recv().await {
                Ok(signal) => return Some(signal),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Signal subscription {:?} lagged, {} signals dropped",
                        self.id, skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next already-queued signal without waiting.
    pub fn try_recv(&mut self) -> Option<BackendSignal> {
        loop {
            match self.rx.try_recv() {
                Ok(signal) => return Some(signal),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(
                        "Signal subscription {:?} lagged, {} signals dropped",
                        self.id, skipped
                    );
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Explicitly release the subscription.
    pub fn dispose(self) {
        debug!("Signal subscription {:?} disposed", self.id);
    }
}
