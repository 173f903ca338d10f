// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Connection lifecycle controller.
//!
//! User actions (`connect`, `cancel`, `disconnect` and the config / start /
//! stop requests) mutate state immediately and hand the backend call to a
//! spawned task. Call completions, the local ack timers and backend signals
//! all come back through the controller's own queue and are applied one at a
//! time by [`ConnectionController::process_next`], so there is a single
//! writer and no locking.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::comms::config::ConnectionConfig;
use crate::comms::error::ControllerError;
use crate::comms::ping_finder::PingFinderConfig;
use crate::comms::{
    is_advisory, DeviceBackend, DroneRequest, RequestKind, DISCONNECTED_STATUS,
    SYNC_SUCCESS_STATUS,
};
use crate::telemetry::{DroneDataUpdate, DroneTelemetrySnapshot};
use crate::DynResult;

use super::machine::{AttemptId, ConnectionEvent, ConnectionMachine, ConnectionPhase, PhaseKind};
use super::request::{MissionStage, RequestEvent, RequestMachine};
use super::signals::{BackendSignal, Subscription};

/// Error shown when the backend refuses or fails `initialize_comms`.
pub const CONNECT_FAILED_MESSAGE: &str = "Failed to initialize drone communications";

/// What the view renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub phase: PhaseKind,
    /// Last status text from the backend
    pub status_text: String,
    /// Empty when there is nothing to show
    pub error_message: String,
    pub cancel_available: bool,
    pub mission: MissionStage,
    /// Request still waiting for the drone's answer
    pub pending_request: Option<RequestKind>,
    pub request_cancel_available: bool,
    /// Last successful request answer
    pub request_status: String,
}

impl ConnectionState {
    pub fn has_error(&self) -> bool {
        !self.error_message.is_empty()
    }

    /// True when the message is an error rather than a `"Warning:"` advisory.
    pub fn has_fatal_error(&self) -> bool {
        self.has_error() && !is_advisory(&self.error_message)
    }
}

/// User intent forwarded from the view.
#[derive(Debug, Clone)]
pub enum UserCommand {
    Connect(ConnectionConfig),
    Cancel,
    Disconnect,
    Configure(PingFinderConfig),
    Start,
    Stop,
    CancelRequest,
}

#[derive(Debug)]
enum ControllerEvent {
    InitializeFinished {
        attempt: AttemptId,
        outcome: Result<bool, String>,
    },
    SyncDeadline(AttemptId),
    /// Backend `disconnect` failed after the session identified by `session`
    /// was already reset locally.
    DisconnectFailed {
        session: Option<AttemptId>,
        message: String,
    },
    RequestSent {
        attempt: AttemptId,
        outcome: Result<bool, String>,
    },
    RequestDeadline(AttemptId),
}

/// Run number sent with a config request: seconds since the Unix epoch.
fn run_number() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Owns the connection state and reconciles it with the backend.
///
/// Operations spawn onto the current tokio runtime, so they must be called
/// from within one.
pub struct ConnectionController<B: DeviceBackend + ?Sized + 'static> {
    backend: Arc<B>,
    machine: ConnectionMachine,
    requests: RequestMachine,
    status_text: String,
    error_message: String,
    request_status: String,
    telemetry: Option<DroneTelemetrySnapshot>,
    signals: Subscription,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    /// `ack_timeout_ms * max_retries` of the current session
    ack_window: Duration,
    sync_timer: Option<JoinHandle<()>>,
    request_timer: Option<JoinHandle<()>>,
    state_tx: watch::Sender<ConnectionState>,
    telemetry_tx: watch::Sender<Option<DroneTelemetrySnapshot>>,
}

impl<B: DeviceBackend + ?Sized + 'static> ConnectionController<B> {
    /// Create a controller in the Idle phase, subscribed to `backend`'s signals.
    pub fn new(backend: Arc<B>) -> Self {
        let signals = backend.signals().subscribe();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::default());
        let (telemetry_tx, _) = watch::channel(None);
        Self {
            backend,
            machine: ConnectionMachine::new(),
            requests: RequestMachine::new(),
            status_text: String::new(),
            error_message: String::new(),
            request_status: String::new(),
            telemetry: None,
            signals,
            events_tx,
            events_rx,
            ack_window: Duration::ZERO,
            sync_timer: None,
            request_timer: None,
            state_tx,
            telemetry_tx,
        }
    }

    /// Get the current connection phase.
    pub fn phase(&self) -> &ConnectionPhase {
        self.machine.state()
    }

    /// Get the connection state machine.
    pub fn machine(&self) -> &ConnectionMachine {
        &self.machine
    }

    /// Get the request state machine.
    pub fn requests(&self) -> &RequestMachine {
        &self.requests
    }

    /// Build the state the view renders.
    pub fn state(&self) -> ConnectionState {
        let phase = self.machine.state();
        let request = self.requests.phase();
        ConnectionState {
            phase: phase.kind(),
            status_text: self.status_text.clone(),
            error_message: self.error_message.clone(),
            cancel_available: phase.cancel_available(),
            mission: self.requests.stage(),
            pending_request: request.pending(),
            request_cancel_available: request.cancel_available(),
            request_status: self.request_status.clone(),
        }
    }

    /// Get the last telemetry snapshot, if any.
    pub fn telemetry(&self) -> Option<&DroneTelemetrySnapshot> {
        self.telemetry.as_ref()
    }

    /// Watch every published [`ConnectionState`].
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Watch the telemetry snapshot; `None` while no drone is reporting.
    pub fn subscribe_telemetry(&self) -> watch::Receiver<Option<DroneTelemetrySnapshot>> {
        self.telemetry_tx.subscribe()
    }

    /// Serial ports offered in the connection form.
    pub async fn serial_ports(&self) -> DynResult<Vec<String>> {
        self.backend.get_serial_ports().await
    }

    /// Start a connection attempt.
    ///
    /// Invalid settings set a field-specific error and never reach the
    /// backend. Only one attempt may be in flight.
    pub fn connect(&mut self, config: &ConnectionConfig) -> Result<AttemptId, ControllerError> {
        let phase = self.machine.state().kind();
        if !self.machine.state().can_connect() {
            warn!("Ignoring connect request while {}", phase);
            return Err(ControllerError::AttemptInProgress(phase));
        }
        if let Err(e) = config.validate() {
            warn!("Connection settings rejected ({}): {}", e.field(), e);
            self.error_message = e.to_string();
            self.publish_state();
            return Err(e.into());
        }

        let attempt = self.machine.next_attempt_id();
        self.machine
            .process_event(ConnectionEvent::ConnectRequested(attempt));
        self.error_message.clear();
        self.ack_window = config.sync_deadline();

        let request = config.to_request();
        info!(
            "Connecting to drone via {} (attempt {})",
            request.interface_type, attempt
        );
        let backend = Arc::clone(&self.backend);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = backend
                .initialize_comms(request)
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(ControllerEvent::InitializeFinished { attempt, outcome });
        });

        self.publish_state();
        Ok(attempt)
    }

    /// Abandon the attempt in progress.
    ///
    /// The backend is asked to cancel but never awaited; local state is back
    /// to Idle when this returns.
    pub fn cancel(&mut self) -> Result<(), ControllerError> {
        if !self.machine.state().can_cancel() {
            return Err(ControllerError::InvalidState {
                action: "cancel",
                phase: self.machine.state().kind(),
            });
        }
        info!("Cancelling connection attempt");
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            if let Err(e) = backend.cancel_connection().await {
                debug!("cancel_connection failed (ignored): {}", e);
            }
        });
        self.reset();
        Ok(())
    }

    /// Close the session with the drone.
    pub fn disconnect(&mut self) -> Result<(), ControllerError> {
        if !self.machine.state().is_connected() {
            return Err(ControllerError::InvalidState {
                action: "disconnect",
                phase: self.machine.state().kind(),
            });
        }
        info!("Disconnecting from drone");
        let session = self.machine.last_attempt_id();
        let backend = Arc::clone(&self.backend);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.disconnect().await {
                let _ = events.send(ControllerEvent::DisconnectFailed {
                    session,
                    message: e.to_string(),
                });
            }
        });
        self.reset();
        self.set_telemetry(None);
        Ok(())
    }

    /// Send the ping finder settings. Invalid settings are reported like
    /// connection form errors and never reach the backend.
    pub fn configure(&mut self, config: &PingFinderConfig) -> Result<AttemptId, ControllerError> {
        self.check_can_send(RequestKind::Config)?;
        if let Err(e) = config.validate() {
            warn!("Ping finder settings rejected: {}", e);
            self.error_message = e.to_string();
            self.publish_state();
            return Err(e.into());
        }
        self.send_request(DroneRequest::Config(config.to_request(run_number())))
    }

    /// Ask a configured drone to start the ping finder.
    pub fn start(&mut self) -> Result<AttemptId, ControllerError> {
        self.check_can_send(RequestKind::Start)?;
        self.send_request(DroneRequest::Start)
    }

    /// Ask a running drone to stop the ping finder.
    pub fn stop(&mut self) -> Result<AttemptId, ControllerError> {
        self.check_can_send(RequestKind::Stop)?;
        self.send_request(DroneRequest::Stop)
    }

    /// Stop waiting for the pending request's answer. A late answer is
    /// ignored.
    pub fn cancel_request(&mut self) -> Result<(), ControllerError> {
        let Some(kind) = self.requests.phase().pending() else {
            return Err(ControllerError::NoPendingRequest);
        };
        info!("Cancelling {} request", kind);
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            if let Err(e) = backend.cancel_request(kind).await {
                debug!("cancel_request({}) failed (ignored): {}", kind, e);
            }
        });
        self.disarm_request_timer();
        self.requests.process_event(RequestEvent::Cancelled);
        self.publish_state();
        Ok(())
    }

    pub fn apply(&mut self, command: UserCommand) -> Result<(), ControllerError> {
        match command {
            UserCommand::Connect(config) => self.connect(&config).map(|_| ()),
            UserCommand::Cancel => self.cancel(),
            UserCommand::Disconnect => self.disconnect(),
            UserCommand::Configure(config) => self.configure(&config).map(|_| ()),
            UserCommand::Start => self.start().map(|_| ()),
            UserCommand::Stop => self.stop().map(|_| ()),
            UserCommand::CancelRequest => self.cancel_request(),
        }
    }

    pub fn on_connection_status(&mut self, text: &str) {
        self.status_text = text.to_string();
        if text == SYNC_SUCCESS_STATUS {
            if self.machine.process_event(ConnectionEvent::SyncSucceeded) {
                self.disarm_sync_timer();
                info!("Drone connected");
            } else {
                debug!("Ignoring sync success while {}", self.machine.state().kind());
            }
        } else if text == DISCONNECTED_STATUS && self.machine.state().is_connected() {
            info!("Backend closed the drone session");
            self.machine.process_event(ConnectionEvent::Reset);
            self.end_run();
            self.set_telemetry(None);
        }
        self.publish_state();
    }

    pub fn on_sync_timeout(&mut self) {
        if self
            .machine
            .process_event(ConnectionEvent::SyncTimeoutSignalled)
        {
            if self.machine.state().cancel_available() {
                warn!("Backend reported sync timeout; cancel is now available");
                self.disarm_sync_timer();
            } else {
                warn!("Backend reported sync timeout before initialize_comms returned");
            }
            self.publish_state();
        } else {
            debug!("Ignoring sync timeout while {}", self.machine.state().kind());
        }
    }

    pub fn on_error_message(&mut self, text: &str) {
        self.error_message = text.to_string();
        if is_advisory(text) {
            warn!("Drone advisory: {}", text);
        } else if self
            .machine
            .process_event(ConnectionEvent::FatalError(text.to_string()))
        {
            self.disarm_sync_timer();
            error!("Connection attempt failed: {}", text);
        } else {
            error!("Drone error while {}: {}", self.machine.state().kind(), text);
        }
        self.publish_state();
    }

    pub fn on_drone_data_updated(&mut self, update: DroneDataUpdate) {
        match update {
            DroneDataUpdate::Snapshot(snapshot) => self.set_telemetry(Some(snapshot)),
            DroneDataUpdate::Disconnected => self.set_telemetry(None),
        }
    }

    pub fn on_request_succeeded(&mut self, kind: RequestKind, message: &str) {
        if self.requests.process_event(RequestEvent::Succeeded(kind)) {
            self.disarm_request_timer();
            info!("Drone accepted {} request: {}", kind, message);
            self.request_status = message.to_string();
            self.publish_state();
        } else {
            debug!("Ignoring {} answer with no matching request", kind);
        }
    }

    pub fn on_request_failed(&mut self, kind: RequestKind, message: &str) {
        if self.requests.process_event(RequestEvent::Failed(kind)) {
            self.disarm_request_timer();
            error!("Drone refused {} request: {}", kind, message);
            self.error_message = message.to_string();
            self.publish_state();
        } else {
            debug!("Ignoring {} failure with no matching request", kind);
        }
    }

    pub fn on_request_timeout(&mut self, kind: RequestKind) {
        if self
            .requests
            .process_event(RequestEvent::TimeoutSignalled(kind))
        {
            warn!("Backend reported {} timeout; cancel is now available", kind);
            self.disarm_request_timer();
            self.publish_state();
        } else {
            debug!("Ignoring {} timeout", kind);
        }
    }

    /// Apply a backend signal. Tracking data and POI lists are not the
    /// controller's concern and are skipped.
    pub fn handle_signal(&mut self, signal: BackendSignal) {
        match signal {
            BackendSignal::ConnectionStatus(text) => self.on_connection_status(&text),
            BackendSignal::SyncTimeout => self.on_sync_timeout(),
            BackendSignal::ErrorMessage(text) => self.on_error_message(&text),
            BackendSignal::DroneDataUpdated(update) => self.on_drone_data_updated(update),
            BackendSignal::RequestSucceeded { kind, message } => {
                self.on_request_succeeded(kind, &message)
            }
            BackendSignal::RequestFailed { kind, message } => {
                self.on_request_failed(kind, &message)
            }
            BackendSignal::RequestTimeout(kind) => self.on_request_timeout(kind),
            BackendSignal::PoisUpdated(_)
            | BackendSignal::GpsUpdated(_)
            | BackendSignal::PingDetected(_)
            | BackendSignal::LocationEstimated(_) => {}
        }
    }

    /// Wait for the next backend signal or internal completion and apply it.
    /// Returns false once the backend's signal hub is gone.
    ///
    /// Queued completions are always applied before signals.
    pub async fn process_next(&mut self) -> bool {
        tokio::select! {
            biased;
            Some(event) = self.events_rx.recv() => {
                self.handle_event(event);
                true
            }
            signal = self.signals.recv() => match signal {
                Some(signal) => {
                    self.handle_signal(signal);
                    true
                }
                None => false,
            },
        }
    }

    /// Apply everything already queued without waiting. Returns the count.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        while let Some(signal) = self.signals.try_recv() {
            self.handle_signal(signal);
            handled += 1;
        }
        handled
    }

    /// Drive the controller until `commands` closes or the backend goes away.
    pub async fn run(mut self, mut commands: mpsc::Receiver<UserCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Err(e) = self.apply(command) {
                            warn!("Command rejected: {}", e);
                        }
                    }
                    None => break,
                },
                alive = self.process_next() => {
                    if !alive {
                        warn!("Backend signal hub closed");
                        break;
                    }
                }
            }
        }
        info!("Connection controller stopped");
    }

    fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::InitializeFinished {
                attempt,
                outcome: Ok(true),
            } => {
                if self
                    .machine
                    .process_event(ConnectionEvent::InitializeAccepted(attempt))
                {
                    if self.machine.state().cancel_available() {
                        warn!("Comms initialized after the backend already timed out");
                    } else {
                        info!(
                            "Comms initialized, waiting up to {:?} for drone sync",
                            self.ack_window
                        );
                        self.arm_sync_timer(attempt);
                    }
                    self.publish_state();
                } else {
                    debug!("Ignoring stale initialize result for attempt {}", attempt);
                }
            }
            ControllerEvent::InitializeFinished { attempt, outcome } => {
                let detail = match outcome {
                    Ok(_) => "backend refused the configuration".to_string(),
                    Err(e) => e,
                };
                if self
                    .machine
                    .process_event(ConnectionEvent::InitializeRejected {
                        attempt,
                        reason: detail.clone(),
                    })
                {
                    error!("initialize_comms failed: {}", detail);
                    self.error_message = CONNECT_FAILED_MESSAGE.to_string();
                    self.publish_state();
                } else {
                    debug!("Ignoring stale initialize failure for attempt {}", attempt);
                }
            }
            ControllerEvent::SyncDeadline(attempt) => {
                if self
                    .machine
                    .process_event(ConnectionEvent::SyncDeadlineElapsed(attempt))
                {
                    warn!(
                        "No sync answer after {:?}; cancel is now available",
                        self.ack_window
                    );
                    self.sync_timer = None;
                    self.publish_state();
                } else {
                    debug!("Ignoring sync deadline for attempt {}", attempt);
                }
            }
            ControllerEvent::DisconnectFailed { session, message } => {
                let same_session = self.machine.last_attempt_id() == session
                    && self.machine.state().kind() == PhaseKind::Idle;
                if same_session {
                    error!("Disconnect failed: {}", message);
                    self.error_message = message;
                    self.publish_state();
                } else {
                    debug!("Dropping disconnect failure from an earlier session: {}", message);
                }
            }
            ControllerEvent::RequestSent {
                attempt,
                outcome: Ok(true),
            } => {
                let phase = *self.requests.phase();
                if phase.attempt() != Some(attempt) {
                    debug!("Request {} already settled", attempt);
                } else if !phase.cancel_available() {
                    self.arm_request_timer(attempt);
                }
            }
            ControllerEvent::RequestSent { attempt, outcome } => {
                let Some(kind) = self.requests.phase().pending() else {
                    debug!("Ignoring send result for settled request {}", attempt);
                    return;
                };
                if self.requests.process_event(RequestEvent::SendFailed(attempt)) {
                    let message = match outcome {
                        Ok(_) => format!("Failed to send {} request", kind),
                        Err(e) => e,
                    };
                    error!("{} request not sent: {}", kind, message);
                    self.error_message = message;
                    self.publish_state();
                } else {
                    debug!("Ignoring send result for stale request {}", attempt);
                }
            }
            ControllerEvent::RequestDeadline(attempt) => {
                if self
                    .requests
                    .process_event(RequestEvent::DeadlineElapsed(attempt))
                {
                    warn!(
                        "No answer after {:?}; request cancel is now available",
                        self.ack_window
                    );
                    self.request_timer = None;
                    self.publish_state();
                } else {
                    debug!("Ignoring request deadline for {}", attempt);
                }
            }
        }
    }

    fn check_can_send(&self, kind: RequestKind) -> Result<(), ControllerError> {
        if !self.machine.state().is_connected() {
            return Err(ControllerError::InvalidState {
                action: "send a request",
                phase: self.machine.state().kind(),
            });
        }
        if let Some(pending) = self.requests.phase().pending() {
            return Err(ControllerError::RequestPending(pending));
        }
        let stage = self.requests.stage();
        if !stage.allows(kind) {
            return Err(ControllerError::RequestNotAllowed { kind, stage });
        }
        Ok(())
    }

    fn send_request(&mut self, request: DroneRequest) -> Result<AttemptId, ControllerError> {
        let kind = request.kind();
        let attempt = self.requests.next_attempt_id();
        self.requests
            .process_event(RequestEvent::Sent { kind, attempt });
        self.request_status.clear();
        info!("Sending {} request ({})", kind, attempt);

        let backend = Arc::clone(&self.backend);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = backend
                .send_request(request)
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(ControllerEvent::RequestSent { attempt, outcome });
        });

        self.publish_state();
        Ok(attempt)
    }

    fn reset(&mut self) {
        self.disarm_sync_timer();
        self.machine.process_event(ConnectionEvent::Reset);
        self.end_run();
        self.status_text.clear();
        self.error_message.clear();
        self.publish_state();
    }

    /// Forget the tracking run along with the session.
    fn end_run(&mut self) {
        self.disarm_request_timer();
        self.requests.process_event(RequestEvent::Reset);
        self.request_status.clear();
    }

    fn spawn_deadline(&self, event: ControllerEvent) -> JoinHandle<()> {
        let deadline = time::Instant::now() + self.ack_window;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            time::sleep_until(deadline).await;
            let _ = events.send(event);
        })
    }

    fn arm_sync_timer(&mut self, attempt: AttemptId) {
        self.disarm_sync_timer();
        self.sync_timer = Some(self.spawn_deadline(ControllerEvent::SyncDeadline(attempt)));
    }

    fn disarm_sync_timer(&mut self) {
        if let Some(timer) = self.sync_timer.take() {
            timer.abort();
        }
    }

    fn arm_request_timer(&mut self, attempt: AttemptId) {
        self.disarm_request_timer();
        self.request_timer = Some(self.spawn_deadline(ControllerEvent::RequestDeadline(attempt)));
    }

    fn disarm_request_timer(&mut self) {
        if let Some(timer) = self.request_timer.take() {
            timer.abort();
        }
    }

    fn set_telemetry(&mut self, snapshot: Option<DroneTelemetrySnapshot>) {
        self.telemetry = snapshot;
        self.telemetry_tx.send_replace(self.telemetry.clone());
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.state());
    }
}

impl<B: DeviceBackend + ?Sized + 'static> Drop for ConnectionController<B> {
    fn drop(&mut self) {
        self.disarm_sync_timer();
        self.disarm_request_timer();
    }
}
