// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated drone backend for development and testing.
//!
//! Answers the sync handshake after a short delay, then streams telemetry for
//! a drone circling a fixed point. Config, start and stop requests are
//! answered like the field software does, and while the ping finder runs the
//! drone reports its GPS fix, pings from each target and a location estimate
//! per target. POIs are kept in memory.
//! No hardware or serial port required.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use rtt_core::comms::controller::SignalHub;
use rtt_core::comms::{
    BackendFuture, CommsRequest, DeviceBackend, DroneRequest, RequestKind, DISCONNECTED_STATUS,
    SYNC_SUCCESS_STATUS,
};
use rtt_core::poi::{Poi, PoiBackend, PoiStore};
use rtt_core::telemetry::{DroneDataUpdate, DroneTelemetrySnapshot, LinkQualityTracker};
use rtt_core::tracking::{GpsData, LocEstData, PingData};

use crate::available_serial_ports;

/// Advisory sent when the drone syncs without being fully ready.
pub const NOT_READY_WARNING: &str = "Warning: device not ready or initialization failed.";

/// Status text while the sync handshake is running.
pub const INITIALIZING_STATUS: &str = "Initializing drone communications...";

pub const CONFIG_ACCEPTED: &str = "Config sent to drone.";
pub const START_ACCEPTED: &str = "Drone is now starting.";
pub const STOP_ACCEPTED: &str = "Drone is now stopping.";
pub const IMPROPER_STATE: &str = "UNDEFINED BEHAVIOR: Improper state.";
pub const NOT_CONNECTED: &str = "UNDEFINED BEHAVIOR: Not Connected.";

/// Telemetry samples per full orbit.
const ORBIT_STEPS: u64 = 60;

/// Pings per frequency before the drone estimates a location.
pub const MIN_PINGS_FOR_ESTIMATE: usize = 4;

const METRES_PER_DEGREE: f64 = 111_320.0;
/// Transmitter power seen at 1 m, dB
const TX_POWER_DB: f64 = 60.0;
const PATH_LOSS_EXPONENT: f64 = 2.0;
/// Spacing between the transmitters of consecutive target frequencies
const TARGET_SPACING_DEG: f64 = 0.0002;

/// How the simulated drone behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Delay before the drone answers sync
    pub sync_delay_ms: u64,
    /// When false the drone never answers and the backend reports a sync timeout
    pub answers_sync: bool,
    /// When false an advisory warning precedes the sync answer
    pub device_ready: bool,
    /// Refuse every `initialize_comms` call
    pub refuse_config: bool,
    pub telemetry_interval_ms: u64,
    pub ping_time_ms: u64,
    /// Drop every Nth telemetry packet, 0 disables
    pub drop_every: u64,
    /// Orbit centre, `[lat, lng]`
    pub home: [f64; 2],
    pub orbit_radius_deg: f64,
    /// Delay before the drone answers a config, start or stop request
    pub request_delay_ms: u64,
    /// When false requests go unanswered and the backend reports a timeout
    pub answers_requests: bool,
    /// First transmitter's position relative to `home`, `[dlat, dlng]`
    pub transmitter_offset_deg: [f64; 2],
    /// Flight altitude in metres
    pub altitude_m: f64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            sync_delay_ms: 500,
            answers_sync: true,
            device_ready: true,
            refuse_config: false,
            telemetry_interval_ms: 1000,
            ping_time_ms: 120,
            drop_every: 0,
            home: [32.8801, -117.2340],
            orbit_radius_deg: 0.0005,
            request_delay_ms: 200,
            answers_requests: true,
            transmitter_offset_deg: [0.0002, -0.0001],
            altitude_m: 30.0,
        }
    }
}

impl SimulatorSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.telemetry_interval_ms == 0 {
            return Err("[simulator].telemetry_interval_ms must be > 0".to_string());
        }
        let [lat, lng] = self.home;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(format!(
                "[simulator].home must be a valid [lat, lng], got [{}, {}]",
                lat, lng
            ));
        }
        if !self.orbit_radius_deg.is_finite() || self.orbit_radius_deg < 0.0 {
            return Err("[simulator].orbit_radius_deg must be >= 0".to_string());
        }
        if !self.transmitter_offset_deg.iter().all(|v| v.is_finite()) {
            return Err("[simulator].transmitter_offset_deg must be finite".to_string());
        }
        if !self.altitude_m.is_finite() || self.altitude_m < 0.0 {
            return Err("[simulator].altitude_m must be >= 0".to_string());
        }
        Ok(())
    }

    /// Drone position after `step` telemetry samples.
    pub fn position_at(&self, step: u64) -> (f64, f64) {
        let angle = self.orbit_angle(step);
        (
            self.home[0] + self.orbit_radius_deg * angle.sin(),
            self.home[1] + self.orbit_radius_deg * angle.cos(),
        )
    }

    /// Drone heading in degrees after `step` samples, tangent to the orbit.
    pub fn heading_at(&self, step: u64) -> f64 {
        (360.0 - self.orbit_angle(step).to_degrees()).rem_euclid(360.0)
    }

    /// Where the transmitter of the `index`-th target frequency sits.
    pub fn transmitter_at(&self, index: usize) -> (f64, f64) {
        (
            self.home[0] + self.transmitter_offset_deg[0] + index as f64 * TARGET_SPACING_DEG,
            self.home[1] + self.transmitter_offset_deg[1],
        )
    }

    /// Received ping strength in dB for a drone at `drone` and a transmitter
    /// at `transmitter`, log-distance path loss.
    pub fn amplitude_at(&self, drone: (f64, f64), transmitter: (f64, f64)) -> f64 {
        let dlat = (drone.0 - transmitter.0) * METRES_PER_DEGREE;
        let dlng = (drone.1 - transmitter.1) * METRES_PER_DEGREE * drone.0.to_radians().cos();
        let distance = dlat.hypot(dlng).hypot(self.altitude_m).max(1.0);
        TX_POWER_DB - 10.0 * PATH_LOSS_EXPONENT * distance.log10()
    }

    fn orbit_angle(&self, step: u64) -> f64 {
        (step % ORBIT_STEPS) as f64 * TAU / ORBIT_STEPS as f64
    }
}

/// Drone side of the tracking run.
#[derive(Debug, Default)]
struct MissionSim {
    synced: bool,
    /// `ack_timeout * max_retries` of the session
    ack_window: Duration,
    configured: bool,
    running: bool,
    targets: Vec<u32>,
    /// Per frequency: drone position and amplitude of every ping
    heard: BTreeMap<u32, Vec<(f64, f64, f64)>>,
}

impl MissionSim {
    /// Apply a request the way the field software does.
    fn apply(&mut self, request: &DroneRequest) -> Result<&'static str, &'static str> {
        match request {
            DroneRequest::Config(_) if self.running => Err(IMPROPER_STATE),
            DroneRequest::Config(config) => {
                self.targets = config.config.target_frequencies.clone();
                self.configured = true;
                Ok(CONFIG_ACCEPTED)
            }
            DroneRequest::Start if self.configured && !self.running => {
                self.running = true;
                self.heard.clear();
                Ok(START_ACCEPTED)
            }
            DroneRequest::Stop if self.running => {
                self.running = false;
                Ok(STOP_ACCEPTED)
            }
            DroneRequest::Start | DroneRequest::Stop => Err(IMPROPER_STATE),
        }
    }

    /// Remember a ping and return the updated amplitude-weighted centroid
    /// once enough pings were heard.
    fn hear(
        &mut self,
        frequency: u32,
        lat: f64,
        long: f64,
        amplitude: f64,
    ) -> Option<(f64, f64)> {
        let pings = self.heard.entry(frequency).or_default();
        pings.push((lat, long, amplitude));
        if pings.len() < MIN_PINGS_FOR_ESTIMATE {
            return None;
        }
        let (mut sum_w, mut sum_lat, mut sum_long) = (0.0, 0.0, 0.0);
        for &(lat, long, amplitude) in pings.iter() {
            let w = 10f64.powf(amplitude / 10.0);
            sum_w += w;
            sum_lat += w * lat;
            sum_long += w * long;
        }
        (sum_w > 0.0).then(|| (sum_lat / sum_w, sum_long / sum_w))
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct SimulatedBackend {
    settings: SimulatorSettings,
    hub: SignalHub,
    session: Mutex<Option<JoinHandle<()>>>,
    responder: Mutex<Option<JoinHandle<()>>>,
    mission: Arc<Mutex<MissionSim>>,
    pois: Mutex<PoiStore>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(SimulatorSettings::default())
    }
}

impl SimulatedBackend {
    pub fn new(settings: SimulatorSettings) -> Self {
        Self {
            settings,
            hub: SignalHub::new(),
            session: Mutex::new(None),
            responder: Mutex::new(None),
            mission: Arc::new(Mutex::new(MissionSim::default())),
            pois: Mutex::new(PoiStore::new()),
        }
    }

    pub fn settings(&self) -> &SimulatorSettings {
        &self.settings
    }

    /// True while the simulated drone is syncing or streaming.
    pub async fn is_session_active(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// True while the simulated ping finder runs.
    pub async fn is_running(&self) -> bool {
        self.mission.lock().await.running
    }

    /// Drop the link from the drone side.
    pub async fn simulate_link_loss(&self) {
        if self.stop_session().await {
            warn!("Simulated drone link lost");
            self.hub.emit_drone_data(DroneDataUpdate::Disconnected);
            self.hub.emit_connection_status(DISCONNECTED_STATUS);
        }
    }

    /// Push an error or advisory as the field device would.
    pub fn report_error(&self, message: impl Into<String>) {
        self.hub.emit_error_message(message);
    }

    /// Abort the pending request's answer. Returns true if one was due.
    async fn stop_responder(&self) -> bool {
        match self.responder.lock().await.take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    async fn stop_session(&self) -> bool {
        self.stop_responder().await;
        *self.mission.lock().await = MissionSim::default();
        match self.session.lock().await.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        for handle in [self.session.get_mut().take(), self.responder.get_mut().take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

async fn run_session(
    hub: SignalHub,
    settings: SimulatorSettings,
    mission: Arc<Mutex<MissionSim>>,
    request: CommsRequest,
) {
    let ack_timeout = Duration::from_secs_f64(request.ack_timeout.max(0.0));
    hub.emit_connection_status(INITIALIZING_STATUS);

    if !settings.answers_sync {
        time::sleep(ack_timeout * request.max_retries).await;
        warn!("Sync ack not received => sync_timeout");
        hub.emit_sync_timeout();
        return;
    }

    time::sleep(Duration::from_millis(settings.sync_delay_ms)).await;
    if !settings.device_ready {
        hub.emit_error_message(NOT_READY_WARNING);
    }
    {
        let mut mission = mission.lock().await;
        mission.synced = true;
        mission.ack_window = ack_timeout * request.max_retries;
    }
    hub.emit_connection_status(SYNC_SUCCESS_STATUS);
    info!("Simulated drone synced");

    let mut tracker = LinkQualityTracker::new(ack_timeout, request.max_retries);
    let ping = Duration::from_millis(settings.ping_time_ms);
    let mut ticker = time::interval(Duration::from_millis(settings.telemetry_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut packet_id: u64 = 0;
    loop {
        ticker.tick().await;
        packet_id += 1;
        if settings.drop_every > 0 && packet_id % settings.drop_every == 0 {
            debug!("Dropping simulated packet {}", packet_id);
            continue;
        }
        let metrics = tracker.record_packet(packet_id, ping);
        let (lat, long) = settings.position_at(packet_id);
        hub.emit_drone_data(DroneDataUpdate::Snapshot(DroneTelemetrySnapshot::new(
            lat, long, &metrics,
        )));

        let mut sim = mission.lock().await;
        if sim.running {
            emit_tracking(&hub, &settings, &mut sim, packet_id);
        }
    }
}

/// GPS fix, then one ping per target, then any new estimates.
fn emit_tracking(
    hub: &SignalHub,
    settings: &SimulatorSettings,
    mission: &mut MissionSim,
    packet_id: u64,
) {
    let (lat, long) = settings.position_at(packet_id);
    let timestamp = unix_millis();
    hub.emit_gps(GpsData {
        lat,
        long,
        altitude: settings.altitude_m,
        heading: settings.heading_at(packet_id),
        timestamp,
        packet_id,
    });

    let targets = mission.targets.clone();
    for (index, frequency) in targets.into_iter().enumerate() {
        let amplitude = settings.amplitude_at((lat, long), settings.transmitter_at(index));
        hub.emit_ping(PingData {
            frequency,
            amplitude,
            lat,
            long,
            timestamp,
            packet_id,
        });
        if let Some((est_lat, est_long)) = mission.hear(frequency, lat, long, amplitude) {
            hub.emit_location_estimate(LocEstData {
                frequency,
                lat: est_lat,
                long: est_long,
                timestamp,
                packet_id,
            });
        }
    }
}

/// Answer one request after the configured delay, or report a timeout once
/// the ack window has passed when the drone is set to stay silent.
async fn answer_request(
    hub: SignalHub,
    settings: SimulatorSettings,
    mission: Arc<Mutex<MissionSim>>,
    request: DroneRequest,
    ack_window: Duration,
) {
    let kind = request.kind();
    if !settings.answers_requests {
        time::sleep(ack_window).await;
        warn!("No answer to {} request => {}_timeout", kind, kind);
        hub.emit_request_timeout(kind);
        return;
    }

    time::sleep(Duration::from_millis(settings.request_delay_ms)).await;
    let outcome = mission.lock().await.apply(&request);
    match outcome {
        Ok(message) => {
            info!("Simulated drone accepted {} request", kind);
            hub.emit_request_succeeded(kind, message);
        }
        Err(message) => {
            warn!("Simulated drone refused {} request", kind);
            hub.emit_request_failed(kind, message);
        }
    }
}

impl DeviceBackend for SimulatedBackend {
    fn get_serial_ports<'a>(&'a self) -> BackendFuture<'a, Vec<String>> {
        Box::pin(async { available_serial_ports() })
    }

    fn initialize_comms<'a>(&'a self, request: CommsRequest) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            if self.settings.refuse_config {
                warn!("Simulator refusing {} configuration", request.interface_type);
                return Ok(false);
            }
            if self.stop_session().await {
                debug!("Replacing previous simulated session");
            }
            info!(
                "Simulated link up via {} (ack timeout {}s, {} retries)",
                request.interface_type, request.ack_timeout, request.max_retries
            );
            *self.session.lock().await = Some(tokio::spawn(run_session(
                self.hub.clone(),
                self.settings.clone(),
                Arc::clone(&self.mission),
                request,
            )));
            Ok(true)
        })
    }

    fn cancel_connection<'a>(&'a self) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            if self.stop_session().await {
                info!("Simulated connection attempt cancelled");
            }
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            if !self.stop_session().await {
                return Err(NOT_CONNECTED.into());
            }
            self.hub.emit_drone_data(DroneDataUpdate::Disconnected);
            self.hub.emit_connection_status(DISCONNECTED_STATUS);
            Ok(())
        })
    }

    fn send_request<'a>(&'a self, request: DroneRequest) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            let ack_window = {
                let mission = self.mission.lock().await;
                if !mission.synced {
                    return Err(NOT_CONNECTED.into());
                }
                mission.ack_window
            };
            if self.stop_responder().await {
                debug!("Dropping unanswered request");
            }
            debug!("Simulated drone received {} request", request.kind());
            *self.responder.lock().await = Some(tokio::spawn(answer_request(
                self.hub.clone(),
                self.settings.clone(),
                Arc::clone(&self.mission),
                request,
                ack_window,
            )));
            Ok(true)
        })
    }

    fn cancel_request<'a>(&'a self, kind: RequestKind) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            if self.stop_responder().await {
                info!("Stopped waiting for {} response", kind);
            }
            Ok(())
        })
    }

    fn signals(&self) -> &SignalHub {
        &self.hub
    }
}

impl PoiBackend for SimulatedBackend {
    fn get_pois<'a>(&'a self) -> BackendFuture<'a, Vec<Poi>> {
        Box::pin(async move { Ok(self.pois.lock().await.list()) })
    }

    fn add_poi<'a>(&'a self, poi: Poi) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            let mut store = self.pois.lock().await;
            match store.add(poi) {
                Ok(()) => {
                    self.hub.emit_pois(store.list());
                    Ok(true)
                }
                Err(e) => {
                    warn!("Error adding POI: {}", e);
                    Ok(false)
                }
            }
        })
    }

    fn remove_poi<'a>(&'a self, name: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            let mut store = self.pois.lock().await;
            match store.remove(name) {
                Ok(_) => {
                    self.hub.emit_pois(store.list());
                    Ok(true)
                }
                Err(e) => {
                    warn!("Error removing POI: {}", e);
                    Ok(false)
                }
            }
        })
    }

    fn rename_poi<'a>(&'a self, old: &'a str, new: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            let mut store = self.pois.lock().await;
            match store.rename(old, new) {
                Ok(()) => {
                    self.hub.emit_pois(store.list());
                    Ok(true)
                }
                Err(e) => {
                    warn!("Error renaming POI: {}", e);
                    Ok(false)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtt_core::comms::controller::{BackendSignal, CONNECT_FAILED_MESSAGE};
    use rtt_core::{
        ConnectionConfig, ConnectionController, ConnectionQuality, ConnectionState, MissionStage,
        PhaseKind, PingFinderConfig, PoiManager, TrackingData, UserCommand,
    };
    use tokio::sync::mpsc;

    const MAX_STEPS: usize = 32;

    fn config() -> ConnectionConfig {
        ConnectionConfig::simulated("localhost", 50_000).with_timing(1_000, 3)
    }

    fn request() -> CommsRequest {
        config().to_request()
    }

    async fn drive_until(
        controller: &mut ConnectionController<SimulatedBackend>,
        done: impl Fn(&ConnectionController<SimulatedBackend>) -> bool,
    ) {
        for _ in 0..MAX_STEPS {
            if done(controller) {
                return;
            }
            assert!(controller.process_next().await, "backend went away");
        }
        panic!("condition not reached, state: {:?}", controller.state());
    }

    async fn connected_controller(
        backend: &Arc<SimulatedBackend>,
    ) -> ConnectionController<SimulatedBackend> {
        let mut controller = ConnectionController::new(Arc::clone(backend));
        controller.connect(&config()).unwrap();
        drive_until(&mut controller, |c| c.state().phase == PhaseKind::Connected).await;
        controller
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(SimulatorSettings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = SimulatorSettings {
            telemetry_interval_ms: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        settings.telemetry_interval_ms = 100;
        settings.home = [91.0, 0.0];
        assert!(settings.validate().unwrap_err().contains("home"));
        settings.home = [0.0, 0.0];
        settings.orbit_radius_deg = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_orbit_wraps() {
        let settings = SimulatorSettings::default();
        assert_eq!(settings.position_at(0), settings.position_at(ORBIT_STEPS));
        let (lat, lng) = settings.position_at(0);
        assert_eq!(lat, settings.home[0]);
        assert!((lng - settings.home[1] - settings.orbit_radius_deg).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_then_telemetry() {
        let backend = SimulatedBackend::default();
        let mut sub = backend.signals().subscribe();

        assert!(backend.initialize_comms(request()).await.unwrap());
        assert_eq!(
            sub.recv().await,
            Some(BackendSignal::ConnectionStatus(INITIALIZING_STATUS.to_string()))
        );
        assert_eq!(
            sub.recv().await,
            Some(BackendSignal::ConnectionStatus(SYNC_SUCCESS_STATUS.to_string()))
        );
        match sub.recv().await {
            Some(BackendSignal::DroneDataUpdated(DroneDataUpdate::Snapshot(s))) => {
                assert_eq!(s.ping_time_ms, 120);
                assert_eq!(s.packet_loss_pct, 0.0);
            }
            other => panic!("expected telemetry, got {:?}", other),
        }
        assert!(backend.is_session_active().await);

        backend.disconnect().await.unwrap();
        assert!(!backend.is_session_active().await);
        assert_eq!(
            sub.recv().await,
            Some(BackendSignal::DroneDataUpdated(DroneDataUpdate::Disconnected))
        );
        assert_eq!(
            sub.recv().await,
            Some(BackendSignal::ConnectionStatus(DISCONNECTED_STATUS.to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_drone_times_out() {
        let backend = SimulatedBackend::new(SimulatorSettings {
            answers_sync: false,
            ..Default::default()
        });
        let mut sub = backend.signals().subscribe();
        let started = time::Instant::now();

        assert!(backend.initialize_comms(request()).await.unwrap());
        sub.recv().await;
        assert_eq!(sub.recv().await, Some(BackendSignal::SyncTimeout));
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_refused_config() {
        let backend = SimulatedBackend::new(SimulatorSettings {
            refuse_config: true,
            ..Default::default()
        });
        assert!(!backend.initialize_comms(request()).await.unwrap());
        assert!(!backend.is_session_active().await);
    }

    #[tokio::test]
    async fn test_disconnect_without_session_fails() {
        let backend = SimulatedBackend::default();
        assert!(backend.disconnect().await.is_err());
        assert!(backend.cancel_connection().await.is_ok());
    }

    #[tokio::test]
    async fn test_poi_changes_are_pushed() {
        let backend = SimulatedBackend::default();
        let mut sub = backend.signals().subscribe();

        assert!(backend.add_poi(Poi::new("camp", 1.0, 2.0)).await.unwrap());
        assert_eq!(
            sub.try_recv(),
            Some(BackendSignal::PoisUpdated(vec![Poi::new("camp", 1.0, 2.0)]))
        );

        assert!(!backend.add_poi(Poi::new("sea", 0.0, 200.0)).await.unwrap());
        assert!(!backend.remove_poi("sea").await.unwrap());
        assert_eq!(sub.try_recv(), None);

        assert!(backend.rename_poi("camp", "base").await.unwrap());
        assert_eq!(
            sub.try_recv(),
            Some(BackendSignal::PoisUpdated(vec![Poi::new("base", 1.0, 2.0)]))
        );
        assert!(backend.remove_poi("base").await.unwrap());
        assert_eq!(sub.try_recv(), Some(BackendSignal::PoisUpdated(vec![])));
    }

    #[test]
    fn test_amplitude_falls_with_distance() {
        let settings = SimulatorSettings::default();
        let tx = settings.transmitter_at(0);
        let above = settings.amplitude_at(tx, tx);
        let far = settings.amplitude_at((tx.0 + 0.01, tx.1), tx);
        // Directly above: 30 m of altitude only.
        assert!((above - (TX_POWER_DB - 20.0 * 30f64.log10())).abs() < 1e-9);
        assert!(far < above);
    }

    #[test]
    fn test_heading_follows_orbit() {
        let settings = SimulatorSettings::default();
        assert_eq!(settings.heading_at(0), 0.0);
        assert!((settings.heading_at(ORBIT_STEPS / 4) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_mission_request_order() {
        let mut mission = MissionSim::default();
        assert_eq!(mission.apply(&DroneRequest::Start), Err(IMPROPER_STATE));
        assert_eq!(mission.apply(&DroneRequest::Stop), Err(IMPROPER_STATE));

        let cfg = DroneRequest::Config(PingFinderConfig::default().to_request(1));
        assert_eq!(mission.apply(&cfg), Ok(CONFIG_ACCEPTED));
        assert_eq!(mission.targets, vec![173_043_000]);
        assert_eq!(mission.apply(&DroneRequest::Start), Ok(START_ACCEPTED));
        assert_eq!(mission.apply(&cfg), Err(IMPROPER_STATE));
        assert_eq!(mission.apply(&DroneRequest::Start), Err(IMPROPER_STATE));
        assert_eq!(mission.apply(&DroneRequest::Stop), Ok(STOP_ACCEPTED));
    }

    #[test]
    fn test_estimate_needs_enough_pings() {
        let mut mission = MissionSim::default();
        for i in 0..MIN_PINGS_FOR_ESTIMATE - 1 {
            assert!(mission.hear(1, i as f64, 0.0, 10.0).is_none());
        }
        // Equal amplitudes give the plain centroid.
        let (lat, long) = mission.hear(1, 3.0, 4.0, 10.0).unwrap();
        assert!((lat - 1.5).abs() < 1e-9);
        assert!((long - 1.0).abs() < 1e-9);

        // The louder ping pulls the estimate towards it.
        let (lat, _) = mission.hear(1, 10.0, 0.0, 40.0).unwrap();
        assert!(lat > 9.0);
        assert!(mission.hear(2, 0.0, 0.0, 10.0).is_none());
    }

    #[tokio::test]
    async fn test_request_needs_synced_drone() {
        let backend = SimulatedBackend::default();
        let err = backend.send_request(DroneRequest::Start).await.unwrap_err();
        assert_eq!(err.to_string(), NOT_CONNECTED);
        assert!(backend.cancel_request(RequestKind::Start).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_stream_and_disconnect() {
        let backend = Arc::new(SimulatedBackend::default());
        let mut controller = ConnectionController::new(Arc::clone(&backend));

        controller.connect(&config()).unwrap();
        drive_until(&mut controller, |c| c.state().phase == PhaseKind::Connected).await;
        assert_eq!(controller.state().status_text, SYNC_SUCCESS_STATUS);
        assert!(!controller.state().has_error());

        drive_until(&mut controller, |c| c.telemetry().is_some()).await;
        let telemetry = controller.telemetry().unwrap();
        assert_eq!(telemetry.connection_quality, ConnectionQuality::Great);
        assert_eq!(telemetry.ping_time_ms, 120);

        controller.disconnect().unwrap();
        assert_eq!(controller.state().phase, PhaseKind::Idle);
        assert!(controller.telemetry().is_none());

        drive_until(&mut controller, |c| {
            c.state().status_text == DISCONNECTED_STATUS
        })
        .await;
        assert!(controller.telemetry().is_none());
        assert!(!backend.is_session_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_drone_offers_cancel() {
        let backend = Arc::new(SimulatedBackend::new(SimulatorSettings {
            answers_sync: false,
            ..Default::default()
        }));
        let mut controller = ConnectionController::new(Arc::clone(&backend));
        let started = time::Instant::now();

        controller.connect(&config()).unwrap();
        drive_until(&mut controller, |c| c.state().cancel_available).await;
        assert_eq!(started.elapsed(), Duration::from_millis(3_000));
        assert_eq!(controller.state().phase, PhaseKind::WaitingForSync);

        controller.cancel().unwrap();
        assert_eq!(controller.state(), ConnectionState::default());

        // The other timeout source firing afterwards changes nothing.
        time::sleep(Duration::from_secs(5)).await;
        controller.process_pending();
        assert_eq!(controller.state(), ConnectionState::default());
    }

    #[tokio::test]
    async fn test_refused_configuration_fails_attempt() {
        let backend = Arc::new(SimulatedBackend::new(SimulatorSettings {
            refuse_config: true,
            ..Default::default()
        }));
        let mut controller = ConnectionController::new(Arc::clone(&backend));

        controller.connect(&config()).unwrap();
        drive_until(&mut controller, |c| c.state().phase == PhaseKind::Failed).await;
        assert_eq!(controller.state().error_message, CONNECT_FAILED_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_drone_still_connects_with_warning() {
        let backend = Arc::new(SimulatedBackend::new(SimulatorSettings {
            device_ready: false,
            ..Default::default()
        }));
        let mut controller = ConnectionController::new(Arc::clone(&backend));

        controller.connect(&config()).unwrap();
        drive_until(&mut controller, |c| c.state().phase == PhaseKind::Connected).await;
        let state = controller.state();
        assert_eq!(state.error_message, NOT_READY_WARNING);
        assert!(!state.has_fatal_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_during_sync_fails_attempt() {
        let backend = Arc::new(SimulatedBackend::new(SimulatorSettings {
            sync_delay_ms: 2_000,
            ..Default::default()
        }));
        let mut controller = ConnectionController::new(Arc::clone(&backend));

        controller.connect(&config()).unwrap();
        drive_until(&mut controller, |c| {
            c.state().phase == PhaseKind::WaitingForSync
        })
        .await;
        backend.report_error("A fatal error occurred on the field device software.");
        drive_until(&mut controller, |c| c.state().phase == PhaseKind::Failed).await;

        // Retrying from Failed is allowed.
        controller.connect(&config()).unwrap();
        drive_until(&mut controller, |c| c.state().phase == PhaseKind::Connected).await;
        assert!(!controller.state().has_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_returns_to_idle() {
        let backend = Arc::new(SimulatedBackend::default());
        let mut controller = ConnectionController::new(Arc::clone(&backend));

        controller.connect(&config()).unwrap();
        drive_until(&mut controller, |c| c.telemetry().is_some()).await;

        backend.simulate_link_loss().await;
        drive_until(&mut controller, |c| c.state().phase == PhaseKind::Idle).await;
        assert!(controller.telemetry().is_none());
        assert_eq!(controller.state().status_text, DISCONNECTED_STATUS);
    }

    #[tokio::test]
    async fn test_run_loop_with_commands() {
        let backend = Arc::new(SimulatedBackend::new(SimulatorSettings {
            sync_delay_ms: 10,
            ..Default::default()
        }));
        let controller = ConnectionController::new(Arc::clone(&backend));
        let mut state_rx = controller.subscribe_state();
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let task = tokio::spawn(controller.run(cmd_rx));

        cmd_tx
            .send(UserCommand::Connect(config()))
            .await
            .unwrap();
        state_rx
            .wait_for(|s| s.phase == PhaseKind::Connected)
            .await
            .unwrap();

        cmd_tx.send(UserCommand::Disconnect).await.unwrap();
        state_rx
            .wait_for(|s| s.phase == PhaseKind::Idle)
            .await
            .unwrap();

        drop(cmd_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_poi_manager_over_simulator() {
        let backend = Arc::new(SimulatedBackend::default());
        let mut pushed = backend.signals().subscribe();
        let mut manager = PoiManager::new(Arc::clone(&backend));

        assert!(manager.add(Poi::new("antenna", 32.88, -117.23)).await.unwrap());
        assert!(manager.add(Poi::new("camp", 32.87, -117.22)).await.unwrap());
        assert!(manager.rename("camp", "base").await.unwrap());
        assert!(!manager.rename("base", "antenna").await.unwrap());

        let names: Vec<_> = manager.pois().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["antenna", "base"]);

        // A second view mirrors the pushed list.
        let mut mirror = PoiManager::new(Arc::clone(&backend));
        while let Some(signal) = pushed.try_recv() {
            mirror.handle_signal(&signal);
        }
        assert_eq!(mirror.pois(), manager.pois());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_run_streams_estimates() {
        let backend = Arc::new(SimulatedBackend::default());
        let mut tracking_sub = backend.signals().subscribe();
        let mut controller = connected_controller(&backend).await;

        controller.configure(&PingFinderConfig::default()).unwrap();
        drive_until(&mut controller, |c| {
            c.state().mission == MissionStage::Configured
        })
        .await;
        assert_eq!(controller.state().request_status, CONFIG_ACCEPTED);

        controller.start().unwrap();
        drive_until(&mut controller, |c| c.state().mission == MissionStage::Running).await;
        assert_eq!(controller.state().request_status, START_ACCEPTED);
        assert!(backend.is_running().await);

        let mut data = TrackingData::new();
        for _ in 0..MAX_STEPS * 2 {
            while let Some(signal) = tracking_sub.try_recv() {
                data.handle_signal(&signal);
            }
            if data.estimate(173_043_000).is_some() {
                break;
            }
            assert!(controller.process_next().await);
        }
        let estimate = data.estimate(173_043_000).cloned().unwrap();
        assert!(data.pings(173_043_000).len() >= MIN_PINGS_FOR_ESTIMATE);
        assert_eq!(data.gps().unwrap().altitude, 30.0);

        // The estimate lies within the drone's orbit.
        let settings = backend.settings();
        assert!((estimate.lat - settings.home[0]).abs() <= settings.orbit_radius_deg);
        assert!((estimate.long - settings.home[1]).abs() <= settings.orbit_radius_deg);

        controller.stop().unwrap();
        drive_until(&mut controller, |c| {
            c.state().mission == MissionStage::Configured
        })
        .await;
        assert_eq!(controller.state().request_status, STOP_ACCEPTED);
        assert!(!backend.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_drone_request_offers_cancel() {
        let backend = Arc::new(SimulatedBackend::new(SimulatorSettings {
            answers_requests: false,
            ..Default::default()
        }));
        let mut controller = connected_controller(&backend).await;
        let started = time::Instant::now();

        controller.configure(&PingFinderConfig::default()).unwrap();
        drive_until(&mut controller, |c| c.state().request_cancel_available).await;
        assert_eq!(started.elapsed(), Duration::from_millis(3_000));

        controller.cancel_request().unwrap();
        let state = controller.state();
        assert_eq!(state.pending_request, None);
        assert_eq!(state.mission, MissionStage::Unconfigured);
        assert_eq!(state.phase, PhaseKind::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_ends_run() {
        let backend = Arc::new(SimulatedBackend::default());
        let mut controller = connected_controller(&backend).await;
        controller.configure(&PingFinderConfig::default()).unwrap();
        drive_until(&mut controller, |c| {
            c.state().mission == MissionStage::Configured
        })
        .await;

        controller.disconnect().unwrap();
        assert_eq!(controller.state().mission, MissionStage::Unconfigured);
        drive_until(&mut controller, |c| {
            c.state().status_text == DISCONNECTED_STATUS
        })
        .await;

        // A new session starts unconfigured on both ends.
        let mut controller = connected_controller(&backend).await;
        assert!(controller.start().is_err());
        assert!(!backend.is_running().await);
        controller.configure(&PingFinderConfig::default()).unwrap();
        drive_until(&mut controller, |c| {
            c.state().mission == MissionStage::Configured
        })
        .await;
    }
}
