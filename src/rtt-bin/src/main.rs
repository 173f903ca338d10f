// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration};
use tracing::{error, info, warn};

mod config;

use crate::config::Config;
use rtt_app::{init_logging, ConfigFile};
use rtt_backend::{available_serial_ports, SimulatedBackend};
use rtt_core::{
    ConnectionConfig, ConnectionController, ConnectionState, DeviceBackend,
    DroneTelemetrySnapshot, DynResult, InterfaceType, MissionStage, PhaseKind, PingFinderConfig,
    Poi, PoiManager, TrackingData, UserCommand,
};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - ", env!("CARGO_PKG_DESCRIPTION"));

/// Time allowed for the controller to settle after the last command.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(version = env!("CARGO_PKG_VERSION"), about = PKG_DESCRIPTION)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Override [general].log_level
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List serial ports available on this host
    Ports,
    /// Connect to the drone and report state, telemetry and tracking data as JSON lines
    Connect(ConnectArgs),
    /// Edit points of interest and print the resulting list
    Poi(PoiArgs),
}

#[derive(Debug, Args)]
struct ConnectArgs {
    /// Interface type: serial or simulated
    #[arg(short = 'i', long = "interface")]
    interface: Option<InterfaceType>,
    /// Serial port path
    #[arg(short = 'p', long = "port")]
    port: Option<String>,
    /// Serial baud rate
    #[arg(short = 'b', long = "baud")]
    baud: Option<u32>,
    /// Simulator host
    #[arg(long = "host")]
    host: Option<String>,
    /// Simulator TCP port
    #[arg(long = "tcp-port")]
    tcp_port: Option<u16>,
    /// Per-packet acknowledgement timeout in milliseconds
    #[arg(long = "ack-timeout-ms")]
    ack_timeout_ms: Option<u32>,
    /// Maximum retries per packet
    #[arg(long = "max-retries")]
    max_retries: Option<u32>,
    /// Disconnect after this many seconds connected (runs until Ctrl-C if unset)
    #[arg(short = 'd', long = "duration")]
    duration: Option<u64>,
    /// Cancel automatically once the sync answer is overdue
    #[arg(long = "cancel-on-timeout")]
    cancel_on_timeout: bool,
    /// Configure and start the ping finder once connected
    #[arg(short = 's', long = "start")]
    start: bool,
    /// Target frequency in Hz, repeatable (replaces [ping_finder].target_frequencies)
    #[arg(short = 'f', long = "target", value_name = "HZ")]
    targets: Vec<u32>,
}

#[derive(Debug, Args)]
struct PoiArgs {
    /// Add or move a POI: NAME:LAT,LNG
    #[arg(long = "add", value_name = "NAME:LAT,LNG", value_parser = parse_poi)]
    add: Vec<Poi>,
    /// Rename a POI: OLD=NEW
    #[arg(long = "rename", value_name = "OLD=NEW", value_parser = parse_rename)]
    rename: Vec<(String, String)>,
    /// Remove a POI by name
    #[arg(long = "remove", value_name = "NAME")]
    remove: Vec<String>,
}

/// Parse "<name>:<lat>,<lng>".
fn parse_poi(s: &str) -> Result<Poi, String> {
    let (name, coords) = s
        .rsplit_once(':')
        .ok_or("POI must be 'NAME:LAT,LNG'")?;
    let (lat, lng) = coords
        .split_once(',')
        .ok_or("POI coordinates must be 'LAT,LNG'")?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|e| format!("Invalid latitude '{}': {}", lat, e))?;
    let lng: f64 = lng
        .trim()
        .parse()
        .map_err(|e| format!("Invalid longitude '{}': {}", lng, e))?;
    Ok(Poi::new(name.trim(), lat, lng))
}

/// Parse "<old>=<new>".
fn parse_rename(s: &str) -> Result<(String, String), String> {
    let (old, new) = s.split_once('=').ok_or("Rename must be 'OLD=NEW'")?;
    Ok((old.trim().to_string(), new.trim().to_string()))
}

/// Apply CLI overrides on top of the configured form values.
fn resolve_connection(args: &ConnectArgs, base: &ConnectionConfig) -> ConnectionConfig {
    let mut cfg = base.clone();
    if let Some(interface) = args.interface {
        cfg.interface_type = interface;
    }
    if let Some(ref port) = args.port {
        cfg.selected_port = port.clone();
    }
    if args.baud.is_some() {
        cfg.baud_rate = args.baud;
    }
    if let Some(ref host) = args.host {
        cfg.host = host.clone();
    }
    if args.tcp_port.is_some() {
        cfg.tcp_port = args.tcp_port;
    }
    if let Some(ms) = args.ack_timeout_ms {
        cfg.ack_timeout_ms = ms;
    }
    if let Some(retries) = args.max_retries {
        cfg.max_retries = retries;
    }
    cfg
}

fn resolve_ping_finder(args: &ConnectArgs, base: &PingFinderConfig) -> PingFinderConfig {
    let mut cfg = base.clone();
    if !args.targets.is_empty() {
        cfg.target_frequencies = args.targets.clone();
    }
    cfg
}

/// Next request that moves a `--start` run forward, if any is due.
fn next_run_command(
    state: &ConnectionState,
    ping_finder: &PingFinderConfig,
    started: bool,
) -> Option<UserCommand> {
    if state.phase != PhaseKind::Connected || state.pending_request.is_some() {
        return None;
    }
    match state.mission {
        MissionStage::Unconfigured if !started => {
            Some(UserCommand::Configure(ping_finder.clone()))
        }
        MissionStage::Configured if !started => Some(UserCommand::Start),
        _ => None,
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to encode output: {}", e),
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", Config::example_combined_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = Config::load(cli.config.as_deref())?;
    if cli.log_level.is_some() {
        cfg.general.log_level = cli.log_level.clone();
    }
    cfg.validate()
        .map_err(|e| format!("Invalid rtt-gcs configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    match cli.command {
        None | Some(Command::Ports) => {
            for port in available_serial_ports()? {
                println!("{}", port);
            }
            Ok(())
        }
        Some(Command::Connect(args)) => run_session(&cfg, &args).await,
        Some(Command::Poi(args)) => edit_pois(&cfg, args).await,
    }
}

async fn run_session(cfg: &Config, args: &ConnectArgs) -> DynResult<()> {
    let conn = resolve_connection(args, &cfg.connection);
    conn.validate()?;
    let ping_finder = resolve_ping_finder(args, &cfg.ping_finder);
    if args.start {
        ping_finder.validate()?;
    }
    if conn.interface_type == InterfaceType::Serial {
        warn!("No radio backend is built in; serial sessions run against the simulator");
    }

    let backend = Arc::new(SimulatedBackend::new(cfg.simulator.clone()));
    let controller = ConnectionController::new(Arc::clone(&backend));
    let mut state_rx = controller.subscribe_state();
    let mut telemetry_rx = controller.subscribe_telemetry();
    let mut tracking_sub = backend.signals().subscribe();
    let mut tracking = TrackingData::new();

    let (cmd_tx, cmd_rx) = mpsc::channel::<UserCommand>(8);
    let controller_task = tokio::spawn(controller.run(cmd_rx));
    cmd_tx.send(UserCommand::Connect(conn)).await?;

    let run_for = args.duration.map(Duration::from_secs);
    let mut connected_at: Option<time::Instant> = None;
    let mut cancel_sent = false;
    // Set once the ping finder ran, or a request of the run failed.
    let mut started = false;

    loop {
        let deadline = match (run_for, connected_at) {
            (Some(d), Some(t)) => Some(t + d),
            _ => None,
        };
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                let state = state_rx.borrow().clone();
                match state.phase {
                    PhaseKind::Connected => cmd_tx.send(UserCommand::Disconnect).await?,
                    PhaseKind::Connecting | PhaseKind::WaitingForSync => {
                        cmd_tx.send(UserCommand::Cancel).await?
                    }
                    _ => {}
                }
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                print_json(&state);
                match state.phase {
                    PhaseKind::Connected if connected_at.is_none() => {
                        connected_at = Some(time::Instant::now());
                    }
                    PhaseKind::Failed => {
                        error!("Connection failed: {}", state.error_message);
                        break;
                    }
                    PhaseKind::Idle if connected_at.is_some() => {
                        info!("Session ended");
                        break;
                    }
                    _ => {}
                }
                if args.cancel_on_timeout && state.cancel_available && !cancel_sent {
                    warn!("Drone did not answer in time, cancelling");
                    cmd_tx.send(UserCommand::Cancel).await?;
                    cancel_sent = true;
                }
                if cancel_sent && state.phase == PhaseKind::Idle {
                    break;
                }
                if args.start {
                    if state.mission == MissionStage::Running {
                        started = true;
                    } else if state.phase == PhaseKind::Connected && state.has_fatal_error() {
                        warn!("Ping finder run abandoned: {}", state.error_message);
                        started = true;
                    } else if state.request_cancel_available && !started {
                        warn!("Drone did not answer the request, giving up");
                        cmd_tx.send(UserCommand::CancelRequest).await?;
                        started = true;
                    }
                    if let Some(command) = next_run_command(&state, &ping_finder, started) {
                        cmd_tx.send(command).await?;
                    }
                }
            }
            signal = tracking_sub.recv() => match signal {
                Some(signal) => {
                    if let Some(update) = tracking.handle_signal(&signal) {
                        print_json(&update);
                    }
                }
                None => break,
            },
            changed = telemetry_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot: Option<DroneTelemetrySnapshot> = telemetry_rx.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    print_json(&snapshot);
                }
            }
            _ = sleep_until_opt(deadline) => {
                info!("Session duration elapsed, disconnecting");
                cmd_tx.send(UserCommand::Disconnect).await?;
                break;
            }
        }
    }

    wait_for_rest(&mut state_rx).await;
    drop(cmd_tx);
    controller_task.await?;
    tracking.clear_gps();
    info!(
        "Heard {} pings on {} frequencies",
        tracking.ping_count(),
        tracking.frequencies().len()
    );

    let last = state_rx.borrow().clone();
    if last.phase == PhaseKind::Failed {
        return Err(last.error_message.into());
    }
    Ok(())
}

async fn sleep_until_opt(deadline: Option<time::Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Give queued commands a moment to land before the controller stops.
async fn wait_for_rest(state_rx: &mut watch::Receiver<ConnectionState>) {
    let settled = time::timeout(
        SHUTDOWN_GRACE,
        state_rx.wait_for(|s| matches!(s.phase, PhaseKind::Idle | PhaseKind::Failed)),
    )
    .await;
    if settled.is_err() {
        warn!("Controller did not settle within {:?}", SHUTDOWN_GRACE);
    }
}

async fn edit_pois(cfg: &Config, args: PoiArgs) -> DynResult<()> {
    let backend = Arc::new(SimulatedBackend::new(cfg.simulator.clone()));
    let mut manager = PoiManager::new(backend);

    for poi in args.add {
        let name = poi.name.clone();
        if !manager.add(poi).await? {
            warn!("POI '{}' was not added", name);
        }
    }
    for (old, new) in args.rename {
        if !manager.rename(&old, &new).await? {
            warn!("POI '{}' was not renamed to '{}'", old, new);
        }
    }
    for name in args.remove {
        if !manager.remove(&name).await? {
            warn!("POI '{}' was not removed", name);
        }
    }

    print_json(&manager.pois());
    Ok(())
}
