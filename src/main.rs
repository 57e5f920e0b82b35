mod domain;
mod infrastructure;
mod presentation;

use crate::domain::display::{drain_events, EventReceiver};
use crate::domain::models::{BluetoothCommand, ConnectionState};
use crate::domain::service_kind::ServiceKind;
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::simulated::SimulatedRadio;
use crate::infrastructure::bluetooth::{run_command_loop, BluetoothService};
use crate::presentation::console::ConsoleDisplay;
use anyhow::Context;
use clap::{ArgAction, Parser};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Parser)]
#[command(name = "ble_toolkit", version, about = "Scan, connect and watch BLE services")]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address of the peer to connect to
    #[arg(long)]
    device: Option<String>,

    /// Service to watch after connecting (uart or json)
    #[arg(long)]
    service: Option<ServiceKind>,

    /// Text line to write to the selected service once it is shown
    #[arg(long)]
    send: Option<String>,

    /// How long to scan before connecting
    #[arg(long, default_value_t = 5)]
    scan_secs: u64,

    /// How long to watch the selected service
    #[arg(long, default_value_t = 10)]
    watch_secs: u64,

    /// Use the built-in simulated radio
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    simulated: bool,
}

type Console = ConsoleDisplay<std::io::Stdout>;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_service = match &cli.config {
        Some(path) => SettingsService::with_path(path.clone()),
        None => SettingsService::new()?,
    };

    let _logging_guard = infrastructure::logging::init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting BLE toolkit");

    if !cli.simulated {
        anyhow::bail!("no hardware radio backend in this build, run with --simulated true");
    }

    let connect_budget = {
        let s = settings_service.get();
        s.connect_timeout() + s.busy_retry_delay() * (s.max_busy_retries + 1)
            + Duration::from_secs(1)
    };
    let last_connected = settings_service.get().last_connected_address.clone();
    let settings = Arc::new(Mutex::new(settings_service));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let bt_settings = settings.clone();

    let bt_thread = std::thread::spawn(move || -> anyhow::Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create tokio runtime for Bluetooth")?;

        rt.block_on(async move {
            let radio = Arc::new(SimulatedRadio::new());
            let service = BluetoothService::new(event_tx, bt_settings, radio.clone(), radio)?;
            run_command_loop(service, cmd_rx).await;
            Ok(())
        })
    });

    let mut display = ConsoleDisplay::stdout();
    let send = |cmd: BluetoothCommand| {
        if cmd_tx.send(cmd).is_err() {
            warn!("Bluetooth thread is gone");
        }
    };

    send(BluetoothCommand::StartScan);
    pump(&mut event_rx, &mut display, Duration::from_secs(cli.scan_secs));
    send(BluetoothCommand::StopScan);
    pump(&mut event_rx, &mut display, DRAIN_INTERVAL);

    match choose_peer(&display, cli.device.as_deref(), last_connected.as_deref()) {
        Some(address) => {
            info!(%address, "Connecting");
            send(BluetoothCommand::SelectPeer(address));
            send(BluetoothCommand::Connect);

            if wait_for_connection(&mut event_rx, &mut display, connect_budget) {
                let selected = match cli.service {
                    Some(kind) => display.services().iter().find(|s| s.kind == kind),
                    None => display.services().first(),
                };
                match selected.map(|s| s.id) {
                    Some(id) => {
                        send(BluetoothCommand::SelectService(id));
                        if let Some(text) = &cli.send {
                            send(BluetoothCommand::WriteService(id, format!("{}\n", text).into_bytes()));
                        }
                        pump(&mut event_rx, &mut display, Duration::from_secs(cli.watch_secs));
                    }
                    None => warn!("No matching service offered by the peer"),
                }
                send(BluetoothCommand::Disconnect);
                pump(&mut event_rx, &mut display, DRAIN_INTERVAL);
            }
        }
        None => warn!("No connectable peer found"),
    }

    send(BluetoothCommand::Shutdown);
    match bt_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Bluetooth thread failed: {:#}", e),
        Err(_) => error!("Bluetooth thread panicked"),
    }
    drain_events(&mut event_rx, &mut display);
    std::io::stdout().flush()?;

    info!("BLE toolkit stopped");
    Ok(())
}

/// Drain events for `duration`, the way a UI frame loop would.
fn pump(rx: &mut EventReceiver, display: &mut Console, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        drain_events(rx, display);
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(DRAIN_INTERVAL.min(deadline - now));
    }
}

/// Returns true once connected; false if the attempt ended in Idle or the
/// budget ran out.
fn wait_for_connection(rx: &mut EventReceiver, display: &mut Console, budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    let mut attempted = false;
    while Instant::now() < deadline {
        drain_events(rx, display);
        match display.state() {
            ConnectionState::Connected if display.peer().is_some() => return true,
            ConnectionState::Connecting => attempted = true,
            ConnectionState::Idle if attempted => return false,
            _ => {}
        }
        std::thread::sleep(DRAIN_INTERVAL);
    }
    warn!("Gave up waiting for the connection");
    false
}

/// Requested peer, else the last connected one if visible, else the first
/// connectable one.
fn choose_peer(
    display: &Console,
    requested: Option<&str>,
    last_connected: Option<&str>,
) -> Option<String> {
    if let Some(address) = requested {
        return Some(address.to_string());
    }
    last_connected
        .filter(|address| display.devices().contains_key(*address))
        .or_else(|| display.first_connectable())
        .map(str::to_string)
}
