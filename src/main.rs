//! KeyMidi - translate keyboard and HID input into MIDI messages

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keymidi::cli;
use keymidi::config::{AppConfig, MidiConfig};
use keymidi::input::hid::{HidEvent, HidPoller};
use keymidi::input::keyboard::KeyboardHook;
use keymidi::mapping::{MappingError, MappingStore, MappingUpdate, MappingWatcher};
use keymidi::midi::{MidiPort, MidiSink};
use keymidi::monitor::{MonitorView, Notification, Notifier};
use keymidi::paths::AppPaths;
use keymidi::Pipeline;

/// KeyMidi - turn key presses and HID controls into MIDI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the detected data directory)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI output ports
    #[arg(long)]
    list_ports: bool,

    /// List attached HID devices
    #[arg(long)]
    list_devices: bool,

    /// Print raw input events and sent MIDI messages
    #[arg(long)]
    monitor: bool,

    /// MIDI output port name (overrides the config)
    #[arg(short, long)]
    port: Option<String>,
}

/// Capacity of the poller → event loop queue
const HID_EVENT_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut paths = match &args.config {
        Some(config) => AppPaths::with_config(config),
        None => AppPaths::detect(),
    };
    paths
        .ensure_directories()
        .context("Failed to create data directories")?;

    let _log_guard = init_logging(&args.log_level, &paths.logs_dir)?;

    info!("Starting KeyMidi v{}...", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {}", paths.base_dir().display());

    let config = AppConfig::load_or_default(&paths.config).await?;
    paths.apply_mapping_files(&config.mappings.key_file, &config.mappings.hid_file);

    if args.list_ports {
        cli::list_ports_formatted(&config.midi.client_name);
        return Ok(());
    }

    if args.list_devices {
        cli::list_devices_formatted();
        return Ok(());
    }

    let store = load_mappings(&paths).await;

    let monitor_enabled = args.monitor || config.monitor.enabled;
    let (notifier, monitor_thread) = if monitor_enabled {
        let (notifier, rx) = Notifier::channel(config.monitor.capacity);
        let view = MonitorView::new(config.monitor.ignore_repeats);
        let handle = cli::spawn_monitor(rx, view).context("Failed to start monitor thread")?;
        (notifier, Some(handle))
    } else {
        (Notifier::disabled(), None)
    };

    let sink = open_midi_output(&config.midi, args.port.as_deref());
    let pipeline = Pipeline::new(store, sink, notifier);

    run_app(pipeline, &config, &paths, shutdown_signal()).await?;

    if let Some(handle) = monitor_thread {
        match handle.join() {
            Ok(count) => info!("Monitor displayed {} input events", count),
            Err(_) => warn!("Monitor thread panicked"),
        }
    }

    info!("KeyMidi shutdown complete");
    Ok(())
}

async fn run_app(
    mut pipeline: Pipeline,
    config: &AppConfig,
    paths: &AppPaths,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    info!("Starting main application loop...");

    // Keyboard hook
    let (mut hook, mut key_rx) = KeyboardHook::channel(config.keyboard.queue_capacity);
    hook.set_suppressed_keys(pipeline.store().suppressed_keys());
    if config.keyboard.enabled {
        if let Err(e) = hook.install() {
            warn!("Keyboard capture unavailable: {}", e);
            pipeline.notifier().notify(Notification::HookUnavailable {
                reason: e.to_string(),
            });
        }
    } else {
        info!("Keyboard capture disabled in config");
    }

    // HID pollers
    let (hid_tx, mut hid_rx) = mpsc::channel::<HidEvent>(HID_EVENT_CAPACITY);
    let mut pollers: BTreeMap<String, HidPoller> = BTreeMap::new();
    open_pollers(&mut pollers, wanted_devices(config, &pipeline), config, &hid_tx, pipeline.notifier());

    // Mapping hot reload
    let mut watcher = if config.mappings.watch {
        match MappingWatcher::new(&paths.key_mappings, &paths.hid_mappings) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!("Mapping hot-reload disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let mut revisions = pipeline.store().subscribe();

    info!("Ready to translate input events!");

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = key_rx.recv() => {
                pipeline.handle_key_event(&event);
            }

            Some(event) = hid_rx.recv() => {
                if let HidEvent::Disconnected { path } = &event {
                    if let Some(poller) = pollers.remove(path) {
                        poller.close().await;
                    }
                }
                pipeline.handle_hid_event(event);
            }

            Some(update) = next_mapping_update(&mut watcher) => {
                match update {
                    MappingUpdate::Keys(mappings) => {
                        info!("📝 Keyboard mappings reloaded ({} entries)", mappings.len());
                        pipeline.store_mut().set_keys(mappings);
                    }
                    MappingUpdate::Hid(mappings) => {
                        info!("📝 HID mappings reloaded ({} entries)", mappings.len());
                        pipeline.store_mut().set_hid(mappings);
                        let wanted = wanted_devices(config, &pipeline);
                        open_pollers(&mut pollers, wanted, config, &hid_tx, pipeline.notifier());
                    }
                }
            }

            Ok(()) = revisions.changed() => {
                let keys = pipeline.store().suppressed_keys();
                debug!("Mappings changed, {} suppressed keys", keys.len());
                hook.set_suppressed_keys(keys);
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    drop(key_rx);
    hook.uninstall();
    for (_, poller) in std::mem::take(&mut pollers) {
        poller.close().await;
    }
    info!("All inputs closed");

    Ok(())
}

/// Configured devices plus every device referenced by a HID mapping
fn wanted_devices(config: &AppConfig, pipeline: &Pipeline) -> Vec<String> {
    let mut devices = config.hid.devices.clone();
    for mapping in pipeline.store().hid_mappings() {
        if !devices.contains(&mapping.device_path) {
            devices.push(mapping.device_path.clone());
        }
    }
    devices
}

/// Open and start a poller for each device not already polled
fn open_pollers(
    pollers: &mut BTreeMap<String, HidPoller>,
    devices: Vec<String>,
    config: &AppConfig,
    events: &mpsc::Sender<HidEvent>,
    notifier: &Notifier,
) {
    for path in devices {
        if pollers.contains_key(&path) {
            continue;
        }
        match HidPoller::open(&path, config.hid.report_buffer_len, events.clone()) {
            Ok(mut poller) => {
                poller.start_polling(config.hid.poll_interval());
                pollers.insert(path, poller);
            }
            Err(e) => {
                warn!("Failed to open HID device: {}", e);
                notifier.error(e.to_string());
            }
        }
    }
}

async fn next_mapping_update(watcher: &mut Option<MappingWatcher>) -> Option<MappingUpdate> {
    match watcher {
        Some(w) => w.next_update().await,
        None => std::future::pending().await,
    }
}

/// Load both mapping files; a missing file means an empty set
async fn load_mappings(paths: &AppPaths) -> MappingStore {
    let mut store = MappingStore::new();

    match store.load_keys(&paths.key_mappings).await {
        Ok(count) => info!("Loaded {} keyboard mappings", count),
        Err(e) => report_load_error(&paths.key_mappings, e),
    }
    match store.load_hid(&paths.hid_mappings).await {
        Ok(count) => info!("Loaded {} HID mappings", count),
        Err(e) => report_load_error(&paths.hid_mappings, e),
    }

    store
}

fn report_load_error(path: &Path, err: MappingError) {
    match err {
        MappingError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No mapping file at {}, starting empty", path.display());
        }
        e => warn!("Failed to load {}: {}", path.display(), e),
    }
}

/// Open the configured output port; `None` runs without MIDI output
fn open_midi_output(config: &MidiConfig, port_override: Option<&str>) -> Option<Box<dyn MidiSink>> {
    if !config.auto_connect && port_override.is_none() {
        info!("MIDI auto-connect disabled, running without output");
        return None;
    }

    let mut port = MidiPort::new(config.client_name.clone());
    let result = match (port_override.or(config.output_port.as_deref()), config.port_index) {
        (Some(name), _) => port.open_by_name(name),
        (None, Some(index)) => port.open_by_index(index),
        (None, None) => {
            warn!("No MIDI output port configured (use --port or midi.output_port), running without output");
            return None;
        }
    };

    match result {
        Ok(()) => {
            info!(
                "✅ MIDI output connected: {}",
                port.port_name().unwrap_or("unknown")
            );
            Some(Box::new(port))
        }
        Err(e) => {
            error!("Failed to open MIDI output: {}", e);
            warn!("Continuing without MIDI output");
            None
        }
    }
}

fn init_logging(level: &str, logs_dir: &Path) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::daily(logs_dir, "keymidi.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
