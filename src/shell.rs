use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use futures::StreamExt;
use futures::channel::mpsc::channel;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::io::{config_exists, ConfigIO};
use crate::config::types::Config;
use crate::device::btle::BtleplugPlatform;
use crate::device::connection::spawn_controller;
use crate::device::constants::BRISCOLA_EXTRA_DATA;
use crate::device::relay::EventRelay;
use crate::device::types::{Event, EventKind, PlatformEvent};
use crate::error::AppRunError;

#[derive(Debug, Clone, Default)]
pub struct ShellOptions {
    pub config_path: Option<PathBuf>,
    pub init_config: bool,
    // characteristics to read once services are discovered
    pub read: Vec<Uuid>,
}

/// Turns relay events into log lines and tracks whether a device is connected.
#[derive(Debug, Default)]
pub struct Console {
    connected: bool,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn on_event(&mut self, event: &Event) -> String {
        match event.kind {
            EventKind::Connected => self.connected = true,
            EventKind::Disconnected => self.connected = false,
            EventKind::ServicesDiscovered | EventKind::DataAvailable => {},
        }

        describe_event(event)
    }
}

pub fn describe_event(event: &Event) -> String {
    match &event.payload {
        Some(payload) => format!("{} {}={}", event.kind, BRISCOLA_EXTRA_DATA, payload),
        None => event.kind.to_string(),
    }
}

async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config, using defaults: {}", err);
            }
            Config::default()
        },
    }
}

pub async fn run_shell(options: ShellOptions) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(options.config_path)?;
    let mut locker = config_io.locker()?;
    let _config_guard = locker.lock()?;

    if options.init_config && !config_exists(&config_io.path()) {
        config_io.save(&Config::default()).await?;
    }

    let config = load_config(&config_io).await;
    info!("{:?}", config);

    let cancel = CancellationToken::new();
    let (platform_sender, platform_receiver) = channel::<PlatformEvent>(config.event_buffer);
    let (platform, central_events_handle) = BtleplugPlatform::new(cancel.clone(), platform_sender).await?;

    let relay = EventRelay::new();
    let mut events = relay.subscribe(config.event_buffer);
    let (mut controller, controller_handle) = spawn_controller(
        cancel.clone(),
        Arc::new(platform),
        platform_receiver,
        relay,
        config.controller_options(),
    );

    controller.start_scan().await?;
    println!("Scan requested at {}", humantime::format_rfc3339(SystemTime::now()));

    let mut console = Console::new();

    'mainloop: loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!("Failed to wait for ctrl-c: {}", err);
                }
                info!("Interrupted (connected: {})", console.is_connected());
                break 'mainloop;
            },
            Some(event) = events.next() => {
                println!("{}", console.on_event(&event));

                if event.kind == EventKind::ServicesDiscovered {
                    for uuid in &options.read {
                        controller.read_characteristic(*uuid).await?;
                    }
                }
            },
            else => break 'mainloop,
        }
    }

    cancel.cancel();

    if let Err(err) = controller_handle.await {
        warn!("Scan controller task failed: {}", err);
    }

    match central_events_handle.await {
        Ok(Ok(())) => {},
        Ok(Err(err)) => warn!("Error while reading adapter events: {}", err),
        Err(err) => warn!("Adapter events task failed: {}", err),
    }

    Ok(())
}
