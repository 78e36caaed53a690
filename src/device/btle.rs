use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{SinkExt, StreamExt};
use futures::channel::mpsc::Sender;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::CONNECT_DELAY;
use crate::device::platform::BlePlatform;
use crate::device::types::{
    DeviceId, GattStatus, PlatformEvent, ProfileState, ScanMode, ScanResult, ScanSettings,
};
use crate::error::DeviceError;

struct TrackedPeripheral {
    peripheral: Peripheral,
    // cancelled when the device is released, stops its connection attempts
    cancel: CancellationToken,
    // set once a connection to the device was requested
    claimed: bool,
}

type PeripheralMap = Arc<Mutex<HashMap<DeviceId, TrackedPeripheral>>>;

fn lock(peripherals: &PeripheralMap) -> MutexGuard<'_, HashMap<DeviceId, TrackedPeripheral>> {
    peripherals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn device_id(id: &PeripheralId) -> DeviceId {
    DeviceId::new(format!("{:?}", id))
}

async fn make_scan_result(
    adapter: &Adapter,
    id: &PeripheralId,
    peripherals: &PeripheralMap,
    cancel: &CancellationToken,
) -> Result<ScanResult, DeviceError> {
    let peripheral = adapter.peripheral(id).await?;
    let properties = peripheral.properties().await?;
    let device = device_id(id);

    // an entry with a pending connection keeps its token
    lock(peripherals).entry(device.clone()).or_insert_with(|| TrackedPeripheral {
        peripheral,
        cancel: cancel.child_token(),
        claimed: false,
    });

    let (local_name, rssi) = match properties {
        Some(properties) => (properties.local_name, properties.rssi),
        None => (None, None),
    };

    Ok(ScanResult { device, local_name, rssi })
}

async fn send_event(events: &mut Sender<PlatformEvent>, event: PlatformEvent) {
    if let Err(err) = events.send(event).await {
        debug!("Platform event receiver is gone: {}", err);
    }
}

// Translates adapter events into scan results and disconnect callbacks.
fn central_events_task(
    cancel: CancellationToken,
    adapter: Adapter,
    peripherals: PeripheralMap,
    scanning: Arc<AtomicBool>,
    mut events: Sender<PlatformEvent>,
) -> JoinHandle<Result<(), DeviceError>> {
    spawn(async move {
        let mut central_events = adapter.events().await?;

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                Some(event) = central_events.next() => {
                    let platform_event = match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                            if !scanning.load(Ordering::SeqCst) {
                                continue 'mainloop;
                            }

                            match make_scan_result(&adapter, &id, &peripherals, &cancel).await {
                                Ok(result) => PlatformEvent::ScanResult(result),
                                Err(err) => {
                                    warn!("Could not query discovered peripheral: {}", err);
                                    continue 'mainloop;
                                },
                            }
                        },
                        CentralEvent::DeviceDisconnected(id) => {
                            let device = device_id(&id);
                            if !lock(&peripherals).contains_key(&device) {
                                continue 'mainloop;
                            }

                            PlatformEvent::ConnectionStateChanged {
                                device,
                                status: GattStatus::SUCCESS,
                                state: ProfileState::Disconnected,
                            }
                        },
                        other => {
                            debug!("Ignoring central event {:?}", other);
                            continue 'mainloop;
                        },
                    };

                    if events.send(platform_event).await.is_err() {
                        break 'mainloop;
                    }
                },
                else => break 'mainloop,
            }
        }

        Ok(())
    })
}

/// [`BlePlatform`] on top of the first adapter btleplug reports.
///
/// btleplug has no scan mode, report delay or native auto connect. The scan
/// settings are only logged and auto connect is emulated by retrying the
/// connection every `CONNECT_DELAY` milliseconds.
pub struct BtleplugPlatform {
    _manager: Manager,
    adapter: Adapter,
    events: Sender<PlatformEvent>,
    peripherals: PeripheralMap,
    scanning: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl BtleplugPlatform {
    pub async fn new(
        cancel: CancellationToken,
        events: Sender<PlatformEvent>,
    ) -> Result<(Self, JoinHandle<Result<(), DeviceError>>), DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        let platform = BtleplugPlatform {
            _manager: manager,
            adapter,
            events,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            scanning: Arc::new(AtomicBool::new(false)),
            cancel: cancel.child_token(),
        };

        let handle = central_events_task(
            platform.cancel.clone(),
            platform.adapter.clone(),
            platform.peripherals.clone(),
            platform.scanning.clone(),
            platform.events.clone(),
        );

        Ok((platform, handle))
    }

    fn peripheral(&self, device: &DeviceId) -> Result<Peripheral, DeviceError> {
        lock(&self.peripherals)
            .get(device)
            .map(|tracked| tracked.peripheral.clone())
            .ok_or_else(|| DeviceError::UnknownDevice { device: device.clone() })
    }

    // Marks `device` as claimed and forgets every unclaimed peripheral.
    fn claim(&self, device: &DeviceId) -> Result<(Peripheral, CancellationToken), DeviceError> {
        let mut peripherals = lock(&self.peripherals);
        let tracked = peripherals
            .get_mut(device)
            .ok_or_else(|| DeviceError::UnknownDevice { device: device.clone() })?;
        tracked.claimed = true;
        let claimed = (tracked.peripheral.clone(), tracked.cancel.clone());

        peripherals.retain(|_, tracked| tracked.claimed);
        Ok(claimed)
    }
}

impl Drop for BtleplugPlatform {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl BlePlatform for BtleplugPlatform {
    async fn start_scan(&self, settings: &ScanSettings) -> Result<(), DeviceError> {
        if settings.scan_mode != ScanMode::LowLatency || !settings.report_delay.is_zero() {
            debug!("Scan settings are not supported by btleplug, ignoring {:?}", settings);
        }

        self.scanning.store(true, Ordering::SeqCst);
        if let Err(err) = self.adapter.start_scan(ScanFilter::default()).await {
            self.scanning.store(false, Ordering::SeqCst);
            return Err(err.into());
        }

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        if !self.scanning.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        lock(&self.peripherals).retain(|_, tracked| tracked.claimed);
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device: &DeviceId, auto_connect: bool) -> Result<(), DeviceError> {
        let (peripheral, cancel) = self.claim(device)?;
        let mut events = self.events.clone();
        let device = device.clone();

        spawn(async move {
            loop {
                let result = tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = peripheral.connect() => result,
                };

                let status = match result {
                    Ok(()) => {
                        send_event(&mut events, PlatformEvent::ConnectionStateChanged {
                            device,
                            status: GattStatus::SUCCESS,
                            state: ProfileState::Connected,
                        }).await;
                        return;
                    },
                    Err(err) => {
                        warn!("Connecting to {} failed: {}", device, err);
                        GattStatus::FAILURE
                    },
                };

                if !auto_connect {
                    send_event(&mut events, PlatformEvent::ConnectionStateChanged {
                        device,
                        status,
                        state: ProfileState::Disconnected,
                    }).await;
                    return;
                }

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(Duration::from_millis(CONNECT_DELAY)) => {},
                }
            }
        });

        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<(), DeviceError> {
        let tracked = match lock(&self.peripherals).remove(device) {
            Some(tracked) => tracked,
            None => return Ok(()),
        };
        tracked.cancel.cancel();

        let device = device.clone();
        spawn(async move {
            if let Err(err) = tracked.peripheral.disconnect().await {
                debug!("Disconnecting {} failed: {}", device, err);
            }
        });

        Ok(())
    }

    async fn discover_services(&self, device: &DeviceId) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(device)?;
        let mut events = self.events.clone();
        let device = device.clone();

        spawn(async move {
            let status = match peripheral.discover_services().await {
                Ok(()) => {
                    for service in peripheral.services() {
                        debug!("Service {} on {}", service.uuid, device);
                    }
                    GattStatus::SUCCESS
                },
                Err(err) => {
                    warn!("Discovering services of {} failed: {}", device, err);
                    GattStatus::FAILURE
                },
            };

            send_event(&mut events, PlatformEvent::ServicesDiscovered { device, status }).await;
        });

        Ok(())
    }

    async fn read_characteristic(&self, device: &DeviceId, uuid: Uuid) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(device)?;
        let characteristic = peripheral.characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or(DeviceError::MissingCharacteristic { uuid })?;
        let mut events = self.events.clone();
        let device = device.clone();

        spawn(async move {
            let (value, status) = match peripheral.read(&characteristic).await {
                Ok(value) => (value, GattStatus::SUCCESS),
                Err(err) => {
                    warn!("Reading {} from {} failed: {}", uuid, device, err);
                    (Vec::new(), GattStatus::FAILURE)
                },
            };

            send_event(&mut events, PlatformEvent::CharacteristicRead { device, uuid, value, status }).await;
        });

        Ok(())
    }
}
