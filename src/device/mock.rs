//! A [`BlePlatform`] without a radio, recording every call it receives.
//!
//! Callbacks are not generated; tests feed [`crate::device::types::PlatformEvent`]s
//! to the controller themselves.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use uuid::Uuid;

use crate::device::platform::BlePlatform;
use crate::device::types::{DeviceId, ScanSettings};
use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    StartScan(ScanSettings),
    StopScan,
    Connect { device: DeviceId, auto_connect: bool },
    Disconnect(DeviceId),
    DiscoverServices(DeviceId),
    ReadCharacteristic { device: DeviceId, uuid: Uuid },
}

#[derive(Default)]
pub struct MockPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    fail_start_scan: AtomicBool,
    fail_connect: AtomicBool,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start_scan(&self, fail: bool) {
        self.fail_start_scan.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.lock_calls().clone()
    }

    pub fn connect_calls(&self) -> Vec<DeviceId> {
        self.lock_calls().iter().filter_map(|call| match call {
            PlatformCall::Connect { device, .. } => Some(device.clone()),
            _ => None,
        }).collect()
    }

    pub fn disconnect_calls(&self) -> Vec<DeviceId> {
        self.lock_calls().iter().filter_map(|call| match call {
            PlatformCall::Disconnect(device) => Some(device.clone()),
            _ => None,
        }).collect()
    }

    pub fn count(&self, predicate: impl Fn(&PlatformCall) -> bool) -> usize {
        self.lock_calls().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: PlatformCall) {
        self.lock_calls().push(call);
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<PlatformCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BlePlatform for MockPlatform {
    async fn start_scan(&self, settings: &ScanSettings) -> Result<(), DeviceError> {
        self.record(PlatformCall::StartScan(settings.clone()));
        if self.fail_start_scan.load(Ordering::SeqCst) {
            return Err(DeviceError::NoAdapter);
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        self.record(PlatformCall::StopScan);
        Ok(())
    }

    async fn connect(&self, device: &DeviceId, auto_connect: bool) -> Result<(), DeviceError> {
        self.record(PlatformCall::Connect { device: device.clone(), auto_connect });
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(DeviceError::UnknownDevice { device: device.clone() });
        }
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<(), DeviceError> {
        self.record(PlatformCall::Disconnect(device.clone()));
        Ok(())
    }

    async fn discover_services(&self, device: &DeviceId) -> Result<(), DeviceError> {
        self.record(PlatformCall::DiscoverServices(device.clone()));
        Ok(())
    }

    async fn read_characteristic(&self, device: &DeviceId, uuid: Uuid) -> Result<(), DeviceError> {
        self.record(PlatformCall::ReadCharacteristic { device: device.clone(), uuid });
        Ok(())
    }
}
