use async_trait::async_trait;
use uuid::Uuid;

use crate::device::types::{DeviceId, ScanSettings};
use crate::error::DeviceError;

/// The BLE capability of the host.
///
/// Every method only initiates an operation. Its outcome is delivered later
/// as a [`crate::device::types::PlatformEvent`] on the channel the
/// implementation was created with, and may never arrive.
#[async_trait]
pub trait BlePlatform: Send + Sync {
    async fn start_scan(&self, settings: &ScanSettings) -> Result<(), DeviceError>;

    /// Stopping a scan that is not running is not an error.
    async fn stop_scan(&self) -> Result<(), DeviceError>;

    async fn connect(&self, device: &DeviceId, auto_connect: bool) -> Result<(), DeviceError>;

    /// Drops the link and every pending connection attempt for `device`.
    async fn disconnect(&self, device: &DeviceId) -> Result<(), DeviceError>;

    async fn discover_services(&self, device: &DeviceId) -> Result<(), DeviceError>;

    async fn read_characteristic(&self, device: &DeviceId, uuid: Uuid) -> Result<(), DeviceError>;
}
