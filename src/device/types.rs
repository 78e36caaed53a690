use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{
    ACTION_DATA_AVAILABLE, ACTION_GATT_CONNECTED, ACTION_GATT_DISCONNECTED,
    ACTION_GATT_SERVICES_DISCOVERED, GATT_FAILURE, GATT_SUCCESS,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub device: DeviceId,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanMode {
    LowPower,
    Balanced,
    LowLatency,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ScanMode::LowPower => "low power",
            ScanMode::Balanced => "balanced",
            ScanMode::LowLatency => "low latency",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackType {
    AllMatches,
    FirstMatch,
    MatchLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCount {
    One,
    Few,
    Max,
}

/// Parameters of a discovery window. Scans are always unfiltered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub scan_mode: ScanMode,
    pub report_delay: Duration,
    pub callback_type: CallbackType,
    pub match_count: MatchCount,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            scan_mode: ScanMode::LowLatency,
            report_delay: Duration::ZERO,
            callback_type: CallbackType::AllMatches,
            match_count: MatchCount::Few,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattStatus(pub i32);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(GATT_SUCCESS);
    pub const FAILURE: GattStatus = GattStatus(GATT_FAILURE);

    pub fn is_success(&self) -> bool {
        self.0 == GATT_SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Reason reported by the platform when a scan could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    AlreadyStarted,
    ApplicationRegistrationFailed,
    InternalError,
    FeatureUnsupported,
    Unknown(i32),
}

impl ScanFailure {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ScanFailure::AlreadyStarted,
            2 => ScanFailure::ApplicationRegistrationFailed,
            3 => ScanFailure::InternalError,
            4 => ScanFailure::FeatureUnsupported,
            other => ScanFailure::Unknown(other),
        }
    }
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanFailure::AlreadyStarted => write!(f, "already started"),
            ScanFailure::ApplicationRegistrationFailed => write!(f, "application registration failed"),
            ScanFailure::InternalError => write!(f, "internal error"),
            ScanFailure::FeatureUnsupported => write!(f, "feature unsupported"),
            ScanFailure::Unknown(code) => write!(f, "unknown error {}", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileState {
    Connected,
    Disconnected,
}

/// Callback delivered by a [`crate::device::platform::BlePlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    ScanResult(ScanResult),
    BatchScanResults(Vec<ScanResult>),
    ScanFailed(ScanFailure),
    ConnectionStateChanged {
        device: DeviceId,
        status: GattStatus,
        state: ProfileState,
    },
    ServicesDiscovered {
        device: DeviceId,
        status: GattStatus,
    },
    CharacteristicRead {
        device: DeviceId,
        uuid: Uuid,
        value: Vec<u8>,
        status: GattStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    // A failed attempt (connecting -> disconnected) is reported like a regular close.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Disconnected, ConnectionState::Connecting)
                | (ConnectionState::Connecting, ConnectionState::Connected)
                | (ConnectionState::Connecting, ConnectionState::Disconnected)
                | (ConnectionState::Connected, ConnectionState::Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    ServicesDiscovered,
    DataAvailable,
}

impl EventKind {
    pub fn action(&self) -> &'static str {
        match self {
            EventKind::Connected => ACTION_GATT_CONNECTED,
            EventKind::Disconnected => ACTION_GATT_DISCONNECTED,
            EventKind::ServicesDiscovered => ACTION_GATT_SERVICES_DISCOVERED,
            EventKind::DataAvailable => ACTION_DATA_AVAILABLE,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: Option<String>,
}
