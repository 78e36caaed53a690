use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;
use futures::channel::mpsc::SendError;
use uuid::Uuid;

use crate::device::types::{ConnectionState, DeviceId};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to initialize logging: {source}")]
    Logger { #[from] source: log::SetLoggerError },

    #[error("Failed to open log file: {source}")]
    LogFile { source: io::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (device): {source}")]
    DeviceError { #[from] source: DeviceError },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Device {device} has not been discovered")]
    UnknownDevice { device: DeviceId },

    #[error("Bluetooth characteristic {uuid} is not available")]
    MissingCharacteristic { uuid: Uuid },

    #[error("There is no connection to read from")]
    NotConnected,

    #[error("Invalid connection state transition from {from} to {to}")]
    InvalidTransition { from: ConnectionState, to: ConnectionState },

    #[error("Failed to send command to the scan controller: {source}")]
    SendError { #[from] source: SendError },
}
