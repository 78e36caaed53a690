use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::connection::ControllerOptions;
use crate::device::constants::{EVENT_BUFFER, SCAN_PERIOD};
use crate::device::types::{ScanMode, ScanSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub scan_period_ms: u64,
    pub scan_mode: ScanMode,
    pub report_delay_ms: u64,
    pub auto_connect: bool,
    pub event_buffer: usize,
}

impl Config {
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            scan_mode: self.scan_mode,
            report_delay: Duration::from_millis(self.report_delay_ms),
            ..ScanSettings::default()
        }
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            // a zero period would stop every scan right away
            scan_period: Duration::from_millis(self.scan_period_ms.max(1)),
            scan_settings: self.scan_settings(),
            auto_connect: self.auto_connect,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_period_ms: SCAN_PERIOD,
            scan_mode: ScanMode::LowLatency,
            report_delay_ms: 0,
            auto_connect: true,
            event_buffer: EVENT_BUFFER,
        }
    }
}
