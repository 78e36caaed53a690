use log::debug;
use uuid::Uuid;

use crate::device::constants::make_player_name_uuid;

/// Each byte as two uppercase hex digits followed by a space.
pub fn hex_bytes(value: &[u8]) -> String {
    value.iter().map(|byte| format!("{:02X} ", byte)).collect()
}

/// Payload of a data-available event for a characteristic read.
///
/// The player name characteristic carries a plain string. Any other
/// characteristic is rendered as its lossy UTF-8 decode, a newline, and the
/// hex dump of the raw bytes. An empty value has no payload.
pub fn characteristic_payload(uuid: &Uuid, value: &[u8]) -> Option<String> {
    if *uuid == make_player_name_uuid() {
        let name = String::from_utf8_lossy(value).into_owned();
        debug!("Received name: {}", name);
        return Some(name);
    }

    if value.is_empty() {
        return None;
    }

    Some(format!("{}\n{}", String::from_utf8_lossy(value), hex_bytes(value)))
}
