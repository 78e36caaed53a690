use md5::{Digest, Md5};
use uuid::{Builder, Uuid};

/**
 * How long (milliseconds) a scan session lasts before it is stopped automatically.
 */
pub const SCAN_PERIOD: u64 = 10000;

/**
 * How often (milliseconds) to retry a connection when auto connect is enabled.
 */
pub const CONNECT_DELAY: u64 = 1000;

/**
 * How many events a subscriber may have queued before new events are dropped for it.
 */
pub const EVENT_BUFFER: usize = 64;

pub const ACTION_GATT_CONNECTED: &str = "ACTION_GATT_CONNECTED";
pub const ACTION_GATT_DISCONNECTED: &str = "ACTION_GATT_DISCONNECTED";
pub const ACTION_GATT_SERVICES_DISCOVERED: &str = "ACTION_GATT_SERVICES_DISCOVERED";
pub const ACTION_DATA_AVAILABLE: &str = "ACTION_DATA_AVAILABLE";

/**
 * Key under which an event payload is published.
 */
pub const BRISCOLA_EXTRA_DATA: &str = "BRISCOLA_EXTRA_DATA";

/**
 * Seed of the briscola service identifier.
 */
pub const BRISCOLA_SERVICE_NAME: &[u8] = b"BriscolAppAleBat";

/**
 * Seed of the characteristic that carries a player name as a string.
 */
pub const PLAYER_NAME_CHARACTERISTIC_NAME: &[u8] = b"Bris_PLAYER_NAME";

// GATT status codes as reported by the platform stack
pub const GATT_SUCCESS: i32 = 0;
pub const GATT_FAILURE: i32 = 0x101;

/**
 * Name based (version 3) UUID of the MD5 digest of `name`, without a namespace.
 */
pub fn name_uuid_from_bytes(name: &[u8]) -> Uuid {
    let digest = Md5::digest(name);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    Builder::from_md5_bytes(bytes).into_uuid()
}

pub fn make_briscola_service_uuid() -> Uuid {
    name_uuid_from_bytes(BRISCOLA_SERVICE_NAME)
}

pub fn make_player_name_uuid() -> Uuid {
    name_uuid_from_bytes(PLAYER_NAME_CHARACTERISTIC_NAME)
}
