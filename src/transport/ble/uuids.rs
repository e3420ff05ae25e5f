//! BLE GATT UUIDs of the Sneak32 firmware

use uuid::Uuid;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
pub const fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Sneak32 primary service UUID
pub const SNEAK32_SERVICE_UUID: Uuid = Uuid::from_bytes([
    0x81, 0xaf, 0x4c, 0xd7, 0xe0, 0x91, 0x49, 0x0a, 0x99, 0xee, 0xca, 0xa9, 0x90, 0x32, 0xef, 0x4e,
]);

/// Data transfer characteristic (write requests, notify chunks)
pub const DATA_TRANSFER_CHAR_UUID: Uuid = short_uuid(0xFFE0);

/// Device status characteristic (read/notify)
pub const DEVICE_STATUS_CHAR_UUID: Uuid = short_uuid(0xFFE1);

/// Settings characteristic (read/write)
pub const SETTINGS_CHAR_UUID: Uuid = short_uuid(0xFFE2);

/// Firmware info characteristic (read, JSON)
pub const FIRMWARE_INFO_CHAR_UUID: Uuid = short_uuid(0xFFE3);

/// Commands characteristic (write command, read response)
pub const COMMANDS_CHAR_UUID: Uuid = short_uuid(0xFFE4);
