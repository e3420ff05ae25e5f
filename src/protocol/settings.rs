//! Pipe-delimited settings line codec
//!
//! Fields are positional. The device name is the last field and may itself
//! contain the delimiter, so it consumes the remainder of the line.

use std::str::FromStr;

use crate::core::{
    error::{CodecError, CodecResult},
    types::DeviceSettings,
};

const DELIMITER: char = '|';
const REQUIRED_FIELDS: usize = 10;
const NAME_FIELD: usize = 17;

const DEFAULT_CPU_MHZ: u32 = 80;
const DEFAULT_LED_MODE: u8 = 1;
const DEFAULT_WIFI_TX_POWER: i32 = 20;
const DEFAULT_BLE_TX_POWER: i32 = 0;
const DEFAULT_BLE_MTU: u32 = 512;
pub const DEFAULT_DEVICE_NAME: &str = "Unknown Device";

/// Encode settings as the wire line
pub fn encode_settings(settings: &DeviceSettings) -> String {
    let fields = [
        flag(settings.only_management_frames),
        settings.minimal_rssi.to_string(),
        settings.dwell_time_ms.to_string(),
        settings.ble_scan_period.to_string(),
        flag(settings.ignore_random_ble),
        settings.ble_scan_duration.to_string(),
        settings.operation_mode.to_string(),
        flag(settings.passive_scan),
        flag(settings.stealth_mode),
        settings.autosave_interval_min.to_string(),
        settings.authorized_mac.clone().unwrap_or_default(),
        settings.cpu_mhz.to_string(),
        settings.led_mode.to_string(),
        settings.wifi_tx_power.to_string(),
        settings.ble_tx_power.to_string(),
        settings.ble_mtu.to_string(),
        flag(settings.ignore_local_wifi),
        settings.device_name.clone(),
    ];
    fields.join("|")
}

/// Decode the wire line into settings
pub fn decode_settings(line: &str) -> CodecResult<DeviceSettings> {
    let parts: Vec<&str> = line.trim_end_matches(['\0', '\r', '\n']).split(DELIMITER).collect();
    if parts.len() < REQUIRED_FIELDS {
        return Err(CodecError::InvalidSettings(format!(
            "expected at least {} fields, got {}",
            REQUIRED_FIELDS,
            parts.len()
        )));
    }

    let optional = |index: usize| parts.get(index).copied().filter(|s| !s.is_empty());

    let device_name = if parts.len() > NAME_FIELD {
        parts[NAME_FIELD..].join("|")
    } else {
        String::new()
    };

    Ok(DeviceSettings {
        only_management_frames: parts[0] == "1",
        minimal_rssi: required(&parts, 1, "minimal RSSI")?,
        dwell_time_ms: required(&parts, 2, "dwell time")?,
        ble_scan_period: required(&parts, 3, "BLE scan period")?,
        ignore_random_ble: parts[4] == "1",
        ble_scan_duration: required(&parts, 5, "BLE scan duration")?,
        operation_mode: required(&parts, 6, "operation mode")?,
        passive_scan: parts[7] == "1",
        stealth_mode: parts[8] == "1",
        autosave_interval_min: required(&parts, 9, "autosave interval")?,
        authorized_mac: optional(10).map(str::to_string),
        cpu_mhz: or_default(optional(11), DEFAULT_CPU_MHZ),
        led_mode: or_default(optional(12), DEFAULT_LED_MODE),
        wifi_tx_power: or_default(optional(13), DEFAULT_WIFI_TX_POWER),
        ble_tx_power: or_default(optional(14), DEFAULT_BLE_TX_POWER),
        ble_mtu: or_default(optional(15), DEFAULT_BLE_MTU),
        ignore_local_wifi: optional(16) == Some("1"),
        device_name: if device_name.is_empty() {
            DEFAULT_DEVICE_NAME.to_string()
        } else {
            device_name
        },
    })
}

fn flag(value: bool) -> String {
    let digit = if value { "1" } else { "0" };
    digit.to_string()
}

fn required<T: FromStr>(parts: &[&str], index: usize, name: &str) -> CodecResult<T> {
    parts[index].trim().parse().map_err(|_| {
        CodecError::InvalidSettings(format!("{} '{}' is not a number", name, parts[index]))
    })
}

fn or_default<T: FromStr>(field: Option<&str>, default: T) -> T {
    field.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}
