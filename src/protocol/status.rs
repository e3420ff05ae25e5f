//! Colon-delimited device status line decoder

use crate::core::{
    error::{CodecError, CodecResult},
    types::DeviceStatus,
};

const STATUS_FIELDS: usize = 9;

/// Decode a status line (device to host only)
pub fn decode_status(line: &str) -> CodecResult<DeviceStatus> {
    let parts: Vec<&str> = line
        .trim_end_matches(['\0', '\r', '\n'])
        .split(':')
        .map(str::trim)
        .collect();
    if parts.len() != STATUS_FIELDS {
        return Err(CodecError::InvalidStatus(format!(
            "expected {} fields, got {}",
            STATUS_FIELDS,
            parts.len()
        )));
    }

    let field = |index: usize| -> CodecResult<u64> {
        parts[index].parse().map_err(|_| {
            CodecError::InvalidStatus(format!("field {} '{}' is not a number", index, parts[index]))
        })
    };
    let narrow = |index: usize| -> CodecResult<u32> {
        u32::try_from(field(index)?)
            .map_err(|_| CodecError::InvalidStatus(format!("field {} out of range", index)))
    };

    Ok(DeviceStatus {
        wifi_networks: narrow(0)?,
        wifi_devices: narrow(1)?,
        ble_devices: narrow(2)?,
        wifi_detected_networks: narrow(3)?,
        wifi_detected_devices: narrow(4)?,
        ble_detected_devices: narrow(5)?,
        alarm: field(6)? == 1,
        free_heap: narrow(7)?,
        uptime_secs: field(8)?,
    })
}
