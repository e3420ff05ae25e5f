//! Firmware-info characteristic decoding

use serde_json::Value;

use crate::core::error::{CodecError, CodecResult};

/// Decode the firmware-info value as generic JSON
pub fn decode_firmware_info(bytes: &[u8]) -> CodecResult<Value> {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    serde_json::from_slice(&bytes[..end]).map_err(|e| CodecError::InvalidFirmwareInfo(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_firmware_info() {
        let info = decode_firmware_info(br#"{"version":"1.2.0","board":"esp32-c3"}"#).unwrap();
        assert_eq!(info, json!({"version": "1.2.0", "board": "esp32-c3"}));
    }

    #[test]
    fn test_trailing_padding_ignored() {
        let info = decode_firmware_info(b"{\"version\":\"1.0\"}\0\0").unwrap();
        assert_eq!(info["version"], "1.0");
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            decode_firmware_info(b"not json"),
            Err(CodecError::InvalidFirmwareInfo(_))
        ));
    }
}
