//! Error types for the Sneak32 link client

use thiserror::Error;
use uuid::Uuid;

/// Result type for GATT backend operations
pub type GattResult<T> = Result<T, GattError>;

/// Result type for wire codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;

/// Errors raised by a GATT backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),

    #[error("Sneak32 service not found on device")]
    ServiceNotFound,

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Device not connected")]
    NotConnected,
}

/// Errors raised while decoding device wire formats
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Buffer length {len} is not a multiple of the {width}-byte record width")]
    RecordLength { len: usize, width: usize },

    #[error("Invalid settings line: {0}")]
    InvalidSettings(String),

    #[error("Invalid status line: {0}")]
    InvalidStatus(String),

    #[error("Invalid transfer control message: {0}")]
    InvalidControl(String),

    #[error("Chunk too short: {0} bytes")]
    ShortChunk(usize),

    #[error("Invalid firmware info: {0}")]
    InvalidFirmwareInfo(String),
}

/// Errors surfaced by the link core to its callers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Operation timed out: {0}")]
    OperationTimeout(String),

    #[error("Data transfer timed out")]
    TransferTimeout,

    #[error("Corrupt transfer: {0}")]
    CorruptTransfer(String),

    #[error("{0}")]
    CommandError(String),

    #[error("Connection to device lost")]
    LinkLost,

    #[error("Device selection cancelled")]
    ConnectionRejected,

    #[error("Not connected")]
    NotConnected,

    #[error("Operation abandoned")]
    Abandoned,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Disconnection failed: {0}")]
    DisconnectFailed(String),

    #[error("GATT error: {0}")]
    Gatt(#[from] GattError),

    #[error("Codec error: {0}")]
    Codec(CodecError),
}

impl From<CodecError> for LinkError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::RecordLength { .. }
            | CodecError::InvalidControl(_)
            | CodecError::ShortChunk(_) => LinkError::CorruptTransfer(error.to_string()),
            other => LinkError::Codec(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_length_maps_to_corrupt_transfer() {
        let error = LinkError::from(CodecError::RecordLength { len: 27, width: 26 });
        assert!(matches!(error, LinkError::CorruptTransfer(_)));
        assert!(error.to_string().contains("27"));
    }

    #[test]
    fn test_settings_error_stays_codec() {
        let error = LinkError::from(CodecError::InvalidSettings("too few fields".into()));
        assert!(matches!(error, LinkError::Codec(CodecError::InvalidSettings(_))));
    }

    #[test]
    fn test_command_error_displays_device_text() {
        let error = LinkError::CommandError("Error: Unknown command".into());
        assert_eq!(error.to_string(), "Error: Unknown command");
    }
}
