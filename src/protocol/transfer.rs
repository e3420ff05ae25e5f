//! Data-transfer characteristic messages
//!
//! Control notifications are ASCII (`START:<hex count>`, `END:<timestamp>`).
//! Everything else is a chunk: a 4-byte ASCII-hex packet ordinal followed by
//! payload bytes.

use crate::core::error::{CodecError, CodecResult};

const START_MARKER: &[u8] = b"START:";
const END_MARKER: &[u8] = b"END";
pub const CHUNK_HEADER_LEN: usize = 4;

/// A decoded data-transfer notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMessage {
    /// Session opened with this many packets to follow
    Start { total: u16 },
    /// Session closed; older firmware sends a bare `END` with no timestamp
    End { timestamp: Option<u64> },
    /// One packet; `ordinal` is `None` when the header is not ASCII hex
    Chunk {
        ordinal: Option<u16>,
        payload: Vec<u8>,
    },
}

impl TransferMessage {
    pub fn parse(bytes: &[u8]) -> CodecResult<Self> {
        if let Some(rest) = bytes.strip_prefix(START_MARKER) {
            let text = control_text(rest);
            let total = u16::from_str_radix(text, 16).map_err(|_| {
                CodecError::InvalidControl(format!("START count '{}' is not hex", text))
            })?;
            return Ok(TransferMessage::Start { total });
        }

        if let Some(rest) = bytes.strip_prefix(END_MARKER) {
            let rest = control_text(rest);
            if rest.is_empty() {
                return Ok(TransferMessage::End { timestamp: None });
            }
            if let Some(value) = rest.strip_prefix(':') {
                let timestamp = value.trim().parse().map_err(|_| {
                    CodecError::InvalidControl(format!("END timestamp '{}' is not a number", value))
                })?;
                return Ok(TransferMessage::End {
                    timestamp: Some(timestamp),
                });
            }
        }

        if bytes.len() < CHUNK_HEADER_LEN {
            return Err(CodecError::ShortChunk(bytes.len()));
        }
        let (header, payload) = bytes.split_at(CHUNK_HEADER_LEN);
        let ordinal = std::str::from_utf8(header)
            .ok()
            .and_then(|h| u16::from_str_radix(h, 16).ok());
        Ok(TransferMessage::Chunk {
            ordinal,
            payload: payload.to_vec(),
        })
    }
}

/// Request body asking the device for one packet
pub fn packet_request(ordinal: u16) -> String {
    format!("{:04x}", ordinal)
}

/// Control payload as text, without NUL padding or line endings
fn control_text(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes)
        .unwrap_or_default()
        .trim_end_matches(['\0', '\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_start() {
        assert_eq!(
            TransferMessage::parse(b"START:0003").unwrap(),
            TransferMessage::Start { total: 3 }
        );
        assert_eq!(
            TransferMessage::parse(b"START:001A").unwrap(),
            TransferMessage::Start { total: 26 }
        );
    }

    #[test]
    fn test_parse_end_with_and_without_timestamp() {
        assert_eq!(
            TransferMessage::parse(b"END:1700000000").unwrap(),
            TransferMessage::End {
                timestamp: Some(1_700_000_000)
            }
        );
        assert_eq!(
            TransferMessage::parse(b"END").unwrap(),
            TransferMessage::End { timestamp: None }
        );
    }

    #[test]
    fn test_parse_chunk_strips_header() {
        let message = TransferMessage::parse(b"000Bhello").unwrap();
        assert_eq!(
            message,
            TransferMessage::Chunk {
                ordinal: Some(11),
                payload: b"hello".to_vec()
            }
        );
    }

    #[test]
    fn test_chunk_with_binary_header_has_no_ordinal() {
        let message = TransferMessage::parse(&[0xff, 0x00, 0x01, 0x02, 0x03]).unwrap();
        assert_eq!(
            message,
            TransferMessage::Chunk {
                ordinal: None,
                payload: vec![0x03]
            }
        );
    }

    #[test]
    fn test_malformed_control_messages() {
        assert!(matches!(
            TransferMessage::parse(b"START:zz"),
            Err(CodecError::InvalidControl(_))
        ));
        assert!(matches!(
            TransferMessage::parse(b"END:soon"),
            Err(CodecError::InvalidControl(_))
        ));
        assert_eq!(
            TransferMessage::parse(b"ab"),
            Err(CodecError::ShortChunk(2))
        );
    }

    #[test]
    fn test_packet_request_is_lowercase_padded_hex() {
        assert_eq!(packet_request(1), "0001");
        assert_eq!(packet_request(0x1a), "001a");
    }
}
