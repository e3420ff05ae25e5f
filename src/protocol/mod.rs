//! Sneak32 wire formats

pub mod firmware;
pub mod records;
pub mod settings;
pub mod status;
pub mod transfer;

pub use {
    firmware::decode_firmware_info,
    records::{Record, decode_records, encode_records},
    settings::{decode_settings, encode_settings},
    status::decode_status,
    transfer::{TransferMessage, packet_request},
};
