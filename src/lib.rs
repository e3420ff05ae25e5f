//! Sneak32 link client
//!
//! Host-side BLE client for the Sneak32 WiFi/BLE sniffer:
//! - serialized GATT access through a single operation queue
//! - chunked record-set transfers, commands, settings and status
//! - MTU negotiation

pub mod backend;
pub mod config;
pub mod core;
pub mod protocol;
pub mod transport;
pub mod util;

pub use crate::core::{
    error::{CodecError, GattError, LinkError},
    service::Sneak32Service,
    types::{
        BleDeviceRecord, ConnectionInfo, DeviceSettings, DeviceStatus, LinkEvent, RecordSet,
        WifiDeviceRecord, WifiNetworkRecord,
    },
};
