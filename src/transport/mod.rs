//! Transports

pub mod ble;
