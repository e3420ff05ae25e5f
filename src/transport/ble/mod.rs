//! Bluetooth Low Energy transport layer

pub mod adapter;
pub mod uuids;

pub use {adapter::BluerBackend, uuids::*};
