//! GATT backend abstraction layer

pub mod gatt_backend;
pub mod mock_backend;

pub use gatt_backend::GattBackend;

#[cfg(test)]
pub use mock_backend::MockGattBackend;
