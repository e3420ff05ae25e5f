//! GATT backend trait definition

use tokio::sync::{mpsc, oneshot};
use trait_variant::make;
use uuid::Uuid;

use crate::core::error::GattResult;

/// Abstraction over a BLE central stack (typically BlueZ)
///
/// The link core only talks to the device through this trait, so tests can
/// run against a simulated peripheral.
#[make(Send)]
pub trait GattBackend: Send + Sync + 'static {
    /// Handle to a selected peripheral
    type Device: Clone + Send + Sync + 'static;

    /// Handle to a resolved characteristic
    type Characteristic: Clone + Send + Sync + 'static;

    /// Select a peripheral offering the Sneak32 service
    ///
    /// Returns `None` when selection was cancelled or nothing was found.
    async fn request_device(&self) -> GattResult<Option<Self::Device>>;

    /// Human-readable name of the peripheral
    async fn device_name(&self, device: &Self::Device) -> GattResult<String>;

    /// Open the GATT connection
    ///
    /// The returned receiver completes (or closes) when the link goes down.
    async fn connect(&self, device: &Self::Device) -> GattResult<oneshot::Receiver<()>>;

    /// Resolve a characteristic of the Sneak32 service
    async fn characteristic(
        &self,
        device: &Self::Device,
        uuid: Uuid,
    ) -> GattResult<Self::Characteristic>;

    /// Read a characteristic value
    async fn read(&self, characteristic: &Self::Characteristic) -> GattResult<Vec<u8>>;

    /// Write a characteristic value (with response)
    async fn write(&self, characteristic: &Self::Characteristic, value: &[u8]) -> GattResult<()>;

    /// Subscribe to value notifications
    async fn notifications(
        &self,
        characteristic: &Self::Characteristic,
    ) -> GattResult<mpsc::UnboundedReceiver<Vec<u8>>>;

    /// Close the GATT connection
    async fn disconnect(&self, device: &Self::Device) -> GattResult<()>;
}
