//! BlueZ central backend
//!
//! Device selection scans for peripherals advertising the Sneak32 service.
//! A scan that ends without a match counts as a cancelled selection.

use std::{collections::HashSet, time::Duration};

use bluer::{
    Adapter, AdapterEvent, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session, gatt::remote::Characteristic,
};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::GattBackend,
    core::error::{GattError, GattResult},
    transport::ble::uuids::SNEAK32_SERVICE_UUID,
};

const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl From<bluer::Error> for GattError {
    fn from(error: bluer::Error) -> Self {
        GattError::Bluetooth(error.to_string())
    }
}

/// GATT backend on top of BlueZ
pub struct BluerBackend {
    _session: Session,
    adapter: Adapter,
    device_filter: Option<String>,
    scan_timeout: Duration,
}

impl BluerBackend {
    /// Open a BlueZ session on the named (or default) adapter
    ///
    /// `device_filter` restricts selection to a device name or address.
    pub async fn new(
        adapter_name: Option<&str>,
        device_filter: Option<String>,
        scan_timeout: Duration,
    ) -> GattResult<Self> {
        let session = Session::new().await?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        adapter.set_powered(true).await?;

        info!("Using BLE adapter: {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            device_filter,
            scan_timeout,
        })
    }

    /// True if `device` offers the Sneak32 service and passes the filter
    async fn is_candidate(&self, device: &Device) -> GattResult<bool> {
        let uuids = device.uuids().await?.unwrap_or_default();
        if !uuids.contains(&SNEAK32_SERVICE_UUID) {
            return Ok(false);
        }

        let Some(filter) = &self.device_filter else {
            return Ok(true);
        };
        if device.address().to_string().eq_ignore_ascii_case(filter) {
            return Ok(true);
        }
        let name = device.name().await?.unwrap_or_default();
        Ok(name == *filter)
    }

    async fn wait_services_resolved(&self, device: &Device) -> GattResult<()> {
        let deadline = tokio::time::Instant::now() + SERVICES_RESOLVE_TIMEOUT;
        while !device.is_services_resolved().await? {
            if tokio::time::Instant::now() >= deadline {
                return Err(GattError::ServiceNotFound);
            }
            tokio::time::sleep(SERVICES_POLL_INTERVAL).await;
        }
        Ok(())
    }
}

impl GattBackend for BluerBackend {
    type Device = Device;
    type Characteristic = Characteristic;

    async fn request_device(&self) -> GattResult<Option<Device>> {
        self.adapter
            .set_discovery_filter(DiscoveryFilter {
                uuids: HashSet::from([SNEAK32_SERVICE_UUID]),
                transport: DiscoveryTransport::Le,
                ..Default::default()
            })
            .await?;

        info!(
            "Scanning for Sneak32 devices ({}s)",
            self.scan_timeout.as_secs()
        );
        let mut events = Box::pin(self.adapter.discover_devices().await?);
        let scan_end = tokio::time::sleep(self.scan_timeout);
        tokio::pin!(scan_end);

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        let device = self.adapter.device(address)?;
                        match self.is_candidate(&device).await {
                            Ok(true) => {
                                info!("Selected device {}", address);
                                return Ok(Some(device));
                            }
                            Ok(false) => debug!("Ignoring device {}", address),
                            Err(e) => debug!("Skipping device {}: {}", address, e),
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = &mut scan_end => break,
            }
        }

        warn!("No Sneak32 device found");
        Ok(None)
    }

    async fn device_name(&self, device: &Device) -> GattResult<String> {
        Ok(device
            .name()
            .await?
            .unwrap_or_else(|| device.address().to_string()))
    }

    async fn connect(&self, device: &Device) -> GattResult<oneshot::Receiver<()>> {
        if !device.is_connected().await? {
            device.connect().await?;
        }
        self.wait_services_resolved(device).await?;

        let (lost_tx, lost) = oneshot::channel();
        let mut events = Box::pin(device.events().await?);
        let address = device.address();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    debug!("Device {} reported disconnection", address);
                    let _ = lost_tx.send(());
                    return;
                }
            }
        });
        Ok(lost)
    }

    async fn characteristic(&self, device: &Device, uuid: Uuid) -> GattResult<Characteristic> {
        for service in device.services().await? {
            if service.uuid().await? != SNEAK32_SERVICE_UUID {
                continue;
            }
            for characteristic in service.characteristics().await? {
                if characteristic.uuid().await? == uuid {
                    return Ok(characteristic);
                }
            }
            return Err(GattError::CharacteristicNotFound(uuid));
        }
        Err(GattError::ServiceNotFound)
    }

    async fn read(&self, characteristic: &Characteristic) -> GattResult<Vec<u8>> {
        Ok(characteristic.read().await?)
    }

    async fn write(&self, characteristic: &Characteristic, value: &[u8]) -> GattResult<()> {
        Ok(characteristic.write(value).await?)
    }

    async fn notifications(
        &self,
        characteristic: &Characteristic,
    ) -> GattResult<mpsc::UnboundedReceiver<Vec<u8>>> {
        let mut values = Box::pin(characteristic.notify().await?);
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(value) = values.next().await {
                if sender.send(value).is_err() {
                    break;
                }
            }
        });
        Ok(receiver)
    }

    async fn disconnect(&self, device: &Device) -> GattResult<()> {
        Ok(device.disconnect().await?)
    }
}
