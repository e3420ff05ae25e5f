//! Sneak32 service facade

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    backend::GattBackend,
    core::{
        commands::{Command, CommandChannel},
        error::{LinkError, LinkResult},
        link::LinkConnection,
        mtu::MtuNegotiator,
        transfer::ChunkedTransfer,
        types::{
            BleDeviceRecord, CharacteristicRole, ConnectionInfo, DeviceSettings, DeviceStatus,
            LinkEvent, MtuOutcome, RecordSet, WifiDeviceRecord, WifiNetworkRecord,
        },
    },
    protocol::{decode_firmware_info, decode_settings, decode_status, encode_settings},
};

/// Main Sneak32 service facade
///
/// Orchestrates the link components (connection, transfers, commands, MTU)
/// behind the verbs a front end needs.
pub struct Sneak32Service<B: GattBackend> {
    pub link: LinkConnection<B>,
    pub transfer: ChunkedTransfer<B>,
    pub commands: CommandChannel<B>,
    mtu: MtuNegotiator<B>,
}

impl<B: GattBackend> Sneak32Service<B> {
    /// Create a new service over a GATT backend
    pub fn new(backend: Arc<B>) -> Self {
        let link = LinkConnection::new(backend);
        let transfer = ChunkedTransfer::new(link.clone());
        let commands = CommandChannel::new(link.clone());
        let mtu = MtuNegotiator::new(commands.clone());

        Self {
            link,
            transfer,
            commands,
            mtu,
        }
    }

    /// Connect and run the initial handshake
    ///
    /// A freshly established link negotiates the MTU first. Returns `None` if
    /// device selection was cancelled.
    pub async fn connect(&self) -> LinkResult<Option<ConnectionInfo>> {
        let outcome = match self.link.connect().await {
            Ok(outcome) => outcome,
            Err(LinkError::ConnectionRejected) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mtu = if outcome.is_established() {
            Some(self.mtu.negotiate().await)
        } else {
            debug!("Reusing existing link to {}", outcome.identity().device_name);
            None
        };

        let firmware_info = self.read_firmware_info().await?;
        let device_status = self.read_status().await?;
        let settings = self.read_settings().await?;

        Ok(Some(ConnectionInfo {
            device_name: outcome.identity().device_name.clone(),
            firmware_info,
            device_status,
            settings,
            mtu,
        }))
    }

    /// Disconnect from the device
    pub async fn disconnect(&self) -> LinkResult<bool> {
        self.link.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Subscribe to connection, status and transfer events
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.link.subscribe()
    }

    /// Send a raw command string
    pub async fn send_command(&self, command: &str) -> LinkResult<String> {
        self.commands.send(command).await
    }

    pub async fn save_data(&self) -> LinkResult<String> {
        self.commands.execute(Command::SaveData).await
    }

    pub async fn save_wifi_networks(&self) -> LinkResult<String> {
        self.commands.execute(Command::SaveWifiNetworks).await
    }

    pub async fn save_wifi_devices(&self) -> LinkResult<String> {
        self.commands.execute(Command::SaveWifiDevices).await
    }

    pub async fn save_ble_devices(&self) -> LinkResult<String> {
        self.commands.execute(Command::SaveBleDevices).await
    }

    pub async fn clear_data(&self) -> LinkResult<String> {
        self.commands.execute(Command::ClearData).await
    }

    pub async fn restart(&self) -> LinkResult<String> {
        self.commands.execute(Command::Restart).await
    }

    /// Re-run MTU negotiation on the current link
    pub async fn negotiate_mtu(&self) -> MtuOutcome {
        self.mtu.negotiate().await
    }

    pub async fn request_wifi_networks(&self) -> LinkResult<RecordSet<WifiNetworkRecord>> {
        self.transfer.records().await
    }

    pub async fn request_wifi_devices(&self) -> LinkResult<RecordSet<WifiDeviceRecord>> {
        self.transfer.records().await
    }

    pub async fn request_ble_devices(&self) -> LinkResult<RecordSet<BleDeviceRecord>> {
        self.transfer.records().await
    }

    pub async fn read_settings(&self) -> LinkResult<DeviceSettings> {
        let value = self
            .link
            .read(CharacteristicRole::Settings, "Read settings")
            .await?;
        Ok(decode_settings(&String::from_utf8_lossy(&value))?)
    }

    /// Write the whole settings record back to the device
    pub async fn update_settings(&self, settings: &DeviceSettings) -> LinkResult<()> {
        let line = encode_settings(settings);
        self.link
            .write(
                CharacteristicRole::Settings,
                line.clone().into_bytes(),
                "Update settings",
            )
            .await?;
        info!("Settings updated: {}", line);
        Ok(())
    }

    pub async fn read_status(&self) -> LinkResult<DeviceStatus> {
        let value = self
            .link
            .read(CharacteristicRole::DeviceStatus, "Read device status")
            .await?;
        Ok(decode_status(&String::from_utf8_lossy(&value))?)
    }

    pub async fn read_firmware_info(&self) -> LinkResult<serde_json::Value> {
        let value = self
            .link
            .read(CharacteristicRole::FirmwareInfo, "Read firmware info")
            .await?;
        Ok(decode_firmware_info(&value)?)
    }
}
