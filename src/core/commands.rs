//! Command channel over the commands characteristic

use std::{fmt, time::Duration};

use tracing::{debug, warn};

use crate::{
    backend::GattBackend,
    core::{
        error::{LinkError, LinkResult},
        link::LinkConnection,
        types::CharacteristicRole,
    },
};

/// Pause between writing a command and reading its response
pub const COMMAND_SETTLE_DELAY: Duration = Duration::from_millis(10);

const ERROR_PREFIX: &str = "Error:";

/// Commands understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SaveData,
    SaveWifiNetworks,
    SaveWifiDevices,
    SaveBleDevices,
    ClearData,
    Restart,
    TestMtu(usize),
    SetMtu(usize),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SaveData => f.write_str("save_data"),
            Command::SaveWifiNetworks => f.write_str("save_wifi_networks"),
            Command::SaveWifiDevices => f.write_str("save_wifi_devices"),
            Command::SaveBleDevices => f.write_str("save_ble_devices"),
            Command::ClearData => f.write_str("clear_data"),
            Command::Restart => f.write_str("restart"),
            Command::TestMtu(size) => write!(f, "test_mtu {}", size),
            Command::SetMtu(size) => write!(f, "set_mtu {}", size),
        }
    }
}

/// Sends commands and returns the device's textual response
pub struct CommandChannel<B: GattBackend> {
    link: LinkConnection<B>,
}

impl<B: GattBackend> Clone for CommandChannel<B> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
        }
    }
}

impl<B: GattBackend> CommandChannel<B> {
    pub fn new(link: LinkConnection<B>) -> Self {
        Self { link }
    }

    /// Send a raw command string
    ///
    /// Write, settle and read form one queued operation. A response starting
    /// with `Error:` is returned as [`LinkError::CommandError`].
    pub async fn send(&self, command: &str) -> LinkResult<String> {
        let link = self.link.clone();
        let request = command.to_string();
        let response = self
            .link
            .queue()
            .enqueue(format!("Command: {}", command), move || async move {
                let characteristic = link.characteristic(CharacteristicRole::Commands)?;
                link.backend()
                    .write(&characteristic, request.as_bytes())
                    .await?;
                tokio::time::sleep(COMMAND_SETTLE_DELAY).await;
                Ok(link.backend().read(&characteristic).await?)
            })
            .await?;

        let response = String::from_utf8_lossy(&response).to_string();
        if response.starts_with(ERROR_PREFIX) {
            warn!("Command '{}' failed: {}", command, response);
            return Err(LinkError::CommandError(response));
        }
        debug!("Command '{}' answered with {} bytes", command, response.len());
        Ok(response)
    }

    /// Send a typed command
    pub async fn execute(&self, command: Command) -> LinkResult<String> {
        self.send(&command.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockGattBackend;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    async fn connected() -> (Arc<MockGattBackend>, CommandChannel<MockGattBackend>) {
        let backend = Arc::new(MockGattBackend::new());
        let link = LinkConnection::new(backend.clone());
        link.connect().await.unwrap();
        (backend, CommandChannel::new(link))
    }

    #[test]
    fn test_command_wire_strings() {
        assert_eq!(Command::SaveWifiNetworks.to_string(), "save_wifi_networks");
        assert_eq!(Command::ClearData.to_string(), "clear_data");
        assert_eq!(Command::TestMtu(448).to_string(), "test_mtu 448");
        assert_eq!(Command::SetMtu(388).to_string(), "set_mtu 388");
    }

    #[tokio::test]
    async fn test_send_returns_response() {
        let (backend, commands) = connected().await;

        let response = commands.execute(Command::SaveData).await.unwrap();

        assert_eq!(response, "OK");
        assert_eq!(
            backend.written(CharacteristicRole::Commands).await,
            vec!["save_data"]
        );
    }

    #[tokio::test]
    async fn test_error_prefix_is_command_error() {
        let (backend, commands) = connected().await;
        backend
            .set_command_response("save_data", "Error: flash full")
            .await;

        let result = commands.send("save_data").await;

        assert_eq!(
            result,
            Err(LinkError::CommandError("Error: flash full".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_command_times_out() {
        let (backend, commands) = connected().await;
        backend.stall_command("restart").await;

        let result = commands.execute(Command::Restart).await;

        assert_eq!(
            result,
            Err(LinkError::OperationTimeout("Command: restart".into()))
        );
        assert_eq!(commands.execute(Command::ClearData).await, Ok("OK".into()));
    }

    #[tokio::test]
    async fn test_send_requires_link() {
        let backend = Arc::new(MockGattBackend::new());
        let commands = CommandChannel::new(LinkConnection::new(backend));

        assert_eq!(
            commands.send("save_data").await,
            Err(LinkError::NotConnected)
        );
    }
}
