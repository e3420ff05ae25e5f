//! Simulated Sneak32 peripheral for testing
//!
//! Serves record sets through the chunked transfer protocol, answers
//! commands, stores settings and pushes status notifications, all in-process.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::sync::{Mutex, mpsc, oneshot};
use uuid::Uuid;

use crate::backend::GattBackend;
use crate::core::error::{GattError, GattResult};
use crate::core::types::{CharacteristicRole, RecordKind};

const DEFAULT_DEVICE_NAME: &str = "Sneak32";
const DEFAULT_PAYLOAD_SIZE: usize = 64;
const DEFAULT_END_TIMESTAMP: u64 = 1_700_000_000;
const DEFAULT_MTU_LIMIT: usize = 512;
const MTU_TEST_BUFFER: usize = 600;

/// Internal state for the mock backend
struct MockState {
    device: Option<String>,
    device_requests: usize,
    connect_delay: Option<Duration>,
    missing: Option<CharacteristicRole>,
    connected: bool,
    link_loss: Option<oneshot::Sender<()>>,
    subscribers: HashMap<CharacteristicRole, mpsc::UnboundedSender<Vec<u8>>>,

    record_sets: HashMap<RecordKind, Vec<u8>>,
    payload_size: usize,
    end_timestamp: Option<u64>,
    stall_after: Option<u16>,
    duplicate_packet: Option<u16>,
    transfer: Option<RecordKind>,

    firmware_info: String,
    settings_line: String,
    status_line: String,
    mtu_limit: usize,
    command_responses: HashMap<String, String>,
    stalled_commands: HashSet<String>,
    command_response: Vec<u8>,

    writes: Vec<(CharacteristicRole, Vec<u8>)>,
}

impl MockState {
    fn notify(&mut self, role: CharacteristicRole, value: Vec<u8>) {
        if let Some(subscriber) = self.subscribers.get(&role) {
            let _ = subscriber.send(value);
        }
    }

    fn total_packets(&self, kind: RecordKind) -> u16 {
        let len = self.record_sets.get(&kind).map_or(0, Vec::len);
        u16::try_from(len.div_ceil(self.payload_size)).unwrap_or(u16::MAX)
    }

    fn packet(&self, kind: RecordKind, ordinal: u16) -> Vec<u8> {
        let blob = self.record_sets.get(&kind).map(Vec::as_slice).unwrap_or_default();
        let start = (usize::from(ordinal) - 1) * self.payload_size;
        let end = (start + self.payload_size).min(blob.len());
        let mut packet = format!("{:04X}", ordinal).into_bytes();
        packet.extend_from_slice(&blob[start..end]);
        packet
    }

    fn end_marker(&self) -> Vec<u8> {
        match self.end_timestamp {
            Some(timestamp) => format!("END:{}", timestamp).into_bytes(),
            None => b"END".to_vec(),
        }
    }

    fn on_data_request(&mut self, value: &[u8]) {
        let request = String::from_utf8_lossy(value).to_string();

        if let Some(kind) = RecordKind::from_token(&request) {
            self.transfer = Some(kind);
            if self.stall_after == Some(0) {
                return;
            }
            let total = self.total_packets(kind);
            self.notify(
                CharacteristicRole::DataTransfer,
                format!("START:{:04X}", total).into_bytes(),
            );
            if total == 0 {
                let end = self.end_marker();
                self.notify(CharacteristicRole::DataTransfer, end);
            }
            return;
        }

        let (Some(kind), Ok(ordinal)) = (self.transfer, u16::from_str_radix(&request, 16)) else {
            return;
        };
        let total = self.total_packets(kind);
        if ordinal == 0 || ordinal > total {
            return;
        }
        if self.stall_after.is_some_and(|last| ordinal > last) {
            return;
        }

        let packet = self.packet(kind, ordinal);
        self.notify(CharacteristicRole::DataTransfer, packet.clone());
        if self.duplicate_packet == Some(ordinal) {
            self.notify(CharacteristicRole::DataTransfer, packet);
        }
        if ordinal == total {
            let end = self.end_marker();
            self.notify(CharacteristicRole::DataTransfer, end);
            self.transfer = None;
        }
    }

    fn on_command(&mut self, command: &str) -> String {
        if let Some(response) = self.command_responses.get(command) {
            return response.clone();
        }

        let mut words = command.split_whitespace();
        match (words.next(), words.next()) {
            (Some("test_mtu"), size) => {
                let size = size
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(MTU_TEST_BUFFER);
                if size > self.mtu_limit {
                    format!("Error: MTU {} exceeds link limit", size)
                } else {
                    "A".repeat(size)
                }
            }
            (Some("set_mtu"), Some(size)) => format!("MTU set to {}", size),
            (
                Some(
                    "save_data" | "save_wifi_networks" | "save_wifi_devices" | "save_ble_devices"
                    | "clear_data",
                ),
                None,
            ) => "OK".to_string(),
            (Some("restart"), None) => "Restarting".to_string(),
            _ => format!("Error: Unknown command '{}'", command),
        }
    }

    fn drop_link(&mut self) {
        self.connected = false;
        self.transfer = None;
        self.subscribers.clear();
        if let Some(link_loss) = self.link_loss.take() {
            let _ = link_loss.send(());
        }
    }
}

/// Mock GATT backend for testing
///
/// Allows configuring device behavior for tests without requiring hardware.
#[derive(Clone)]
pub struct MockGattBackend {
    inner: Arc<Mutex<MockState>>,
}

impl MockGattBackend {
    /// Create a new mock backend simulating an idle device
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                device: Some(DEFAULT_DEVICE_NAME.to_string()),
                device_requests: 0,
                connect_delay: None,
                missing: None,
                connected: false,
                link_loss: None,
                subscribers: HashMap::new(),
                record_sets: HashMap::new(),
                payload_size: DEFAULT_PAYLOAD_SIZE,
                end_timestamp: Some(DEFAULT_END_TIMESTAMP),
                stall_after: None,
                duplicate_packet: None,
                transfer: None,
                firmware_info: r#"{"version":"1.0.0","name":"Sneak32"}"#.to_string(),
                settings_line: "0|-90|250|5000|1|2000|0|0|0|5||80|1|20|0|512|0|Sneak32"
                    .to_string(),
                status_line: "0:0:0:0:0:0:0:120000:1".to_string(),
                mtu_limit: DEFAULT_MTU_LIMIT,
                command_responses: HashMap::new(),
                stalled_commands: HashSet::new(),
                command_response: Vec::new(),
                writes: Vec::new(),
            })),
        }
    }

    /// Simulate the user cancelling device selection
    pub async fn set_selection_cancelled(&self, cancelled: bool) {
        self.inner.lock().await.device = (!cancelled).then(|| DEFAULT_DEVICE_NAME.to_string());
    }

    /// Slow down GATT connection setup
    pub async fn set_connect_delay(&self, delay: Duration) {
        self.inner.lock().await.connect_delay = Some(delay);
    }

    /// Hide one characteristic from the service
    pub async fn set_missing_characteristic(&self, role: CharacteristicRole) {
        self.inner.lock().await.missing = Some(role);
    }

    /// Configure the raw record blob served for a record kind
    pub async fn set_record_set(&self, kind: RecordKind, blob: Vec<u8>) {
        self.inner.lock().await.record_sets.insert(kind, blob);
    }

    /// Payload bytes per transfer packet
    pub async fn set_payload_size(&self, size: usize) {
        self.inner.lock().await.payload_size = size.max(1);
    }

    /// Timestamp carried by `END`; `None` sends a bare `END`
    pub async fn set_end_timestamp(&self, timestamp: Option<u64>) {
        self.inner.lock().await.end_timestamp = timestamp;
    }

    /// Stop answering packet requests after this ordinal (0 = never send `START`)
    pub async fn set_stall_after(&self, ordinal: Option<u16>) {
        self.inner.lock().await.stall_after = ordinal;
    }

    /// Notify this packet twice
    pub async fn set_duplicate_packet(&self, ordinal: Option<u16>) {
        self.inner.lock().await.duplicate_packet = ordinal;
    }

    pub async fn set_firmware_info(&self, json: &str) {
        self.inner.lock().await.firmware_info = json.to_string();
    }

    pub async fn set_settings_line(&self, line: &str) {
        self.inner.lock().await.settings_line = line.to_string();
    }

    pub async fn set_status_line(&self, line: &str) {
        self.inner.lock().await.status_line = line.to_string();
    }

    /// Largest `test_mtu` payload the simulated link carries
    pub async fn set_mtu_limit(&self, limit: usize) {
        self.inner.lock().await.mtu_limit = limit;
    }

    /// Fixed response for an exact command string
    pub async fn set_command_response(&self, command: &str, response: &str) {
        self.inner
            .lock()
            .await
            .command_responses
            .insert(command.to_string(), response.to_string());
    }

    /// Make writes of this command never complete
    pub async fn stall_command(&self, command: &str) {
        self.inner
            .lock()
            .await
            .stalled_commands
            .insert(command.to_string());
    }

    /// Simulate an unexpected link loss
    pub async fn drop_link(&self) {
        self.inner.lock().await.drop_link();
    }

    /// Push an unsolicited status notification
    pub async fn push_status(&self, line: &str) {
        self.inner
            .lock()
            .await
            .notify(CharacteristicRole::DeviceStatus, line.as_bytes().to_vec());
    }

    /// Push a raw data-transfer notification
    pub async fn push_data(&self, value: &[u8]) {
        self.inner
            .lock()
            .await
            .notify(CharacteristicRole::DataTransfer, value.to_vec());
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    /// Number of device selection prompts
    pub async fn device_requests(&self) -> usize {
        self.inner.lock().await.device_requests
    }

    /// Values written to a characteristic, in order, as text
    pub async fn written(&self, role: CharacteristicRole) -> Vec<String> {
        self.inner
            .lock()
            .await
            .writes
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, value)| String::from_utf8_lossy(value).to_string())
            .collect()
    }
}

impl Default for MockGattBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GattBackend for MockGattBackend {
    type Device = String;
    type Characteristic = CharacteristicRole;

    async fn request_device(&self) -> GattResult<Option<String>> {
        let mut state = self.inner.lock().await;
        state.device_requests += 1;
        Ok(state.device.clone())
    }

    async fn device_name(&self, device: &String) -> GattResult<String> {
        Ok(device.clone())
    }

    async fn connect(&self, _device: &String) -> GattResult<oneshot::Receiver<()>> {
        let delay = self.inner.lock().await.connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock().await;
        let (link_loss, lost) = oneshot::channel();
        state.connected = true;
        state.link_loss = Some(link_loss);
        Ok(lost)
    }

    async fn characteristic(&self, _device: &String, uuid: Uuid) -> GattResult<CharacteristicRole> {
        let state = self.inner.lock().await;
        if !state.connected {
            return Err(GattError::NotConnected);
        }
        match CharacteristicRole::from_uuid(uuid) {
            Some(role) if state.missing != Some(role) => Ok(role),
            _ => Err(GattError::CharacteristicNotFound(uuid)),
        }
    }

    async fn read(&self, characteristic: &CharacteristicRole) -> GattResult<Vec<u8>> {
        let state = self.inner.lock().await;
        if !state.connected {
            return Err(GattError::NotConnected);
        }
        Ok(match characteristic {
            CharacteristicRole::FirmwareInfo => state.firmware_info.as_bytes().to_vec(),
            CharacteristicRole::Settings => state.settings_line.as_bytes().to_vec(),
            CharacteristicRole::DeviceStatus => state.status_line.as_bytes().to_vec(),
            CharacteristicRole::Commands => state.command_response.clone(),
            CharacteristicRole::DataTransfer => Vec::new(),
        })
    }

    async fn write(&self, characteristic: &CharacteristicRole, value: &[u8]) -> GattResult<()> {
        let mut state = self.inner.lock().await;
        if !state.connected {
            return Err(GattError::NotConnected);
        }
        state.writes.push((*characteristic, value.to_vec()));

        match characteristic {
            CharacteristicRole::DataTransfer => state.on_data_request(value),
            CharacteristicRole::Settings => {
                state.settings_line = String::from_utf8_lossy(value).to_string();
            }
            CharacteristicRole::Commands => {
                let command = String::from_utf8_lossy(value).to_string();
                if state.stalled_commands.contains(&command) {
                    drop(state);
                    return futures::future::pending().await;
                }
                let response = state.on_command(&command);
                state.command_response = response.into_bytes();
            }
            CharacteristicRole::FirmwareInfo | CharacteristicRole::DeviceStatus => {}
        }
        Ok(())
    }

    async fn notifications(
        &self,
        characteristic: &CharacteristicRole,
    ) -> GattResult<mpsc::UnboundedReceiver<Vec<u8>>> {
        let mut state = self.inner.lock().await;
        if !state.connected {
            return Err(GattError::NotConnected);
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscribers.insert(*characteristic, sender);
        Ok(receiver)
    }

    async fn disconnect(&self, _device: &String) -> GattResult<()> {
        let mut state = self.inner.lock().await;
        state.connected = false;
        state.transfer = None;
        state.subscribers.clear();
        state.link_loss = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn connected() -> (MockGattBackend, oneshot::Receiver<()>) {
        let backend = MockGattBackend::new();
        let device = backend.request_device().await.unwrap().unwrap();
        let lost = backend.connect(&device).await.unwrap();
        (backend, lost)
    }

    #[tokio::test]
    async fn test_mock_serves_chunked_record_set() {
        let (backend, _lost) = connected().await;
        backend
            .set_record_set(RecordKind::BleDevices, vec![7u8; 100])
            .await;
        let mut data = backend
            .notifications(&CharacteristicRole::DataTransfer)
            .await
            .unwrap();

        backend
            .write(&CharacteristicRole::DataTransfer, b"ble_list")
            .await
            .unwrap();
        assert_eq!(data.recv().await.unwrap(), b"START:0002");

        backend
            .write(&CharacteristicRole::DataTransfer, b"0001")
            .await
            .unwrap();
        let first = data.recv().await.unwrap();
        assert_eq!(&first[..4], b"0001");
        assert_eq!(first.len(), 4 + 64);

        backend
            .write(&CharacteristicRole::DataTransfer, b"0002")
            .await
            .unwrap();
        let second = data.recv().await.unwrap();
        assert_eq!(second.len(), 4 + 36);
        assert_eq!(data.recv().await.unwrap(), b"END:1700000000");
    }

    #[tokio::test]
    async fn test_mock_command_responses() {
        let (backend, _lost) = connected().await;
        backend.set_mtu_limit(400).await;

        backend
            .write(&CharacteristicRole::Commands, b"test_mtu 448")
            .await
            .unwrap();
        let response = backend.read(&CharacteristicRole::Commands).await.unwrap();
        assert!(response.starts_with(b"Error:"));

        backend
            .write(&CharacteristicRole::Commands, b"test_mtu 392")
            .await
            .unwrap();
        let response = backend.read(&CharacteristicRole::Commands).await.unwrap();
        assert_eq!(response.len(), 392);

        backend
            .write(&CharacteristicRole::Commands, b"set_mtu 388")
            .await
            .unwrap();
        let response = backend.read(&CharacteristicRole::Commands).await.unwrap();
        assert_eq!(response, b"MTU set to 388");
    }

    #[tokio::test]
    async fn test_mock_drop_link_signals_loss() {
        let (backend, lost) = connected().await;
        backend.drop_link().await;

        assert!(lost.await.is_ok());
        assert!(!backend.is_connected().await);
        assert_eq!(
            backend.read(&CharacteristicRole::Settings).await,
            Err(GattError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_mock_missing_characteristic() {
        let (backend, _lost) = connected().await;
        backend
            .set_missing_characteristic(CharacteristicRole::Commands)
            .await;
        let device = DEFAULT_DEVICE_NAME.to_string();

        let result = backend
            .characteristic(&device, CharacteristicRole::Commands.uuid())
            .await;
        assert_eq!(
            result,
            Err(GattError::CharacteristicNotFound(
                CharacteristicRole::Commands.uuid()
            ))
        );
    }

    #[tokio::test]
    async fn test_mock_selection_cancelled() {
        let backend = MockGattBackend::new();
        backend.set_selection_cancelled(true).await;

        assert_eq!(backend.request_device().await.unwrap(), None);
        assert_eq!(backend.device_requests().await, 1);
    }
}
