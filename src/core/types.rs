//! Domain types for the Sneak32 link

use std::{
    fmt,
    str::FromStr,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::transport::ble::uuids::{
    COMMANDS_CHAR_UUID, DATA_TRANSFER_CHAR_UUID, DEVICE_STATUS_CHAR_UUID,
    FIRMWARE_INFO_CHAR_UUID, SETTINGS_CHAR_UUID,
};

/// Logical role of each characteristic exposed by the Sneak32 service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicRole {
    FirmwareInfo,
    Settings,
    DataTransfer,
    Commands,
    DeviceStatus,
}

impl CharacteristicRole {
    pub const ALL: [CharacteristicRole; 5] = [
        CharacteristicRole::FirmwareInfo,
        CharacteristicRole::Settings,
        CharacteristicRole::DataTransfer,
        CharacteristicRole::Commands,
        CharacteristicRole::DeviceStatus,
    ];

    pub fn uuid(self) -> Uuid {
        match self {
            CharacteristicRole::FirmwareInfo => FIRMWARE_INFO_CHAR_UUID,
            CharacteristicRole::Settings => SETTINGS_CHAR_UUID,
            CharacteristicRole::DataTransfer => DATA_TRANSFER_CHAR_UUID,
            CharacteristicRole::Commands => COMMANDS_CHAR_UUID,
            CharacteristicRole::DeviceStatus => DEVICE_STATUS_CHAR_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.uuid() == uuid)
    }
}

/// Resolved characteristic handles, one per role
///
/// Either the whole set exists (link connected) or none of it does.
#[derive(Debug, Clone)]
pub struct Characteristics<C> {
    pub firmware_info: C,
    pub settings: C,
    pub data_transfer: C,
    pub commands: C,
    pub device_status: C,
}

impl<C> Characteristics<C> {
    pub fn get(&self, role: CharacteristicRole) -> &C {
        match role {
            CharacteristicRole::FirmwareInfo => &self.firmware_info,
            CharacteristicRole::Settings => &self.settings,
            CharacteristicRole::DataTransfer => &self.data_transfer,
            CharacteristicRole::Commands => &self.commands,
            CharacteristicRole::DeviceStatus => &self.device_status,
        }
    }
}

/// Link state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LinkStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// Identity of the peripheral behind an established link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkIdentity {
    pub device_name: String,
}

/// How a `connect()` call reached the connected state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// This call performed device selection and GATT setup
    Established(LinkIdentity),
    /// This call joined an attempt started by another caller
    Joined(LinkIdentity),
    /// The link was already up
    AlreadyConnected(LinkIdentity),
}

impl ConnectOutcome {
    pub fn identity(&self) -> &LinkIdentity {
        match self {
            ConnectOutcome::Established(identity)
            | ConnectOutcome::Joined(identity)
            | ConnectOutcome::AlreadyConnected(identity) => identity,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self, ConnectOutcome::Established(_))
    }
}

/// Events published by the link to external collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected { device_name: String },
    Disconnected { unexpected: bool },
    StatusUpdated(DeviceStatus),
    TransferCompleted { kind: RecordKind, records: usize },
}

/// Record sets that can be pulled over the data-transfer characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    WifiNetworks,
    WifiDevices,
    BleDevices,
}

impl RecordKind {
    /// Request token written to start a transfer session
    pub fn token(self) -> &'static str {
        match self {
            RecordKind::WifiNetworks => "ssid_list",
            RecordKind::WifiDevices => "client_list",
            RecordKind::BleDevices => "ble_list",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "ssid_list" => Some(RecordKind::WifiNetworks),
            "client_list" => Some(RecordKind::WifiDevices),
            "ble_list" => Some(RecordKind::BleDevices),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// 48-bit hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let octets: Vec<String> = self.0.iter().map(|b| hex::encode_upper([*b])).collect();
        f.write_str(&octets.join(":"))
    }
}

impl FromStr for MacAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.split([':', '-']).collect();
        let bytes = hex::decode(&digits).map_err(|e| format!("Invalid MAC '{}': {}", s, e))?;
        let octets: [u8; 6] = bytes
            .try_into()
            .map_err(|_| format!("Invalid MAC '{}': expected 6 octets", s))?;
        Ok(MacAddress(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A WiFi access point seen by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiNetworkRecord {
    pub mac: MacAddress,
    pub ssid: String,
    pub rssi: i8,
    pub channel: u8,
    #[serde(rename = "type")]
    pub network_type: String,
    pub last_seen: u64,
    pub times_seen: u32,
}

/// A WiFi client station seen by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiDeviceRecord {
    pub mac: MacAddress,
    pub bssid: MacAddress,
    pub rssi: i8,
    pub channel: u8,
    pub last_seen: u64,
    pub times_seen: u32,
}

/// A BLE advertiser seen by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleDeviceRecord {
    pub mac: MacAddress,
    pub name: String,
    pub rssi: i8,
    pub last_seen: u64,
    pub is_public: bool,
    pub times_seen: u32,
}

/// Decoded result of one transfer session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSet<R> {
    pub records: Vec<R>,
    /// Device wall clock (seconds) reported by the closing `END` message
    pub timestamp: Option<u64>,
    /// Host time at which the session completed
    pub received_at: SystemTime,
}

impl<R> RecordSet<R> {
    /// Map a device-relative `last_seen` value onto host time
    pub fn seen_at(&self, last_seen: u64) -> Option<SystemTime> {
        let remote = self.timestamp?;
        if last_seen <= remote {
            self.received_at
                .checked_sub(Duration::from_secs(remote - last_seen))
        } else {
            self.received_at
                .checked_add(Duration::from_secs(last_seen - remote))
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Device configuration, exchanged wholesale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub only_management_frames: bool,
    pub minimal_rssi: i32,
    pub dwell_time_ms: u32,
    pub ble_scan_period: u32,
    pub ignore_random_ble: bool,
    pub ble_scan_duration: u32,
    pub operation_mode: u8,
    pub passive_scan: bool,
    pub stealth_mode: bool,
    pub autosave_interval_min: u32,
    pub authorized_mac: Option<String>,
    pub cpu_mhz: u32,
    pub led_mode: u8,
    pub wifi_tx_power: i32,
    pub ble_tx_power: i32,
    pub ble_mtu: u32,
    pub ignore_local_wifi: bool,
    pub device_name: String,
}

/// Periodic device status snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub wifi_networks: u32,
    pub wifi_devices: u32,
    pub ble_devices: u32,
    pub wifi_detected_networks: u32,
    pub wifi_detected_devices: u32,
    pub ble_detected_devices: u32,
    pub alarm: bool,
    pub free_heap: u32,
    pub uptime_secs: u64,
}

/// Result of the MTU probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtuOutcome {
    pub size: Option<usize>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MtuOutcome {
    pub fn negotiated(size: usize) -> Self {
        Self {
            size: Some(size),
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            size: None,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Everything learned about the device during the connect handshake
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub device_name: String,
    pub firmware_info: serde_json::Value,
    pub device_status: DeviceStatus,
    pub settings: DeviceSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<MtuOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mac_display_is_uppercase_colon_hex() {
        let mac = MacAddress([0xaa, 0xbb, 0x0c, 0x01, 0xee, 0xff]);
        assert_eq!(mac.to_string(), "AA:BB:0C:01:EE:FF");
    }

    #[test]
    fn test_mac_parse() {
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(mac, MacAddress([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]));
        assert!("aa:bb:cc".parse::<MacAddress>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_serializes_as_string() {
        let mac = MacAddress([1, 2, 3, 4, 5, 6]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, r#""01:02:03:04:05:06""#);
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }

    #[test]
    fn test_record_kind_tokens() {
        for kind in [
            RecordKind::WifiNetworks,
            RecordKind::WifiDevices,
            RecordKind::BleDevices,
        ] {
            assert_eq!(RecordKind::from_token(kind.token()), Some(kind));
        }
        assert_eq!(RecordKind::from_token("0001"), None);
    }

    #[test]
    fn test_characteristic_roles_map_to_unique_uuids() {
        for role in CharacteristicRole::ALL {
            assert_eq!(CharacteristicRole::from_uuid(role.uuid()), Some(role));
        }
    }

    #[test]
    fn test_seen_at_reconciles_device_clock() {
        let received_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let set: RecordSet<()> = RecordSet {
            records: vec![],
            timestamp: Some(5_000),
            received_at,
        };

        assert_eq!(
            set.seen_at(4_900),
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(999_900))
        );
        assert_eq!(set.seen_at(5_000), Some(received_at));
    }

    #[test]
    fn test_seen_at_without_device_timestamp() {
        let set: RecordSet<()> = RecordSet {
            records: vec![],
            timestamp: None,
            received_at: SystemTime::now(),
        };
        assert_eq!(set.seen_at(10), None);
    }

    #[test]
    fn test_connect_outcome_identity() {
        let identity = LinkIdentity {
            device_name: "Sneak32".into(),
        };
        let outcome = ConnectOutcome::Joined(identity.clone());
        assert_eq!(outcome.identity(), &identity);
        assert!(!outcome.is_established());
    }
}
