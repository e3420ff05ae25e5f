//! Fixed-width binary record codec
//!
//! Record sets arrive as a plain concatenation of fixed-size records, all
//! multi-byte integers in network byte order.

use crate::core::{
    error::{CodecError, CodecResult},
    types::{BleDeviceRecord, MacAddress, RecordKind, WifiDeviceRecord, WifiNetworkRecord},
};

pub const MAC_ADDR_SIZE: usize = 6;
pub const SSID_SIZE: usize = 32;
pub const TYPE_SIZE: usize = 16;
pub const NAME_SIZE: usize = 32;

/// A record with a constant on-wire width
pub trait Record: Sized {
    const WIDTH: usize;
    const KIND: RecordKind;

    /// Decode from exactly `WIDTH` bytes
    fn decode(bytes: &[u8]) -> Self;

    /// Append exactly `WIDTH` bytes
    fn encode(&self, out: &mut Vec<u8>);

    /// Device-relative last-seen time
    fn last_seen(&self) -> u64;
}

/// Decode a reassembled transfer buffer into records
pub fn decode_records<R: Record>(buffer: &[u8]) -> CodecResult<Vec<R>> {
    if buffer.len() % R::WIDTH != 0 {
        return Err(CodecError::RecordLength {
            len: buffer.len(),
            width: R::WIDTH,
        });
    }
    Ok(buffer.chunks_exact(R::WIDTH).map(R::decode).collect())
}

/// Encode records into a transfer buffer
pub fn encode_records<R: Record>(records: &[R]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * R::WIDTH);
    for record in records {
        record.encode(&mut out);
    }
    out
}

/// Sequential big-endian field reader over one record
struct FieldReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        out
    }

    fn mac(&mut self) -> MacAddress {
        MacAddress(self.take::<MAC_ADDR_SIZE>())
    }

    /// Fixed-width string: cut at the first NUL, bytes taken as-is
    fn fixed_str<const N: usize>(&mut self) -> String {
        let raw = self.take::<N>();
        raw.iter()
            .take_while(|&&b| b != 0)
            .map(|&b| char::from(b))
            .collect()
    }

    fn i8(&mut self) -> i8 {
        i8::from_be_bytes(self.take::<1>())
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take::<4>())
    }

    fn u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take::<8>())
    }
}

fn put_fixed_str(out: &mut Vec<u8>, value: &str, width: usize) {
    let mut field: Vec<u8> = value
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .take(width)
        .collect();
    field.resize(width, 0);
    out.extend_from_slice(&field);
}

impl Record for WifiNetworkRecord {
    const WIDTH: usize = MAC_ADDR_SIZE + SSID_SIZE + 1 + 1 + TYPE_SIZE + 8 + 4;
    const KIND: RecordKind = RecordKind::WifiNetworks;

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        Self {
            mac: r.mac(),
            ssid: r.fixed_str::<SSID_SIZE>(),
            rssi: r.i8(),
            channel: r.u8(),
            network_type: r.fixed_str::<TYPE_SIZE>(),
            last_seen: r.u64(),
            times_seen: r.u32(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.mac.0);
        put_fixed_str(out, &self.ssid, SSID_SIZE);
        out.extend_from_slice(&self.rssi.to_be_bytes());
        out.push(self.channel);
        put_fixed_str(out, &self.network_type, TYPE_SIZE);
        out.extend_from_slice(&self.last_seen.to_be_bytes());
        out.extend_from_slice(&self.times_seen.to_be_bytes());
    }

    fn last_seen(&self) -> u64 {
        self.last_seen
    }
}

impl Record for WifiDeviceRecord {
    const WIDTH: usize = MAC_ADDR_SIZE * 2 + 1 + 1 + 8 + 4;
    const KIND: RecordKind = RecordKind::WifiDevices;

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        Self {
            mac: r.mac(),
            bssid: r.mac(),
            rssi: r.i8(),
            channel: r.u8(),
            last_seen: r.u64(),
            times_seen: r.u32(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.mac.0);
        out.extend_from_slice(&self.bssid.0);
        out.extend_from_slice(&self.rssi.to_be_bytes());
        out.push(self.channel);
        out.extend_from_slice(&self.last_seen.to_be_bytes());
        out.extend_from_slice(&self.times_seen.to_be_bytes());
    }

    fn last_seen(&self) -> u64 {
        self.last_seen
    }
}

impl Record for BleDeviceRecord {
    const WIDTH: usize = MAC_ADDR_SIZE + NAME_SIZE + 1 + 8 + 1 + 4;
    const KIND: RecordKind = RecordKind::BleDevices;

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        Self {
            mac: r.mac(),
            name: r.fixed_str::<NAME_SIZE>(),
            rssi: r.i8(),
            last_seen: r.u64(),
            is_public: r.u8() != 0,
            times_seen: r.u32(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.mac.0);
        put_fixed_str(out, &self.name, NAME_SIZE);
        out.extend_from_slice(&self.rssi.to_be_bytes());
        out.extend_from_slice(&self.last_seen.to_be_bytes());
        out.push(u8::from(self.is_public));
        out.extend_from_slice(&self.times_seen.to_be_bytes());
    }

    fn last_seen(&self) -> u64 {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn station(n: u8) -> WifiDeviceRecord {
        WifiDeviceRecord {
            mac: MacAddress([0xde, 0xad, 0xbe, 0xef, 0x00, n]),
            bssid: MacAddress([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]),
            rssi: -70,
            channel: 11,
            last_seen: 1_700_000_000 + u64::from(n),
            times_seen: 3,
        }
    }

    #[test]
    fn test_record_widths() {
        assert_eq!(WifiNetworkRecord::WIDTH, 68);
        assert_eq!(WifiDeviceRecord::WIDTH, 26);
        assert_eq!(BleDeviceRecord::WIDTH, 52);
    }

    #[test]
    fn test_decode_two_wifi_devices() {
        let buffer = encode_records(&[station(1), station(2)]);
        assert_eq!(buffer.len(), 52);

        let devices: Vec<WifiDeviceRecord> = decode_records(&buffer).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].mac.to_string(), "DE:AD:BE:EF:00:01");
        assert_eq!(devices[1].bssid.to_string(), "10:20:30:40:50:60");
        assert_eq!(devices[1].rssi, -70);
    }

    #[test]
    fn test_stray_byte_is_corrupt() {
        let mut buffer = encode_records(&[station(1)]);
        buffer.push(0xff);
        assert_eq!(buffer.len(), 27);

        let result = decode_records::<WifiDeviceRecord>(&buffer);
        assert_eq!(
            result.unwrap_err(),
            CodecError::RecordLength { len: 27, width: 26 }
        );
    }

    #[test]
    fn test_empty_buffer_yields_no_records() {
        let networks: Vec<WifiNetworkRecord> = decode_records(&[]).unwrap();
        assert!(networks.is_empty());
    }

    #[test]
    fn test_wifi_network_byte_layout() {
        let mut buffer = vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut ssid = b"HomeNet".to_vec();
        ssid.resize(SSID_SIZE, 0);
        buffer.extend_from_slice(&ssid);
        buffer.push(0xc4); // -60
        buffer.push(6);
        let mut kind = b"WPA2".to_vec();
        kind.resize(TYPE_SIZE, 0);
        buffer.extend_from_slice(&kind);
        buffer.extend_from_slice(&[0, 0, 0, 0, 0x65, 0x53, 0xf1, 0x00]);
        buffer.extend_from_slice(&[0, 0, 0x01, 0x00]);

        let networks: Vec<WifiNetworkRecord> = decode_records(&buffer).unwrap();
        assert_eq!(
            networks,
            vec![WifiNetworkRecord {
                mac: MacAddress([1, 2, 3, 4, 5, 6]),
                ssid: "HomeNet".into(),
                rssi: -60,
                channel: 6,
                network_type: "WPA2".into(),
                last_seen: 1_700_000_000,
                times_seen: 256,
            }]
        );
    }

    #[test]
    fn test_string_field_stops_at_first_nul() {
        let record = BleDeviceRecord {
            mac: MacAddress([9; 6]),
            name: "Tag".into(),
            rssi: -40,
            last_seen: 5,
            is_public: true,
            times_seen: 1,
        };
        let mut buffer = encode_records(&[record]);
        // garbage after the terminator must not leak into the name
        buffer[MAC_ADDR_SIZE + 4] = b'X';

        let decoded: Vec<BleDeviceRecord> = decode_records(&buffer).unwrap();
        assert_eq!(decoded[0].name, "Tag");
        assert!(decoded[0].is_public);
    }

    #[test]
    fn test_string_field_keeps_raw_bytes() {
        let mut buffer = Vec::new();
        let record = WifiNetworkRecord {
            mac: MacAddress::default(),
            ssid: "caf\u{e9}".into(),
            rssi: 0,
            channel: 1,
            network_type: String::new(),
            last_seen: 0,
            times_seen: 0,
        };
        record.encode(&mut buffer);
        assert_eq!(&buffer[MAC_ADDR_SIZE..MAC_ADDR_SIZE + 4], b"caf\xe9");

        let decoded: Vec<WifiNetworkRecord> = decode_records(&buffer).unwrap();
        assert_eq!(decoded[0].ssid, "caf\u{e9}");
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let network = WifiNetworkRecord {
            mac: MacAddress([0xaa; 6]),
            ssid: "x".repeat(SSID_SIZE),
            rssi: -128,
            channel: 165,
            network_type: "OPEN".into(),
            last_seen: u64::MAX,
            times_seen: u32::MAX,
        };
        let ble = BleDeviceRecord {
            mac: MacAddress([0x11; 6]),
            name: String::new(),
            rssi: 127,
            last_seen: 42,
            is_public: false,
            times_seen: 7,
        };

        let networks: Vec<WifiNetworkRecord> =
            decode_records(&encode_records(&[network.clone()])).unwrap();
        assert_eq!(networks, vec![network]);

        let bles: Vec<BleDeviceRecord> = decode_records(&encode_records(&[ble.clone()])).unwrap();
        assert_eq!(bles, vec![ble]);
    }
}
