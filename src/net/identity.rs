//! Device identity derived from the factory MAC address.
//!
//! Everything here is a pure function of the six MAC bytes (plus the
//! chip revision for the UUID), so the same board always advertises the
//! same access point and reports the same id.

use core::fmt::Write;

use heapless::String;

use crate::config::AP_SSID_PREFIX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    mac: [u8; 6],
    chip_revision: u16,
    device_id: String<8>,
    ap_ssid: String<32>,
    ap_password: String<10>,
}

impl DeviceIdentity {
    pub fn from_mac(mac: [u8; 6], chip_revision: u16) -> Self {
        let low = u32::from_le_bytes([mac[0], mac[1], mac[2], mac[3]]);

        let mut device_id = String::new();
        let _ = write!(device_id, "{:08x}", low);

        let mut ap_ssid = String::new();
        let _ = ap_ssid.push_str(AP_SSID_PREFIX);
        let _ = ap_ssid.push_str(&device_id);

        let mut ap_password = String::new();
        for b in [
            mac[0] ^ mac[3],
            mac[1] ^ mac[4],
            mac[2] ^ mac[5],
            mac[3] ^ mac[0],
            mac[4] ^ mac[1],
        ] {
            let _ = write!(ap_password, "{:02x}", b);
        }

        Self {
            mac,
            chip_revision,
            device_id,
            ap_ssid,
            ap_password,
        }
    }

    /// Eight lowercase hex digits from the low 32 bits of the MAC.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn ap_ssid(&self) -> &str {
        &self.ap_ssid
    }

    /// WPA2 passphrase for the setup access point.
    pub fn ap_password(&self) -> &str {
        &self.ap_password
    }

    pub fn chip_revision(&self) -> u16 {
        self.chip_revision
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// `AA:BB:CC:DD:EE:FF`
    pub fn mac_string(&self) -> String<17> {
        let m = self.mac;
        let mut s = String::new();
        let _ = write!(
            s,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        );
        s
    }

    /// Stable hardware UUID with version-4 and RFC 4122 variant bits.
    pub fn uuid(&self) -> String<36> {
        let m = self.mac;
        let chip = u32::from_le_bytes([m[0], m[1], m[2], m[3]]);
        let mut s = String::new();
        let _ = write!(
            s,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-4{:01x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            m[5],
            m[4],
            m[3],
            m[2],
            m[1],
            m[0],
            (chip >> 12) & 0x0F,
            (chip >> 8) & 0xFF,
            0x80 | ((chip >> 4) & 0x3F),
            chip & 0xFF,
            m[5],
            m[4],
            m[3],
            m[2],
            m[1],
            self.chip_revision & 0xFF,
        );
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x24, 0x6f, 0x28, 0xa1, 0xb2, 0xc3];

    #[test]
    fn device_id_is_low_word_little_endian() {
        let id = DeviceIdentity::from_mac(MAC, 0);
        assert_eq!(id.device_id(), "a1286f24");
        assert_eq!(id.ap_ssid(), "Knob-a1286f24");
    }

    #[test]
    fn ap_password_mixes_mac_bytes() {
        let id = DeviceIdentity::from_mac(MAC, 0);
        // 24^a1, 6f^b2, 28^c3, a1^24, b2^6f
        assert_eq!(id.ap_password(), "85ddeb85dd");
        assert_eq!(id.ap_password().len(), 10);
    }

    #[test]
    fn mac_string_format() {
        let id = DeviceIdentity::from_mac(MAC, 0);
        assert_eq!(id.mac_string().as_str(), "24:6F:28:A1:B2:C3");
    }

    #[test]
    fn uuid_has_version_and_variant() {
        let id = DeviceIdentity::from_mac(MAC, 3);
        let uuid = id.uuid();
        assert_eq!(uuid.len(), 36);
        let groups: Vec<&str> = uuid.split('-').collect();
        assert_eq!(groups.iter().map(|g| g.len()).collect::<Vec<_>>(), [8, 4, 4, 4, 12]);
        assert!(groups[2].starts_with('4'));
        let variant = u8::from_str_radix(&groups[3][..1], 16).unwrap();
        assert_eq!(variant & 0b1100, 0b1000);
        assert!(uuid.ends_with("03"));
    }

    #[test]
    fn identity_is_deterministic() {
        assert_eq!(DeviceIdentity::from_mac(MAC, 1), DeviceIdentity::from_mac(MAC, 1));
    }
}
