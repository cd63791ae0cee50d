//! Line-oriented service console on the USB serial port.
//!
//! Commands are matched after trimming and lowercasing:
//!
//! | command      | effect                                      |
//! |--------------|---------------------------------------------|
//! | `help`       | list commands                               |
//! | `status`     | state, uptime, heap, counters, WiFi details |
//! | `get uuid`   | device identification as JSON               |
//! | `reboot`     | restart                                     |
//! | `hard reset` | erase all preferences, then restart         |

use core::fmt::{self, Write};
use core::net::Ipv4Addr;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::String;

use crate::config::FIRMWARE_VERSION;
use crate::net::{DeviceIdentity, NetworkState};

pub const CONSOLE_LINE_LEN: usize = 64;
pub const CONSOLE_REPLY_LEN: usize = 640;

pub type ConsoleLine = String<CONSOLE_LINE_LEN>;
pub type ConsoleReply = String<CONSOLE_REPLY_LEN>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Status,
    GetUuid,
    Reboot,
    HardReset,
    Unknown(ConsoleLine),
}

impl ConsoleCommand {
    /// `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let mut lower = ConsoleLine::new();
        for c in line.chars().flat_map(char::to_lowercase) {
            if lower.push(c).is_err() {
                break;
            }
        }
        Some(match lower.as_str() {
            "help" => ConsoleCommand::Help,
            "status" => ConsoleCommand::Status,
            "get uuid" => ConsoleCommand::GetUuid,
            "reboot" => ConsoleCommand::Reboot,
            "hard reset" => ConsoleCommand::HardReset,
            _ => ConsoleCommand::Unknown(lower),
        })
    }
}

pub const HELP_TEXT: &str = "Commands:\r\n\
  reboot      - restart the device\r\n\
  hard reset  - factory reset (clear all settings)\r\n\
  status      - show system information\r\n\
  get uuid    - device identification\r\n\
  help        - show this help\r\n";

/// Device identification block printed by `get uuid`.
pub fn write_device_info<W: Write>(out: &mut W, identity: &DeviceIdentity, chip_revision: u16) -> fmt::Result {
    writeln!(out, "DEVICE_INFO_START")?;
    writeln!(out, "{{")?;
    writeln!(out, "  \"uuid\": \"{}\",", identity.uuid())?;
    writeln!(out, "  \"device_id\": \"{}\",", identity.device_id())?;
    writeln!(out, "  \"mac_address\": \"{}\",", identity.mac_string())?;
    writeln!(out, "  \"firmware_version\": \"{}\",", FIRMWARE_VERSION)?;
    writeln!(out, "  \"chip_model\": \"ESP32-S3\",")?;
    writeln!(out, "  \"chip_revision\": {}", chip_revision)?;
    writeln!(out, "}}")?;
    writeln!(out, "DEVICE_INFO_END")
}

/// Everything `status` reports.
#[derive(Clone, Debug)]
pub struct StatusSnapshot<'a> {
    pub state: &'a str,
    pub uptime_secs: u64,
    pub free_heap: usize,
    pub cycles: u32,
    pub events: u32,
    pub wifi: NetworkState,
    pub ssid: Option<&'a str>,
    pub ip: Option<Ipv4Addr>,
    pub rssi: Option<i8>,
}

impl StatusSnapshot<'_> {
    pub fn write_to<W: Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "Status:")?;
        writeln!(out, "  State: {}", self.state)?;
        writeln!(out, "  Uptime: {} seconds", self.uptime_secs)?;
        writeln!(out, "  Free Heap: {} bytes", self.free_heap)?;
        writeln!(out, "  Coordination Cycles: {}", self.cycles)?;
        writeln!(out, "  Events Processed: {}", self.events)?;
        writeln!(out, "  WiFi State: {:?}", self.wifi)?;
        if self.wifi == NetworkState::Connected {
            if let Some(ssid) = self.ssid {
                writeln!(out, "  Network: {}", ssid)?;
            }
            if let Some(ip) = self.ip {
                writeln!(out, "  IP Address: {}", ip)?;
            }
            if let Some(rssi) = self.rssi {
                writeln!(out, "  Signal: {} dBm", rssi)?;
            }
        }
        Ok(())
    }
}

/// Accumulates raw serial bytes into lines.
#[derive(Default)]
pub struct LineBuffer {
    buf: ConsoleLine,
    overflow: bool,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            buf: String::new(),
            overflow: false,
        }
    }

    /// Feed one byte; returns a completed line on `\n` or `\r`.
    /// Over-long lines are discarded whole.
    pub fn push(&mut self, byte: u8) -> Option<ConsoleLine> {
        match byte {
            b'\n' | b'\r' => {
                let line = core::mem::take(&mut self.buf);
                let overflow = core::mem::replace(&mut self.overflow, false);
                (!overflow && !line.trim().is_empty()).then_some(line)
            }
            b if b.is_ascii() && !self.overflow => {
                if self.buf.push(b as char).is_err() {
                    self.overflow = true;
                }
                None
            }
            _ => None,
        }
    }
}

/// Lines in from the serial task, replies back out.
pub struct ConsoleChannel {
    pub lines: Channel<CriticalSectionRawMutex, ConsoleLine, 2>,
    pub replies: Channel<CriticalSectionRawMutex, ConsoleReply, 2>,
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleChannel {
    pub const fn new() -> Self {
        Self {
            lines: Channel::new(),
            replies: Channel::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitive_trimmed() {
        assert_eq!(ConsoleCommand::parse("  HELP \r"), Some(ConsoleCommand::Help));
        assert_eq!(ConsoleCommand::parse("Get UUID"), Some(ConsoleCommand::GetUuid));
        assert_eq!(ConsoleCommand::parse("hard reset"), Some(ConsoleCommand::HardReset));
        assert_eq!(ConsoleCommand::parse("reboot"), Some(ConsoleCommand::Reboot));
        assert_eq!(ConsoleCommand::parse("status"), Some(ConsoleCommand::Status));
        assert_eq!(ConsoleCommand::parse("   "), None);
        match ConsoleCommand::parse("Launch") {
            Some(ConsoleCommand::Unknown(s)) => assert_eq!(s.as_str(), "launch"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn device_info_is_json_block() {
        let id = DeviceIdentity::from_mac([0x24, 0x6f, 0x28, 0xa1, 0xb2, 0xc3], 2);
        let mut out = ConsoleReply::new();
        write_device_info(&mut out, &id, 2).unwrap();
        assert!(out.starts_with("DEVICE_INFO_START\n{\n"));
        assert!(out.contains("\"device_id\": \"a1286f24\","));
        assert!(out.contains("\"mac_address\": \"24:6F:28:A1:B2:C3\","));
        assert!(out.contains("\"chip_revision\": 2\n}"));
        assert!(out.ends_with("DEVICE_INFO_END\n"));
    }

    #[test]
    fn status_shows_network_only_when_connected() {
        let mut snap = StatusSnapshot {
            state: "Running",
            uptime_secs: 42,
            free_heap: 100_000,
            cycles: 7,
            events: 3,
            wifi: NetworkState::Connected,
            ssid: Some("home"),
            ip: Some(Ipv4Addr::new(10, 0, 0, 5)),
            rssi: Some(-55),
        };
        let mut out = ConsoleReply::new();
        snap.write_to(&mut out).unwrap();
        assert!(out.contains("Uptime: 42 seconds"));
        assert!(out.contains("IP Address: 10.0.0.5"));
        assert!(out.contains("Signal: -55 dBm"));

        snap.wifi = NetworkState::ApMode;
        let mut out = ConsoleReply::new();
        snap.write_to(&mut out).unwrap();
        assert!(out.contains("WiFi State: ApMode"));
        assert!(!out.contains("Network:"));
    }

    #[test]
    fn line_buffer_splits_and_discards_overflow() {
        let mut lb = LineBuffer::new();
        let mut got = None;
        for b in b"status\r" {
            got = lb.push(*b);
        }
        assert_eq!(got.as_deref(), Some("status"));
        assert_eq!(lb.push(b'\n'), None);

        for _ in 0..CONSOLE_LINE_LEN + 5 {
            assert!(lb.push(b'x').is_none());
        }
        assert_eq!(lb.push(b'\n'), None);
        lb.push(b'h');
        assert_eq!(lb.push(b'\n').as_deref(), Some("h"));
    }
}
