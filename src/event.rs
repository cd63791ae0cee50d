//! Messages exchanged between the coordination and render contexts.
//!
//! An [`Event`] is a small fixed-shape value: a kind tag, an `i32`
//! payload and a bounded text payload. It is moved through the bus by
//! value and never shared.

use crate::config::EVENT_TEXT_LEN;
use heapless::String;

/// Every kind of message that can cross the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    // System
    BootingComplete,

    // Encoder (UI → Core)
    /// `value` is the detent delta; positive is clockwise.
    EncoderRotation,
    /// `value` is the press duration in ms.
    EncoderClick,
    /// `value` is the press duration in ms.
    EncoderLongPress,
    /// `value` is the press duration in ms at the moment it was reported.
    EncoderUltraLongPress,

    // Display (Core → UI)
    DisplayWakeUp,
    DisplayUpdate,
    DisplayClear,
    DisplayWifiConnecting,
    DisplayWifiConnected,
    DisplayWifiError,
    /// `text` is `"ssid|password"`.
    DisplayWifiApMode,
    /// `text` is the setup URL.
    DisplayWifiSetupUrl,

    // WiFi status
    WifiConnecting,
    WifiConnected,
    WifiDisconnected,
    WifiError,
    WifiApMode,
}

/// One bus message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    value: i32,
    text: String<EVENT_TEXT_LEN>,
}

impl Event {
    /// An event with no payload.
    pub const fn new(kind: EventKind) -> Self {
        Self {
            kind,
            value: 0,
            text: String::new(),
        }
    }

    /// Attach an integer payload.
    pub fn with_value(mut self, value: i32) -> Self {
        self.value = value;
        self
    }

    /// Attach a text payload, truncated to the event text capacity.
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = truncate(text);
        self
    }

    /// Attach a `"left|right"` text payload.
    pub fn with_pair(mut self, left: &str, right: &str) -> Self {
        self.text.clear();
        push_truncated(&mut self.text, left);
        push_truncated(&mut self.text, "|");
        push_truncated(&mut self.text, right);
        self
    }

    /// A WiFi status event carrying `"ssid|ip"`.
    pub fn wifi(kind: EventKind, ssid: &str, ip: &str, value: i32) -> Self {
        Self::new(kind).with_pair(ssid, ip).with_value(value)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn text(&self) -> &str {
        self.text.as_str()
    }

    /// Detent delta of a rotation event.
    pub fn rotation_delta(&self) -> i32 {
        self.value
    }

    pub fn is_clockwise(&self) -> bool {
        self.value > 0
    }

    /// Press duration carried by click / long-press events.
    pub fn press_duration_ms(&self) -> u32 {
        self.value.max(0) as u32
    }

    pub fn is_long_press(&self, threshold_ms: u32) -> bool {
        self.press_duration_ms() >= threshold_ms
    }

    /// Split a `"left|right"` payload. Text without a separator is
    /// returned as the left half.
    pub fn pair(&self) -> (&str, &str) {
        self.text.split_once('|').unwrap_or((self.text.as_str(), ""))
    }
}

/// Copy `s` into a bounded string, dropping whole characters that do
/// not fit.
pub fn truncate<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    push_truncated(&mut out, s);
    out
}

fn push_truncated<const N: usize>(out: &mut String<N>, s: &str) {
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
}
