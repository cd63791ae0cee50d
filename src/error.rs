//! Unified error type for knobfw.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` for efficient on-target logging.

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // WiFi
    /// The radio driver rejected a configuration or start request.
    Wifi(WifiError),

    /// No station credentials are stored.
    CredentialsNotFound,

    // Storage
    /// Flash read/write/erase failed.
    Storage,

    /// A stored value was not valid UTF-8 or did not fit its buffer.
    CorruptValue,

    // UI / Display
    /// I²C transaction to the display failed.
    Display,

    /// LED strip write failed.
    Led,

    /// Buzzer GPIO write failed.
    Buzzer,

    // Generic
    /// Buffer too small for the requested operation.
    BufferOverflow,

    /// Operation timed out.
    Timeout,

    /// The requested operation is not supported by this hardware.
    Unsupported,
}

/// Subset of radio errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WifiError {
    /// Station or AP configuration was refused.
    ConfigFailed,
    /// The radio could not be started.
    StartFailed,
    /// Association with the access point failed.
    ConnectFailed,
    /// The radio task is not running.
    NotRunning,
}

// Convenience conversions

impl From<WifiError> for Error {
    fn from(e: WifiError) -> Self {
        Error::Wifi(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
