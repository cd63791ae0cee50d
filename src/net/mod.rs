//! WiFi connectivity - station connection, soft-AP fallback and WPS.
//!
//! The radio driver reports asynchronously (IP acquired, link lost, WPS
//! result). Those reports land in [`status::NetworkStatus`], an atomic
//! that never blocks the reporting context. The coordinator drives
//! [`manager::NetworkManager::update`] to apply timeouts and the
//! follow-up actions that need the radio.
//!
//! ## Components
//!
//! - **Manager**: connection attempts, AP fallback, credential persistence
//! - **Status**: lock-free shared connection state
//! - **Identity**: MAC-derived device id and AP credentials
//! - **Link**: sequence-tagged request/reply between a handle and its driver task
//! - **Portal**: provisioning form parsing for the setup page
//! - **Esp** (device only): `esp-radio` adapter and the AP DHCP server

#[cfg(feature = "embedded")]
pub mod esp;
pub mod identity;
pub mod link;
pub mod manager;
pub mod portal;
pub mod status;

use core::net::Ipv4Addr;

use heapless::String;

use crate::config::{PASSWORD_MAX_LEN, SSID_MAX_LEN};
use crate::error::Result;

pub use identity::DeviceIdentity;
pub use manager::{NetworkConfig, NetworkManager};
pub use status::NetworkStatus;

/// Connectivity state shared between the radio callbacks and the
/// coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum NetworkState {
    Disconnected = 0,
    Connecting,
    Connected,
    Timeout,
    ApModeInit,
    ApMode,
    WpsListening,
    WpsSuccess,
    WpsFailed,
    Error,
    CredentialNotFound,
}

impl NetworkState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => NetworkState::Connecting,
            2 => NetworkState::Connected,
            3 => NetworkState::Timeout,
            4 => NetworkState::ApModeInit,
            5 => NetworkState::ApMode,
            6 => NetworkState::WpsListening,
            7 => NetworkState::WpsSuccess,
            8 => NetworkState::WpsFailed,
            9 => NetworkState::Error,
            10 => NetworkState::CredentialNotFound,
            _ => NetworkState::Disconnected,
        }
    }

    /// States after which the device should fall back to the setup AP.
    pub fn needs_setup(self) -> bool {
        matches!(
            self,
            NetworkState::CredentialNotFound
                | NetworkState::Timeout
                | NetworkState::Error
                | NetworkState::WpsFailed
        )
    }
}

/// Asynchronous notifications from the radio driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackEvent {
    GotIp(Ipv4Addr),
    Disconnected,
    WpsSuccess,
    WpsFailed,
}

/// Station credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String<SSID_MAX_LEN>,
    pub password: String<PASSWORD_MAX_LEN>,
}

impl Credentials {
    /// `None` if the SSID is empty or either field is too long.
    pub fn new(ssid: &str, password: &str) -> Option<Self> {
        if ssid.is_empty() {
            return None;
        }
        Some(Self {
            ssid: String::try_from(ssid).ok()?,
            password: String::try_from(password).ok()?,
        })
    }
}

/// Radio driver operations the network manager depends on.
///
/// Completion of a station connection is *not* reported through the
/// return value: `begin_station` only starts the attempt, and the
/// outcome arrives later as a [`StackEvent`].
#[allow(async_fn_in_trait)]
pub trait WifiStack {
    /// Switch to station mode and start associating.
    async fn begin_station(&mut self, credentials: &Credentials) -> Result<()>;

    /// Reconnect with the credentials the driver already holds (after WPS).
    async fn rejoin(&mut self) -> Result<()>;

    async fn begin_access_point(&mut self, ssid: &str, password: &str, gateway: Ipv4Addr) -> Result<()>;

    async fn stop_access_point(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Start push-button WPS enrollee mode.
    async fn start_wps(&mut self) -> Result<()>;

    async fn stop_wps(&mut self) -> Result<()>;

    /// Start network time synchronisation.
    async fn sync_time(&mut self) -> Result<()>;

    /// Clients currently associated with the soft-AP.
    fn ap_client_count(&self) -> u8;

    /// Credentials the driver is currently using in station mode.
    fn station_credentials(&self) -> Option<Credentials>;

    fn rssi(&self) -> Option<i8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrips_through_u8() {
        for s in [
            NetworkState::Disconnected,
            NetworkState::Connecting,
            NetworkState::Connected,
            NetworkState::Timeout,
            NetworkState::ApModeInit,
            NetworkState::ApMode,
            NetworkState::WpsListening,
            NetworkState::WpsSuccess,
            NetworkState::WpsFailed,
            NetworkState::Error,
            NetworkState::CredentialNotFound,
        ] {
            assert_eq!(NetworkState::from_u8(s as u8), s);
        }
        assert_eq!(NetworkState::from_u8(200), NetworkState::Disconnected);
    }

    #[test]
    fn credentials_validation() {
        assert!(Credentials::new("", "secret").is_none());
        assert!(Credentials::new(&"x".repeat(33), "pw").is_none());
        assert!(Credentials::new("ok", &"p".repeat(65)).is_none());
        let c = Credentials::new("home", "hunter22").unwrap();
        assert_eq!(c.ssid.as_str(), "home");
    }
}
