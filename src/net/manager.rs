//! Network connection state machine.
//!
//! ```text
//!   init ──► Connecting ──(GotIp)──► Connected
//!     │          │
//!     │          └─(elapsed > timeout)──► Timeout ──┐
//!     └──(no credentials)──► CredentialNotFound ────┤
//!                                                   ▼
//!                               setup_ap: ApModeInit ──► ApMode | Error
//! ```
//!
//! Connection attempts are never retried automatically: a failed
//! attempt ends in `Timeout` and the coordinator falls back to the
//! setup access point.

use core::net::Ipv4Addr;

use embassy_time::{Duration, Instant};

use super::{Credentials, DeviceIdentity, NetworkState, NetworkStatus, WifiStack};
use crate::config::{AP_GATEWAY, WIFI_CONNECT_TIMEOUT_MS};
use crate::storage::{Preferences, StoreBackend};

/// Tunables for the network manager.
#[derive(Clone, Copy, Debug)]
pub struct NetworkConfig {
    /// How long a station attempt may stay in `Connecting`.
    pub connect_timeout: Duration,
    pub gateway: Ipv4Addr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let [a, b, c, d] = AP_GATEWAY;
        Self {
            connect_timeout: Duration::from_millis(WIFI_CONNECT_TIMEOUT_MS),
            gateway: Ipv4Addr::new(a, b, c, d),
        }
    }
}

pub struct NetworkManager<'a, W, S> {
    wifi: W,
    status: &'a NetworkStatus,
    prefs: &'a Preferences<S>,
    identity: DeviceIdentity,
    config: NetworkConfig,
    /// Credentials of the attempt in flight; persisted once it succeeds.
    attempt: Option<Credentials>,
    attempt_timeout: Duration,
    connect_started: Option<Instant>,
    /// Set once the follow-up work for the current connection has run.
    connection_handled: bool,
    connected_ssid: Option<Credentials>,
    ap_active: bool,
    wps_active: bool,
}

impl<'a, W: WifiStack, S: StoreBackend> NetworkManager<'a, W, S> {
    pub fn new(
        wifi: W,
        status: &'a NetworkStatus,
        prefs: &'a Preferences<S>,
        identity: DeviceIdentity,
        config: NetworkConfig,
    ) -> Self {
        Self {
            wifi,
            status,
            prefs,
            identity,
            attempt_timeout: config.connect_timeout,
            config,
            attempt: None,
            connect_started: None,
            connection_handled: false,
            connected_ssid: None,
            ap_active: false,
            wps_active: false,
        }
    }

    /// Try the saved credentials once; without them the state becomes
    /// `CredentialNotFound`.
    pub async fn init(&mut self, now: Instant) -> bool {
        info!("WiFi: initializing");
        if self.connect_with_saved_credentials(now).await {
            info!("WiFi: connecting with saved credentials");
            true
        } else {
            info!("WiFi: no saved credentials, setup required");
            self.status.set(NetworkState::CredentialNotFound);
            false
        }
    }

    pub async fn connect_with_saved_credentials(&mut self, now: Instant) -> bool {
        match self.prefs.wifi_credentials().await {
            Some(creds) => self.connect(creds, now).await,
            None => false,
        }
    }

    /// Start a station attempt with the default timeout.
    pub async fn connect(&mut self, credentials: Credentials, now: Instant) -> bool {
        let timeout = self.config.connect_timeout;
        self.connect_with_timeout(credentials, timeout, now).await
    }

    pub async fn connect_with_timeout(
        &mut self,
        credentials: Credentials,
        timeout: Duration,
        now: Instant,
    ) -> bool {
        if self.status.state() == NetworkState::Connecting {
            warn!("WiFi: attempt already in flight");
            return false;
        }
        if self.ap_active {
            self.stop_ap().await;
        }

        info!("WiFi: connecting to {}", credentials.ssid.as_str());
        self.status.set(NetworkState::Connecting);
        self.connect_started = Some(now);
        self.attempt_timeout = timeout;

        match self.wifi.begin_station(&credentials).await {
            Ok(()) => {
                self.attempt = Some(credentials);
                true
            }
            Err(e) => {
                error!("WiFi: station start failed: {:?}", e);
                self.connect_started = None;
                self.status.set(NetworkState::Error);
                false
            }
        }
    }

    pub async fn disconnect(&mut self) {
        info!("WiFi: disconnecting");
        if let Err(e) = self.wifi.disconnect().await {
            warn!("WiFi: disconnect failed: {:?}", e);
        }
        self.attempt = None;
        self.connect_started = None;
        self.status.set(NetworkState::Disconnected);
    }

    /// Reconnect with saved credentials, or report `CredentialNotFound`.
    pub async fn reconnect(&mut self, now: Instant) -> bool {
        info!("WiFi: reconnecting");
        if self.status.state() == NetworkState::Connecting {
            self.disconnect().await;
        }
        if self.connect_with_saved_credentials(now).await {
            true
        } else {
            self.status.set(NetworkState::CredentialNotFound);
            false
        }
    }

    /// Bring up the setup access point with the device-derived credentials.
    pub async fn setup_ap(&mut self) -> bool {
        self.status.set(NetworkState::ApModeInit);
        self.connect_started = None;
        self.attempt = None;

        let result = self
            .wifi
            .begin_access_point(
                self.identity.ap_ssid(),
                self.identity.ap_password(),
                self.config.gateway,
            )
            .await;

        match result {
            Ok(()) => {
                self.ap_active = true;
                self.status.set(NetworkState::ApMode);
                info!(
                    "WiFi: access point {} up, gateway {}",
                    self.identity.ap_ssid(),
                    self.config.gateway.octets()
                );
                true
            }
            Err(e) => {
                error!("WiFi: access point failed: {:?}", e);
                self.status.set(NetworkState::Error);
                false
            }
        }
    }

    pub async fn stop_ap(&mut self) {
        if !self.ap_active {
            return;
        }
        info!("WiFi: stopping access point");
        if let Err(e) = self.wifi.stop_access_point().await {
            warn!("WiFi: stop access point failed: {:?}", e);
        }
        self.ap_active = false;
    }

    /// Enter push-button WPS enrollee mode.
    pub async fn start_wps(&mut self) -> bool {
        if self.wps_active {
            warn!("WiFi: WPS already active");
            return false;
        }
        info!("WiFi: starting WPS, press the router button");
        match self.wifi.start_wps().await {
            Ok(()) => {
                self.wps_active = true;
                self.status.set(NetworkState::WpsListening);
                true
            }
            Err(e) => {
                error!("WiFi: WPS start failed: {:?}", e);
                self.status.set(NetworkState::WpsFailed);
                false
            }
        }
    }

    pub async fn stop_wps(&mut self) {
        if !self.wps_active {
            return;
        }
        if let Err(e) = self.wifi.stop_wps().await {
            warn!("WiFi: WPS stop failed: {:?}", e);
        }
        self.wps_active = false;
    }

    /// Periodic work driven by the coordinator: connect timeout, WPS
    /// follow-up and post-connection persistence.
    pub async fn update(&mut self, now: Instant) {
        let state = self.status.state();
        if state != NetworkState::Connected {
            self.connection_handled = false;
        }

        match state {
            NetworkState::Connecting => {
                if let Some(start) = self.connect_started {
                    let elapsed = now.saturating_duration_since(start);
                    if elapsed > self.attempt_timeout
                        && self.status.transition(NetworkState::Connecting, NetworkState::Timeout)
                    {
                        warn!("WiFi: connection timeout after {} ms", elapsed.as_millis());
                        self.connect_started = None;
                    }
                }
            }
            NetworkState::Connected if !self.connection_handled => {
                self.connection_handled = true;
                self.connect_started = None;
                self.on_connected().await;
            }
            NetworkState::WpsSuccess if self.wps_active => {
                info!("WiFi: WPS credentials received, joining");
                self.stop_wps().await;
                self.status.set(NetworkState::Connecting);
                self.connect_started = Some(now);
                self.attempt_timeout = self.config.connect_timeout;
                self.attempt = self.wifi.station_credentials();
                if let Err(e) = self.wifi.rejoin().await {
                    error!("WiFi: rejoin after WPS failed: {:?}", e);
                    self.status.set(NetworkState::Error);
                }
            }
            NetworkState::WpsFailed if self.wps_active => {
                warn!("WiFi: WPS failed or timed out");
                self.stop_wps().await;
            }
            _ => {}
        }
    }

    async fn on_connected(&mut self) {
        let creds = self.attempt.take().or_else(|| self.wifi.station_credentials());
        if let Some(ip) = self.status.ip() {
            info!("WiFi: connected, ip {}", ip.octets());
        }

        if let Some(creds) = creds {
            self.save_credentials(&creds).await;
            self.connected_ssid = Some(creds);
        }

        if let Err(e) = self.wifi.sync_time().await {
            warn!("WiFi: time sync failed: {:?}", e);
        }
    }

    /// Persist `credentials` unless identical ones are already stored.
    pub async fn save_credentials(&mut self, credentials: &Credentials) {
        if self.prefs.wifi_credentials().await.as_ref() == Some(credentials) {
            debug!("WiFi: credentials unchanged");
            return;
        }
        if let Err(e) = self.prefs.save_wifi_credentials(credentials).await {
            error!("WiFi: saving credentials failed: {:?}", e);
        }
    }

    pub fn state(&self) -> NetworkState {
        self.status.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == NetworkState::Connected
    }

    pub fn is_ap_mode(&self) -> bool {
        self.state() == NetworkState::ApMode
    }

    /// Time spent in the current attempt; zero when not connecting.
    pub fn connection_time(&self, now: Instant) -> Duration {
        match (self.state(), self.connect_started) {
            (NetworkState::Connecting, Some(start)) => now.saturating_duration_since(start),
            _ => Duration::from_ticks(0),
        }
    }

    pub fn has_ap_client(&self) -> bool {
        self.ap_active && self.wifi.ap_client_count() > 0
    }

    pub fn ap_ssid(&self) -> &str {
        self.identity.ap_ssid()
    }

    pub fn ap_password(&self) -> &str {
        self.identity.ap_password()
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.config.gateway
    }

    /// Station address when connected, gateway address in AP mode.
    pub fn local_ip(&self) -> Option<Ipv4Addr> {
        match self.state() {
            NetworkState::Connected => self.status.ip(),
            NetworkState::ApMode => Some(self.config.gateway),
            _ => None,
        }
    }

    /// Network name: joined SSID when connected, own SSID in AP mode.
    pub fn ssid(&self) -> Option<&str> {
        match self.state() {
            NetworkState::Connected => self.connected_ssid.as_ref().map(|c| c.ssid.as_str()),
            NetworkState::ApMode => Some(self.identity.ap_ssid()),
            _ => None,
        }
    }

    pub fn rssi(&self) -> Option<i8> {
        if self.is_connected() {
            self.wifi.rssi()
        } else {
            None
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn prefs(&self) -> &'a Preferences<S> {
        self.prefs
    }

    pub fn wifi(&self) -> &W {
        &self.wifi
    }

    pub fn wifi_mut(&mut self) -> &mut W {
        &mut self.wifi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::net::StackEvent;
    use crate::storage::RamBackend;
    use embassy_futures::block_on;

    #[derive(Default)]
    struct FakeRadio {
        stations: Vec<Credentials>,
        aps: Vec<(String, String)>,
        stops: usize,
        syncs: usize,
        rejoins: usize,
        clients: u8,
        fail_ap: bool,
        fail_station: bool,
        joined: Option<Credentials>,
    }

    impl WifiStack for FakeRadio {
        async fn begin_station(&mut self, credentials: &Credentials) -> Result<()> {
            if self.fail_station {
                return Err(Error::Wifi(crate::error::WifiError::StartFailed));
            }
            self.stations.push(credentials.clone());
            Ok(())
        }
        async fn rejoin(&mut self) -> Result<()> {
            self.rejoins += 1;
            Ok(())
        }
        async fn begin_access_point(&mut self, ssid: &str, password: &str, _gateway: Ipv4Addr) -> Result<()> {
            if self.fail_ap {
                return Err(Error::Wifi(crate::error::WifiError::ConfigFailed));
            }
            self.aps.push((ssid.into(), password.into()));
            Ok(())
        }
        async fn stop_access_point(&mut self) -> Result<()> {
            self.stops += 1;
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn start_wps(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop_wps(&mut self) -> Result<()> {
            Ok(())
        }
        async fn sync_time(&mut self) -> Result<()> {
            self.syncs += 1;
            Ok(())
        }
        fn ap_client_count(&self) -> u8 {
            self.clients
        }
        fn station_credentials(&self) -> Option<Credentials> {
            self.joined.clone()
        }
        fn rssi(&self) -> Option<i8> {
            Some(-61)
        }
    }

    const MAC: [u8; 6] = [0x24, 0x6f, 0x28, 0xa1, 0xb2, 0xc3];

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn manager<'a>(
        status: &'a NetworkStatus,
        prefs: &'a Preferences<RamBackend>,
    ) -> NetworkManager<'a, FakeRadio, RamBackend> {
        NetworkManager::new(
            FakeRadio::default(),
            status,
            prefs,
            DeviceIdentity::from_mac(MAC, 0),
            NetworkConfig::default(),
        )
    }

    #[test]
    fn init_without_credentials() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        assert!(!block_on(m.init(at(0))));
        assert_eq!(m.state(), NetworkState::CredentialNotFound);
        assert!(m.wifi().stations.is_empty());
    }

    #[test]
    fn init_with_saved_credentials_starts_attempt() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let creds = Credentials::new("home", "hunter22").unwrap();
        block_on(prefs.save_wifi_credentials(&creds)).unwrap();

        let mut m = manager(&status, &prefs);
        assert!(block_on(m.init(at(0))));
        assert_eq!(m.state(), NetworkState::Connecting);
        assert_eq!(m.wifi().stations, [creds]);
    }

    #[test]
    fn timeout_is_strictly_after_limit() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        block_on(m.connect(Credentials::new("x", "y").unwrap(), at(1_000)));

        block_on(m.update(at(11_000)));
        assert_eq!(m.state(), NetworkState::Connecting);
        assert_eq!(m.connection_time(at(11_000)).as_millis(), 10_000);

        block_on(m.update(at(11_001)));
        assert_eq!(m.state(), NetworkState::Timeout);
        assert_eq!(m.connection_time(at(11_001)).as_millis(), 0);
    }

    #[test]
    fn second_connect_while_connecting_is_rejected() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        assert!(block_on(m.connect(Credentials::new("a", "1").unwrap(), at(0))));
        assert!(!block_on(m.connect(Credentials::new("b", "2").unwrap(), at(10))));
        assert_eq!(m.wifi().stations.len(), 1);
    }

    #[test]
    fn station_start_failure_is_error() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        m.wifi_mut().fail_station = true;
        assert!(!block_on(m.connect(Credentials::new("a", "1").unwrap(), at(0))));
        assert_eq!(m.state(), NetworkState::Error);
    }

    #[test]
    fn successful_connection_persists_once() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        let creds = Credentials::new("office", "s3cret!!").unwrap();
        block_on(m.connect(creds.clone(), at(0)));

        status.on_stack_event(StackEvent::GotIp(Ipv4Addr::new(192, 168, 1, 40)));
        block_on(m.update(at(2_000)));
        block_on(m.update(at(2_050)));

        assert_eq!(block_on(prefs.wifi_credentials()), Some(creds));
        assert_eq!(block_on(prefs.with_backend(|b| b.writes())), 2);
        assert_eq!(m.wifi().syncs, 1);
        assert_eq!(m.local_ip(), Some(Ipv4Addr::new(192, 168, 1, 40)));
        assert_eq!(m.ssid(), Some("office"));
        assert_eq!(m.rssi(), Some(-61));
    }

    #[test]
    fn unchanged_credentials_are_not_rewritten() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let creds = Credentials::new("office", "s3cret!!").unwrap();
        block_on(prefs.save_wifi_credentials(&creds)).unwrap();

        let mut m = manager(&status, &prefs);
        block_on(m.init(at(0)));
        status.on_stack_event(StackEvent::GotIp(Ipv4Addr::new(10, 0, 0, 2)));
        block_on(m.update(at(100)));
        assert_eq!(block_on(prefs.with_backend(|b| b.writes())), 2);
    }

    #[test]
    fn late_connect_beats_timeout() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        block_on(m.connect(Credentials::new("x", "y").unwrap(), at(0)));
        status.on_stack_event(StackEvent::GotIp(Ipv4Addr::new(10, 0, 0, 2)));
        block_on(m.update(at(20_000)));
        assert_eq!(m.state(), NetworkState::Connected);
    }

    #[test]
    fn access_point_uses_identity() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        assert!(block_on(m.setup_ap()));
        assert_eq!(m.state(), NetworkState::ApMode);
        assert_eq!(m.wifi().aps, [(String::from("Knob-a1286f24"), String::from("85ddeb85dd"))]);
        assert_eq!(m.local_ip(), Some(Ipv4Addr::new(192, 168, 4, 1)));

        assert!(!m.has_ap_client());
        m.wifi_mut().clients = 1;
        assert!(m.has_ap_client());
    }

    #[test]
    fn access_point_failure_is_error() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        m.wifi_mut().fail_ap = true;
        assert!(!block_on(m.setup_ap()));
        assert_eq!(m.state(), NetworkState::Error);
    }

    #[test]
    fn connect_from_ap_stops_access_point() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        block_on(m.setup_ap());
        block_on(m.connect(Credentials::new("home", "pw").unwrap(), at(0)));
        assert_eq!(m.wifi().stops, 1);
        assert!(!m.has_ap_client());
    }

    #[test]
    fn reconnect_without_credentials() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        assert!(!block_on(m.reconnect(at(0))));
        assert_eq!(m.state(), NetworkState::CredentialNotFound);
    }

    #[test]
    fn wps_success_rejoins_and_saves() {
        let status = NetworkStatus::new();
        let prefs = Preferences::new(RamBackend::new());
        let mut m = manager(&status, &prefs);
        assert!(block_on(m.start_wps()));
        assert_eq!(m.state(), NetworkState::WpsListening);

        let creds = Credentials::new("router", "pushbutton").unwrap();
        m.wifi_mut().joined = Some(creds.clone());
        status.on_stack_event(StackEvent::WpsSuccess);
        block_on(m.update(at(500)));
        assert_eq!(m.state(), NetworkState::Connecting);
        assert_eq!(m.wifi().rejoins, 1);

        status.on_stack_event(StackEvent::GotIp(Ipv4Addr::new(10, 1, 1, 1)));
        block_on(m.update(at(900)));
        assert_eq!(block_on(prefs.wifi_credentials()), Some(creds));
    }
}
