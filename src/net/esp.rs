//! ESP32-S3 radio adapter.
//!
//! `esp-radio`'s `WifiController` is owned by [`wifi_task`]. The
//! network manager talks to it through [`EspWifi`], which forwards each
//! request over [`WifiLink`] and waits for the task's answer. Link
//! changes observed by the task are reported straight into
//! [`NetworkStatus`].

use alloc::string::String as AllocString;
use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicI8, AtomicU8, Ordering};

use edge_dhcp::server::{Server as DhcpServer, ServerOptions as DhcpServerOptions};
use edge_dhcp::{Options as DhcpOptions, Packet as DhcpPacket};
use embassy_futures::select::{select, Either};
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::Stack;
use embassy_time::{Duration, Timer};
use esp_radio::wifi::{AccessPointConfig, AuthMethod, ClientConfig, ModeConfig, WifiController};
use heapless::String;

use super::link::RequestLink;
use super::{Credentials, NetworkStatus, StackEvent, WifiStack};
use crate::config::{AP_CHANNEL, AP_GATEWAY, PASSWORD_MAX_LEN, SSID_MAX_LEN};
use crate::error::{Error, Result, WifiError};

/// How long a request may wait for the radio task.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Link supervision period while idle.
const LINK_POLL_MS: u64 = 500;

/// Marker for "no RSSI sample".
const NO_RSSI: i8 = i8::MIN;

enum WifiCommand {
    Station(Credentials),
    Rejoin,
    AccessPoint {
        ssid: String<SSID_MAX_LEN>,
        password: String<PASSWORD_MAX_LEN>,
    },
    StopAccessPoint,
    Disconnect,
}

/// Request/response pair between [`EspWifi`] and [`wifi_task`], plus
/// the readings the task publishes.
///
/// Commands and replies carry a sequence number, so an answer to a
/// request that already timed out is never taken for the next one.
pub struct WifiLink {
    requests: RequestLink<WifiCommand, Result<()>>,
    ap_clients: AtomicU8,
    rssi: AtomicI8,
}

impl Default for WifiLink {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiLink {
    pub const fn new() -> Self {
        Self {
            requests: RequestLink::new(),
            ap_clients: AtomicU8::new(0),
            rssi: AtomicI8::new(NO_RSSI),
        }
    }

    fn note_ap_client(&self) {
        let prev = self.ap_clients.fetch_max(1, Ordering::AcqRel);
        if prev == 0 {
            info!("WiFi: first client on the access point");
        }
    }
}

/// [`WifiStack`] implementation backed by [`wifi_task`].
pub struct EspWifi {
    link: &'static WifiLink,
    station: Option<Credentials>,
    seq: u32,
}

impl EspWifi {
    pub fn new(link: &'static WifiLink) -> Self {
        Self {
            link,
            station: None,
            seq: 0,
        }
    }

    async fn request(&mut self, command: WifiCommand) -> Result<()> {
        self.seq = self.seq.wrapping_add(1);
        self.link
            .requests
            .request(self.seq, command, REQUEST_TIMEOUT)
            .await
            .ok_or(Error::Timeout)?
    }
}

impl WifiStack for EspWifi {
    async fn begin_station(&mut self, credentials: &Credentials) -> Result<()> {
        self.request(WifiCommand::Station(credentials.clone())).await?;
        self.station = Some(credentials.clone());
        Ok(())
    }

    async fn rejoin(&mut self) -> Result<()> {
        self.request(WifiCommand::Rejoin).await
    }

    async fn begin_access_point(&mut self, ssid: &str, password: &str, gateway: Ipv4Addr) -> Result<()> {
        if gateway != Ipv4Addr::from(AP_GATEWAY) {
            warn!("WiFi: AP gateway is fixed at boot, ignoring {}", gateway.octets());
        }
        let ssid = String::try_from(ssid).map_err(|_| Error::BufferOverflow)?;
        let password = String::try_from(password).map_err(|_| Error::BufferOverflow)?;
        self.request(WifiCommand::AccessPoint { ssid, password }).await
    }

    async fn stop_access_point(&mut self) -> Result<()> {
        self.request(WifiCommand::StopAccessPoint).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.request(WifiCommand::Disconnect).await
    }

    async fn start_wps(&mut self) -> Result<()> {
        Err(Error::Unsupported)
    }

    async fn stop_wps(&mut self) -> Result<()> {
        Ok(())
    }

    async fn sync_time(&mut self) -> Result<()> {
        // No SNTP client on this target.
        Err(Error::Unsupported)
    }

    fn ap_client_count(&self) -> u8 {
        self.link.ap_clients.load(Ordering::Acquire)
    }

    fn station_credentials(&self) -> Option<Credentials> {
        self.station.clone()
    }

    fn rssi(&self) -> Option<i8> {
        match self.link.rssi.load(Ordering::Relaxed) {
            NO_RSSI => None,
            v => Some(v),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    /// Station configured; `associated` once `connect_async` succeeded,
    /// `reported` once the IP went out as `GotIp`.
    Station { associated: bool, reported: bool },
    AccessPoint,
}

struct Radio<'a> {
    controller: WifiController<'static>,
    sta: Stack<'static>,
    link: &'a WifiLink,
    status: &'a NetworkStatus,
    mode: Mode,
}

impl Radio<'_> {
    async fn stop(&mut self) {
        if matches!(self.mode, Mode::Station { .. }) {
            let _ = self.controller.disconnect_async().await;
        }
        if self.controller.is_started().unwrap_or(false) {
            let _ = self.controller.stop_async().await;
        }
        self.link.ap_clients.store(0, Ordering::Release);
        self.link.rssi.store(NO_RSSI, Ordering::Relaxed);
        self.mode = Mode::Idle;
    }

    async fn start_station(&mut self, credentials: &Credentials) -> Result<()> {
        self.stop().await;
        let client = ClientConfig::default()
            .with_ssid(AllocString::from(credentials.ssid.as_str()))
            .with_password(AllocString::from(credentials.password.as_str()));
        self.controller
            .set_config(&ModeConfig::Client(client))
            .map_err(|e| {
                error!("WiFi: station config refused: {:?}", defmt::Debug2Format(&e));
                WifiError::ConfigFailed
            })?;
        self.controller.start_async().await.map_err(|e| {
            error!("WiFi: radio start failed: {:?}", defmt::Debug2Format(&e));
            WifiError::StartFailed
        })?;
        info!("WiFi: joining {}", credentials.ssid.as_str());
        self.mode = Mode::Station {
            associated: false,
            reported: false,
        };
        Ok(())
    }

    async fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<()> {
        self.stop().await;
        let ap = AccessPointConfig::default()
            .with_ssid(AllocString::from(ssid))
            .with_password(AllocString::from(password))
            .with_auth_method(AuthMethod::Wpa2Personal)
            .with_channel(AP_CHANNEL);
        self.controller
            .set_config(&ModeConfig::AccessPoint(ap))
            .map_err(|e| {
                error!("WiFi: AP config refused: {:?}", defmt::Debug2Format(&e));
                WifiError::ConfigFailed
            })?;
        self.controller.start_async().await.map_err(|e| {
            error!("WiFi: AP start failed: {:?}", defmt::Debug2Format(&e));
            WifiError::StartFailed
        })?;
        self.mode = Mode::AccessPoint;
        Ok(())
    }

    async fn handle(&mut self, command: WifiCommand) -> Result<()> {
        match command {
            WifiCommand::Station(credentials) => self.start_station(&credentials).await,
            WifiCommand::Rejoin => match self.mode {
                Mode::Station { .. } => {
                    let _ = self.controller.disconnect_async().await;
                    self.mode = Mode::Station {
                        associated: false,
                        reported: false,
                    };
                    Ok(())
                }
                _ => Err(WifiError::NotRunning.into()),
            },
            WifiCommand::AccessPoint { ssid, password } => {
                self.start_access_point(&ssid, &password).await
            }
            WifiCommand::StopAccessPoint => {
                if self.mode == Mode::AccessPoint {
                    self.stop().await;
                }
                Ok(())
            }
            WifiCommand::Disconnect => {
                self.stop().await;
                Ok(())
            }
        }
    }

    /// Associate (cancelled by any incoming command) or watch the link.
    async fn supervise(&mut self) -> Option<(u32, WifiCommand)> {
        let Mode::Station { associated, reported } = self.mode else {
            return match select(self.link.requests.next(), Timer::after_millis(LINK_POLL_MS)).await {
                Either::First(command) => Some(command),
                Either::Second(()) => None,
            };
        };

        if !associated {
            return match select(self.link.requests.next(), self.controller.connect_async()).await {
                Either::First(command) => Some(command),
                Either::Second(Ok(())) => {
                    info!("WiFi: associated");
                    self.mode = Mode::Station {
                        associated: true,
                        reported: false,
                    };
                    None
                }
                Either::Second(Err(e)) => {
                    warn!("WiFi: association failed: {:?}", defmt::Debug2Format(&e));
                    self.status.on_stack_event(StackEvent::Disconnected);
                    Timer::after_millis(LINK_POLL_MS).await;
                    None
                }
            };
        }

        if !matches!(self.controller.is_connected(), Ok(true)) {
            self.link.rssi.store(NO_RSSI, Ordering::Relaxed);
            self.status.on_stack_event(StackEvent::Disconnected);
            self.mode = Mode::Station {
                associated: false,
                reported: false,
            };
            return None;
        }

        if !reported {
            if let Some(config) = self.sta.config_v4() {
                self.status.on_stack_event(StackEvent::GotIp(config.address.address()));
                self.mode = Mode::Station {
                    associated: true,
                    reported: true,
                };
            }
        }
        if let Ok(rssi) = self.controller.rssi() {
            self.link.rssi.store(rssi.clamp(-127, 0) as i8, Ordering::Relaxed);
        }

        match select(self.link.requests.next(), Timer::after_millis(LINK_POLL_MS)).await {
            Either::First(command) => Some(command),
            Either::Second(()) => None,
        }
    }
}

/// Radio task body: executes [`EspWifi`] requests and supervises the
/// station link.
pub async fn wifi_task(
    controller: WifiController<'static>,
    sta: Stack<'static>,
    link: &'static WifiLink,
    status: &'static NetworkStatus,
) -> ! {
    let mut radio = Radio {
        controller,
        sta,
        link,
        status,
        mode: Mode::Idle,
    };
    info!("WiFi: radio task started");

    loop {
        if let Some((seq, command)) = radio.supervise().await {
            let result = radio.handle(command).await;
            link.requests.reply(seq, result);
        }
    }
}

/// DHCP server for clients of the setup access point.
pub async fn dhcp_server(stack: Stack<'static>, link: &'static WifiLink) -> ! {
    while !stack.is_config_up() {
        Timer::after_millis(100).await;
    }

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buffer = [0u8; 600];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_buffer = [0u8; 600];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buffer, &mut tx_meta, &mut tx_buffer);

    while let Err(e) = socket.bind(67) {
        error!("DHCP: bind failed: {:?}", e);
        Timer::after_secs(1).await;
    }
    info!("DHCP: serving on port 67");

    let server_ip = Ipv4Addr::from(AP_GATEWAY);
    let mut gw_buf = [Ipv4Addr::UNSPECIFIED; 1];
    let server_options = DhcpServerOptions::new(server_ip, Some(&mut gw_buf));
    let mut server = DhcpServer::<_, 8>::new_with_et(server_ip);
    server.range_start = Ipv4Addr::new(AP_GATEWAY[0], AP_GATEWAY[1], AP_GATEWAY[2], 50);
    server.range_end = Ipv4Addr::new(AP_GATEWAY[0], AP_GATEWAY[1], AP_GATEWAY[2], 200);

    let mut buf = [0u8; 600];
    loop {
        let Ok((len, _meta)) = socket.recv_from(&mut buf).await else {
            continue;
        };
        let request = match DhcpPacket::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("DHCP: decode error: {:?}", defmt::Debug2Format(&e));
                continue;
            }
        };

        let mut opt_buf = DhcpOptions::buf();
        let Some(reply) = server.handle_request(&mut opt_buf, &server_options, &request) else {
            continue;
        };
        match reply.encode(&mut buf) {
            Ok(encoded) => {
                if let Err(e) = socket.send_to(encoded, (Ipv4Addr::BROADCAST, 68)).await {
                    warn!("DHCP: send error: {:?}", e);
                    continue;
                }
                link.note_ap_client();
            }
            Err(e) => warn!("DHCP: encode error: {:?}", defmt::Debug2Format(&e)),
        }
    }
}
