//! System coordinator - the 20 Hz control loop.
//!
//! Owns the system state machine and mirrors network state changes into
//! user feedback (LED flashes, screens, chirps). Input events from the
//! render context are drained every tick.
//!
//! ```text
//!   Booting ──(4 s)──► Initializing ──► WifiConnecting ──► WifiConnected ──► Ready ──► Running
//!                           │                 │
//!                           │                 └──(timeout / no creds)──► WifiApMode
//!                           └──(WiFi optional)──► Ready                        │
//!                                                                  (AP failed) └─► WifiError
//! ```

use core::fmt::Write as _;

use embassy_time::{Duration, Instant};

use crate::buzzer::BuzzerHandle;
use crate::bus::{Direction, EventBus};
use crate::config::*;
use crate::console::{
    write_device_info, ConsoleChannel, ConsoleCommand, ConsoleReply, StatusSnapshot, HELP_TEXT,
};
use crate::event::{Event, EventKind};
use crate::health::{HealthMonitor, HealthProbe};
use crate::led::LedHandle;
use crate::net::portal::ProvisioningPortal;
use crate::net::{NetworkManager, NetworkState, WifiStack};
use crate::storage::{PrefKey, StoreBackend};

/// Top-level system state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemState {
    Booting,
    Initializing,
    WifiConnecting,
    WifiConnected,
    WifiApMode,
    WifiError,
    Ready,
    Running,
    Error,
}

impl SystemState {
    pub const fn name(self) -> &'static str {
        match self {
            SystemState::Booting => "Booting",
            SystemState::Initializing => "Initializing",
            SystemState::WifiConnecting => "WifiConnecting",
            SystemState::WifiConnected => "WifiConnected",
            SystemState::WifiApMode => "WifiApMode",
            SystemState::WifiError => "WifiError",
            SystemState::Ready => "Ready",
            SystemState::Running => "Running",
            SystemState::Error => "Error",
        }
    }
}

/// Actions only the composition root can carry out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemRequest {
    Restart,
}

#[derive(Clone, Copy, Debug)]
pub struct CoordinatorConfig {
    /// Time spent in `Booting` while the boot animation plays.
    pub boot_duration: Duration,
    /// Go through WiFi (or the setup AP) before becoming `Ready`.
    pub wifi_required: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            boot_duration: Duration::from_millis(BOOT_DURATION_MS),
            wifi_required: WIFI_REQUIRED,
        }
    }
}

pub struct Coordinator<'a, W, S, P, H> {
    bus: &'a EventBus,
    led: LedHandle<'a>,
    buzzer: BuzzerHandle<'a>,
    net: NetworkManager<'a, W, S>,
    portal: P,
    probe: H,
    console: Option<&'a ConsoleChannel>,
    health: HealthMonitor,
    config: CoordinatorConfig,

    state: SystemState,
    state_entered: Instant,
    started_at: Instant,
    /// Last network state acted on.
    seen_net_state: Option<NetworkState>,
    ap_client_seen: bool,
    /// The setup AP could not be started; don't retry.
    ap_failed: bool,
    cycles: u32,
    events_processed: u32,
}

impl<'a, W, S, P, H> Coordinator<'a, W, S, P, H>
where
    W: WifiStack,
    S: StoreBackend,
    P: ProvisioningPortal,
    H: HealthProbe,
{
    pub fn new(
        bus: &'a EventBus,
        led: LedHandle<'a>,
        buzzer: BuzzerHandle<'a>,
        net: NetworkManager<'a, W, S>,
        portal: P,
        probe: H,
        now: Instant,
    ) -> Self {
        Self {
            bus,
            led,
            buzzer,
            net,
            portal,
            probe,
            console: None,
            health: HealthMonitor::new(now),
            config: CoordinatorConfig::default(),
            state: SystemState::Booting,
            state_entered: now,
            started_at: now,
            seen_net_state: None,
            ap_client_seen: false,
            ap_failed: false,
            cycles: 0,
            events_processed: 0,
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_console(mut self, console: &'a ConsoleChannel) -> Self {
        self.console = Some(console);
        self
    }

    /// One-time setup before the first tick: preference defaults and the
    /// stored ring color.
    pub async fn startup(&mut self) {
        info!("Core: starting, firmware {}", FIRMWARE_VERSION);
        let prefs = self.net.prefs();
        if let Err(e) = prefs.init_defaults().await {
            warn!("Core: writing preference defaults failed: {:?}", e);
        }
        if let Some(color) = prefs.get(PrefKey::LedColor).await {
            self.led.set_named_color(&color);
        }
    }

    /// Enter `state`. Re-entering the current state does nothing.
    pub fn set_state(&mut self, state: SystemState, now: Instant) {
        if self.state != state {
            info!("Core: {:?} -> {:?}", self.state, state);
            self.state = state;
            self.state_entered = now;
        }
    }

    /// One coordination cycle.
    pub async fn tick(&mut self, now: Instant) -> Option<SystemRequest> {
        if self.state == SystemState::Booting {
            self.handle_booting(now).await;
        }

        if self.state != SystemState::Booting && self.config.wifi_required {
            self.net.update(now).await;
            self.handle_network(now).await;
            if self.net.is_ap_mode() {
                self.handle_ap_mode(now).await;
            }
        }

        if self.state == SystemState::Ready {
            self.set_state(SystemState::Running, now);
            info!("Core: system running");
        }

        let mut request = self.handle_console(now).await;
        if let Some(r) = self.process_events().await {
            request = Some(r);
        }

        self.cycles = self.cycles.wrapping_add(1);
        self.check_health(now);
        request
    }

    async fn handle_booting(&mut self, now: Instant) {
        if now.saturating_duration_since(self.state_entered) < self.config.boot_duration {
            return;
        }
        self.set_state(SystemState::Initializing, now);

        if self.config.wifi_required {
            info!("Core: WiFi required, connecting");
            self.send_ui(Event::new(EventKind::DisplayWifiConnecting));
            self.net.init(now).await;
        } else {
            info!("Core: WiFi optional, ready");
            self.send_ui(Event::new(EventKind::DisplayWakeUp));
            self.set_state(SystemState::Ready, now);
        }
    }

    /// React to network state changes until the state settles.
    async fn handle_network(&mut self, now: Instant) {
        for _ in 0..MAX_NETWORK_STEPS_PER_TICK {
            let current = self.net.state();
            if self.seen_net_state == Some(current) {
                return;
            }
            self.seen_net_state = Some(current);
            self.on_network_state(current, now).await;
        }
    }

    async fn on_network_state(&mut self, state: NetworkState, now: Instant) {
        match state {
            NetworkState::Connecting => {
                self.ap_failed = false;
                self.portal.stop();
                self.set_state(SystemState::WifiConnecting, now);
                self.led.set_loading(true);
            }
            NetworkState::Connected => {
                self.led.set_loading(false);
                self.led.flash_color(FLASH_CONNECTED, 255, FLASH_CONNECTED_MS);
                let ssid = self.net.ssid().unwrap_or("");
                let mut ip: heapless::String<15> = heapless::String::new();
                if let Some(addr) = self.net.local_ip() {
                    let _ = write!(ip, "{}", addr);
                }
                self.send_ui(Event::wifi(EventKind::DisplayWifiConnected, ssid, &ip, 0));
                self.send_ui(Event::new(EventKind::DisplayWakeUp));
                self.set_state(SystemState::WifiConnected, now);
                self.set_state(SystemState::Ready, now);
            }
            s if s.needs_setup() => {
                if self.ap_failed {
                    return;
                }
                warn!("Core: WiFi unavailable ({:?}), starting setup AP", s);
                if !self.net.setup_ap().await {
                    self.ap_failed = true;
                    self.led.set_loading(false);
                    self.led.flash_color(FLASH_ERROR, 255, FLASH_ERROR_MS);
                    self.send_ui(Event::new(EventKind::DisplayWifiError));
                    self.set_state(SystemState::WifiError, now);
                }
            }
            NetworkState::ApMode => {
                self.set_state(SystemState::WifiApMode, now);
                self.led.set_loading(false);
                self.portal.start();
                self.ap_client_seen = false;
                info!("Core: setup AP {} at {}", self.net.ap_ssid(), AP_SETUP_URL);
                let ev = Event::new(EventKind::DisplayWifiApMode)
                    .with_pair(self.net.ap_ssid(), self.net.ap_password());
                self.send_ui(ev);
                self.led.flash_color(FLASH_AP_MODE, 255, FLASH_AP_MODE_MS);
            }
            NetworkState::Disconnected if self.state == SystemState::Running => {
                warn!("Core: WiFi link lost");
                self.send_ui(Event::new(EventKind::WifiDisconnected));
            }
            _ => {}
        }
    }

    async fn handle_ap_mode(&mut self, now: Instant) {
        let client = self.net.has_ap_client();
        if client && !self.ap_client_seen {
            info!("Core: setup client joined");
            self.send_ui(Event::new(EventKind::DisplayWifiSetupUrl).with_text(AP_SETUP_URL));
            self.led.flash_color(FLASH_CONNECTED, 255, FLASH_AP_CLIENT_MS);
        }
        self.ap_client_seen = client;

        if let Some(credentials) = self.portal.poll_credentials() {
            info!("Core: credentials received for {}", credentials.ssid.as_str());
            self.net.save_credentials(&credentials).await;
            self.net.connect(credentials, now).await;
        }
    }

    async fn process_events(&mut self) -> Option<SystemRequest> {
        while let Some(event) = self.bus.receive(Direction::ToCore) {
            self.events_processed = self.events_processed.wrapping_add(1);
            match event.kind() {
                EventKind::EncoderRotation => {
                    debug!("Core: rotation {}", event.rotation_delta());
                    self.led.activate();
                    self.send_ui(event);
                }
                EventKind::EncoderClick => {
                    debug!("Core: click ({} ms)", event.press_duration_ms());
                    self.led.flash_color(FLASH_CLICK, 255, FLASH_CLICK_MS);
                    self.buzzer.click();
                    self.send_ui(event);
                }
                EventKind::EncoderLongPress => {
                    debug!("Core: long press ({} ms)", event.press_duration_ms());
                    self.led.flash_color(FLASH_LONG_PRESS, 255, FLASH_LONG_PRESS_MS);
                    self.buzzer.error();
                    self.send_ui(event);
                }
                EventKind::EncoderUltraLongPress => {
                    warn!("Core: ultra long press, factory reset");
                    self.led.flash_color(FLASH_ERROR, 255, FLASH_ERROR_MS);
                    self.buzzer.error();
                    self.factory_reset().await;
                    return Some(SystemRequest::Restart);
                }
                other => debug!("Core: ignoring {:?}", other),
            }
        }
        None
    }

    async fn factory_reset(&mut self) {
        if let Err(e) = self.net.prefs().clear_all().await {
            error!("Core: factory reset failed: {:?}", e);
        }
    }

    fn check_health(&mut self, now: Instant) {
        let Some(report) = self.health.poll(&self.probe, now) else {
            return;
        };
        report.log(self.cycles, self.events_processed);
        self.bus.log_status();
        if report.restart_led {
            self.led.request_restart();
        }
    }

    async fn handle_console(&mut self, now: Instant) -> Option<SystemRequest> {
        let console = self.console?;
        let line = console.lines.try_receive().ok()?;
        let mut reply = ConsoleReply::new();
        let request = self.run_command(&line, now, &mut reply).await;
        if !reply.is_empty() && console.replies.try_send(reply).is_err() {
            warn!("Core: console reply dropped");
        }
        request
    }

    /// Execute one console line, writing the response to `out`.
    pub async fn run_command(
        &mut self,
        line: &str,
        now: Instant,
        out: &mut ConsoleReply,
    ) -> Option<SystemRequest> {
        let command = ConsoleCommand::parse(line)?;
        // Output that overflows the reply buffer is cut short.
        match command {
            ConsoleCommand::Help => {
                let _ = out.push_str(HELP_TEXT);
                None
            }
            ConsoleCommand::Status => {
                let _ = self.status(now).write_to(out);
                None
            }
            ConsoleCommand::GetUuid => {
                let identity = self.net.identity();
                let _ = write_device_info(out, identity, identity.chip_revision());
                None
            }
            ConsoleCommand::Reboot => {
                let _ = writeln!(out, "Rebooting...");
                Some(SystemRequest::Restart)
            }
            ConsoleCommand::HardReset => {
                let _ = writeln!(out, "Factory reset - clearing all settings...");
                self.factory_reset().await;
                let _ = writeln!(out, "Settings cleared, rebooting...");
                Some(SystemRequest::Restart)
            }
            ConsoleCommand::Unknown(cmd) => {
                warn!("Core: unknown console command");
                let _ = writeln!(out, "Unknown command: '{}'. Type 'help'.", cmd.as_str());
                None
            }
        }
    }

    fn status(&self, now: Instant) -> StatusSnapshot<'_> {
        StatusSnapshot {
            state: self.state.name(),
            uptime_secs: now.saturating_duration_since(self.started_at).as_secs(),
            free_heap: self.probe.free_heap(),
            cycles: self.cycles,
            events: self.events_processed,
            wifi: self.net.state(),
            ssid: self.net.ssid(),
            ip: self.net.local_ip(),
            rssi: self.net.rssi(),
        }
    }

    fn send_ui(&self, event: Event) {
        if !self.bus.send(Direction::ToUi, event) {
            debug!("Core: UI queue full");
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn state_entered(&self) -> Instant {
        self.state_entered
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn events_processed(&self) -> u32 {
        self.events_processed
    }

    pub fn network(&self) -> &NetworkManager<'a, W, S> {
        &self.net
    }

    pub fn network_mut(&mut self) -> &mut NetworkManager<'a, W, S> {
        &mut self.net
    }

    pub fn portal(&self) -> &P {
        &self.portal
    }
}
