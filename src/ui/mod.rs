//! Render context - encoder sampling, screens and display dimming.
//!
//! The UI loop runs at ~30 Hz. Each tick it samples the knob, turns the
//! samples into input events for the coordinator, then applies whatever
//! the coordinator sent back (screen changes, echoed input) and steps
//! the display dimmer.
//!
//! ## Components
//!
//! - **Encoder**: press/rotation classification ([`encoder::InputClassifier`])
//! - **Quadrature**: A/B pin decoding into raw counts
//! - **Knob**: GPIO sampling with button debounce
//! - **Display**: SSD1306 128×64 OLED via I²C (device only)

#[cfg(feature = "embedded")]
pub mod display;
pub mod encoder;
pub mod knob;
pub mod quadrature;

use embassy_time::{Duration, Instant};
use heapless::String;

use crate::bus::{Direction, EventBus};
use crate::config::{
    DISPLAY_DIM_INTERVAL_MS, DISPLAY_DIM_STEP, DISPLAY_IDLE_BRIGHTNESS, DISPLAY_IDLE_TIMEOUT_MS,
    DISPLAY_WAKE_BRIGHTNESS,
};
use crate::error::Result;
use crate::event::{truncate, Event, EventKind};
use crate::led::LedHandle;
use encoder::{EncoderSample, InputClassifier};

/// Screens the UI can show.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Screen {
    /// Nothing drawn.
    Blank,
    /// Idle / home - one status line.
    Home,
    /// Joining the saved network.
    Connecting,
    /// Setup AP is up - text is `"ssid|password"`.
    ApMode,
    /// A phone joined the setup AP - text is the setup URL.
    SetupUrl,
    /// The setup AP could not be started.
    WifiError,
}

/// Output side of the display.
pub trait Display {
    /// Draw `screen`; the meaning of `text` depends on the screen.
    fn render(&mut self, screen: Screen, text: &str) -> Result<()>;

    fn set_brightness(&mut self, level: u8) -> Result<()>;
}

/// Steps the display down to idle brightness after inactivity.
pub struct Dimmer {
    level: u8,
    last_interaction: Instant,
    last_step: Instant,
}

impl Dimmer {
    pub fn new(now: Instant) -> Self {
        Self {
            level: DISPLAY_WAKE_BRIGHTNESS,
            last_interaction: now,
            last_step: now,
        }
    }

    /// Register interaction; returns the new level if it changed.
    pub fn wake(&mut self, now: Instant) -> Option<u8> {
        self.last_interaction = now;
        if self.level == DISPLAY_WAKE_BRIGHTNESS {
            return None;
        }
        self.level = DISPLAY_WAKE_BRIGHTNESS;
        Some(self.level)
    }

    /// Advance dimming; returns the new level if it changed.
    pub fn tick(&mut self, now: Instant) -> Option<u8> {
        let idle = now.saturating_duration_since(self.last_interaction);
        if idle < Duration::from_millis(DISPLAY_IDLE_TIMEOUT_MS) || self.level <= DISPLAY_IDLE_BRIGHTNESS {
            return None;
        }
        if now.saturating_duration_since(self.last_step) < Duration::from_millis(DISPLAY_DIM_INTERVAL_MS) {
            return None;
        }
        self.last_step = now;
        self.level = self
            .level
            .saturating_sub(DISPLAY_DIM_STEP)
            .max(DISPLAY_IDLE_BRIGHTNESS);
        Some(self.level)
    }

    pub fn level(&self) -> u8 {
        self.level
    }
}

type StatusLine = String<32>;
type ScreenText = String<128>;

/// Everything the render loop owns.
pub struct UiContext<'a, D> {
    bus: &'a EventBus,
    led: LedHandle<'a>,
    display: D,
    classifier: InputClassifier,
    dimmer: Dimmer,
    screen: Screen,
    text: ScreenText,
    status: StatusLine,
    dirty: bool,
}

impl<'a, D: Display> UiContext<'a, D> {
    pub fn new(bus: &'a EventBus, led: LedHandle<'a>, display: D, initial: EncoderSample, now: Instant) -> Self {
        Self {
            bus,
            led,
            display,
            classifier: InputClassifier::new(initial, now),
            dimmer: Dimmer::new(now),
            screen: Screen::Blank,
            text: ScreenText::new(),
            status: StatusLine::new(),
            dirty: false,
        }
    }

    /// One render-loop iteration.
    pub fn tick(&mut self, now: Instant, sample: EncoderSample) {
        self.classifier.update(now, sample);
        self.publish_input();

        while let Some(event) = self.bus.receive(Direction::ToUi) {
            self.apply(&event, now);
        }

        if self.dirty {
            self.dirty = false;
            let text = match self.screen {
                Screen::Home => self.status.as_str(),
                _ => self.text.as_str(),
            };
            if let Err(e) = self.display.render(self.screen, text) {
                warn!("UI: render failed: {:?}", e);
            }
        }

        if let Some(level) = self.dimmer.tick(now) {
            let _ = self.display.set_brightness(level);
        }
    }

    fn publish_input(&mut self) {
        let steps = self.classifier.consume_movement();
        if steps != 0 {
            self.send_core(Event::new(EventKind::EncoderRotation).with_value(steps));
        }
        if let Some(ms) = self.classifier.consume_click() {
            self.send_core(Event::new(EventKind::EncoderClick).with_value(ms as i32));
        }
        if let Some(ms) = self.classifier.consume_long_press() {
            self.send_core(Event::new(EventKind::EncoderLongPress).with_value(ms as i32));
        }
        if let Some(ms) = self.classifier.consume_ultra_long_press() {
            self.send_core(Event::new(EventKind::EncoderUltraLongPress).with_value(ms as i32));
        }
    }

    fn send_core(&self, event: Event) {
        if !self.bus.send(Direction::ToCore, event) {
            warn!("UI: core queue full, input dropped");
        }
    }

    /// Apply one coordinator event to the screen state.
    pub fn apply(&mut self, event: &Event, now: Instant) {
        match event.kind() {
            EventKind::DisplayWakeUp => {
                self.wake(now);
                self.led.activate();
                self.show(Screen::Home, "");
            }
            EventKind::DisplayWifiConnecting => self.show(Screen::Connecting, ""),
            EventKind::DisplayWifiConnected => {
                let (ssid, _ip) = event.pair();
                self.set_status("WiFi: ", ssid);
            }
            EventKind::DisplayWifiError => {
                self.wake(now);
                self.show(Screen::WifiError, "");
            }
            EventKind::DisplayWifiApMode => {
                self.wake(now);
                self.show(Screen::ApMode, event.text());
            }
            EventKind::DisplayWifiSetupUrl => {
                self.wake(now);
                self.show(Screen::SetupUrl, event.text());
            }
            EventKind::DisplayClear => self.show(Screen::Blank, ""),
            EventKind::EncoderRotation => {
                self.wake(now);
                let dir = if event.is_clockwise() { "RIGHT" } else { "LEFT" };
                self.set_status("Encoder rotation: ", dir);
            }
            EventKind::EncoderClick => {
                self.wake(now);
                self.set_status("Click!", "");
            }
            EventKind::EncoderLongPress => {
                self.wake(now);
                self.set_status("Long Press!", "");
            }
            EventKind::WifiDisconnected => self.set_status("WiFi lost", ""),
            _ => {}
        }
    }

    fn wake(&mut self, now: Instant) {
        if let Some(level) = self.dimmer.wake(now) {
            let _ = self.display.set_brightness(level);
        }
    }

    fn show(&mut self, screen: Screen, text: &str) {
        self.screen = screen;
        self.text = truncate(text);
        self.dirty = true;
    }

    /// Update the home status line; redrawn only while on the home screen.
    fn set_status(&mut self, prefix: &str, detail: &str) {
        self.status.clear();
        for part in [prefix, detail] {
            for c in part.chars() {
                if self.status.push(c).is_err() {
                    break;
                }
            }
        }
        if self.screen == Screen::Home {
            self.dirty = true;
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn brightness(&self) -> u8 {
        self.dimmer.level()
    }

    pub fn display(&self) -> &D {
        &self.display
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::led::{LedChannel, LedCommand};

    #[derive(Default)]
    struct FakeDisplay {
        frames: Vec<(Screen, std::string::String)>,
        levels: Vec<u8>,
    }

    impl Display for FakeDisplay {
        fn render(&mut self, screen: Screen, text: &str) -> Result<()> {
            self.frames.push((screen, text.into()));
            Ok(())
        }
        fn set_brightness(&mut self, level: u8) -> Result<()> {
            self.levels.push(level);
            Ok(())
        }
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    const IDLE: EncoderSample = EncoderSample { count: 0, pressed: false };

    #[test]
    fn dimmer_steps_down_to_floor_then_wakes() {
        let mut d = Dimmer::new(at(0));
        assert_eq!(d.tick(at(9_999)), None);
        assert_eq!(d.tick(at(10_000)), Some(178));
        assert_eq!(d.tick(at(10_010)), None);
        assert_eq!(d.tick(at(10_020)), Some(176));
        let mut t = 10_020;
        while d.level() > DISPLAY_IDLE_BRIGHTNESS {
            t += 20;
            d.tick(at(t));
        }
        assert_eq!(d.level(), 10);
        assert_eq!(d.tick(at(t + 20)), None);
        assert_eq!(d.wake(at(t + 30)), Some(180));
        assert_eq!(d.wake(at(t + 40)), None);
    }

    #[test]
    fn rotation_goes_to_core_and_echo_updates_home() {
        let bus = EventBus::new();
        let leds = LedChannel::new();
        let mut ui = UiContext::new(&bus, leds.handle(), FakeDisplay::default(), IDLE, at(0));

        bus.send(Direction::ToUi, Event::new(EventKind::DisplayWakeUp));
        ui.tick(at(33), EncoderSample { count: 8, pressed: false });
        assert_eq!(ui.screen(), Screen::Home);
        assert_eq!(leds.try_receive(), Some(LedCommand::Activate));

        let ev = bus.receive(Direction::ToCore).unwrap();
        assert_eq!(ev.kind(), EventKind::EncoderRotation);
        assert_eq!(ev.rotation_delta(), 2);

        // Coordinator echoes the rotation back.
        bus.send(Direction::ToUi, ev);
        ui.tick(at(66), EncoderSample { count: 8, pressed: false });
        assert_eq!(ui.status(), "Encoder rotation: RIGHT");
        let last = ui.display().frames.last().unwrap();
        assert_eq!(last.0, Screen::Home);
        assert_eq!(last.1, "Encoder rotation: RIGHT");
    }

    #[test]
    fn click_is_published_on_release() {
        let bus = EventBus::new();
        let leds = LedChannel::new();
        let mut ui = UiContext::new(&bus, leds.handle(), FakeDisplay::default(), IDLE, at(0));
        ui.tick(at(100), EncoderSample { count: 0, pressed: true });
        assert!(bus.receive(Direction::ToCore).is_none());
        ui.tick(at(300), EncoderSample { count: 0, pressed: false });
        let ev = bus.receive(Direction::ToCore).unwrap();
        assert_eq!(ev.kind(), EventKind::EncoderClick);
        assert_eq!(ev.press_duration_ms(), 200);
    }

    #[test]
    fn ap_mode_screen_carries_credentials() {
        let bus = EventBus::new();
        let leds = LedChannel::new();
        let mut ui = UiContext::new(&bus, leds.handle(), FakeDisplay::default(), IDLE, at(0));
        let ev = Event::new(EventKind::DisplayWifiApMode).with_pair("Knob-a1286f24", "85ddeb85dd");
        bus.send(Direction::ToUi, ev);
        ui.tick(at(33), IDLE);
        assert_eq!(ui.screen(), Screen::ApMode);
        assert_eq!(ui.display().frames[0].1, "Knob-a1286f24|85ddeb85dd");
    }

    #[test]
    fn status_changes_off_home_do_not_redraw() {
        let bus = EventBus::new();
        let leds = LedChannel::new();
        let mut ui = UiContext::new(&bus, leds.handle(), FakeDisplay::default(), IDLE, at(0));
        bus.send(Direction::ToUi, Event::new(EventKind::DisplayWifiConnecting));
        ui.tick(at(33), IDLE);
        bus.send(Direction::ToUi, Event::new(EventKind::EncoderClick).with_value(120));
        ui.tick(at(66), IDLE);
        assert_eq!(ui.display().frames.len(), 1);
        assert_eq!(ui.screen(), Screen::Connecting);
        assert_eq!(ui.status(), "Click!");
    }

    #[test]
    fn interaction_restores_brightness() {
        let bus = EventBus::new();
        let leds = LedChannel::new();
        let mut ui = UiContext::new(&bus, leds.handle(), FakeDisplay::default(), IDLE, at(0));
        ui.tick(at(10_000), IDLE);
        assert_eq!(ui.brightness(), 178);
        bus.send(Direction::ToUi, Event::new(EventKind::EncoderRotation).with_value(-1));
        ui.tick(at(10_033), IDLE);
        assert_eq!(ui.brightness(), 180);
        assert_eq!(ui.status(), "Encoder rotation: LEFT");
        assert_eq!(ui.display().levels, [178, 180]);
    }
}
