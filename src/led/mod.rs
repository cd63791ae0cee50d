//! LED ring subsystem - 12-pixel WS2812 ring driven by its own task.
//!
//! Other tasks never touch the ring. They push [`LedCommand`]s through
//! a bounded [`LedChannel`] via a cheap [`LedHandle`]; the LED task
//! drains the queue and advances [`animator::LedAnimator`] at 50 Hz.
//!
//! ## Components
//!
//! - **Animator**: ranked animation state machine (fade, flash, loading,
//!   boot sweep, pulse, idle dim)
//! - **Strip**: adapter from any `smart_leds::SmartLedsWrite` driver to
//!   the [`LedRing`] interface

pub mod animator;
pub mod strip;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::Duration;
use smart_leds::RGB8;

use crate::config::LED_QUEUE_SIZE;
use crate::error::Result;

pub use animator::{Animation, LedAnimator};

/// Requests accepted by the LED task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedCommand {
    /// Start or stop the loading animation.
    SetLoading(bool),
    /// Show `color` at `brightness` for `duration`, then restore the base color.
    Flash {
        color: RGB8,
        brightness: u8,
        duration: Duration,
    },
    /// Wake the ring to full brightness and reset the idle timer.
    Activate,
    /// Change the base color.
    SetColor(RGB8),
}

/// Named colors selectable from the preferences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedColor {
    Azure,
    Green,
    Red,
    Orange,
    Yellow,
    Blue,
    Violet,
    Purple,
}

impl LedColor {
    pub const ALL: [LedColor; 8] = [
        LedColor::Azure,
        LedColor::Green,
        LedColor::Red,
        LedColor::Orange,
        LedColor::Yellow,
        LedColor::Blue,
        LedColor::Violet,
        LedColor::Purple,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(name.trim()))
    }

    pub const fn name(self) -> &'static str {
        match self {
            LedColor::Azure => "azure",
            LedColor::Green => "green",
            LedColor::Red => "red",
            LedColor::Orange => "orange",
            LedColor::Yellow => "yellow",
            LedColor::Blue => "blue",
            LedColor::Violet => "violet",
            LedColor::Purple => "purple",
        }
    }

    pub const fn rgb(self) -> RGB8 {
        let (r, g, b) = match self {
            LedColor::Azure => (0, 181, 214),
            LedColor::Green => (30, 254, 30),
            LedColor::Red => (255, 0, 0),
            LedColor::Orange => (254, 94, 0),
            LedColor::Yellow => (128, 128, 0),
            LedColor::Blue => (18, 0, 213),
            LedColor::Violet => (110, 0, 255),
            LedColor::Purple => (211, 0, 164),
        };
        RGB8 { r, g, b }
    }
}

/// Output side of the LED ring.
pub trait LedRing {
    fn set_pixel(&mut self, index: usize, color: RGB8);

    fn set_global_brightness(&mut self, brightness: u8);

    /// Push the buffered frame to the hardware.
    fn show(&mut self) -> Result<()>;
}

/// Command queue plus the restart request used by the health check.
pub struct LedChannel {
    commands: Channel<CriticalSectionRawMutex, LedCommand, LED_QUEUE_SIZE>,
    restart: Signal<CriticalSectionRawMutex, ()>,
}

impl Default for LedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl LedChannel {
    pub const fn new() -> Self {
        Self {
            commands: Channel::new(),
            restart: Signal::new(),
        }
    }

    pub fn handle(&self) -> LedHandle<'_> {
        LedHandle { channel: self }
    }

    pub(crate) fn try_receive(&self) -> Option<LedCommand> {
        self.commands.try_receive().ok()
    }

    /// Ask the LED task to drop its animation state and start over.
    pub fn request_restart(&self) {
        self.restart.signal(());
    }

    /// Resolves once a restart has been requested, consuming the request.
    pub async fn wait_restart(&self) {
        self.restart.wait().await
    }

    pub fn pending(&self) -> usize {
        self.commands.len()
    }
}

/// Sender side used by the coordinator and the render loop.
#[derive(Clone, Copy)]
pub struct LedHandle<'a> {
    channel: &'a LedChannel,
}

impl<'a> LedHandle<'a> {
    fn send(&self, cmd: LedCommand) -> bool {
        if self.channel.commands.try_send(cmd).is_err() {
            warn!("LED: command queue full, command dropped");
            return false;
        }
        true
    }

    pub fn set_loading(&self, on: bool) -> bool {
        self.send(LedCommand::SetLoading(on))
    }

    pub fn flash_color(&self, color: RGB8, brightness: u8, duration_ms: u64) -> bool {
        self.send(LedCommand::Flash {
            color,
            brightness,
            duration: Duration::from_millis(duration_ms),
        })
    }

    pub fn activate(&self) -> bool {
        self.send(LedCommand::Activate)
    }

    pub fn set_color(&self, color: RGB8) -> bool {
        self.send(LedCommand::SetColor(color))
    }

    /// Set the base color by palette name; unknown names fall back to azure.
    pub fn set_named_color(&self, name: &str) -> bool {
        let color = LedColor::from_name(name).unwrap_or_else(|| {
            warn!("LED: unknown color {}, using azure", name);
            LedColor::Azure
        });
        info!("LED: base color {}", color.name());
        self.set_color(color.rgb())
    }

    pub fn request_restart(&self) {
        self.channel.request_restart();
    }
}
