//! Rotary encoder interaction classifier.
//!
//! Turns a raw rotation counter and a debounced button level into
//! detent movement and click / long-press / ultra-long-press gestures.
//! Each gesture is latched in a [`OneShot`] until the render loop
//! consumes it, so a gesture is reported exactly once.

use embassy_time::Instant;

use crate::config::{CLICK_MAX_MS, ENCODER_COUNTS_PER_DETENT, LONG_PRESS_MS, ULTRA_LONG_PRESS_MS};

/// A latched gesture waiting to be consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OneShot<T> {
    #[default]
    Idle,
    Pending(T),
}

impl<T: Copy> OneShot<T> {
    pub fn fire(&mut self, value: T) {
        *self = OneShot::Pending(value);
    }

    /// Read and clear.
    pub fn take(&mut self) -> Option<T> {
        match core::mem::take(self) {
            OneShot::Pending(v) => Some(v),
            OneShot::Idle => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, OneShot::Pending(_))
    }
}

/// One sample of the encoder hardware, taken once per render tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncoderSample {
    /// Raw quadrature count (four per detent).
    pub count: i32,
    /// Debounced button level, `true` while held.
    pub pressed: bool,
}

/// Classification of a completed press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PressKind {
    Click,
    /// Between click and long press; reported to nobody.
    DeadZone,
    LongPress,
    UltraLongPress,
}

/// Classify a press by how long it was held.
pub fn classify_press(duration_ms: u64) -> PressKind {
    if duration_ms >= ULTRA_LONG_PRESS_MS {
        PressKind::UltraLongPress
    } else if duration_ms >= LONG_PRESS_MS {
        PressKind::LongPress
    } else if duration_ms < CLICK_MAX_MS {
        PressKind::Click
    } else {
        PressKind::DeadZone
    }
}

/// Convert a raw quadrature count to whole detents (floor division, so
/// negative positions step down consistently).
pub fn detents(count: i32) -> i32 {
    count.div_euclid(ENCODER_COUNTS_PER_DETENT)
}

pub struct InputClassifier {
    last_position: i32,
    pending_movement: i32,
    button_down: bool,
    press_start: Instant,
    last_press_ms: u64,
    ultra_notified: bool,
    click: OneShot<u32>,
    long_press: OneShot<u32>,
    ultra_long_press: OneShot<u32>,
}

impl InputClassifier {
    /// `initial` is the hardware state at start-up; it is the reference
    /// for the first movement and a button held at boot is not a press.
    pub fn new(initial: EncoderSample, now: Instant) -> Self {
        Self {
            last_position: detents(initial.count),
            pending_movement: 0,
            button_down: initial.pressed,
            press_start: now,
            last_press_ms: 0,
            // A button held through boot must not trigger a reset.
            ultra_notified: initial.pressed,
            click: OneShot::Idle,
            long_press: OneShot::Idle,
            ultra_long_press: OneShot::Idle,
        }
    }

    /// Feed one sample. Call once per render tick.
    pub fn update(&mut self, now: Instant, sample: EncoderSample) {
        let position = detents(sample.count);
        if position != self.last_position {
            self.pending_movement = self.pending_movement.wrapping_add(position - self.last_position);
            self.last_position = position;
        }

        match (self.button_down, sample.pressed) {
            (false, true) => {
                self.button_down = true;
                self.press_start = now;
                self.ultra_notified = false;
                trace!("Encoder: press");
            }
            (true, false) => {
                self.button_down = false;
                let held = self.held_ms(now);
                self.last_press_ms = held;
                if !self.ultra_notified {
                    self.report(held);
                }
                self.ultra_notified = false;
            }
            (true, true) => {
                let held = self.held_ms(now);
                if !self.ultra_notified && held >= ULTRA_LONG_PRESS_MS {
                    self.ultra_notified = true;
                    self.ultra_long_press.fire(saturate(held));
                    info!("Encoder: ultra long press ({} ms, still held)", held);
                }
            }
            (false, false) => {}
        }
    }

    fn report(&mut self, held: u64) {
        match classify_press(held) {
            PressKind::Click => {
                self.click.fire(saturate(held));
                debug!("Encoder: click ({} ms)", held);
            }
            PressKind::LongPress => {
                self.long_press.fire(saturate(held));
                debug!("Encoder: long press ({} ms)", held);
            }
            PressKind::UltraLongPress => {
                self.ultra_long_press.fire(saturate(held));
                info!("Encoder: ultra long press ({} ms)", held);
            }
            PressKind::DeadZone => {
                trace!("Encoder: press of {} ms ignored", held);
            }
        }
    }

    fn held_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.press_start).as_millis()
    }

    /// Detents moved since the last call; zero when idle.
    pub fn consume_movement(&mut self) -> i32 {
        core::mem::take(&mut self.pending_movement)
    }

    /// Press duration of a pending click.
    pub fn consume_click(&mut self) -> Option<u32> {
        self.click.take()
    }

    pub fn consume_long_press(&mut self) -> Option<u32> {
        self.long_press.take()
    }

    pub fn consume_ultra_long_press(&mut self) -> Option<u32> {
        self.ultra_long_press.take()
    }

    pub fn is_button_down(&self) -> bool {
        self.button_down
    }

    /// How long the button has been held, or 0 when released.
    pub fn current_press_ms(&self, now: Instant) -> u64 {
        if self.button_down {
            self.held_ms(now)
        } else {
            0
        }
    }

    pub fn last_press_duration_ms(&self) -> u64 {
        self.last_press_ms
    }

    /// Current detent position.
    pub fn position(&self) -> i32 {
        self.last_position
    }
}

fn saturate(ms: u64) -> u32 {
    ms.min(u32::MAX as u64) as u32
}
