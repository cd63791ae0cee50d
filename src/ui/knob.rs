//! Knob GPIO input: quadrature lines plus the push switch.
//!
//! Two edge-driven tasks keep [`KnobState`] current:
//!   - the quadrature task decodes A/B transitions into a raw count
//!   - the button task debounces the switch (active-low, pull-up)
//!
//! The render loop reads a consistent [`EncoderSample`] from the shared
//! state once per tick.

use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use embassy_futures::select::select;
use embassy_time::{Duration, Timer};
use embedded_hal::digital::InputPin;
use embedded_hal_async::digital::Wait;

use super::encoder::EncoderSample;
use super::quadrature::Quadrature;
use crate::config::BUTTON_DEBOUNCE_MS;

/// Latest knob readings, written by the input tasks.
pub struct KnobState {
    count: AtomicI32,
    pressed: AtomicBool,
}

impl Default for KnobState {
    fn default() -> Self {
        Self::new()
    }
}

impl KnobState {
    pub const fn new() -> Self {
        Self {
            count: AtomicI32::new(0),
            pressed: AtomicBool::new(false),
        }
    }

    pub fn sample(&self) -> EncoderSample {
        EncoderSample {
            count: self.count.load(Ordering::Relaxed),
            pressed: self.pressed.load(Ordering::Relaxed),
        }
    }

    pub fn set_count(&self, count: i32) {
        self.count.store(count, Ordering::Relaxed);
    }

    pub fn set_pressed(&self, pressed: bool) {
        self.pressed.store(pressed, Ordering::Relaxed);
    }
}

/// Decode the A/B lines forever, publishing the raw count.
pub async fn quadrature_task<A, B>(mut a: A, mut b: B, state: &KnobState) -> !
where
    A: InputPin + Wait,
    B: InputPin + Wait,
{
    let mut decoder = Quadrature::new(a.is_high().unwrap_or(false), b.is_high().unwrap_or(false));
    loop {
        let _ = select(a.wait_for_any_edge(), b.wait_for_any_edge()).await;
        let (Ok(la), Ok(lb)) = (a.is_high(), b.is_high()) else {
            continue;
        };
        if decoder.update(la, lb) != 0 {
            state.set_count(decoder.count());
        }
    }
}

/// Track the push switch forever.
///
/// Waits for the pin to go low (pressed), debounces, publishes, then
/// does the same for the release.
pub async fn button_task<P>(mut pin: P, state: &KnobState) -> !
where
    P: InputPin + Wait,
{
    let debounce = Duration::from_millis(BUTTON_DEBOUNCE_MS);
    loop {
        if pin.wait_for_falling_edge().await.is_err() {
            Timer::after(debounce).await;
            continue;
        }
        Timer::after(debounce).await;

        if pin.is_low().unwrap_or(false) {
            trace!("Knob: pressed");
            state.set_pressed(true);

            let _ = pin.wait_for_rising_edge().await;
            Timer::after(debounce).await;
            trace!("Knob: released");
            state.set_pressed(false);
        }
    }
}
