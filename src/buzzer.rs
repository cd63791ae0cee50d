//! Piezo feedback.
//!
//! The buzzer is a bare GPIO, so tones are bit-banged: each tone toggles
//! the pin at its frequency with a fixed duty cycle for its duration.
//! Patterns are queued to a dedicated task so the coordinator never
//! waits on audio.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;

use crate::config::{BUZZER_DUTY_PERCENT, BUZZER_QUEUE_SIZE};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tone {
    pub freq_hz: u32,
    pub duration_ms: u32,
}

const fn tone(freq_hz: u32, duration_ms: u32) -> Tone {
    Tone { freq_hz, duration_ms }
}

const CLICK: [Tone; 3] = [tone(740, 75), tone(120, 75), tone(270, 75)];

const ERROR: [Tone; 6] = [
    tone(230, 75),
    tone(120, 75),
    tone(230, 75),
    tone(120, 75),
    tone(230, 75),
    tone(120, 75),
];

impl Tone {
    pub const fn period_us(self) -> u32 {
        1_000_000 / self.freq_hz
    }

    /// High time per period.
    pub const fn pulse_us(self) -> u32 {
        self.period_us() * BUZZER_DUTY_PERCENT / 100
    }

    /// Whole periods needed to cover the duration.
    pub const fn cycles(self) -> u32 {
        (self.duration_ms * 1000).div_ceil(self.period_us())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BuzzerPattern {
    /// Short descending chirp for a click.
    Click,
    /// Alternating low tones for long press and errors.
    Error,
}

impl BuzzerPattern {
    pub fn tones(self) -> &'static [Tone] {
        match self {
            BuzzerPattern::Click => &CLICK,
            BuzzerPattern::Error => &ERROR,
        }
    }
}

/// Play one tone on `pin`.
pub async fn play_tone<P, D>(pin: &mut P, delay: &mut D, tone: Tone) -> Result<()>
where
    P: OutputPin,
    D: DelayNs,
{
    if tone.freq_hz == 0 {
        delay.delay_ms(tone.duration_ms).await;
        return Ok(());
    }
    let high = tone.pulse_us();
    let low = tone.period_us() - high;
    for _ in 0..tone.cycles() {
        pin.set_high().map_err(|_| Error::Buzzer)?;
        delay.delay_us(high).await;
        pin.set_low().map_err(|_| Error::Buzzer)?;
        delay.delay_us(low).await;
    }
    Ok(())
}

pub async fn play_pattern<P, D>(pin: &mut P, delay: &mut D, pattern: BuzzerPattern) -> Result<()>
where
    P: OutputPin,
    D: DelayNs,
{
    for &t in pattern.tones() {
        play_tone(pin, delay, t).await?;
    }
    // Leave the piezo unpowered.
    pin.set_low().map_err(|_| Error::Buzzer)
}

/// Pattern queue feeding the buzzer task.
pub struct BuzzerChannel {
    patterns: Channel<CriticalSectionRawMutex, BuzzerPattern, BUZZER_QUEUE_SIZE>,
}

impl Default for BuzzerChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl BuzzerChannel {
    pub const fn new() -> Self {
        Self {
            patterns: Channel::new(),
        }
    }

    pub fn handle(&self) -> BuzzerHandle<'_> {
        BuzzerHandle { channel: self }
    }

    pub fn pending(&self) -> usize {
        self.patterns.len()
    }

    pub(crate) fn try_receive(&self) -> Option<BuzzerPattern> {
        self.patterns.try_receive().ok()
    }
}

/// Non-blocking sender for buzzer patterns.
#[derive(Clone, Copy)]
pub struct BuzzerHandle<'a> {
    channel: &'a BuzzerChannel,
}

impl BuzzerHandle<'_> {
    /// Queue a pattern. Dropped (returns `false`) if the queue is full.
    pub fn play(&self, pattern: BuzzerPattern) -> bool {
        let ok = self.channel.patterns.try_send(pattern).is_ok();
        if !ok {
            debug!("Buzzer: queue full, {:?} dropped", pattern);
        }
        ok
    }

    pub fn click(&self) -> bool {
        self.play(BuzzerPattern::Click)
    }

    pub fn error(&self) -> bool {
        self.play(BuzzerPattern::Error)
    }
}

/// Buzzer task body.
pub async fn run<P, D>(channel: &BuzzerChannel, pin: &mut P, delay: &mut D) -> !
where
    P: OutputPin,
    D: DelayNs,
{
    let _ = pin.set_low();
    loop {
        let pattern = channel.patterns.receive().await;
        if let Err(e) = play_pattern(pin, delay, pattern).await {
            warn!("Buzzer: {:?} failed: {:?}", pattern, e);
        }
    }
}
