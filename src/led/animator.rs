//! LED animation scheduler.
//!
//! Each 50 Hz step first drains every queued command, then advances
//! exactly one animation, chosen top-down by rank:
//!
//! 1. Fading   - brightness interpolation toward a target
//! 2. Flashing - temporary color at fixed brightness
//! 3. Loading  - orange brightness alternation
//! 4. BootSweep - single-pixel bounce, flare, then fade out
//! 5. Pulsating - slow breathing between 10 and 100
//! 6. Steady   - hold; dims after inactivity
//!
//! Commands only change state. Pixels are written by the step, so a
//! command queued behind a running higher-ranked animation has no
//! visible effect until that animation ends.

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Ticker};
use smart_leds::RGB8;

use super::{LedChannel, LedCommand, LedRing};
use crate::config::*;

const OFF: RGB8 = RGB8 { r: 0, g: 0, b: 0 };

/// The animation that owns the ring for the current step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Animation {
    Fading,
    Flashing,
    Loading,
    BootSweep,
    Pulsating,
    Steady,
}

#[derive(Clone, Copy, Debug)]
struct Fade {
    from: u8,
    to: u8,
    start: Instant,
    duration: Duration,
}

impl Fade {
    /// Brightness at `now` and whether the fade has finished.
    fn level_at(&self, now: Instant) -> (u8, bool) {
        let elapsed = now.saturating_duration_since(self.start).as_millis();
        let total = self.duration.as_millis();
        if elapsed >= total {
            return (self.to, true);
        }
        let from = self.from as i64;
        let span = self.to as i64 - from;
        let level = from + span * elapsed as i64 / total as i64;
        (level.clamp(0, 255) as u8, false)
    }
}

#[derive(Clone, Copy, Debug)]
struct Flash {
    color: RGB8,
    brightness: u8,
    start: Instant,
    duration: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BootPhase {
    Sweep,
    Flare,
    Tail,
}

#[derive(Clone, Copy, Debug)]
struct BootSweep {
    phase: BootPhase,
    cursor: usize,
    forward: bool,
    last_step: Instant,
}

pub struct LedAnimator {
    started: Instant,
    base_color: RGB8,
    color: RGB8,
    brightness: u8,
    frame: [RGB8; LED_COUNT],
    last_shown: Option<([RGB8; LED_COUNT], u8)>,
    fade: Option<Fade>,
    flash: Option<Flash>,
    loading: bool,
    loading_up: bool,
    boot: Option<BootSweep>,
    pulsating: bool,
    pulse_up: bool,
    last_pulse: Instant,
    last_activity: Instant,
}

impl LedAnimator {
    pub fn new(now: Instant) -> Self {
        Self {
            started: now,
            base_color: LED_BASE_COLOR,
            color: LED_BASE_COLOR,
            brightness: 250,
            frame: [OFF; LED_COUNT],
            last_shown: None,
            fade: None,
            flash: None,
            loading: false,
            loading_up: true,
            boot: Some(BootSweep {
                phase: BootPhase::Sweep,
                cursor: 0,
                forward: true,
                last_step: now,
            }),
            pulsating: true,
            pulse_up: true,
            last_pulse: now,
            last_activity: now,
        }
    }

    /// Skip the boot animation (used after a forced restart).
    pub fn without_boot(now: Instant, base_color: RGB8) -> Self {
        let mut a = Self::new(now);
        a.boot = None;
        a.base_color = base_color;
        a.color = base_color;
        a
    }

    /// Fresh scheduler keeping only the base color; the boot sweep is
    /// not replayed.
    pub fn restarted(&self, now: Instant) -> Self {
        Self::without_boot(now, self.base_color)
    }

    /// Apply one command. Only state changes here; nothing is drawn.
    pub fn apply(&mut self, cmd: LedCommand, now: Instant) {
        match cmd {
            LedCommand::SetLoading(on) => {
                self.loading = on;
                if on {
                    self.last_activity = now;
                    self.pulsating = false;
                    self.fade = None;
                    self.color = LED_LOADING_COLOR;
                } else {
                    self.color = self.base_color;
                    self.fade_to(LED_LOADING_DONE_BRIGHTNESS, LED_LOADING_DONE_FADE_MS, now);
                }
                debug!("LED: loading={}", on);
            }
            LedCommand::Flash {
                color,
                brightness,
                duration,
            } => {
                self.pulsating = false;
                self.fade = None;
                self.flash = Some(Flash {
                    color,
                    brightness,
                    start: now,
                    duration,
                });
            }
            LedCommand::Activate => {
                if !self.loading {
                    self.last_activity = now;
                }
                self.pulsating = false;
                self.fade = None;
                self.brightness = 255;
            }
            LedCommand::SetColor(c) => {
                self.base_color = c;
                self.color = c;
            }
        }
    }

    /// Start a fade from the currently displayed brightness.
    fn fade_to(&mut self, target: u8, duration_ms: u64, now: Instant) {
        self.fade = Some(Fade {
            from: self.brightness,
            to: target,
            start: now,
            duration: Duration::from_millis(duration_ms),
        });
    }

    /// Highest-ranked animation that is currently eligible.
    pub fn active(&self) -> Animation {
        if self.fade.is_some() {
            Animation::Fading
        } else if self.flash.is_some() {
            Animation::Flashing
        } else if self.loading {
            Animation::Loading
        } else if self.boot.is_some() {
            Animation::BootSweep
        } else if self.pulsating {
            Animation::Pulsating
        } else {
            Animation::Steady
        }
    }

    /// Drain the command queue, then advance one animation and push the
    /// frame to the ring if it changed.
    pub fn step<R: LedRing>(&mut self, commands: &LedChannel, ring: &mut R, now: Instant) {
        while let Some(cmd) = commands.try_receive() {
            self.apply(cmd, now);
        }
        self.advance(now);
        self.present(ring);
    }

    /// Advance the active animation by one step.
    pub fn advance(&mut self, now: Instant) {
        // The boot animation has a hard deadline regardless of rank.
        if self.boot.is_some()
            && now.saturating_duration_since(self.started) >= Duration::from_millis(LED_BOOT_TIMEOUT_MS)
        {
            self.boot = None;
            self.pulsating = true;
            info!("LED: boot animation complete");
        }

        match self.active() {
            Animation::Fading => self.step_fade(now),
            Animation::Flashing => self.step_flash(now),
            Animation::Loading => self.step_loading(now),
            Animation::BootSweep => self.step_boot(now),
            Animation::Pulsating => self.step_pulse(now),
            Animation::Steady => self.step_steady(now),
        }
    }

    fn step_fade(&mut self, now: Instant) {
        let Some(fade) = self.fade else { return };
        let (level, done) = fade.level_at(now);
        self.brightness = level;
        if done {
            self.fade = None;
        }
        self.fill(self.color);
    }

    fn step_flash(&mut self, now: Instant) {
        let Some(flash) = self.flash else { return };
        self.brightness = flash.brightness;
        if now.saturating_duration_since(flash.start) >= flash.duration {
            self.flash = None;
            self.color = self.base_color;
            self.fill(self.color);
        } else {
            self.fill(flash.color);
        }
    }

    fn step_loading(&mut self, now: Instant) {
        self.color = LED_LOADING_COLOR;
        let target = if self.loading_up {
            LED_LOADING_HIGH
        } else {
            LED_LOADING_LOW
        };
        self.loading_up = !self.loading_up;
        self.fade_to(target, LED_LOADING_FADE_MS, now);
        self.fill(self.color);
    }

    fn step_boot(&mut self, now: Instant) {
        let Some(mut boot) = self.boot else { return };
        match boot.phase {
            BootPhase::Sweep => {
                if now.saturating_duration_since(boot.last_step)
                    >= Duration::from_millis(LED_SWEEP_STEP_MS)
                {
                    boot.last_step = now;
                    self.brightness = 255;
                    self.frame = [OFF; LED_COUNT];
                    self.frame[boot.cursor] = self.color;

                    if boot.forward {
                        if boot.cursor + 1 >= LED_COUNT {
                            boot.forward = false;
                            boot.cursor = LED_COUNT - 1;
                        } else {
                            boot.cursor += 1;
                        }
                    } else {
                        boot.cursor = boot.cursor.saturating_sub(1);
                    }

                    if !boot.forward && boot.cursor == 0 {
                        // Sweep finished: blank, then flare up.
                        self.brightness = 0;
                        self.fill(self.color);
                        self.fade_to(255, LED_SWEEP_FLARE_MS, now);
                        boot.phase = BootPhase::Flare;
                    }
                }
            }
            BootPhase::Flare => {
                self.fade_to(0, LED_SWEEP_TAIL_MS, now);
                boot.phase = BootPhase::Tail;
            }
            BootPhase::Tail => {
                self.boot = None;
                self.pulsating = true;
                info!("LED: boot animation complete");
                return;
            }
        }
        self.boot = Some(boot);
    }

    fn step_pulse(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_pulse) < Duration::from_millis(LED_PULSE_INTERVAL_MS) {
            return;
        }
        self.last_pulse = now;
        if self.pulse_up {
            if self.brightness < LED_PULSE_HIGH {
                self.fade_to(LED_PULSE_HIGH, LED_PULSE_UP_MS, now);
            } else {
                self.pulse_up = false;
            }
        } else if self.brightness > LED_PULSE_LOW {
            self.fade_to(LED_PULSE_LOW, LED_PULSE_DOWN_MS, now);
        } else {
            self.pulse_up = true;
        }
    }

    fn step_steady(&mut self, now: Instant) {
        self.fill(self.color);
        if now.saturating_duration_since(self.last_activity) < Duration::from_millis(LED_IDLE_TIMEOUT_MS) {
            return;
        }
        if self.brightness > LED_IDLE_BRIGHTNESS {
            self.fade_to(LED_IDLE_BRIGHTNESS, LED_IDLE_FADE_MS, now);
        } else {
            self.pulsating = true;
        }
    }

    fn fill(&mut self, color: RGB8) {
        self.frame = [color; LED_COUNT];
    }

    fn present<R: LedRing>(&mut self, ring: &mut R) {
        let current = (self.frame, self.brightness);
        if self.last_shown == Some(current) {
            return;
        }
        ring.set_global_brightness(self.brightness);
        for (i, px) in self.frame.iter().enumerate() {
            ring.set_pixel(i, *px);
        }
        match ring.show() {
            Ok(()) => self.last_shown = Some(current),
            Err(e) => warn!("LED: show failed: {:?}", e),
        }
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Color of the first pixel in the current frame.
    pub fn displayed_color(&self) -> RGB8 {
        self.frame[0]
    }

    pub fn frame(&self) -> &[RGB8; LED_COUNT] {
        &self.frame
    }

    pub fn base_color(&self) -> RGB8 {
        self.base_color
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_pulsating(&self) -> bool {
        self.pulsating
    }

    pub fn boot_complete(&self) -> bool {
        self.boot.is_none()
    }
}

/// LED task body. Runs the scheduler at 50 Hz; a restart request drops
/// the running scheduler and starts a fresh one with the same base color.
pub async fn run<R: LedRing>(commands: &LedChannel, ring: &mut R) -> ! {
    let mut animator = LedAnimator::new(Instant::now());
    info!("LED: animation loop started");

    loop {
        let run_loop = async {
            let mut ticker = Ticker::every(Duration::from_millis(LED_TICK_MS));
            loop {
                animator.step(commands, ring, Instant::now());
                ticker.next().await;
            }
        };

        let outcome = select(run_loop, commands.wait_restart()).await;
        if let Either::Second(()) = outcome {
            warn!("LED: restarting animation loop");
            animator = animator.restarted(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    #[derive(Default)]
    struct RecordingRing {
        pixels: [RGB8; LED_COUNT],
        brightness: u8,
        shows: usize,
    }

    impl LedRing for RecordingRing {
        fn set_pixel(&mut self, index: usize, color: RGB8) {
            self.pixels[index] = color;
        }

        fn set_global_brightness(&mut self, brightness: u8) {
            self.brightness = brightness;
        }

        fn show(&mut self) -> Result<()> {
            self.shows += 1;
            Ok(())
        }
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn restart_skips_boot_and_keeps_base_color() {
        let mut a = LedAnimator::new(at(0));
        let violet = RGB8::new(148, 0, 211);
        a.apply(LedCommand::SetColor(violet), at(10));
        a.apply(LedCommand::SetLoading(true), at(10));
        assert!(!a.boot_complete());

        let fresh = a.restarted(at(20));
        assert!(fresh.boot_complete());
        assert!(!fresh.is_loading());
        assert_eq!(fresh.base_color(), violet);
    }

    /// Animator past its boot animation, steady at full brightness.
    fn booted() -> LedAnimator {
        let mut a = LedAnimator::without_boot(at(0), LED_BASE_COLOR);
        a.apply(LedCommand::Activate, at(0));
        a
    }

    fn run_until(a: &mut LedAnimator, ch: &LedChannel, ring: &mut RecordingRing, from: u64, to: u64) {
        let mut t = from;
        while t <= to {
            a.step(ch, ring, at(t));
            t += LED_TICK_MS;
        }
    }

    #[test]
    fn fade_interpolates_linearly() {
        let f = Fade {
            from: 0,
            to: 200,
            start: at(1000),
            duration: Duration::from_millis(100),
        };
        assert_eq!(f.level_at(at(1000)), (0, false));
        assert_eq!(f.level_at(at(1050)), (100, false));
        assert_eq!(f.level_at(at(1100)), (200, true));
        assert_eq!(f.level_at(at(900)), (0, false));

        let down = Fade {
            from: 255,
            to: 10,
            ..f
        };
        assert_eq!(down.level_at(at(1050)), (133, false));
    }

    #[test]
    fn ranking_is_top_down() {
        let mut a = booted();
        assert_eq!(a.active(), Animation::Steady);
        a.apply(LedCommand::SetLoading(true), at(10));
        assert_eq!(a.active(), Animation::Loading);
        a.apply(
            LedCommand::Flash {
                color: FLASH_CLICK,
                brightness: 255,
                duration: Duration::from_millis(200),
            },
            at(10),
        );
        assert_eq!(a.active(), Animation::Flashing);
        a.fade_to(0, 100, at(10));
        assert_eq!(a.active(), Animation::Fading);
    }

    #[test]
    fn flash_shows_color_then_restores_base() {
        let ch = LedChannel::new();
        let mut ring = RecordingRing::default();
        let mut a = booted();
        ch.handle().flash_color(FLASH_CLICK, 255, 200);

        a.step(&ch, &mut ring, at(100));
        assert_eq!(ring.pixels[0], FLASH_CLICK);
        assert_eq!(ring.brightness, 255);

        a.step(&ch, &mut ring, at(299));
        assert_eq!(ring.pixels[5], FLASH_CLICK);

        a.step(&ch, &mut ring, at(300));
        assert_eq!(ring.pixels[0], LED_BASE_COLOR);
        assert_eq!(a.active(), Animation::Steady);
    }

    #[test]
    fn loading_queued_during_flash_is_invisible_until_flash_ends() {
        let ch = LedChannel::new();
        let mut ring = RecordingRing::default();
        let mut a = booted();
        let led = ch.handle();

        led.flash_color(FLASH_LONG_PRESS, 180, 500);
        a.step(&ch, &mut ring, at(0));
        led.set_loading(true);

        let mut t = 20;
        while t < 500 {
            a.step(&ch, &mut ring, at(t));
            assert_eq!(ring.pixels, [FLASH_LONG_PRESS; LED_COUNT], "t={t}");
            assert_eq!(ring.brightness, 180, "t={t}");
            t += LED_TICK_MS;
        }

        // Flash over: base color restored, then loading takes over.
        a.step(&ch, &mut ring, at(500));
        assert_eq!(ring.pixels[0], LED_BASE_COLOR);
        a.step(&ch, &mut ring, at(520));
        assert_eq!(ring.pixels[0], LED_LOADING_COLOR);
        assert_eq!(a.active(), Animation::Fading);
    }

    #[test]
    fn loading_alternates_between_extremes() {
        let ch = LedChannel::new();
        let mut ring = RecordingRing::default();
        let mut a = booted();
        a.apply(LedCommand::SetLoading(true), at(0));

        let mut seen_high = false;
        let mut seen_low = false;
        let mut t = 0;
        while t < 1000 {
            a.step(&ch, &mut ring, at(t));
            seen_high |= a.brightness() == LED_LOADING_HIGH;
            seen_low |= a.brightness() == LED_LOADING_LOW;
            t += 10;
        }
        assert!(seen_high && seen_low);
    }

    #[test]
    fn loading_off_fades_to_200_in_base_color() {
        let ch = LedChannel::new();
        let mut ring = RecordingRing::default();
        let mut a = booted();
        a.apply(LedCommand::SetLoading(true), at(0));
        a.step(&ch, &mut ring, at(0));
        ch.handle().set_loading(false);
        a.step(&ch, &mut ring, at(20));
        assert_eq!(a.active(), Animation::Fading);
        run_until(&mut a, &ch, &mut ring, 40, 200);
        assert_eq!(a.brightness(), LED_LOADING_DONE_BRIGHTNESS);
        assert_eq!(ring.pixels[0], LED_BASE_COLOR);
    }

    #[test]
    fn activate_restores_full_brightness_and_cancels_pulse() {
        let mut a = LedAnimator::without_boot(at(0), LED_BASE_COLOR);
        assert!(a.is_pulsating());
        a.apply(LedCommand::Activate, at(50));
        assert!(!a.is_pulsating());
        assert_eq!(a.brightness(), 255);
        assert_eq!(a.active(), Animation::Steady);
    }

    #[test]
    fn idle_dims_then_pulses() {
        let ch = LedChannel::new();
        let mut ring = RecordingRing::default();
        let mut a = booted();

        run_until(&mut a, &ch, &mut ring, 0, LED_IDLE_TIMEOUT_MS - 20);
        assert_eq!(a.brightness(), 255);

        // Dim over one second, then start pulsating.
        run_until(&mut a, &ch, &mut ring, LED_IDLE_TIMEOUT_MS, LED_IDLE_TIMEOUT_MS + 1100);
        assert!(a.is_pulsating());
        assert!(a.brightness() <= LED_PULSE_HIGH);
    }

    #[test]
    fn pulse_stays_between_bounds() {
        let ch = LedChannel::new();
        let mut ring = RecordingRing::default();
        let mut a = LedAnimator::without_boot(at(0), LED_BASE_COLOR);
        // Settle into the pulse range first.
        run_until(&mut a, &ch, &mut ring, 0, 3000);
        let mut lo = u8::MAX;
        let mut hi = 0;
        let mut t = 3020;
        while t < 15_000 {
            a.step(&ch, &mut ring, at(t));
            lo = lo.min(a.brightness());
            hi = hi.max(a.brightness());
            t += LED_TICK_MS;
        }
        assert_eq!(lo, LED_PULSE_LOW);
        assert_eq!(hi, LED_PULSE_HIGH);
    }

    #[test]
    fn boot_sweep_lights_one_pixel_and_bounces() {
        let ch = LedChannel::new();
        let mut ring = RecordingRing::default();
        let mut a = LedAnimator::new(at(0));

        a.step(&ch, &mut ring, at(70));
        assert_eq!(a.active(), Animation::BootSweep);
        let lit: Vec<usize> = (0..LED_COUNT).filter(|&i| ring.pixels[i] != OFF).collect();
        assert_eq!(lit, vec![0]);

        a.step(&ch, &mut ring, at(140));
        assert_eq!(ring.pixels[1], LED_BASE_COLOR);
        assert_eq!(ring.pixels[0], OFF);

        // Forward 12 steps + back 11 steps, then the flare fade starts.
        let mut t = 210;
        while a.active() == Animation::BootSweep && t < 3000 {
            a.step(&ch, &mut ring, at(t));
            t += 70;
        }
        assert_eq!(a.active(), Animation::Fading);
        assert!(!a.boot_complete());
    }

    #[test]
    fn boot_times_out_after_four_seconds() {
        let ch = LedChannel::new();
        let mut ring = RecordingRing::default();
        let mut a = LedAnimator::new(at(0));
        run_until(&mut a, &ch, &mut ring, 0, LED_BOOT_TIMEOUT_MS);
        assert!(a.boot_complete());
        assert!(a.is_pulsating());
    }

    #[test]
    fn set_color_changes_base() {
        let ch = LedChannel::new();
        let mut ring = RecordingRing::default();
        let mut a = booted();
        let violet = crate::led::LedColor::Violet.rgb();
        ch.handle().set_color(violet);
        a.step(&ch, &mut ring, at(20));
        assert_eq!(a.base_color(), violet);
        assert_eq!(ring.pixels[11], violet);
    }

    #[test]
    fn unchanged_frame_is_not_reshown() {
        let ch = LedChannel::new();
        let mut ring = RecordingRing::default();
        let mut a = booted();
        a.step(&ch, &mut ring, at(20));
        a.step(&ch, &mut ring, at(40));
        a.step(&ch, &mut ring, at(60));
        assert_eq!(ring.shows, 1);
    }
}
