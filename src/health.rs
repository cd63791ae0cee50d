//! Periodic health check - heap watermarks and LED task liveness.

use embassy_time::{Duration, Instant};

use crate::config::{HEALTH_CHECK_INTERVAL_MS, LED_STACK_MIN_HEADROOM, LOW_MEMORY_THRESHOLD};

/// Platform diagnostics.
pub trait HealthProbe {
    /// Free heap bytes right now.
    fn free_heap(&self) -> usize;

    /// Lowest free heap seen since boot.
    fn min_free_heap(&self) -> usize;

    /// Unused stack of the LED task, if the platform can measure it.
    fn led_stack_headroom(&self) -> Option<usize> {
        None
    }
}

/// One health sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HealthReport {
    pub free_heap: usize,
    pub min_free_heap: usize,
    pub led_stack_headroom: Option<usize>,
    pub low_memory: bool,
    /// The LED task is close to overflowing and should be restarted.
    pub restart_led: bool,
}

pub struct HealthMonitor {
    interval: Duration,
    last_check: Instant,
}

impl HealthMonitor {
    pub fn new(now: Instant) -> Self {
        Self {
            interval: Duration::from_millis(HEALTH_CHECK_INTERVAL_MS),
            last_check: now,
        }
    }

    /// Sample the probe if an interval has passed since the last check.
    pub fn poll<P: HealthProbe>(&mut self, probe: &P, now: Instant) -> Option<HealthReport> {
        if now.saturating_duration_since(self.last_check) < self.interval {
            return None;
        }
        self.last_check = now;
        Some(Self::check(probe))
    }

    pub fn check<P: HealthProbe>(probe: &P) -> HealthReport {
        let free_heap = probe.free_heap();
        let headroom = probe.led_stack_headroom();
        HealthReport {
            free_heap,
            min_free_heap: probe.min_free_heap(),
            led_stack_headroom: headroom,
            low_memory: free_heap < LOW_MEMORY_THRESHOLD,
            restart_led: headroom.is_some_and(|h| h < LED_STACK_MIN_HEADROOM),
        }
    }
}

impl HealthReport {
    pub fn log(&self, cycles: u32, events: u32) {
        info!(
            "Health: heap free={} min={} cycles={} events={}",
            self.free_heap, self.min_free_heap, cycles, events
        );
        if let Some(h) = self.led_stack_headroom {
            debug!("Health: LED stack headroom {} bytes", h);
        }
        if self.low_memory {
            warn!("Health: low memory, {} bytes free", self.free_heap);
        }
        if self.restart_led {
            warn!("Health: LED task stack nearly exhausted, restarting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        free: usize,
        stack: Option<usize>,
    }

    impl HealthProbe for Probe {
        fn free_heap(&self) -> usize {
            self.free
        }
        fn min_free_heap(&self) -> usize {
            self.free / 2
        }
        fn led_stack_headroom(&self) -> Option<usize> {
            self.stack
        }
    }

    #[test]
    fn polls_on_interval() {
        let probe = Probe { free: 120_000, stack: None };
        let mut m = HealthMonitor::new(Instant::from_millis(0));
        assert!(m.poll(&probe, Instant::from_millis(4_999)).is_none());
        let r = m.poll(&probe, Instant::from_millis(5_000)).unwrap();
        assert!(!r.low_memory && !r.restart_led);
        assert_eq!(r.min_free_heap, 60_000);
        assert!(m.poll(&probe, Instant::from_millis(9_000)).is_none());
        assert!(m.poll(&probe, Instant::from_millis(10_000)).is_some());
    }

    #[test]
    fn flags_low_memory_and_stack() {
        let r = HealthMonitor::check(&Probe { free: 49_999, stack: Some(511) });
        assert!(r.low_memory);
        assert!(r.restart_led);

        let r = HealthMonitor::check(&Probe { free: 50_000, stack: Some(512) });
        assert!(!r.low_memory);
        assert!(!r.restart_led);
    }

    #[test]
    fn unknown_stack_never_restarts() {
        assert!(!HealthMonitor::check(&Probe { free: 0, stack: None }).restart_led);
    }
}
