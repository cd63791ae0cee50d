//! Core/UI event bus: two independent bounded FIFO channels.
//!
//! The bus is built once at the composition root and handed out by
//! reference, so there is no "not yet initialised" state to check. A
//! full channel rejects the newest event; callers decide whether a drop
//! matters.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration};

use crate::config::EVENT_QUEUE_SIZE;
use crate::event::Event;

/// Which way an event travels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Coordination context → render context.
    ToUi,
    /// Render context → coordination context.
    ToCore,
}

type EventChannel = Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_SIZE>;

/// Pair of bounded event channels plus drop counters.
pub struct EventBus {
    to_ui: EventChannel,
    to_core: EventChannel,
    dropped_to_ui: AtomicU32,
    dropped_to_core: AtomicU32,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub const fn new() -> Self {
        Self {
            to_ui: Channel::new(),
            to_core: Channel::new(),
            dropped_to_ui: AtomicU32::new(0),
            dropped_to_core: AtomicU32::new(0),
        }
    }

    fn channel(&self, dir: Direction) -> &EventChannel {
        match dir {
            Direction::ToUi => &self.to_ui,
            Direction::ToCore => &self.to_core,
        }
    }

    fn dropped_counter(&self, dir: Direction) -> &AtomicU32 {
        match dir {
            Direction::ToUi => &self.dropped_to_ui,
            Direction::ToCore => &self.dropped_to_core,
        }
    }

    /// Enqueue without waiting. Returns `false` if the channel is full.
    pub fn send(&self, dir: Direction, event: Event) -> bool {
        match self.channel(dir).try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped_counter(dir).fetch_add(1, Ordering::Relaxed);
                debug!("Bus: {:?} full, event dropped", dir);
                false
            }
        }
    }

    /// Dequeue without waiting.
    pub fn receive(&self, dir: Direction) -> Option<Event> {
        self.channel(dir).try_receive().ok()
    }

    /// Enqueue, waiting up to `timeout` for a free slot. A zero timeout
    /// behaves like [`send`](Self::send).
    pub async fn send_timeout(&self, dir: Direction, event: Event, timeout: Duration) -> bool {
        if timeout == Duration::from_ticks(0) {
            return self.send(dir, event);
        }
        match with_timeout(timeout, self.channel(dir).send(event)).await {
            Ok(()) => true,
            Err(_) => {
                self.dropped_counter(dir).fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Dequeue, waiting up to `timeout` for an event. A zero timeout
    /// behaves like [`receive`](Self::receive).
    pub async fn receive_timeout(&self, dir: Direction, timeout: Duration) -> Option<Event> {
        if timeout == Duration::from_ticks(0) {
            return self.receive(dir);
        }
        with_timeout(timeout, self.channel(dir).receive()).await.ok()
    }

    /// Events currently queued in `dir`.
    pub fn len(&self, dir: Direction) -> usize {
        self.channel(dir).len()
    }

    pub fn is_empty(&self, dir: Direction) -> bool {
        self.channel(dir).is_empty()
    }

    pub fn is_full(&self, dir: Direction) -> bool {
        self.channel(dir).is_full()
    }

    pub const fn capacity(&self) -> usize {
        EVENT_QUEUE_SIZE
    }

    /// Events rejected in `dir` since boot.
    pub fn dropped(&self, dir: Direction) -> u32 {
        self.dropped_counter(dir).load(Ordering::Relaxed)
    }

    pub fn log_status(&self) {
        info!(
            "Bus: to_ui {}/{} (dropped {}), to_core {}/{} (dropped {})",
            self.len(Direction::ToUi),
            EVENT_QUEUE_SIZE,
            self.dropped(Direction::ToUi),
            self.len(Direction::ToCore),
            EVENT_QUEUE_SIZE,
            self.dropped(Direction::ToCore)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use embassy_futures::block_on;

    fn click(ms: i32) -> Event {
        Event::new(EventKind::EncoderClick).with_value(ms)
    }

    #[test]
    fn full_channel_rejects_newest() {
        let bus = EventBus::new();
        for i in 0..EVENT_QUEUE_SIZE as i32 {
            assert!(bus.send(Direction::ToCore, click(i)));
        }
        assert!(bus.is_full(Direction::ToCore));
        assert!(!bus.send(Direction::ToCore, click(99)));
        assert_eq!(bus.len(Direction::ToCore), EVENT_QUEUE_SIZE);
        assert_eq!(bus.dropped(Direction::ToCore), 1);

        // Oldest is still first; the rejected event never entered.
        assert_eq!(bus.receive(Direction::ToCore).map(|e| e.value()), Some(0));
        let rest: Vec<i32> = core::iter::from_fn(|| bus.receive(Direction::ToCore))
            .map(|e| e.value())
            .collect();
        assert_eq!(rest, (1..EVENT_QUEUE_SIZE as i32).collect::<Vec<_>>());
    }

    #[test]
    fn directions_are_independent() {
        let bus = EventBus::new();
        assert!(bus.send(Direction::ToUi, Event::new(EventKind::DisplayWakeUp)));
        assert!(bus.receive(Direction::ToCore).is_none());
        assert_eq!(
            bus.receive(Direction::ToUi).map(|e| e.kind()),
            Some(EventKind::DisplayWakeUp)
        );
        assert!(bus.is_empty(Direction::ToUi));
    }

    #[test]
    fn zero_timeout_polls() {
        let bus = EventBus::new();
        assert!(block_on(bus.receive_timeout(Direction::ToUi, Duration::from_ticks(0))).is_none());
        for i in 0..EVENT_QUEUE_SIZE as i32 {
            assert!(bus.send(Direction::ToUi, click(i)));
        }
        assert!(!block_on(bus.send_timeout(
            Direction::ToUi,
            click(42),
            Duration::from_ticks(0)
        )));
    }

    #[test]
    fn timed_receive_returns_queued_event() {
        let bus = EventBus::new();
        bus.send(Direction::ToCore, click(7));
        let ev = block_on(bus.receive_timeout(Direction::ToCore, Duration::from_millis(10)));
        assert_eq!(ev.map(|e| e.value()), Some(7));
    }

    #[test]
    fn timed_receive_on_empty_channel_times_out() {
        let bus = EventBus::new();
        let ev = block_on(bus.receive_timeout(Direction::ToCore, Duration::from_millis(5)));
        assert!(ev.is_none());
    }
}
