use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use super::{NetworkState, StackEvent};

/// Connection state written from radio callbacks and read by the
/// coordinator. Every write is a single atomic store or CAS.
pub struct NetworkStatus {
    state: AtomicU8,
    ip: AtomicU32,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStatus {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(NetworkState::Disconnected as u8),
            ip: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> NetworkState {
        NetworkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, state: NetworkState) {
        let prev = NetworkState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if prev != state {
            info!("WiFi: {:?} -> {:?}", prev, state);
        }
    }

    /// Move `from` -> `to` only if the state is still `from`. Returns
    /// whether the transition happened.
    pub fn transition(&self, from: NetworkState, to: NetworkState) -> bool {
        let ok = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if ok {
            info!("WiFi: {:?} -> {:?}", from, to);
        }
        ok
    }

    /// Station address, if one has been assigned.
    pub fn ip(&self) -> Option<Ipv4Addr> {
        match self.ip.load(Ordering::Acquire) {
            0 => None,
            raw => Some(Ipv4Addr::from(raw)),
        }
    }

    /// Apply a radio notification. Safe to call from any context.
    pub fn on_stack_event(&self, event: StackEvent) {
        match event {
            StackEvent::GotIp(addr) => {
                self.ip.store(u32::from(addr), Ordering::Release);
                self.set(NetworkState::Connected);
            }
            StackEvent::Disconnected => {
                self.ip.store(0, Ordering::Release);
                // A failing attempt is resolved by the connect timeout.
                let result = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                    (s != NetworkState::Connecting as u8).then_some(NetworkState::Disconnected as u8)
                });
                match result {
                    Ok(prev) if prev != NetworkState::Disconnected as u8 => {
                        warn!("WiFi: link lost ({:?})", NetworkState::from_u8(prev));
                    }
                    Ok(_) => {}
                    Err(_) => debug!("WiFi: disconnect during attempt ignored"),
                }
            }
            StackEvent::WpsSuccess => self.set(NetworkState::WpsSuccess),
            StackEvent::WpsFailed => self.set(NetworkState::WpsFailed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn got_ip_connects() {
        let s = NetworkStatus::new();
        s.set(NetworkState::Connecting);
        s.on_stack_event(StackEvent::GotIp(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(s.state(), NetworkState::Connected);
        assert_eq!(s.ip(), Some(Ipv4Addr::new(10, 0, 0, 9)));
    }

    #[test]
    fn disconnect_while_connecting_is_ignored() {
        let s = NetworkStatus::new();
        s.set(NetworkState::Connecting);
        s.on_stack_event(StackEvent::Disconnected);
        assert_eq!(s.state(), NetworkState::Connecting);
    }

    #[test]
    fn disconnect_after_connect_drops_link() {
        let s = NetworkStatus::new();
        s.on_stack_event(StackEvent::GotIp(Ipv4Addr::new(10, 0, 0, 9)));
        s.on_stack_event(StackEvent::Disconnected);
        assert_eq!(s.state(), NetworkState::Disconnected);
        assert_eq!(s.ip(), None);
    }

    #[test]
    fn transition_requires_expected_state() {
        let s = NetworkStatus::new();
        s.set(NetworkState::Connected);
        assert!(!s.transition(NetworkState::Connecting, NetworkState::Timeout));
        assert_eq!(s.state(), NetworkState::Connected);
        s.set(NetworkState::Connecting);
        assert!(s.transition(NetworkState::Connecting, NetworkState::Timeout));
        assert_eq!(s.state(), NetworkState::Timeout);
    }

    #[test]
    fn wps_results() {
        let s = NetworkStatus::new();
        s.set(NetworkState::WpsListening);
        s.on_stack_event(StackEvent::WpsFailed);
        assert_eq!(s.state(), NetworkState::WpsFailed);
        s.on_stack_event(StackEvent::WpsSuccess);
        assert_eq!(s.state(), NetworkState::WpsSuccess);
    }
}
