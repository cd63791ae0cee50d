//! Request/reply exchange between a driver handle and the task that
//! owns the driver.
//!
//! Each request carries a sequence number that the task echoes back.
//! A reply to a request that already timed out is discarded instead of
//! being taken as the answer to the next one.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};

pub struct RequestLink<C, R> {
    commands: Channel<CriticalSectionRawMutex, (u32, C), 1>,
    replies: Signal<CriticalSectionRawMutex, (u32, R)>,
}

impl<C, R> Default for RequestLink<C, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, R> RequestLink<C, R> {
    pub const fn new() -> Self {
        Self {
            commands: Channel::new(),
            replies: Signal::new(),
        }
    }

    /// Send `command` tagged `seq` and wait up to `timeout` for the
    /// matching reply. `None` on timeout.
    pub async fn request(&self, seq: u32, command: C, timeout: Duration) -> Option<R> {
        self.replies.reset();
        self.commands.send((seq, command)).await;
        let reply = async {
            loop {
                let (answered, result) = self.replies.wait().await;
                if answered == seq {
                    return result;
                }
                debug!("Link: dropping stale reply {}", answered);
            }
        };
        with_timeout(timeout, reply).await.ok()
    }

    /// Next request for the owning task.
    pub async fn next(&self) -> (u32, C) {
        self.commands.receive().await
    }

    /// Answer request `seq`.
    pub fn reply(&self, seq: u32, result: R) {
        self.replies.signal((seq, result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::join::join;

    #[test]
    fn reply_reaches_its_request() {
        let link: RequestLink<u8, u8> = RequestLink::new();
        let (answer, ()) = block_on(join(
            link.request(1, 7, Duration::from_secs(1)),
            async {
                let (seq, cmd) = link.next().await;
                link.reply(seq, cmd * 2);
            },
        ));
        assert_eq!(answer, Some(14));
    }

    #[test]
    fn late_reply_is_not_taken_for_the_next_request() {
        let link: RequestLink<u8, u8> = RequestLink::new();
        let (answer, ()) = block_on(join(
            link.request(2, 5, Duration::from_secs(1)),
            async {
                let (seq, cmd) = link.next().await;
                // answer to an earlier, abandoned request lands first
                link.reply(1, 99);
                embassy_futures::yield_now().await;
                link.reply(seq, cmd + 1);
            },
        ));
        assert_eq!(answer, Some(6));
    }
}
