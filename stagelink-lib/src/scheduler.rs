//! Outbound command scheduling.
//!
//! The stage is half-duplex at the command layer: exactly one host
//! command may be outstanding, and the next is released only after the
//! device's host-command-finished signal. Configuration writes are
//! additionally limited to one per second, measured from the previous
//! throttle release. Other commands bypass the limiter entirely; the two
//! streams merge in arrival order, best effort.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

pub(crate) const CONFIG_WRITE_INTERVAL: Duration = Duration::from_secs(1);

struct Queued<T> {
    seq: u64,
    item: T,
}

pub(crate) enum Poll<T> {
    /// A command may go on the wire now. `poll` marks the channel busy;
    /// report a transport failure with `write_failed` so it frees up
    /// again.
    Release(T),
    /// Only a throttled config write is waiting; poll again at the
    /// instant.
    WaitUntil(Instant),
    Idle,
}

pub(crate) struct CommandScheduler<T> {
    config_queue: VecDeque<Queued<T>>,
    other_queue: VecDeque<Queued<T>>,
    next_seq: u64,
    in_flight: bool,
    last_config_release: Option<Instant>,
}

impl<T> CommandScheduler<T> {
    /// On startup the channel is treated as immediately available.
    pub fn new() -> Self {
        Self {
            config_queue: VecDeque::new(),
            other_queue: VecDeque::new(),
            next_seq: 0,
            in_flight: false,
            last_config_release: None,
        }
    }

    pub fn submit(&mut self, item: T, is_config_write: bool) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let queue = if is_config_write {
            &mut self.config_queue
        } else {
            &mut self.other_queue
        };
        queue.push_back(Queued { seq, item });
    }

    /// The device signalled that the previous command finished.
    pub fn host_command_finished(&mut self) {
        self.in_flight = false;
    }

    /// The transport write failed, so the wire never carried the command
    /// and no finished signal will come for it.
    pub fn write_failed(&mut self) {
        self.in_flight = false;
    }

    pub fn poll(&mut self, now: Instant) -> Poll<T> {
        if self.in_flight {
            return Poll::Idle;
        }
        let config_deadline = self
            .last_config_release
            .map(|last| last + CONFIG_WRITE_INTERVAL);
        let config_ready = self.config_queue.front().is_some()
            && config_deadline.is_none_or(|deadline| now >= deadline);

        let take_config = match (
            config_ready,
            self.config_queue.front().map(|q| q.seq),
            self.other_queue.front().map(|q| q.seq),
        ) {
            (true, Some(config_seq), Some(other_seq)) => config_seq < other_seq,
            (true, Some(_), None) => true,
            _ => false,
        };

        if take_config {
            if let Some(queued) = self.config_queue.pop_front() {
                self.last_config_release = Some(now);
                self.in_flight = true;
                return Poll::Release(queued.item);
            }
        }
        if let Some(queued) = self.other_queue.pop_front() {
            self.in_flight = true;
            return Poll::Release(queued.item);
        }
        if self.config_queue.front().is_some() {
            if let Some(deadline) = config_deadline {
                return Poll::WaitUntil(deadline);
            }
        }
        Poll::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release<T>(poll: Poll<T>) -> T {
        match poll {
            Poll::Release(item) => item,
            Poll::WaitUntil(_) => panic!("expected release, scheduler is throttled"),
            Poll::Idle => panic!("expected release, scheduler is idle"),
        }
    }

    #[test]
    fn one_command_in_flight_at_a_time() {
        let mut scheduler = CommandScheduler::new();
        let now = Instant::now();
        scheduler.submit("a", false);
        scheduler.submit("b", false);

        assert_eq!(release(scheduler.poll(now)), "a");
        assert!(matches!(scheduler.poll(now), Poll::Idle));

        scheduler.host_command_finished();
        assert_eq!(release(scheduler.poll(now)), "b");
    }

    #[test]
    fn config_writes_are_throttled() {
        let mut scheduler = CommandScheduler::new();
        let now = Instant::now();
        scheduler.submit("w1", true);
        scheduler.submit("w2", true);

        assert_eq!(release(scheduler.poll(now)), "w1");
        scheduler.host_command_finished();

        match scheduler.poll(now + Duration::from_millis(10)) {
            Poll::WaitUntil(deadline) => assert_eq!(deadline, now + CONFIG_WRITE_INTERVAL),
            _ => panic!("second config write released too early"),
        }
        assert_eq!(release(scheduler.poll(now + CONFIG_WRITE_INTERVAL)), "w2");
    }

    #[test]
    fn other_commands_bypass_the_throttle() {
        let mut scheduler = CommandScheduler::new();
        let now = Instant::now();
        scheduler.submit("w1", true);
        scheduler.submit("w2", true);
        scheduler.submit("other", false);

        assert_eq!(release(scheduler.poll(now)), "w1");
        scheduler.host_command_finished();

        // The throttled config write does not hold up the merged stream.
        assert_eq!(release(scheduler.poll(now + Duration::from_millis(10))), "other");
        scheduler.host_command_finished();
        assert_eq!(release(scheduler.poll(now + CONFIG_WRITE_INTERVAL)), "w2");
    }

    #[test]
    fn merge_order_is_arrival_order_when_both_ready() {
        let mut scheduler = CommandScheduler::new();
        let now = Instant::now();
        scheduler.submit("other", false);
        scheduler.submit("w1", true);

        assert_eq!(release(scheduler.poll(now)), "other");
        scheduler.host_command_finished();
        assert_eq!(release(scheduler.poll(now)), "w1");
    }

    #[test]
    fn failed_write_does_not_wedge_the_channel() {
        let mut scheduler = CommandScheduler::new();
        let now = Instant::now();
        scheduler.submit("a", false);
        scheduler.submit("b", false);

        assert_eq!(release(scheduler.poll(now)), "a");
        scheduler.write_failed();
        // No finished signal will ever come for "a"; "b" must still go.
        assert_eq!(release(scheduler.poll(now)), "b");
    }
}
