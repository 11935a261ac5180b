//! Barrier correlation: turn asynchronous ERROR and BARRIER_REPLY traffic into
//! a synchronous commit answer.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::addr::Dpid;
use crate::command_queue::{lock, CommandQueue};
use crate::openflow0x04::message::Message;

/// Receives the outcome of one barrier.
///
/// `command_failure` fires once per ERROR seen while waiting, with the xid of
/// the command that failed. A barrier can commit even though some commands
/// before it failed.
pub trait BarrierCallback: Send + Sync {
    fn command_failure(&self, xid: u32);

    fn barrier_success(&self) {}

    fn barrier_failure(&self) {}
}

/// Callback that remembers every failed xid.
#[derive(Debug, Default)]
pub struct FailureRecorder {
    failed: Mutex<Vec<u32>>,
}

impl FailureRecorder {
    pub fn new() -> FailureRecorder {
        Default::default()
    }

    pub fn failed_xids(&self) -> Vec<u32> {
        lock(&self.failed).clone()
    }

    pub fn had_failure(&self) -> bool {
        !lock(&self.failed).is_empty()
    }
}

impl BarrierCallback for FailureRecorder {
    fn command_failure(&self, xid: u32) {
        lock(&self.failed).push(xid);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BarrierState {
    Sent,
    Waiting,
    Completed,
    TimedOut,
}

/// Timing of the correlation loop. `timeout` bounds the whole wait, each
/// individual wait on the queue is at most `poll_interval`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BarrierTiming {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for BarrierTiming {
    fn default() -> BarrierTiming {
        BarrierTiming {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Drain `queue` after a barrier with `barrier_xid` went out.
///
/// Returns true when the BARRIER_REPLY arrived in time. ERRORs are handed to
/// `callback` and the wait goes on. `connected` is checked after every empty
/// poll; a switch that went away ends the wait as timed out.
pub fn await_barrier<F>(queue: &CommandQueue,
                        dpid: u64,
                        barrier_xid: u32,
                        timing: BarrierTiming,
                        connected: F,
                        callback: Option<&dyn BarrierCallback>)
                        -> bool
    where F: Fn() -> bool
{
    let deadline = Instant::now() + timing.timeout;
    let mut state = BarrierState::Sent;
    debug!("switch {}: barrier {} {:?}", Dpid(dpid), barrier_xid, state);

    while state == BarrierState::Sent || state == BarrierState::Waiting {
        state = BarrierState::Waiting;
        let now = Instant::now();
        if now >= deadline {
            state = BarrierState::TimedOut;
            break;
        }
        let wait = timing.poll_interval.min(deadline - now);
        match queue.take(wait) {
            Some(reply) => match reply.message {
                Message::BarrierReply if reply.xid == barrier_xid => state = BarrierState::Completed,
                Message::BarrierReply => {
                    warn!("switch {}: stale barrier reply {} while waiting for {}",
                          Dpid(dpid),
                          reply.xid,
                          barrier_xid)
                }
                Message::Error(ref err) => {
                    warn!("switch {}: command {} failed (type {}, code {})",
                          Dpid(dpid),
                          reply.xid,
                          err.err_type,
                          err.code);
                    if let Some(cb) = callback {
                        cb.command_failure(reply.xid);
                    }
                }
                ref other => warn!("switch {}: ignoring {:?} on reply queue", Dpid(dpid), other.msg_code()),
            },
            None => {
                if !connected() {
                    warn!("switch {} disconnected during barrier {}", Dpid(dpid), barrier_xid);
                    state = BarrierState::TimedOut;
                }
            }
        }
    }

    debug!("switch {}: barrier {} {:?}", Dpid(dpid), barrier_xid, state);
    let committed = state == BarrierState::Completed;
    if let Some(cb) = callback {
        if committed {
            cb.barrier_success();
        } else {
            cb.barrier_failure();
        }
    }
    committed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use crate::command_queue::Reply;
    use crate::openflow0x04::ErrorMsg;

    fn timing(ms: u64) -> BarrierTiming {
        BarrierTiming {
            timeout: Duration::from_millis(ms),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn error_reply(xid: u32) -> Reply {
        Reply {
            xid,
            message: Message::Error(ErrorMsg { err_type: 5, code: 0, data: vec![] }),
        }
    }

    #[derive(Default)]
    struct Counting {
        failures: AtomicUsize,
        successes: AtomicUsize,
        timeouts: AtomicUsize,
    }

    impl BarrierCallback for Counting {
        fn command_failure(&self, _: u32) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn barrier_success(&self) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn barrier_failure(&self) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_reply_commits_without_failures() {
        let queue = CommandQueue::new(1, 16);
        queue.enqueue(Reply { xid: 7, message: Message::BarrierReply }).unwrap();
        let cb = Counting::default();
        assert!(await_barrier(&queue, 1, 7, timing(500), || true, Some(&cb)));
        assert_eq!(cb.failures.load(Ordering::SeqCst), 0);
        assert_eq!(cb.successes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_then_reply_commits_and_reports() {
        let queue = CommandQueue::new(1, 16);
        queue.enqueue(error_reply(5)).unwrap();
        queue.enqueue(Reply { xid: 6, message: Message::BarrierReply }).unwrap();
        let rec = FailureRecorder::new();
        assert!(await_barrier(&queue, 1, 6, timing(500), || true, Some(&rec)));
        assert_eq!(rec.failed_xids(), vec![5]);
    }

    #[test]
    fn test_drains_every_error() {
        let queue = CommandQueue::new(1, 16);
        for xid in 1..4 {
            queue.enqueue(error_reply(xid)).unwrap();
        }
        queue.enqueue(Reply { xid: 4, message: Message::BarrierReply }).unwrap();
        let rec = FailureRecorder::new();
        assert!(await_barrier(&queue, 1, 4, timing(500), || true, Some(&rec)));
        assert_eq!(rec.failed_xids(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_silence_times_out() {
        let queue = CommandQueue::new(1, 16);
        let cb = Counting::default();
        let start = Instant::now();
        assert!(!await_barrier(&queue, 1, 1, timing(80), || true, Some(&cb)));
        assert!(start.elapsed() >= Duration::from_millis(80));
        assert_eq!(cb.timeouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_only_times_out() {
        let queue = CommandQueue::new(1, 16);
        queue.enqueue(error_reply(2)).unwrap();
        let rec = FailureRecorder::new();
        assert!(!await_barrier(&queue, 1, 3, timing(60), || true, Some(&rec)));
        assert_eq!(rec.failed_xids(), vec![2]);
    }

    #[test]
    fn test_stale_reply_is_skipped() {
        let queue = CommandQueue::new(1, 16);
        queue.enqueue(Reply { xid: 2, message: Message::BarrierReply }).unwrap();
        assert!(!await_barrier(&queue, 1, 3, timing(60), || true, None));
        queue.enqueue(Reply { xid: 2, message: Message::BarrierReply }).unwrap();
        queue.enqueue(Reply { xid: 3, message: Message::BarrierReply }).unwrap();
        assert!(await_barrier(&queue, 1, 3, timing(200), || true, None));
    }

    #[test]
    fn test_disconnect_ends_wait() {
        let queue = CommandQueue::new(1, 16);
        let start = Instant::now();
        assert!(!await_barrier(&queue, 1, 1, timing(5_000), || false, None));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_reply_arriving_later_is_seen() {
        let queue = Arc::new(CommandQueue::new(1, 16));
        let producer = queue.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            producer.enqueue(error_reply(10)).unwrap();
            thread::sleep(Duration::from_millis(40));
            producer.enqueue(Reply { xid: 11, message: Message::BarrierReply }).unwrap();
        });
        let rec = FailureRecorder::new();
        assert!(await_barrier(&queue, 1, 11, timing(5_000), || true, Some(&rec)));
        assert_eq!(rec.failed_xids(), vec![10]);
        h.join().unwrap();
    }
}
