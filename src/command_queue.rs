//! Per-switch transaction ids and inbound correlation queues.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{error, warn};

use crate::addr::Dpid;
use crate::error::{Error, Result};
use crate::openflow0x04::message::Message;

/// A correlation-relevant message and the xid it carried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub xid: u32,
    pub message: Message,
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One switch's xid counter and inbound FIFO of ERROR / BARRIER_REPLY messages.
#[derive(Debug)]
pub struct CommandQueue {
    dpid: u64,
    last_xid: AtomicU32,
    replies: Mutex<VecDeque<Reply>>,
    ready: Condvar,
    capacity: usize,
    barrier_lock: Mutex<()>,
}

impl CommandQueue {
    pub fn new(dpid: u64, capacity: usize) -> CommandQueue {
        CommandQueue {
            dpid,
            last_xid: AtomicU32::new(0),
            replies: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            capacity,
            barrier_lock: Mutex::new(()),
        }
    }

    /// Next transaction id. Starts at 1; 0 is left for unsolicited messages.
    pub fn next_xid(&self) -> u32 {
        let prev = self.last_xid
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |x| {
                Some(if x == u32::MAX { 1 } else { x + 1 })
            })
            .unwrap_or_else(|x| x);
        if prev == u32::MAX {
            warn!("xid space exhausted for switch {}, wrapping", Dpid(self.dpid));
            1
        } else {
            prev + 1
        }
    }

    pub fn enqueue(&self, reply: Reply) -> Result<()> {
        match reply.message {
            Message::Error(_) | Message::BarrierReply => (),
            ref other => {
                error!("switch {}: {:?} (xid {}) does not belong on the reply queue, dropped",
                       Dpid(self.dpid),
                       other.msg_code(),
                       reply.xid);
                return Err(Error::ProtocolViolation(format!("{:?} routed to reply queue", other.msg_code())));
            }
        }
        let mut q = lock(&self.replies);
        if q.len() >= self.capacity {
            error!("switch {}: reply queue full, dropping xid {}", Dpid(self.dpid), reply.xid);
            return Err(Error::QueueFull(self.dpid));
        }
        q.push_back(reply);
        self.ready.notify_one();
        Ok(())
    }

    /// Pop the oldest reply, waiting up to `timeout` for one to arrive.
    pub fn take(&self, timeout: Duration) -> Option<Reply> {
        let deadline = Instant::now() + timeout;
        let mut q = lock(&self.replies);
        loop {
            if let Some(reply) = q.pop_front() {
                return Some(reply);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            q = self.ready
                .wait_timeout(q, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.replies).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Held for the duration of one barrier so concurrent barriers on this
    /// switch do not steal each other's replies.
    pub fn barrier_guard(&self) -> MutexGuard<()> {
        lock(&self.barrier_lock)
    }
}

/// Registry of command queues, created lazily per switch id.
///
/// The map lock is only held to look up or insert an `Arc`; waiting happens
/// on the per-switch queue.
#[derive(Debug)]
pub struct SwitchQueues {
    capacity: usize,
    queues: Mutex<HashMap<u64, Arc<CommandQueue>>>,
}

impl SwitchQueues {
    pub fn new(capacity: usize) -> SwitchQueues {
        SwitchQueues {
            capacity,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue(&self, dpid: u64) -> Arc<CommandQueue> {
        lock(&self.queues)
            .entry(dpid)
            .or_insert_with(|| Arc::new(CommandQueue::new(dpid, self.capacity)))
            .clone()
    }

    pub fn next_xid(&self, dpid: u64) -> u32 {
        self.queue(dpid).next_xid()
    }

    pub fn enqueue_reply(&self, dpid: u64, xid: u32, message: Message) -> Result<()> {
        self.queue(dpid).enqueue(Reply { xid, message })
    }

    pub fn take_reply(&self, dpid: u64, timeout: Duration) -> Option<Reply> {
        self.queue(dpid).take(timeout)
    }

    /// Forget a disconnected switch. A reconnect starts from a fresh counter.
    pub fn remove(&self, dpid: u64) -> Option<Arc<CommandQueue>> {
        lock(&self.queues).remove(&dpid)
    }

    pub fn contains(&self, dpid: u64) -> bool {
        lock(&self.queues).contains_key(&dpid)
    }
}
