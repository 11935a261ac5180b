//! Fan-out of switch lifecycle and link-discovery notifications.

use std::sync::{Arc, Mutex};

use log::error;

use crate::addr::Dpid;
use crate::command_queue::lock;

/// Interested in switches appearing and going away.
///
/// Callbacks run while the registry lock is held: a listener must not
/// subscribe or unsubscribe from inside a callback.
pub trait SwitchListener: Send + Sync {
    fn switch_added(&self, dpid: u64);
    fn switch_removed(&self, dpid: u64);
}

/// Events a switch connection can report.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SwitchEvent {
    Added,
    Removed,
    /// The switch became the active connection for its datapath id.
    Activated,
    PortChanged { port: u32 },
    Changed,
}

/// Subscribers compared by identity, so the same `Arc` can be removed later.
pub struct ListenerSet<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        ListenerSet { listeners: Mutex::new(vec![]) }
    }
}

fn same<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns false when `listener` was already subscribed.
    pub fn subscribe(&self, listener: Arc<L>) -> bool {
        let mut ls = lock(&self.listeners);
        if ls.iter().any(|l| same(l, &listener)) {
            return false;
        }
        ls.push(listener);
        true
    }

    pub fn unsubscribe(&self, listener: &Arc<L>) -> bool {
        let mut ls = lock(&self.listeners);
        let before = ls.len();
        ls.retain(|l| !same(l, listener));
        ls.len() != before
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `f` on each listener, in subscription order, under the lock.
    pub fn for_each<F: FnMut(&L)>(&self, mut f: F) {
        let ls = lock(&self.listeners);
        for l in ls.iter() {
            f(l);
        }
    }
}

/// The switch lifecycle registry. Switches are either present or absent;
/// partial-state events are reported as errors and not forwarded.
#[derive(Default)]
pub struct SwitchRegistry {
    listeners: ListenerSet<dyn SwitchListener>,
}

impl SwitchRegistry {
    pub fn new() -> SwitchRegistry {
        Default::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn SwitchListener>) -> bool {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, listener: &Arc<dyn SwitchListener>) -> bool {
        self.listeners.unsubscribe(listener)
    }

    pub fn notify_added(&self, dpid: u64) {
        self.listeners.for_each(|l| l.switch_added(dpid));
    }

    pub fn notify_removed(&self, dpid: u64) {
        self.listeners.for_each(|l| l.switch_removed(dpid));
    }

    /// Returns whether the event reached the listeners.
    pub fn dispatch(&self, dpid: u64, event: SwitchEvent) -> bool {
        match event {
            SwitchEvent::Added => self.notify_added(dpid),
            SwitchEvent::Removed => self.notify_removed(dpid),
            SwitchEvent::Activated => {
                error!("switch {} activated, the registry assumes all switches are already active", Dpid(dpid));
                return false;
            }
            SwitchEvent::PortChanged { port } => {
                error!("switch {}: port {} changed, port changes are not supported", Dpid(dpid), port);
                return false;
            }
            SwitchEvent::Changed => {
                error!("switch {} changed, partial switch states are not supported", Dpid(dpid));
                return false;
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// One link observed or lost by a discovery process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkUpdate {
    pub src: u64,
    pub src_port: u32,
    pub dst: u64,
    pub dst_port: u32,
    pub removed: bool,
}

pub trait LinkDiscoveryListener: Send + Sync {
    fn links_updated(&self, updates: &[LinkUpdate]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(bool, u64)>>,
    }

    impl SwitchListener for Recorder {
        fn switch_added(&self, dpid: u64) {
            lock(&self.events).push((true, dpid));
        }

        fn switch_removed(&self, dpid: u64) {
            lock(&self.events).push((false, dpid));
        }
    }

    #[test]
    fn test_added_and_removed_reach_subscribers() {
        let registry = SwitchRegistry::new();
        let rec = Arc::new(Recorder::default());
        let as_listener: Arc<dyn SwitchListener> = rec.clone();
        assert!(registry.subscribe(as_listener.clone()));
        assert!(!registry.subscribe(as_listener.clone()));
        registry.notify_added(1);
        registry.dispatch(2, SwitchEvent::Removed);
        assert_eq!(*lock(&rec.events), vec![(true, 1), (false, 2)]);

        assert!(registry.unsubscribe(&as_listener));
        assert!(!registry.unsubscribe(&as_listener));
        registry.notify_added(3);
        assert_eq!(lock(&rec.events).len(), 2);
    }

    #[test]
    fn test_partial_events_are_not_forwarded() {
        let registry = SwitchRegistry::new();
        let rec = Arc::new(Recorder::default());
        registry.subscribe(rec.clone());
        assert!(!registry.dispatch(1, SwitchEvent::PortChanged { port: 3 }));
        assert!(!registry.dispatch(1, SwitchEvent::Changed));
        assert!(!registry.dispatch(1, SwitchEvent::Activated));
        assert!(lock(&rec.events).is_empty());
        assert!(registry.dispatch(1, SwitchEvent::Added));
        assert_eq!(*lock(&rec.events), vec![(true, 1)]);
    }

    #[test]
    fn test_distinct_listeners_both_fire() {
        let registry = SwitchRegistry::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        registry.subscribe(a.clone());
        registry.subscribe(b.clone());
        assert_eq!(registry.len(), 2);
        registry.notify_added(9);
        assert_eq!(lock(&a.events).len(), 1);
        assert_eq!(lock(&b.events).len(), 1);
    }
}
