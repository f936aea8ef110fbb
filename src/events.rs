//! Event sink (C8): out-bound notifications to whatever's driving the scan
//! (a CLI, a UI layer, a test harness). There's no teacher precedent for
//! this component — liclac-cardinal's CLI prints directly rather than
//! publishing events — so this is modelled the way the teacher structures
//! its other tagged-sum wire/response types ([`crate::apdu::Status`]),
//! generalised into an observer with panic-isolated dispatch the way
//! [`crate::store::ProfileStore`] isolates its listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::session::SessionRecord;
use crate::transport::ApduLogEntry;

#[derive(Debug, Clone)]
pub enum Event {
    ReadingStarted,
    ReadingStopped,
    CardDetected { uid: Option<String> },
    Progress { step_name: String, index: usize, total: usize },
    ApduExchanged(ApduLogEntry),
    CardRead(Box<SessionRecord>),
    Error(String),
}

pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Fan-out to a set of listeners, isolating a panicking listener so it
/// can't take the scan down with it.
#[derive(Default, Clone)]
pub struct EventBus {
    listeners: Arc<Mutex<Vec<Arc<dyn EventSink>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventSink>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn emit(&self, event: Event) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
            if result.is_err() {
                warn!("event listener panicked; isolated, scan continues");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);
    impl EventSink for Counter {
        fn on_event(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;
    impl EventSink for Panicker {
        fn on_event(&self, _event: &Event) {
            panic!("boom");
        }
    }

    #[test]
    fn emits_to_all_listeners() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(Counter(count.clone())));
        bus.subscribe(Arc::new(Counter(count.clone())));
        bus.emit(Event::ReadingStarted);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(Panicker));
        bus.subscribe(Arc::new(Counter(count.clone())));
        bus.emit(Event::ReadingStopped);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
