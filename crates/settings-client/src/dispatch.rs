//! Bus-callback dispatcher: exactly one bus-side registration per message
//! kind, ref-counted so several API calls can depend on the same handler
//! without fighting over install/uninstall.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bus::{Bus, Callback, MessageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Installed,
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Removed,
    NotPresent,
}

/// Owns the fixed set of protocol handlers (one per [`MessageKind`]) and
/// the bus-side registration refcounts. The handlers themselves are wired
/// up once at construction; callers only ever ask to subscribe/unsubscribe
/// by kind.
pub struct Dispatcher {
    bus: Arc<dyn Bus>,
    handlers: HashMap<MessageKind, Callback>,
    refcounts: Mutex<HashMap<MessageKind, usize>>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn Bus>, handlers: HashMap<MessageKind, Callback>) -> Self {
        Dispatcher { bus, handlers, refcounts: Mutex::new(HashMap::new()) }
    }

    /// Ensure the handler for `kind` is installed on the bus. Idempotent:
    /// the first caller installs it, later callers just bump the refcount.
    pub fn subscribe(&self, kind: MessageKind) -> SubscribeOutcome {
        let mut refcounts = self.refcounts.lock().expect("dispatcher lock poisoned");
        let count = refcounts.entry(kind).or_insert(0);
        if *count == 0 {
            let callback = self
                .handlers
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| panic!("no protocol handler wired for {kind:?}"));
            self.bus.register_cb(kind, callback);
            *count = 1;
            SubscribeOutcome::Installed
        } else {
            *count += 1;
            SubscribeOutcome::AlreadyRegistered
        }
    }

    /// Drop one reference to `kind`'s subscription, uninstalling it from
    /// the bus once the last reference is gone.
    pub fn unsubscribe(&self, kind: MessageKind) -> UnsubscribeOutcome {
        let mut refcounts = self.refcounts.lock().expect("dispatcher lock poisoned");
        match refcounts.get_mut(&kind) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    refcounts.remove(&kind);
                    self.bus.unregister_cb(kind);
                }
                UnsubscribeOutcome::Removed
            }
            _ => UnsubscribeOutcome::NotPresent,
        }
    }

    #[cfg(test)]
    pub fn active_kinds(&self) -> Vec<MessageKind> {
        self.refcounts.lock().expect("dispatcher lock poisoned").keys().copied().collect()
    }
}
