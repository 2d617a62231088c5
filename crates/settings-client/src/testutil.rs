//! In-process fake bus used only by this crate's own tests. Loops
//! `send_from` calls back into registered callbacks on demand via
//! [`FakeBus::deliver`], so protocol-engine tests can script a daemon's
//! replies without any real transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bus::{Bus, Callback, LogLevel, MessageKind};

#[derive(Default)]
pub struct FakeBus {
    callbacks: Mutex<HashMap<MessageKind, Callback>>,
    sent: Mutex<Vec<(MessageKind, Vec<u8>, u16)>>,
}

impl FakeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeBus::default())
    }

    /// Everything sent since the last `drain_sent`.
    pub fn drain_sent(&self) -> Vec<(MessageKind, Vec<u8>, u16)> {
        std::mem::take(&mut self.sent.lock().expect("fake bus lock poisoned"))
    }

    /// Simulate an inbound frame, invoking whatever callback is currently
    /// subscribed to `kind` (a no-op if nothing is subscribed).
    pub fn deliver(&self, kind: MessageKind, sender_id: u16, payload: &[u8]) {
        let callback = self.callbacks.lock().expect("fake bus lock poisoned").get(&kind).cloned();
        if let Some(callback) = callback {
            callback(sender_id, payload);
        }
    }
}

impl Bus for FakeBus {
    fn send_from(&self, kind: MessageKind, payload: &[u8], sender_id: u16) -> std::io::Result<()> {
        self.sent.lock().expect("fake bus lock poisoned").push((kind, payload.to_vec(), sender_id));
        Ok(())
    }

    fn register_cb(&self, kind: MessageKind, callback: Callback) {
        self.callbacks.lock().expect("fake bus lock poisoned").insert(kind, callback);
    }

    fn unregister_cb(&self, kind: MessageKind) {
        self.callbacks.lock().expect("fake bus lock poisoned").remove(&kind);
    }

    fn log(&self, _level: LogLevel, _message: &str) {
        // swallow diagnostics in tests; nothing asserts on log output here
    }
}
