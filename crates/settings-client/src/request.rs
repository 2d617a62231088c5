//! The request table: correlates outbound requests with inbound
//! responses.
//!
//! Every in-flight request owns a [`RequestSlot`], appended to the
//! context's table for the duration of `protocol::perform` and removed
//! before it returns. Both scheduling modes described in the protocol
//! design collapse onto the same mechanism here: a slot always carries its
//! own `tokio::sync::Notify`, so "single-threaded cooperative" is just the
//! case where a caller never holds more than one slot live at a time.

use std::sync::Mutex;

use tokio::sync::Notify;

use crate::bus::MessageKind;
use crate::status::WriteStatus;

/// Response fields captured by an inbound handler, read back by `perform`
/// once the slot is signaled. Lives on the descriptor, not the context:
/// the earliest version of this protocol kept these fields on a shared
/// context struct and lost responses to races between concurrent callers.
#[derive(Debug, Default, Clone)]
pub struct ResponseFields {
    pub section: Option<String>,
    pub name: Option<String>,
    pub value: Option<String>,
    pub type_tag: Option<String>,
    pub value_valid: bool,
    pub index: Option<u16>,
}

#[derive(Debug)]
struct Inner {
    pending: bool,
    matched: bool,
    status: WriteStatus,
    response: ResponseFields,
    read_by_index_done: bool,
}

/// Caller-side state correlating one outbound message with its reply.
#[derive(Debug)]
pub struct RequestSlot {
    pub msg_id: MessageKind,
    pub compare_prefix: Vec<u8>,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl RequestSlot {
    pub fn new(msg_id: MessageKind, compare_prefix: Vec<u8>) -> Self {
        RequestSlot {
            msg_id,
            compare_prefix,
            inner: Mutex::new(Inner {
                pending: true,
                matched: false,
                status: WriteStatus::Timeout,
                response: ResponseFields::default(),
                read_by_index_done: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().expect("request slot lock poisoned").pending
    }

    pub fn status(&self) -> WriteStatus {
        self.inner.lock().expect("request slot lock poisoned").status
    }

    pub fn response(&self) -> ResponseFields {
        self.inner.lock().expect("request slot lock poisoned").response.clone()
    }

    pub fn read_by_index_done(&self) -> bool {
        self.inner.lock().expect("request slot lock poisoned").read_by_index_done
    }

    /// Whether this slot was resolved by a correlated response (as opposed
    /// to a read-by-index-done broadcast or a plain timeout).
    pub fn matched(&self) -> bool {
        self.inner.lock().expect("request slot lock poisoned").matched
    }

    /// Record response fields ahead of signaling; handlers call this before
    /// `RequestTable::signal`.
    pub fn set_response(&self, response: ResponseFields) {
        self.inner.lock().expect("request slot lock poisoned").response = response;
    }

    pub fn set_status(&self, status: WriteStatus) {
        self.inner.lock().expect("request slot lock poisoned").status = status;
    }

    fn mark_matched(&self) {
        let mut inner = self.inner.lock().expect("request slot lock poisoned");
        inner.matched = true;
        inner.pending = false;
    }

    fn mark_read_by_index_done(&self) {
        let mut inner = self.inner.lock().expect("request slot lock poisoned");
        inner.read_by_index_done = true;
        inner.pending = false;
    }

    /// Block until resolved (either matched against a response, or a
    /// read-by-index-done broadcast arrives) or `timeout` elapses. Returns
    /// `true` iff resolved; `perform` treats either outcome as "stop
    /// retrying".
    pub async fn wait(&self, timeout: std::time::Duration) -> bool {
        if !self.is_pending() {
            let inner = self.inner.lock().expect("request slot lock poisoned");
            return inner.matched || inner.read_by_index_done;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        let _ = tokio::time::timeout(timeout, notified.as_mut()).await;
        let inner = self.inner.lock().expect("request slot lock poisoned");
        inner.matched || inner.read_by_index_done
    }
}

/// Table of outstanding request descriptors, keyed implicitly by
/// `(msg_id, compare_prefix)` (matching is a linear scan, acceptable
/// since expected depth is small).
#[derive(Debug, Default)]
pub struct RequestTable {
    slots: Mutex<Vec<std::sync::Arc<RequestSlot>>>,
}

impl RequestTable {
    pub fn new() -> Self {
        RequestTable { slots: Mutex::new(Vec::new()) }
    }

    pub fn append(&self, slot: std::sync::Arc<RequestSlot>) {
        self.slots.lock().expect("request table lock poisoned").push(slot);
    }

    pub fn remove(&self, slot: &std::sync::Arc<RequestSlot>) {
        let mut slots = self.slots.lock().expect("request table lock poisoned");
        if let Some(idx) = slots.iter().position(|s| std::sync::Arc::ptr_eq(s, slot)) {
            slots.remove(idx);
        }
    }

    /// Find the first pending descriptor whose `compare_prefix` is a
    /// prefix of `incoming`, restricted to `msg_id`.
    pub fn check(&self, msg_id: MessageKind, incoming: &[u8]) -> Option<std::sync::Arc<RequestSlot>> {
        let slots = self.slots.lock().expect("request table lock poisoned");
        slots
            .iter()
            .find(|s| s.msg_id == msg_id && s.is_pending() && incoming.starts_with(&s.compare_prefix))
            .cloned()
    }

    /// Signal `slot`, waking its waiter. Returns an error (without waking)
    /// if `expected_msg_id` doesn't match the slot's recorded kind.
    pub fn signal(&self, slot: &std::sync::Arc<RequestSlot>, expected_msg_id: MessageKind) -> Result<(), String> {
        if slot.msg_id != expected_msg_id {
            return Err(format!(
                "response kind {expected_msg_id:?} does not match pending request kind {:?}",
                slot.msg_id
            ));
        }
        slot.mark_matched();
        slot.notify.notify_waiters();
        Ok(())
    }

    /// Release every outstanding read-by-index iterator; used by the
    /// read-by-index-done handler, which may unblock several concurrent
    /// callers with one broadcast.
    pub fn signal_all_read_by_index(&self) {
        let slots = self.slots.lock().expect("request table lock poisoned");
        for slot in slots.iter().filter(|s| s.msg_id == MessageKind::ReadByIndexReq) {
            slot.mark_read_by_index_done();
            slot.notify.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("request table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
