//! `Context`: the client's handle onto the bus, the settings it owns or
//! watches, and the requests currently in flight.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::bus::Bus;
use crate::codec::Registry;
use crate::config;
use crate::dispatch::Dispatcher;
use crate::protocol;
use crate::request::RequestTable;
use crate::store::Store;

/// Builds a [`Context`], overriding defaults from [`config`] where a
/// deployment needs different patience (e.g. a slower embedded bus).
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    sender_id: u16,
    timeout: Duration,
    retries: u32,
}

impl ContextBuilder {
    pub fn new() -> Self {
        ContextBuilder { sender_id: 0, timeout: config::DEFAULT_TIMEOUT, retries: config::DEFAULT_RETRIES }
    }

    /// The 16-bit identifier this client presents on outbound frames.
    pub fn sender_id(mut self, sender_id: u16) -> Self {
        self.sender_id = sender_id;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn build(self, bus: Arc<dyn Bus>) -> Arc<Context> {
        Arc::new_cyclic(|weak: &Weak<Context>| {
            let handlers = protocol::build_handlers(weak.clone());
            Context {
                bus: bus.clone(),
                sender_id: self.sender_id,
                timeout: self.timeout,
                retries: self.retries,
                registry: Mutex::new(Registry::with_builtins()),
                store: Mutex::new(Store::new()),
                requests: RequestTable::new(),
                dispatcher: Dispatcher::new(bus, handlers),
            }
        })
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds everything the protocol engine touches: the type registry, the
/// setting store, the request table, the dispatcher, and the bus itself.
/// Always lives behind an `Arc` (see [`Context::new`]) since bus callbacks
/// hold a weak reference back into it.
pub struct Context {
    pub(crate) bus: Arc<dyn Bus>,
    pub(crate) sender_id: u16,
    pub(crate) timeout: Duration,
    pub(crate) retries: u32,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) store: Mutex<Store>,
    pub(crate) requests: RequestTable,
    pub(crate) dispatcher: Dispatcher,
}

impl Context {
    /// Create a context over `bus` with default timeout/retry settings and
    /// sender id `0`. Use [`ContextBuilder`] to customize.
    pub fn new(bus: Arc<dyn Bus>) -> Arc<Context> {
        ContextBuilder::new().build(bus)
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Register a user-defined enum codec, returning its `type_id`.
    pub fn register_enum(&self, names: Vec<String>) -> usize {
        self.registry.lock().expect("registry lock poisoned").register_enum(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeBus;

    #[test]
    fn builder_defaults_match_config() {
        let bus = FakeBus::new();
        let ctx = ContextBuilder::new().build(bus);
        assert_eq!(ctx.sender_id, 0);
        assert_eq!(ctx.timeout, config::DEFAULT_TIMEOUT);
        assert_eq!(ctx.retries, config::DEFAULT_RETRIES);
    }

    #[test]
    fn builder_overrides_are_applied() {
        let bus = FakeBus::new();
        let ctx = ContextBuilder::new().sender_id(7).retries(1).build(bus);
        assert_eq!(ctx.sender_id, 7);
        assert_eq!(ctx.retries, 1);
    }
}
