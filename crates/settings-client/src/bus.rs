//! The host-provided transport. `Bus` is the only seam between this crate
//! and the outside world: framing, the concrete socket or shared-memory
//! channel, and thread delivery all live on the other side of it.

use std::sync::Arc;

/// Wire message kinds the dispatcher and protocol engine exchange with the
/// daemon. Values are opaque to this crate; the host assigns the concrete
/// on-wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Register,
    RegisterResp,
    Write,
    WriteResp,
    ReadReq,
    ReadResp,
    ReadByIndexReq,
    ReadByIndexResp,
    ReadByIndexDone,
}

impl MessageKind {
    /// All kinds the dispatcher may need to subscribe to, for iteration in
    /// tests and diagnostics.
    pub const ALL: [MessageKind; 9] = [
        MessageKind::Register,
        MessageKind::RegisterResp,
        MessageKind::Write,
        MessageKind::WriteResp,
        MessageKind::ReadReq,
        MessageKind::ReadResp,
        MessageKind::ReadByIndexReq,
        MessageKind::ReadByIndexResp,
        MessageKind::ReadByIndexDone,
    ];
}

/// A bus callback: invoked with the sender id and payload of every inbound
/// frame of the subscribed kind.
pub type Callback = Arc<dyn Fn(u16, &[u8]) + Send + Sync>;

/// Severity for [`Bus::log`], mirroring `tracing`'s own levels so a host
/// can forward straight into its own logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Capability record the host implements to connect this crate to a real
/// message bus. Synchronous and object-safe: the host is responsible for
/// delivering bytes and invoking callbacks promptly on its own thread(s);
/// this crate never polls it.
///
/// `send`/`wait`/`lock` hooks from earlier designs are folded away here:
/// every outbound call already carries its sender id, and waiting/locking
/// are handled internally via a `tokio::sync::Notify` per request
/// (see `request::RequestSlot`) rather than delegated to the host.
pub trait Bus: Send + Sync {
    /// Send `payload` as a frame of kind `kind`, claiming `sender_id` as
    /// its origin.
    fn send_from(&self, kind: MessageKind, payload: &[u8], sender_id: u16) -> std::io::Result<()>;

    /// Subscribe `callback` to frames of kind `kind`. Called at most once
    /// per kind while at least one feature needs it (see `dispatch`).
    fn register_cb(&self, kind: MessageKind, callback: Callback);

    /// Undo a prior `register_cb` for `kind`.
    fn unregister_cb(&self, kind: MessageKind);

    /// Diagnostic sink. Default forwards into `tracing`, which is enough
    /// for hosts that don't need to capture logs themselves.
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}
