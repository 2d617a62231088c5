//! Client library for a settings daemon reachable over a host-provided
//! binary message bus.
//!
//! A settings daemon holds the authoritative table of named settings
//! (`section`/`name` pairs) for a system; individual processes register the
//! settings they own, read or write settings owned elsewhere, and watch
//! settings for changes, all by exchanging small framed messages over a
//! bus the host supplies (a Unix socket, shared memory, an embedded
//! transport, this crate neither knows nor cares). [`Bus`] is the seam:
//! implement it once per transport, then build a [`Context`] over it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use settings_client::{Bus, Context};
//! use settings_client::codec::{Value, IntWidth, TYPE_INT};
//!
//! let bus: Arc<dyn Bus> = Arc::new(MyBus::connect()?);
//! let ctx = Context::new(bus);
//!
//! ctx.register_owned("imu", "rate", Value::Int(100, IntWidth::Four), TYPE_INT, None).await?;
//! ```
//!
//! # Concurrency
//!
//! A [`Context`] is safe to share across tasks: every public operation
//! takes `&self`, internal state is protected by short-held
//! [`std::sync::Mutex`] guards, and in-flight requests each get their own
//! wait point. There's no longer a distinction between "single-threaded"
//! and "multi-threaded" client code: every caller behaves as if it held a
//! private event, because it does.

mod api;
pub mod bus;
pub mod codec;
pub mod config;
pub mod context;
mod dispatch;
mod error;
mod protocol;
mod request;
mod status;
mod store;
mod wire;

#[cfg(any(test, feature = "integration"))]
pub mod testutil;

pub use api::ReadByIndexOutcome;
pub use bus::{Bus, Callback, LogLevel, MessageKind};
pub use codec::{Codec, CodecError, FloatWidth, IntWidth, Registry, Value, TYPE_BOOL, TYPE_FLOAT, TYPE_INT, TYPE_STRING};
pub use context::{Context, ContextBuilder};
pub use error::{Error, Result};
pub use status::{RegisterStatus, WriteStatus};
pub use store::{Mode, Notify};
