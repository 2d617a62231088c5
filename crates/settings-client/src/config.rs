//! Numeric constants governing wire framing and the retry loop. Exposed so
//! hosts and tests can depend on the same values this crate uses
//! internally, per the configuration contract.

use std::time::Duration;

/// Largest payload this crate will format or accept in an inbound `write`.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Significant digits used when formatting floating-point values.
pub const FLOAT_PRECISION: usize = crate::codec::FLOAT_PRECISION;

/// Well-known sender id of the settings daemon; frames claiming any other
/// sender are ignored by protocol handlers.
pub const DAEMON_SENDER_ID: u16 = 0x42;

/// Default per-attempt timeout for register and watch-initialization
/// exchanges.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default retry count for register and watch-initialization exchanges.
pub const DEFAULT_RETRIES: u32 = 5;
