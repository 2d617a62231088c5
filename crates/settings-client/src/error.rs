use std::fmt;

/// Everything that can go wrong talking to the settings daemon.
///
/// Variants split into two families: protocol outcomes reported by the
/// daemon itself (`ValueRejected`, `SettingRejected`, ...), and local
/// failures that never touch the wire (`DuplicateSetting`, `UnknownCodec`,
/// `InvalidArgument`).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("value rejected by notify callback for {section}/{name}")]
    ValueRejected { section: String, name: String },

    #[error("no such setting {section}/{name}")]
    SettingRejected { section: String, name: String },

    #[error("parse failed for {section}/{name}: {detail}")]
    ParseFailed { section: String, name: String, detail: String },

    #[error("setting {section}/{name} is read-only")]
    ReadOnly { section: String, name: String },

    #[error("modifying {section}/{name} is temporarily disabled")]
    ModifyDisabled { section: String, name: String },

    #[error("daemon reported a service failure for {section}/{name}")]
    ServiceFailed { section: String, name: String },

    #[error("timed out waiting for a response to {section}/{name}")]
    Timeout { section: String, name: String },

    #[error("bus transport error: {0}")]
    Bus(String),

    #[error("duplicate setting {section}/{name}")]
    DuplicateSetting { section: String, name: String },

    #[error("no codec registered for type id {0}")]
    UnknownCodec(u32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Error::ReadOnly { .. })
    }

    pub fn bus(detail: impl fmt::Display) -> Self {
        Error::Bus(detail.to_string())
    }

    pub fn invalid_argument(detail: impl fmt::Display) -> Self {
        Error::InvalidArgument(detail.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
