//! Status codes carried on the wire, independent of any particular
//! exchange so both the write-response and registration-response handlers
//! (and the store's own `update_value`) share one vocabulary.

use crate::error::Error;

/// Result of a write attempt, whether local (`update_value`) or reported
/// by the daemon in a write-response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriteStatus {
    Ok = 0,
    ValueRejected = 1,
    SettingRejected = 2,
    ParseFailed = 3,
    ReadOnly = 4,
    ModifyDisabled = 5,
    ServiceFailed = 6,
    Timeout = 7,
}

impl WriteStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => WriteStatus::Ok,
            1 => WriteStatus::ValueRejected,
            2 => WriteStatus::SettingRejected,
            3 => WriteStatus::ParseFailed,
            4 => WriteStatus::ReadOnly,
            5 => WriteStatus::ModifyDisabled,
            6 => WriteStatus::ServiceFailed,
            7 => WriteStatus::Timeout,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        matches!(self, WriteStatus::Ok)
    }

    /// Convert a non-`Ok` status into the matching `Error`, given the
    /// setting it applies to. Returns `None` for `Ok`.
    pub fn into_error(self, section: &str, name: &str) -> Option<Error> {
        let (section, name) = (section.to_string(), name.to_string());
        Some(match self {
            WriteStatus::Ok => return None,
            WriteStatus::ValueRejected => Error::ValueRejected { section, name },
            WriteStatus::SettingRejected => Error::SettingRejected { section, name },
            WriteStatus::ParseFailed => Error::ParseFailed { section, name, detail: "daemon rejected value".into() },
            WriteStatus::ReadOnly => Error::ReadOnly { section, name },
            WriteStatus::ModifyDisabled => Error::ModifyDisabled { section, name },
            WriteStatus::ServiceFailed => Error::ServiceFailed { section, name },
            WriteStatus::Timeout => Error::Timeout { section, name },
        })
    }
}

/// Result of a registration attempt, reported by the daemon in a
/// register-response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterStatus {
    Ok = 0,
    OkPerm = 1,
    Registered = 2,
    ParseFailed = 3,
}

impl RegisterStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => RegisterStatus::Ok,
            1 => RegisterStatus::OkPerm,
            2 => RegisterStatus::Registered,
            3 => RegisterStatus::ParseFailed,
            _ => return None,
        })
    }

    pub fn is_parse_failed(self) -> bool {
        matches!(self, RegisterStatus::ParseFailed)
    }
}
