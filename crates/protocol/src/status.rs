//! Response status codes.

use std::fmt;

/// Status field of a response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    NoError,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumericValue,
    WrongVbucket,
    AuthError,
    AuthContinue,
    UnknownCommand,
    OutOfMemory,
    NotSupported,
    InternalError,
    Busy,
    TemporaryFailure,
    /// A code this client does not know, preserved as received.
    Unknown(u16),
}

impl Status {
    pub fn from_u16(code: u16) -> Self {
        match code {
            0x0000 => Status::NoError,
            0x0001 => Status::KeyNotFound,
            0x0002 => Status::KeyExists,
            0x0003 => Status::ValueTooLarge,
            0x0004 => Status::InvalidArguments,
            0x0005 => Status::ItemNotStored,
            0x0006 => Status::NonNumericValue,
            0x0007 => Status::WrongVbucket,
            0x0020 => Status::AuthError,
            0x0021 => Status::AuthContinue,
            0x0081 => Status::UnknownCommand,
            0x0082 => Status::OutOfMemory,
            0x0083 => Status::NotSupported,
            0x0084 => Status::InternalError,
            0x0085 => Status::Busy,
            0x0086 => Status::TemporaryFailure,
            other => Status::Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Status::NoError => 0x0000,
            Status::KeyNotFound => 0x0001,
            Status::KeyExists => 0x0002,
            Status::ValueTooLarge => 0x0003,
            Status::InvalidArguments => 0x0004,
            Status::ItemNotStored => 0x0005,
            Status::NonNumericValue => 0x0006,
            Status::WrongVbucket => 0x0007,
            Status::AuthError => 0x0020,
            Status::AuthContinue => 0x0021,
            Status::UnknownCommand => 0x0081,
            Status::OutOfMemory => 0x0082,
            Status::NotSupported => 0x0083,
            Status::InternalError => 0x0084,
            Status::Busy => 0x0085,
            Status::TemporaryFailure => 0x0086,
            Status::Unknown(code) => code,
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::NoError
    }

    pub fn description(self) -> &'static str {
        match self {
            Status::NoError => "no error",
            Status::KeyNotFound => "key not found",
            Status::KeyExists => "key exists",
            Status::ValueTooLarge => "value too large",
            Status::InvalidArguments => "invalid arguments",
            Status::ItemNotStored => "item not stored",
            Status::NonNumericValue => "incr/decr on non-numeric value",
            Status::WrongVbucket => "vbucket belongs to another server",
            Status::AuthError => "authentication error",
            Status::AuthContinue => "authentication continue",
            Status::UnknownCommand => "unknown command",
            Status::OutOfMemory => "out of memory",
            Status::NotSupported => "not supported",
            Status::InternalError => "internal error",
            Status::Busy => "busy",
            Status::TemporaryFailure => "temporary failure",
            Status::Unknown(_) => "unknown status",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04x})", self.description(), self.code())
    }
}
