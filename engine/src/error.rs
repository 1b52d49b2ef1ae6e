//! Error types for the engine.
//!
//! A small, closed error surface: only the two fatal startup errors ever
//! unwind out of the public API. Everything else is produced internally,
//! converted to an `Event`, and swallowed by the subsystem that hit it.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All error conditions the engine can encounter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The named network interface does not exist or has no link layer.
    InterfaceUnavailable(String),
    /// Opening a raw datalink channel on the interface was denied by the OS.
    PermissionDenied(String),
    /// Buffer too short to contain a fixed frame header, or a declared
    /// length ran past the end of the buffer.
    MalformedFrame,
    /// Frame decoded structurally but its CRC did not match.
    CrcMismatch,
    /// A bounded queue was full and the caller's data was not reliable
    /// enough to justify blocking for space.
    QueueFull,
    /// A reliable frame exhausted its retransmit budget without an ACK.
    DeliveryFailed,
    /// A file transfer was abandoned (timeout or unrecoverable fragment loss).
    TransferFailed,
    /// A frame carried a kind tag this build does not recognize.
    UnknownKind(u8),
    /// `LinkEndpoint::recv` returned with nothing to read; not a real
    /// failure, just a chance for the caller to check the shutdown flag.
    Timeout,
}

impl Error {
    /// Short, stable, machine-writable description of the error kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Error::InterfaceUnavailable(_) => "interface unavailable",
            Error::PermissionDenied(_) => "permission denied",
            Error::MalformedFrame => "malformed frame",
            Error::CrcMismatch => "crc mismatch",
            Error::QueueFull => "queue full",
            Error::DeliveryFailed => "delivery failed",
            Error::TransferFailed => "transfer failed",
            Error::UnknownKind(_) => "unknown frame kind",
            Error::Timeout => "receive timed out",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InterfaceUnavailable(name) => {
                write!(f, "{}: {}", self.as_str(), name)
            }
            Error::PermissionDenied(name) => {
                write!(f, "{}: {}", self.as_str(), name)
            }
            Error::UnknownKind(kind) => write!(f, "{}: 0x{:02x}", self.as_str(), kind),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

impl std::error::Error for Error {}
