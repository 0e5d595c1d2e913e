//! Client error types
//!
//! Two layers: [`WriteError`] is the sticky per-connection code that stays
//! set until the next connect, and [`Error`] is what an individual call
//! returns. A failing call always leaves the reason in the sticky code, so
//! callers that only get a sentinel (e.g. through `embedded-io`) can still
//! ask why.

use embedded_io::ErrorKind;

/// Sticky connection error
///
/// Discriminants match the codes reported by earlier firmware releases, so
/// logs and telemetry stay comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum WriteError {
    /// No error
    #[default]
    Ok = 0,
    /// The transport failed to open a socket
    TransportConnectFail = 2,
    /// The engine failed to start or complete the handshake
    EngineConnectFail = 3,
    /// The transport failed to move bytes, or the peer dropped the socket
    TransportWriteError = 4,
    /// The engine misbehaved or the connection timed out
    EngineWriteError = 5,
    /// Pump or accumulator invariant violated (a bug, not the network)
    InternalError = 6,
    /// Not enough scratch memory to process a record
    OutOfMemory = 7,
}

impl WriteError {
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Numeric code
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl core::fmt::Display for WriteError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::TransportConnectFail => write!(f, "Transport connect failed"),
            Self::EngineConnectFail => write!(f, "TLS handshake failed"),
            Self::TransportWriteError => write!(f, "Transport write error"),
            Self::EngineWriteError => write!(f, "TLS engine error"),
            Self::InternalError => write!(f, "Internal error"),
            Self::OutOfMemory => write!(f, "Out of memory"),
        }
    }
}

impl core::error::Error for WriteError {}

/// Error returned by client operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Operation failed, or was refused, because of this sticky code
    Write(WriteError),
    /// No TLS session is established
    NotConnected,
    /// The engine closed the session
    EngineClosed,
    /// The transport already holds a connection
    AlreadyConnected,
    /// The engine did not reach the requested state in time
    Timeout,
    /// Memory is corrupted; the application should reset the device
    Abort,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Write(code) => write!(f, "{code}"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::EngineClosed => write!(f, "TLS connection closed"),
            Self::AlreadyConnected => write!(f, "Already connected"),
            Self::Timeout => write!(f, "Operation timed out"),
            Self::Abort => write!(f, "Memory corrupted, abort"),
        }
    }
}

impl core::error::Error for Error {}

impl From<WriteError> for Error {
    fn from(code: WriteError) -> Self {
        Self::Write(code)
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::TimedOut,
            Self::NotConnected | Self::EngineClosed => ErrorKind::NotConnected,
            Self::AlreadyConnected => ErrorKind::AlreadyExists,
            Self::Abort | Self::Write(WriteError::OutOfMemory) => ErrorKind::OutOfMemory,
            Self::Write(WriteError::TransportConnectFail) => ErrorKind::ConnectionRefused,
            Self::Write(WriteError::TransportWriteError) => ErrorKind::BrokenPipe,
            Self::Write(_) => ErrorKind::Other,
        }
    }
}
