//! Byte-stream transport traits
//!
//! The transport is whatever socket the board offers (a W5500 hardware
//! socket, an smoltcp TCP socket, a modem's AT socket...). It is polled, never
//! awaited: every method returns immediately.
//!
//! Polling can be expensive on SPI-attached network chips, so callers keep
//! `available()` and `connected()` calls to a minimum.

use core::fmt;
use core::net::IpAddr;

use embedded_io::ErrorType;

/// Remote endpoint for [`Transport::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host<'a> {
    /// DNS name, resolved by the transport
    Name(&'a str),
    /// Raw address; no hostname is available for SNI or certificate checks
    Ip(IpAddr),
}

impl<'a> Host<'a> {
    /// Hostname, if the endpoint was given by name
    pub fn name(&self) -> Option<&'a str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Ip(_) => None,
        }
    }
}

impl fmt::Display for Host<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// Non-blocking duplex byte stream
///
/// `write` and `read` returning `Ok(0)` for a non-empty buffer is treated
/// the same as an error: the socket is gone.
pub trait Transport: ErrorType {
    /// Open a connection to `host:port`
    fn connect(&mut self, host: Host<'_>, port: u16) -> Result<(), Self::Error>;

    /// Queue bytes for sending, returning how many were accepted
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;

    /// Copy up to `buf.len()` received bytes into `buf`
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Number of received bytes that can be read without blocking
    fn available(&mut self) -> Result<usize, Self::Error>;

    /// Push queued bytes onto the wire
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Close the socket; safe to call on a closed socket
    fn stop(&mut self);

    /// True while the socket is open at the transport level
    fn connected(&mut self) -> bool;
}
