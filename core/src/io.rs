//! `embedded-io` adapters
//!
//! Lets the client stand in for a plain socket in anything written against
//! `embedded_io::{Read, Write}` (MQTT and HTTP clients, `write!` via
//! `embedded_io::Write::write_fmt`).
//!
//! Unlike the inherent [`SslClient::read`], `Read::read` blocks until data
//! arrives, as the trait requires, and reports a closed engine as EOF.

use embedded_hal::delay::DelayNs;
use embedded_io::{ErrorType, Read, ReadReady, Write};
use hal_abstractions::memory::HeadroomProbe;
use hal_abstractions::net::Transport;
use hal_abstractions::time::Clock;
use hal_abstractions::tls::{Engine, EngineState};

use crate::client::SslClient;
use crate::error::Error;

impl<T, E, C, D, H, const SESSIONS: usize> ErrorType for SslClient<T, E, C, D, H, SESSIONS> {
    type Error = Error;
}

impl<T, E, C, D, H, const SESSIONS: usize> Read for SslClient<T, E, C, D, H, SESSIONS>
where
    T: Transport,
    E: Engine,
    C: Clock,
    D: DelayNs,
    H: HeadroomProbe,
{
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.lifecycle.soft_connected(self.engine.state()) {
            Err(Error::EngineClosed) => return Ok(0),
            other => other?,
        }
        match self.drive(EngineState::RECV_APP) {
            Ok(()) => Ok(self.copy_unread(buf)),
            Err(Error::EngineClosed) => Ok(0),
            Err(err) => Err(err),
        }
    }
}

impl<T, E, C, D, H, const SESSIONS: usize> ReadReady for SslClient<T, E, C, D, H, SESSIONS>
where
    T: Transport,
    E: Engine,
    C: Clock,
    D: DelayNs,
    H: HeadroomProbe,
{
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        match self.available() {
            Ok(n) => Ok(n > 0),
            // EOF is ready: the next read returns 0 immediately.
            Err(Error::EngineClosed) => Ok(true),
            Err(err) => Err(err),
        }
    }
}

impl<T, E, C, D, H, const SESSIONS: usize> Write for SslClient<T, E, C, D, H, SESSIONS>
where
    T: Transport,
    E: Engine,
    C: Clock,
    D: DelayNs,
    H: HeadroomProbe,
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        SslClient::write(self, buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        SslClient::flush(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WriteError;
    use crate::testing::connected_client;

    #[test]
    fn test_blocking_read_waits_for_data() {
        let (mut client, _time) = connected_client::<1>();
        Write::write_all(&mut client, b"ping").unwrap();
        client.transport_mut().push_incoming(b"pong");

        let mut buf = [0u8; 8];
        let n = Read::read(&mut client, &mut buf).unwrap();

        assert_eq!(&buf[..n], b"pong");
        assert_eq!(client.transport().written, b"ping");
    }

    #[test]
    fn test_closed_engine_reads_as_eof() {
        let (mut client, _time) = connected_client::<1>();
        client.engine_mut().close();

        let mut buf = [0u8; 8];
        assert_eq!(Read::read(&mut client, &mut buf).unwrap(), 0);
        assert!(ReadReady::read_ready(&mut client).unwrap());
    }

    #[test]
    fn test_read_ready() {
        let (mut client, _time) = connected_client::<1>();
        assert!(!ReadReady::read_ready(&mut client).unwrap());
        client.engine_mut().deliver(b"x");
        assert!(ReadReady::read_ready(&mut client).unwrap());
    }

    #[test]
    fn test_errors_pass_through() {
        let (mut client, _time) = connected_client::<1>();
        client.lifecycle.fail(WriteError::OutOfMemory);

        let mut buf = [0u8; 8];
        assert_eq!(
            Read::read(&mut client, &mut buf),
            Err(Error::Write(WriteError::OutOfMemory))
        );
        assert_eq!(
            Write::write(&mut client, b"x"),
            Err(Error::Write(WriteError::OutOfMemory))
        );
    }
}
