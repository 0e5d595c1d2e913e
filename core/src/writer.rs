//! Write batching
//!
//! Plaintext is copied straight into the engine's send window and only
//! handed over (acked) when the window is full or the caller flushes. Small
//! writes therefore end up in one record instead of one record each.

use embedded_hal::delay::DelayNs;
use hal_abstractions::memory::HeadroomProbe;
use hal_abstractions::net::Transport;
use hal_abstractions::time::Clock;
use hal_abstractions::tls::{Engine, EngineState};

use crate::client::SslClient;
use crate::error::{Error, WriteError};

/// Bytes copied into the engine's send window but not yet acked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCursor {
    index: usize,
}

impl WriteCursor {
    pub const fn new() -> Self {
        Self { index: 0 }
    }

    pub fn pending(&self) -> usize {
        self.index
    }

    pub fn advance(&mut self, n: usize) {
        self.index += n;
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

impl<T, E, C, D, H, const SESSIONS: usize> SslClient<T, E, C, D, H, SESSIONS>
where
    T: Transport,
    E: Engine,
    C: Clock,
    D: DelayNs,
    H: HeadroomProbe,
{
    /// Buffer `data` for sending
    ///
    /// Nothing reaches the network until the engine's window fills up or
    /// [`flush`](Self::flush) is called. Returns `data.len()` on success.
    /// On failure the number of bytes already buffered is unspecified; the
    /// reason is kept in [`write_error`](Self::write_error).
    pub fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.lifecycle.soft_connected(self.engine.state())?;
        let mut copied = 0;
        while copied < data.len() {
            let start = self.cursor.pending();
            let state = self.engine.state();
            let window = self.engine.sendapp_buf();
            let capacity = window.len();
            if capacity > start {
                let n = (capacity - start).min(data.len() - copied);
                window[start..start + n].copy_from_slice(&data[copied..copied + n]);
                self.cursor.advance(n);
                copied += n;
                if self.cursor.pending() < capacity {
                    continue;
                }
            } else if capacity < start {
                error!("{} bytes buffered but the engine window is {}", start, capacity);
                self.fail(WriteError::InternalError);
                return Err(Error::Write(WriteError::InternalError));
            } else if capacity == 0 && state.can_send_app() {
                error!("Engine reported SENDAPP with an empty buffer");
                self.fail(WriteError::EngineWriteError);
                return Err(Error::Write(WriteError::EngineWriteError));
            }

            // Window full, or the engine is not accepting data yet.
            let pending = self.cursor.pending();
            if pending > 0 {
                self.engine.sendapp_ack(pending);
                self.cursor.reset();
                self.stats.app_handoffs = self.stats.app_handoffs.saturating_add(1);
            }
            self.drive(EngineState::SEND_APP).inspect_err(|err| {
                error!("Failed while waiting for the engine to accept data: {}", err);
            })?;
        }
        Ok(data.len())
    }

    /// Send everything buffered and wait until the engine has application
    /// data for us
    ///
    /// Returns immediately if nothing is buffered. This suits
    /// request/response protocols; the wait is bounded by the timeout.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.lifecycle.may_pump()?;
        if self.cursor.pending() == 0 {
            return Ok(());
        }
        self.drive(EngineState::RECV_APP).inspect_err(|err| {
            error!("Could not flush write buffer: {}", err);
        })
    }

    /// Bytes buffered but not yet handed to the engine
    pub fn pending_write_len(&self) -> usize {
        self.cursor.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::connected_client;

    #[test]
    fn test_small_writes_are_batched() {
        let (mut client, _time) = connected_client::<1>();
        assert_eq!(client.write(b"GET / ").unwrap(), 6);
        assert_eq!(client.write(b"HTTP/1.1\r\n").unwrap(), 10);

        assert_eq!(client.pending_write_len(), 16);
        assert!(client.engine().app_acks.is_empty());
        assert!(client.transport().written.is_empty());
    }

    #[test]
    fn test_flush_sends_one_record() {
        let (mut client, _time) = connected_client::<1>();
        client.write(b"ping ").unwrap();
        client.write(b"ping").unwrap();
        client.transport_mut().push_incoming(b"pong");

        client.flush().unwrap();

        assert_eq!(client.engine().app_acks, [9]);
        assert_eq!(client.transport().written, b"ping ping");
        assert_eq!(client.pending_write_len(), 0);
        assert_eq!(client.engine().unread(), b"pong");
    }

    #[test]
    fn test_full_window_is_handed_over() {
        let (mut client, _time) = connected_client::<1>();
        client.engine_mut().app_capacity = 8;
        let data = [0x5a; 20];

        assert_eq!(client.write(&data).unwrap(), 20);

        assert_eq!(client.engine().app_acks, [8, 8]);
        assert_eq!(client.pending_write_len(), 4);
        assert_eq!(client.transport().written, [0x5a; 16]);
        assert_eq!(client.engine().violations, 0);
    }

    #[test]
    fn test_available_hands_over_pending_data() {
        let (mut client, _time) = connected_client::<1>();
        client.write(b"hello").unwrap();
        assert_eq!(client.available().unwrap(), 0);

        assert_eq!(client.engine().plaintext_sent, b"hello");
        assert_eq!(client.pending_write_len(), 0);
    }

    #[test]
    fn test_write_discards_unread_on_shared_buffer() {
        let (mut client, _time) = connected_client::<1>();
        client.engine_mut().shared_buffer = true;
        client.engine_mut().deliver(b"unread");

        assert_eq!(client.write(b"abc").unwrap(), 3);
        assert_eq!(client.stats().app_data_discards, 1);
        assert_eq!(client.pending_write_len(), 3);
    }

    #[test]
    fn test_write_refused_after_error() {
        let (mut client, _time) = connected_client::<1>();
        client.lifecycle.fail(WriteError::InternalError);
        assert_eq!(client.write(b"x"), Err(Error::Write(WriteError::InternalError)));
        assert!(client.engine().app_acks.is_empty());
    }

    #[test]
    fn test_write_timeout_reports_engine_error() {
        let (mut client, _time) = connected_client::<1>();
        client.set_timeout(200);
        // Engine stuck waiting for records that never arrive.
        client.engine_mut().forced_state = Some(EngineState::RECV_REC);

        assert_eq!(client.write(b"12345678"), Err(Error::Timeout));
        assert_eq!(client.write_error(), WriteError::EngineWriteError);
        assert!(!client.transport().is_connected);
    }

    #[test]
    fn test_empty_send_window_fails_instead_of_spinning() {
        let (mut client, _time) = connected_client::<1>();
        client.set_timeout(1_000);
        client.engine_mut().app_capacity = 0;

        assert_eq!(
            client.write(b"x"),
            Err(Error::Write(WriteError::EngineWriteError))
        );
        assert_eq!(client.write_error(), WriteError::EngineWriteError);
        assert!(!client.transport().is_connected);
    }

    #[test]
    fn test_shrunken_window_is_an_internal_error() {
        let (mut client, _time) = connected_client::<1>();
        client.write(b"0123456789").unwrap();
        client.engine_mut().app_capacity = 4;

        assert_eq!(
            client.write(b"more"),
            Err(Error::Write(WriteError::InternalError))
        );
        assert_eq!(client.pending_write_len(), 0);
        assert_eq!(client.engine().violations, 0);
    }

    #[test]
    fn test_flush_refused_when_not_connected() {
        let (mut client, _time) = connected_client::<1>();
        client.stop();
        assert_eq!(client.flush(), Err(Error::NotConnected));
        assert!(client.write_error().is_ok());
    }

    #[test]
    fn test_empty_write() {
        let (mut client, _time) = connected_client::<1>();
        assert_eq!(client.write(&[]).unwrap(), 0);
        assert_eq!(client.pending_write_len(), 0);
    }
}
