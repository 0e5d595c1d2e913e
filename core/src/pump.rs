//! Engine pump
//!
//! Moves ciphertext between the engine's record buffers and the transport,
//! and hands buffered plaintext to the engine. The engine itself never
//! touches the network; it only reports which of its four buffers are
//! ready through its state bits.
//!
//! One call to [`SslClient::update`] keeps working until there is nothing
//! left to do without waiting for the peer. [`SslClient::run_until`] calls
//! it in a loop until the engine reaches a target state, breaking the two
//! deadlocks a half-duplex engine can get into along the way.

use embedded_hal::delay::DelayNs;
use hal_abstractions::memory::{Headroom, HeadroomProbe};
use hal_abstractions::net::Transport;
use hal_abstractions::time::Clock;
use hal_abstractions::tls::{Engine, EngineState};

use crate::client::SslClient;
use crate::error::{Error, WriteError};

/// Counters kept by the pump, reset on every connect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PumpStats {
    /// Times unread plaintext was dropped so a write could proceed
    pub app_data_discards: u32,
    /// Plaintext bytes dropped that way
    pub discarded_bytes: usize,
    /// Times the engine was flushed so a read could proceed
    pub forced_flushes: u32,
    /// Batches of plaintext handed to the engine
    pub app_handoffs: u32,
    /// Ciphertext bytes written to the transport
    pub bytes_sent: usize,
    /// Ciphertext bytes read from the transport
    pub bytes_received: usize,
}

/// Result of one attempt to pull a record from the transport
enum Received {
    Record,
    Nothing,
}

impl<T, E, C, D, H, const SESSIONS: usize> SslClient<T, E, C, D, H, SESSIONS>
where
    T: Transport,
    E: Engine,
    C: Clock,
    D: DelayNs,
    H: HeadroomProbe,
{
    /// Service the engine once
    ///
    /// In priority order: stop if closed, drain outgoing records, hand over
    /// buffered plaintext, pull incoming records. Returns the engine state
    /// once none of those can make progress.
    ///
    /// # Errors
    ///
    /// Refuses with `NotConnected` or the sticky code when there is no
    /// session to drive; a step that fails records and returns its code.
    pub fn update(&mut self) -> Result<EngineState, Error> {
        self.lifecycle.may_pump()?;
        let state = self.pump();
        if self.abort {
            return Err(Error::Abort);
        }
        let code = self.lifecycle.write_error();
        if !code.is_ok() {
            return Err(Error::Write(code));
        }
        Ok(state)
    }

    /// Drive the engine until any bit of `target` is set
    ///
    /// An empty `target` waits for the engine to go idle (state 0).
    ///
    /// # Errors
    ///
    /// - `NotConnected` or the sticky code if there is no session to drive
    /// - `EngineClosed` if the engine closes first
    /// - `Write(code)` if any step fails
    /// - `Timeout` if the configured deadline passes; the connection is torn
    ///   down and `EngineWriteError` recorded
    /// - `Abort` if the memory probe reported corruption
    pub fn run_until(&mut self, target: EngineState) -> Result<(), Error> {
        self.lifecycle.may_pump()?;
        self.drive(target)
    }

    /// `update` without the guard; returns `INVALID` if a step failed
    /// (the reason is in the sticky error)
    pub(crate) fn pump(&mut self) -> EngineState {
        loop {
            let state = self.engine.state();
            if state != self.last_state {
                trace!("Engine state {}", state);
                self.last_state = state;
            }
            if state.is_closed() {
                return state;
            }

            if state.wants_send_record() {
                if let Err(code) = self.send_record() {
                    self.fail(code);
                    return EngineState::INVALID;
                }
                continue;
            }

            if self.cursor.pending() > 0 {
                if let Err(code) = self.hand_off_pending(state) {
                    self.fail(code);
                    return EngineState::INVALID;
                }
                continue;
            }

            if state.wants_recv_record() {
                match self.receive_record() {
                    Ok(Received::Record) => continue,
                    Ok(Received::Nothing) => return state,
                    Err(code) => {
                        self.fail(code);
                        return EngineState::INVALID;
                    }
                }
            }

            return state;
        }
    }

    /// `run_until` without the guard
    pub(crate) fn drive(&mut self, target: EngineState) -> Result<(), Error> {
        let start = self.clock.now_ms();
        loop {
            let state = self.pump();
            if self.abort {
                return Err(Error::Abort);
            }
            if state.is_closed() {
                warn!("Terminating because the engine closed");
                return Err(Error::EngineClosed);
            }
            let code = self.lifecycle.write_error();
            if !code.is_ok() {
                warn!("Terminating with write error: {}", code);
                return Err(Error::Write(code));
            }

            let elapsed = self.clock.now_ms().saturating_sub(start);
            if elapsed > u64::from(self.config.timeout_ms) {
                error!("Engine timed out waiting for {} (state {})", target, state);
                self.fail(WriteError::EngineWriteError);
                return Err(Error::Timeout);
            }

            if state.intersects(target) || (target.is_invalid() && state.is_invalid()) {
                return Ok(());
            }

            // Unread plaintext blocks a half-duplex engine from accepting
            // more; drop it so the write can go through.
            if state.has_recv_app() && target.intersects(EngineState::SEND_APP) {
                let unread = self.engine.recvapp_buf().len();
                if unread == 0 {
                    error!("Engine reported RECVAPP with an empty buffer");
                    self.fail(WriteError::EngineWriteError);
                    return Err(Error::Write(WriteError::EngineWriteError));
                }
                warn!("Discarded {} unread bytes in favor of a write", unread);
                self.engine.recvapp_ack(unread);
                self.cursor.reset();
                self.stats.app_data_discards = self.stats.app_data_discards.saturating_add(1);
                self.stats.discarded_bytes = self.stats.discarded_bytes.saturating_add(unread);
                continue;
            }

            // The engine may sit on a partial record while the caller waits
            // for a response to it.
            if state.can_send_app() && target.intersects(EngineState::RECV_APP) {
                self.engine.flush(false);
                self.stats.forced_flushes = self.stats.forced_flushes.saturating_add(1);
            }
        }
    }

    fn send_record(&mut self) -> Result<(), WriteError> {
        let record = self.engine.sendrec_buf();
        let len = record.len();
        if len == 0 {
            error!("Engine reported SENDREC with an empty buffer");
            return Err(WriteError::EngineWriteError);
        }
        let written = match self.transport.write(record) {
            Ok(0) => {
                error!("Transport accepted no bytes");
                return Err(WriteError::TransportWriteError);
            }
            Ok(n) => n,
            Err(_) => {
                error!("Error writing to transport");
                return Err(WriteError::TransportWriteError);
            }
        };
        if written > len {
            error!("Transport reported {} bytes written out of {}", written, len);
            return Err(WriteError::InternalError);
        }
        if self.transport.flush().is_err() {
            error!("Error flushing transport");
            return Err(WriteError::TransportWriteError);
        }
        self.engine.sendrec_ack(written);
        self.stats.bytes_sent = self.stats.bytes_sent.saturating_add(written);
        Ok(())
    }

    fn hand_off_pending(&mut self, state: EngineState) -> Result<(), WriteError> {
        let pending = self.cursor.pending();
        if !state.can_send_app() {
            error!("{} bytes buffered but the engine cannot take data ({})", pending, state);
            return Err(WriteError::InternalError);
        }
        let window = self.engine.sendapp_buf().len();
        if window == 0 {
            error!("Engine reported SENDAPP with an empty buffer");
            return Err(WriteError::EngineWriteError);
        }
        if pending > window {
            error!("{} bytes buffered but the engine window is {}", pending, window);
            return Err(WriteError::InternalError);
        }
        self.engine.sendapp_ack(pending);
        self.cursor.reset();
        self.stats.app_handoffs = self.stats.app_handoffs.saturating_add(1);
        Ok(())
    }

    fn receive_record(&mut self) -> Result<Received, WriteError> {
        let available = match self.transport.available() {
            Ok(n) => n,
            Err(_) => {
                error!("Error polling transport");
                return Err(WriteError::TransportWriteError);
            }
        };
        if available == 0 {
            if !self.transport.connected() {
                error!("Socket was dropped while waiting for records");
                return Err(WriteError::TransportWriteError);
            }
            self.delay.delay_ms(self.config.poll_delay_ms);
            return Ok(Received::Nothing);
        }

        match self.headroom.check(self.config.min_headroom) {
            Headroom::Sufficient => {}
            Headroom::Insufficient => {
                error!("Out of memory! Reduce the session cache or the engine buffers");
                return Err(WriteError::OutOfMemory);
            }
            Headroom::Corrupted => {
                error!("Stack and heap have collided; the device must be reset");
                self.abort = true;
                return Err(WriteError::OutOfMemory);
            }
        }

        let window = self.engine.recvrec_buf();
        let want = window.len().min(available);
        if want == 0 {
            error!("Engine reported RECVREC with an empty buffer");
            return Err(WriteError::EngineWriteError);
        }
        let read = match self.transport.read(&mut window[..want]) {
            Ok(0) | Err(_) => {
                error!("Error reading from transport");
                return Err(WriteError::TransportWriteError);
            }
            Ok(n) => n,
        };
        if read > want {
            error!("Transport reported {} bytes read into {}", read, want);
            return Err(WriteError::InternalError);
        }
        self.engine.recvrec_ack(read);
        self.stats.bytes_received = self.stats.bytes_received.saturating_add(read);
        Ok(Received::Record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Phase;
    use crate::testing::connected_client;

    #[test]
    fn test_update_sends_queued_records() {
        let (mut client, _time) = connected_client::<1>();
        client.engine_mut().queue_record(b"alert");
        let state = client.update().unwrap();

        assert!(state.can_send_app());
        assert_eq!(client.transport().written, b"alert");
        // The handshake's hello counts too.
        assert_eq!(client.stats().bytes_sent, 12 + 5);
    }

    #[test]
    fn test_partial_transport_writes() {
        let (mut client, _time) = connected_client::<1>();
        client.transport_mut().write_chunk = Some(3);
        client.engine_mut().queue_record(b"0123456789");
        let calls = client.transport().write_calls;
        client.update().unwrap();

        assert_eq!(client.transport().written, b"0123456789");
        assert_eq!(client.transport().write_calls - calls, 4);
        assert_eq!(client.engine().violations, 0);
    }

    #[test]
    fn test_update_waits_between_empty_polls() {
        let (mut client, time) = connected_client::<1>();
        let before = time.now();
        let state = client.update().unwrap();

        assert!(state.wants_recv_record());
        assert!(time.now() >= before + 10);
    }

    #[test]
    fn test_transport_write_failure_is_sticky() {
        let (mut client, _time) = connected_client::<1>();
        client.transport_mut().fail_writes = true;
        client.engine_mut().queue_record(b"record");

        assert_eq!(
            client.update(),
            Err(Error::Write(WriteError::TransportWriteError))
        );
        assert_eq!(client.write_error(), WriteError::TransportWriteError);
        assert_eq!(client.phase(), Phase::Errored);
        assert!(!client.transport().is_connected);
    }

    #[test]
    fn test_insufficient_headroom() {
        let (mut client, _time) = connected_client::<1>();
        client.headroom.answer = Headroom::Insufficient;
        client.transport_mut().push_incoming(b"data");

        assert_eq!(client.available(), Err(Error::Write(WriteError::OutOfMemory)));
        assert!(!client.abort_requested());
        assert!(!client.connected());
    }

    #[test]
    fn test_corrupted_memory_requests_abort() {
        let (mut client, _time) = connected_client::<1>();
        client.headroom.answer = Headroom::Corrupted;
        client.transport_mut().push_incoming(b"data");

        assert_eq!(client.run_until(EngineState::RECV_APP), Err(Error::Abort));
        assert!(client.abort_requested());
        assert_eq!(client.write_error(), WriteError::OutOfMemory);
    }

    #[test]
    fn test_peer_drop_while_polling() {
        let (mut client, _time) = connected_client::<1>();
        client.transport_mut().is_connected = false;

        assert_eq!(
            client.update(),
            Err(Error::Write(WriteError::TransportWriteError))
        );
        assert_eq!(client.write_error(), WriteError::TransportWriteError);
    }

    #[test]
    fn test_timeout_tears_down() {
        let (mut client, time) = connected_client::<1>();
        client.set_timeout(500);
        let start = time.now();

        assert_eq!(client.run_until(EngineState::RECV_APP), Err(Error::Timeout));
        assert_eq!(client.write_error(), WriteError::EngineWriteError);
        assert!(time.now() - start > 500);
        assert!(!client.transport().is_connected);
        assert!(client.stats().forced_flushes > 0);
    }

    #[test]
    fn test_discards_unread_data_for_write() {
        let (mut client, _time) = connected_client::<1>();
        client.engine_mut().shared_buffer = true;
        client.engine_mut().deliver(b"stale");

        client.run_until(EngineState::SEND_APP).unwrap();

        assert_eq!(client.stats().app_data_discards, 1);
        assert_eq!(client.stats().discarded_bytes, 5);
        assert!(client.engine().unread().is_empty());
    }

    #[test]
    fn test_reaches_target_already_set() {
        let (mut client, _time) = connected_client::<1>();
        client.engine_mut().deliver(b"ready");
        client.run_until(EngineState::RECV_APP).unwrap();
        assert_eq!(client.stats().app_data_discards, 0);
        assert_eq!(client.engine().unread(), b"ready");
    }

    #[test]
    fn test_engine_closed() {
        let (mut client, _time) = connected_client::<1>();
        client.engine_mut().close();
        assert_eq!(client.run_until(EngineState::SEND_APP), Err(Error::EngineClosed));
    }

    #[test]
    fn test_empty_send_record_buffer() {
        let (mut client, _time) = connected_client::<1>();
        client.engine_mut().forced_state = Some(EngineState::SEND_REC);
        assert_eq!(
            client.run_until(EngineState::SEND_APP),
            Err(Error::Write(WriteError::EngineWriteError))
        );
    }

    #[test]
    fn test_refuses_to_drive_after_stop() {
        let (mut client, _time) = connected_client::<1>();
        client.stop();

        assert_eq!(client.run_until(EngineState::RECV_APP), Err(Error::NotConnected));
        assert_eq!(client.update(), Err(Error::NotConnected));
        assert!(client.write_error().is_ok());
        assert_eq!(client.phase(), Phase::Closed);
    }

    #[test]
    fn test_refuses_to_drive_after_error() {
        let (mut client, _time) = connected_client::<1>();
        client.lifecycle.fail(WriteError::OutOfMemory);
        let polls = client.transport().available_polls;

        assert_eq!(
            client.run_until(EngineState::RECV_APP),
            Err(Error::Write(WriteError::OutOfMemory))
        );
        assert_eq!(client.transport().available_polls, polls);
    }

    #[test]
    fn test_pending_data_without_send_app() {
        let (mut client, _time) = connected_client::<1>();
        client.write(b"abc").unwrap();
        client.engine_mut().forced_state = Some(EngineState::RECV_REC);

        assert_eq!(client.update(), Err(Error::Write(WriteError::InternalError)));
        assert_eq!(client.write_error(), WriteError::InternalError);
        assert!(client.engine().app_acks.is_empty());
    }

    #[test]
    fn test_pending_data_larger_than_window() {
        let (mut client, _time) = connected_client::<1>();
        client.write(b"0123456789").unwrap();
        client.engine_mut().app_capacity = 4;

        assert_eq!(client.update(), Err(Error::Write(WriteError::InternalError)));
        assert!(client.engine().app_acks.is_empty());
        assert_eq!(client.engine().violations, 0);
    }

    #[test]
    fn test_transport_overreporting_write() {
        let (mut client, _time) = connected_client::<1>();
        client.transport_mut().overreport = 1;
        client.engine_mut().queue_record(b"abc");

        assert_eq!(client.update(), Err(Error::Write(WriteError::InternalError)));
        assert_eq!(client.engine().violations, 0);
    }

    #[test]
    fn test_transport_overreporting_read() {
        let (mut client, _time) = connected_client::<1>();
        client.transport_mut().overreport = 1;
        client.transport_mut().push_incoming(b"data");

        assert_eq!(client.update(), Err(Error::Write(WriteError::InternalError)));
        assert_eq!(client.engine().violations, 0);
        assert_eq!(client.stats().bytes_received, 48);
    }

    #[test]
    fn test_counters_saturate() {
        let (mut client, _time) = connected_client::<1>();
        client.stats.bytes_sent = usize::MAX - 1;
        client.engine_mut().queue_record(b"alert");

        client.update().unwrap();
        assert_eq!(client.stats().bytes_sent, usize::MAX);
    }
}
