//! Connection lifecycle and sticky error state
//!
//! "Connected" is never stored: it is recomputed from the transport flag,
//! the engine flag and the sticky error every time someone asks. This module
//! only owns the two pieces of state the client itself decides: whether a
//! handshake completed, and the first error since the last connect.

use hal_abstractions::tls::EngineState;

use crate::error::{Error, WriteError};

/// Coarse connection phase, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Never connected
    Idle,
    /// Transport open, handshake in progress
    Handshaking,
    /// Handshake complete
    Connected,
    /// Graceful shutdown in progress
    Closing,
    /// Shut down without error
    Closed,
    /// A sticky error is set
    Errored,
}

/// Lifecycle bookkeeping owned by the client
#[derive(Debug, Clone)]
pub struct Lifecycle {
    phase: Phase,
    engine_connected: bool,
    write_error: WriteError,
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            engine_connected: false,
            write_error: WriteError::Ok,
        }
    }

    /// Current phase; a set sticky error overrides everything else
    pub fn phase(&self) -> Phase {
        if self.write_error.is_ok() {
            self.phase
        } else {
            Phase::Errored
        }
    }

    pub fn write_error(&self) -> WriteError {
        self.write_error
    }

    /// True once a handshake completed and until teardown
    pub fn engine_connected(&self) -> bool {
        self.engine_connected
    }

    /// Transport is open and the handshake is starting; clears the sticky error
    pub fn begin_handshake(&mut self) {
        self.write_error = WriteError::Ok;
        self.engine_connected = false;
        self.phase = Phase::Handshaking;
    }

    /// Handshake reached the point where application data can flow
    pub fn established(&mut self) {
        self.engine_connected = true;
        self.phase = Phase::Connected;
    }

    pub fn closing(&mut self) {
        self.phase = Phase::Closing;
    }

    /// Transport and engine are down
    pub fn closed(&mut self) {
        self.engine_connected = false;
        self.phase = Phase::Closed;
    }

    /// Record a sticky error; the first error since the last connect wins
    pub fn fail(&mut self, code: WriteError) {
        if self.write_error.is_ok() {
            self.write_error = code;
        }
    }

    /// Clear the sticky error without connecting
    pub fn clear_error(&mut self) {
        self.write_error = WriteError::Ok;
    }

    /// Guard consulted by every operation that moves application data
    ///
    /// Uses only local knowledge; the transport is not polled.
    pub fn soft_connected(&self, engine: EngineState) -> Result<(), Error> {
        if !self.write_error.is_ok() {
            return Err(Error::Write(self.write_error));
        }
        if !self.engine_connected {
            return Err(Error::NotConnected);
        }
        if engine.is_closed() {
            return Err(Error::EngineClosed);
        }
        Ok(())
    }

    /// Guard for driving the engine directly
    ///
    /// Like [`soft_connected`](Self::soft_connected), but also lets a
    /// handshake in progress through.
    pub fn may_pump(&self) -> Result<(), Error> {
        if !self.write_error.is_ok() {
            return Err(Error::Write(self.write_error));
        }
        match self.phase {
            Phase::Handshaking | Phase::Connected | Phase::Closing => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    /// Public connected verdict from the three underlying signals
    pub fn verdict(&self, transport_connected: bool, engine: EngineState) -> bool {
        transport_connected
            && self.engine_connected
            && !engine.is_closed()
            && self.write_error.is_ok()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.phase(), Phase::Idle);
        assert!(!lifecycle.verdict(true, EngineState::SEND_APP));
        assert_eq!(
            lifecycle.soft_connected(EngineState::SEND_APP),
            Err(Error::NotConnected)
        );
    }

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin_handshake();
        assert_eq!(lifecycle.phase(), Phase::Handshaking);
        lifecycle.established();
        assert_eq!(lifecycle.phase(), Phase::Connected);
        assert!(lifecycle.verdict(true, EngineState::SEND_APP));
        assert!(!lifecycle.verdict(false, EngineState::SEND_APP));
        assert!(!lifecycle.verdict(true, EngineState::CLOSED));
        assert_eq!(lifecycle.soft_connected(EngineState::SEND_APP), Ok(()));
        assert_eq!(
            lifecycle.soft_connected(EngineState::CLOSED),
            Err(Error::EngineClosed)
        );

        lifecycle.closing();
        lifecycle.closed();
        assert_eq!(lifecycle.phase(), Phase::Closed);
        assert!(!lifecycle.engine_connected());
    }

    #[test]
    fn test_sticky_error_first_wins() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin_handshake();
        lifecycle.established();
        lifecycle.fail(WriteError::OutOfMemory);
        lifecycle.fail(WriteError::TransportWriteError);

        assert_eq!(lifecycle.write_error(), WriteError::OutOfMemory);
        assert_eq!(lifecycle.phase(), Phase::Errored);
        assert!(!lifecycle.verdict(true, EngineState::SEND_APP));
        assert_eq!(
            lifecycle.soft_connected(EngineState::SEND_APP),
            Err(Error::Write(WriteError::OutOfMemory))
        );
    }

    #[test]
    fn test_pump_guard() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.may_pump(), Err(Error::NotConnected));
        lifecycle.begin_handshake();
        assert_eq!(lifecycle.may_pump(), Ok(()));
        lifecycle.established();
        lifecycle.closing();
        assert_eq!(lifecycle.may_pump(), Ok(()));
        lifecycle.closed();
        assert_eq!(lifecycle.may_pump(), Err(Error::NotConnected));

        lifecycle.begin_handshake();
        lifecycle.fail(WriteError::OutOfMemory);
        assert_eq!(
            lifecycle.may_pump(),
            Err(Error::Write(WriteError::OutOfMemory))
        );
    }

    #[test]
    fn test_connect_clears_error() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.fail(WriteError::EngineWriteError);
        lifecycle.begin_handshake();
        assert!(lifecycle.write_error().is_ok());
        assert_eq!(lifecycle.phase(), Phase::Handshaking);
    }
}
