//! Mock implementations for testing.
//!
//! Deterministic, host-only stand-ins for the board side of every trait in
//! this crate. They record what the code under test did so tests can assert
//! on it afterwards.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::string::{String, ToString};
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_io::{ErrorKind, ErrorType};

use crate::memory::{Headroom, HeadroomProbe};
use crate::net::{Host, Transport};
use crate::time::Clock;
use crate::tls::{Engine, EngineErrorCode, EngineState, SessionParameters};

/// Error returned by [`MockTransport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockIoError {
    /// Connection refused by the simulated peer
    Refused,
    /// Socket broken or closed
    Broken,
}

impl fmt::Display for MockIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused => write!(f, "Connection refused"),
            Self::Broken => write!(f, "Broken pipe"),
        }
    }
}

impl std::error::Error for MockIoError {}

impl embedded_io::Error for MockIoError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Refused => ErrorKind::ConnectionRefused,
            Self::Broken => ErrorKind::BrokenPipe,
        }
    }
}

/// In-memory socket
///
/// Bytes pushed with [`MockTransport::push_incoming`] are what the peer
/// "sent"; everything written ends up in `written`.
#[derive(Debug)]
pub struct MockTransport {
    /// Whether `connect` succeeds
    pub connect_ok: bool,
    /// Transport-level connection flag
    pub is_connected: bool,
    /// Bytes waiting to be read
    pub incoming: VecDeque<u8>,
    /// Everything accepted by `write`
    pub written: Vec<u8>,
    /// Accept at most this many bytes per `write` call
    pub write_chunk: Option<usize>,
    /// Report at most this many bytes from `available`
    pub available_chunk: Option<usize>,
    /// Fail every `write`
    pub fail_writes: bool,
    /// Fail every `read`
    pub fail_reads: bool,
    /// Claim this many bytes more than were actually moved by `write`/`read`
    pub overreport: usize,
    /// Host of the last `connect` call
    pub last_host: Option<String>,
    pub connect_calls: usize,
    pub write_calls: usize,
    pub available_polls: usize,
    pub flushes: usize,
    pub stops: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            connect_ok: true,
            is_connected: false,
            incoming: VecDeque::new(),
            written: Vec::new(),
            write_chunk: None,
            available_chunk: None,
            fail_writes: false,
            fail_reads: false,
            overreport: 0,
            last_host: None,
            connect_calls: 0,
            write_calls: 0,
            available_polls: 0,
            flushes: 0,
            stops: 0,
        }
    }

    /// Queue bytes as if the peer had sent them
    pub fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes.iter().copied());
    }

    /// Drain and return everything written so far
    pub fn take_written(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.written)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorType for MockTransport {
    type Error = MockIoError;
}

impl Transport for MockTransport {
    fn connect(&mut self, host: Host<'_>, _port: u16) -> Result<(), Self::Error> {
        self.connect_calls += 1;
        self.last_host = Some(host.to_string());
        if self.connect_ok {
            self.is_connected = true;
            Ok(())
        } else {
            Err(MockIoError::Refused)
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.write_calls += 1;
        if self.fail_writes || !self.is_connected {
            return Err(MockIoError::Broken);
        }
        let n = buf.len().min(self.write_chunk.unwrap_or(usize::MAX));
        self.written.extend_from_slice(&buf[..n]);
        Ok(n + self.overreport)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.fail_reads {
            return Err(MockIoError::Broken);
        }
        let n = buf.len().min(self.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(self.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n + self.overreport)
    }

    fn available(&mut self) -> Result<usize, Self::Error> {
        self.available_polls += 1;
        Ok(self
            .incoming
            .len()
            .min(self.available_chunk.unwrap_or(usize::MAX)))
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.flushes += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.stops += 1;
        self.is_connected = false;
    }

    fn connected(&mut self) -> bool {
        self.is_connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitServer { remaining: usize },
    App,
    Closed,
}

/// Scripted TLS engine
///
/// Simulates the shape of a handshake without any cryptography:
///
/// 1. `reset` queues `hello` as outgoing records.
/// 2. The engine then wants `server_flight_len` bytes of ciphertext
///    (`resumed_flight_len` when session parameters were offered).
/// 3. Once they arrive the handshake is complete and `issued` becomes the
///    session parameters.
///
/// In the application phase "encryption" is the identity: acked plaintext
/// is queued verbatim as outgoing records, and received records become
/// readable plaintext. With `shared_buffer` set, unread plaintext blocks
/// `SEND_APP`, like an engine running on a single half-duplex buffer.
///
/// Every ack is checked against the window last handed out; overruns are
/// counted in `violations` rather than panicking so tests can assert on them.
#[derive(Debug)]
pub struct MockEngine {
    phase: Phase,
    /// Records emitted by `reset`
    pub hello: Vec<u8>,
    /// Ciphertext needed from the peer to finish a full handshake
    pub server_flight_len: usize,
    /// Ciphertext needed when resuming, if different
    pub resumed_flight_len: Option<usize>,
    /// Capacity of the send-app window
    pub app_capacity: usize,
    /// Unread plaintext blocks `SEND_APP`
    pub shared_buffer: bool,
    /// Parameters produced by a completed handshake
    pub issued: SessionParameters,
    /// Make `reset` fail with this code
    pub reset_error: Option<EngineErrorCode>,
    /// Value for `last_error`
    pub last_error: EngineErrorCode,
    /// Override `state()` entirely
    pub forced_state: Option<EngineState>,

    sendrec: Vec<u8>,
    recv_window: Vec<u8>,
    app_out: Vec<u8>,
    recvapp: Vec<u8>,
    session: SessionParameters,
    offered: Option<SessionParameters>,

    /// Parameters offered at the last `reset`, if any
    pub resumed_with: Option<SessionParameters>,
    /// Server names passed to `reset`
    pub resets: Vec<Option<String>>,
    /// Entropy injected so far
    pub entropy: Vec<u8>,
    /// Length of every `sendapp_ack`
    pub app_acks: Vec<usize>,
    /// All plaintext handed to the engine
    pub plaintext_sent: Vec<u8>,
    pub flushes: usize,
    pub handshakes: usize,
    /// Acks that exceeded the window last handed out
    pub violations: usize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            hello: b"client-hello".to_vec(),
            server_flight_len: 48,
            resumed_flight_len: None,
            app_capacity: 64,
            shared_buffer: false,
            issued: SessionParameters::new(&[0xab; 32], &[0x03, 0x03, 0xc0, 0x2f])
                .unwrap_or_default(),
            reset_error: None,
            last_error: EngineErrorCode::OK,
            forced_state: None,
            sendrec: Vec::new(),
            recv_window: Vec::new(),
            app_out: Vec::new(),
            recvapp: Vec::new(),
            session: SessionParameters::empty(),
            offered: None,
            resumed_with: None,
            resets: Vec::new(),
            entropy: Vec::new(),
            app_acks: Vec::new(),
            plaintext_sent: Vec::new(),
            flushes: 0,
            handshakes: 0,
            violations: 0,
        }
    }

    /// Engine that is already in the application phase
    pub fn established() -> Self {
        let mut engine = Self::new();
        engine.phase = Phase::App;
        engine.session = engine.issued.clone();
        engine
    }

    /// Make decrypted plaintext available to the caller
    pub fn deliver(&mut self, plaintext: &[u8]) {
        self.recvapp.extend_from_slice(plaintext);
    }

    /// Close the engine, as on a fatal alert or close_notify
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    /// Queue outgoing records directly
    pub fn queue_record(&mut self, record: &[u8]) {
        self.sendrec.extend_from_slice(record);
    }

    /// Plaintext still waiting for the caller
    pub fn unread(&self) -> &[u8] {
        &self.recvapp
    }

    fn check_ack(&mut self, len: usize, window: usize) -> usize {
        if len > window {
            self.violations += 1;
            window
        } else {
            len
        }
    }

    fn recv_want(&self) -> usize {
        match self.phase {
            Phase::AwaitServer { remaining } if self.sendrec.is_empty() => remaining,
            Phase::App if self.recvapp.is_empty() => self.app_capacity,
            _ => 0,
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MockEngine {
    fn state(&self) -> EngineState {
        if let Some(state) = self.forced_state {
            return state;
        }
        match self.phase {
            Phase::Idle => EngineState::INVALID,
            Phase::Closed => EngineState::CLOSED,
            _ if !self.sendrec.is_empty() => EngineState::SEND_REC,
            Phase::AwaitServer { .. } => EngineState::RECV_REC,
            Phase::App => {
                let mut state = if self.recvapp.is_empty() {
                    EngineState::RECV_REC
                } else {
                    EngineState::RECV_APP
                };
                if !(self.shared_buffer && !self.recvapp.is_empty()) {
                    state = state | EngineState::SEND_APP;
                }
                state
            }
        }
    }

    fn sendrec_buf(&self) -> &[u8] {
        &self.sendrec
    }

    fn sendrec_ack(&mut self, len: usize) {
        let len = self.check_ack(len, self.sendrec.len());
        self.sendrec.drain(..len);
    }

    fn recvrec_buf(&mut self) -> &mut [u8] {
        let want = self.recv_want();
        self.recv_window.clear();
        self.recv_window.resize(want, 0);
        &mut self.recv_window
    }

    fn recvrec_ack(&mut self, len: usize) {
        let len = self.check_ack(len, self.recv_window.len());
        match self.phase {
            Phase::AwaitServer { remaining } => {
                let remaining = remaining.saturating_sub(len);
                if remaining == 0 {
                    self.phase = Phase::App;
                    self.session = self.issued.clone();
                    self.handshakes += 1;
                } else {
                    self.phase = Phase::AwaitServer { remaining };
                }
            }
            Phase::App => {
                let record: Vec<u8> = self.recv_window[..len].to_vec();
                self.recvapp.extend_from_slice(&record);
            }
            _ => {}
        }
        self.recv_window.clear();
    }

    fn sendapp_buf(&mut self) -> &mut [u8] {
        if !self.state().can_send_app() {
            return &mut [];
        }
        self.app_out.resize(self.app_capacity, 0);
        &mut self.app_out[..]
    }

    fn sendapp_ack(&mut self, len: usize) {
        let len = self.check_ack(len, self.app_capacity);
        self.app_out.resize(self.app_capacity, 0);
        let plaintext: Vec<u8> = self.app_out[..len].to_vec();
        self.plaintext_sent.extend_from_slice(&plaintext);
        self.sendrec.extend_from_slice(&plaintext);
        self.app_acks.push(len);
    }

    fn recvapp_buf(&self) -> &[u8] {
        &self.recvapp
    }

    fn recvapp_ack(&mut self, len: usize) {
        let len = self.check_ack(len, self.recvapp.len());
        self.recvapp.drain(..len);
    }

    fn flush(&mut self, _force: bool) {
        self.flushes += 1;
    }

    fn reset(&mut self, server_name: Option<&str>) -> Result<(), EngineErrorCode> {
        self.resets.push(server_name.map(String::from));
        if let Some(code) = self.reset_error {
            self.last_error = code;
            return Err(code);
        }
        self.resumed_with = self.offered.take();
        self.session = SessionParameters::empty();
        self.recvapp.clear();
        self.sendrec = self.hello.clone();
        let flight = match (&self.resumed_with, self.resumed_flight_len) {
            (Some(_), Some(len)) => len,
            _ => self.server_flight_len,
        };
        if flight == 0 {
            self.phase = Phase::App;
            self.session = self.issued.clone();
            self.handshakes += 1;
        } else {
            self.phase = Phase::AwaitServer { remaining: flight };
        }
        Ok(())
    }

    fn session_parameters(&self) -> SessionParameters {
        self.session.clone()
    }

    fn set_session_parameters(&mut self, params: &SessionParameters) {
        self.offered = Some(params.clone());
    }

    fn inject_entropy(&mut self, seed: &[u8]) {
        self.entropy.extend_from_slice(seed);
    }

    fn last_error(&self) -> EngineErrorCode {
        self.last_error
    }
}

/// Simulated time shared between [`MockClock`] and [`MockDelay`]
#[derive(Debug, Clone, Default)]
pub struct SimTime(Rc<Cell<u64>>);

impl SimTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.0.get()
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

/// Clock that ticks forward by `tick_ms` on every reading
///
/// The tick keeps loops that never sleep from spinning forever in tests.
#[derive(Debug, Clone)]
pub struct MockClock {
    time: SimTime,
    tick_ms: u64,
}

impl MockClock {
    pub fn new(time: SimTime) -> Self {
        Self { time, tick_ms: 1 }
    }

    pub fn with_tick(time: SimTime, tick_ms: u64) -> Self {
        Self { time, tick_ms }
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        let now = self.time.now();
        self.time.advance(self.tick_ms);
        now
    }
}

/// Delay that advances simulated time instead of sleeping
#[derive(Debug, Clone)]
pub struct MockDelay {
    time: SimTime,
    calls: Rc<Cell<usize>>,
}

impl MockDelay {
    pub fn new(time: SimTime) -> Self {
        Self {
            time,
            calls: Rc::new(Cell::new(0)),
        }
    }

    /// Number of delays requested so far
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.calls.set(self.calls.get() + 1);
        self.time.advance(u64::from(ns).div_ceil(1_000_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.calls.set(self.calls.get() + 1);
        self.time.advance(u64::from(ms));
    }
}

/// Headroom probe returning a fixed answer
#[derive(Debug, Clone)]
pub struct MockHeadroom {
    pub answer: Headroom,
    pub checks: usize,
}

impl MockHeadroom {
    pub fn new(answer: Headroom) -> Self {
        Self { answer, checks: 0 }
    }
}

impl HeadroomProbe for MockHeadroom {
    fn check(&mut self, _required: usize) -> Headroom {
        self.checks += 1;
        self.answer
    }
}

/// Counting RNG; predictable bytes for entropy assertions
#[derive(Debug, Clone, Default)]
pub struct StepRng(u8);

impl StepRng {
    pub fn new(start: u8) -> Self {
        Self(start)
    }
}

impl rand_core::RngCore for StepRng {
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest {
            *byte = self.0;
            self.0 = self.0.wrapping_add(1);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl rand_core::CryptoRng for StepRng {}
