//! TLS client over a polled transport and a buffer-driven engine
//!
//! `SslClient` owns exactly one transport and one engine. It moves bytes
//! between them (see `pump`), batches caller writes (see `writer`), keeps a
//! small session cache for fast reconnects and tracks the lifecycle of the
//! single connection it can hold at a time.
//!
//! Everything is synchronous. `connect`, `write`, `flush` and `stop` block
//! until the engine reaches the state they need, fails, or the configured
//! timeout elapses.

use core::net::IpAddr;

use embedded_hal::delay::DelayNs;
use hal_abstractions::memory::HeadroomProbe;
use hal_abstractions::net::{Host, Transport};
use hal_abstractions::time::Clock;
use hal_abstractions::tls::{Engine, EngineErrorCode, EngineState};
use rand_core::{CryptoRng, RngCore};

use crate::config::{SslConfig, ENTROPY_LEN};
use crate::error::{Error, WriteError};
use crate::lifecycle::{Lifecycle, Phase};
use crate::pump::PumpStats;
use crate::session::{Session, SessionCache};
use crate::writer::WriteCursor;

/// TLS client
///
/// - `T`: transport socket
/// - `E`: TLS engine
/// - `C`: monotonic clock for timeouts
/// - `D`: delay used between empty transport polls
/// - `H`: scratch memory probe
/// - `SESSIONS`: session cache capacity (keep it at 3 or below on small parts)
///
/// # Example
///
/// ```ignore
/// let mut client: SslClient<_, _, _, _, _, 1> =
///     SslClient::new(socket, engine, clock, delay, Unbounded, SslConfig::default());
/// client.connect("broker.emqx.io", 8883, &mut rng)?;
/// client.write(b"GET / HTTP/1.1\r\n\r\n")?;
/// client.flush()?;
/// ```
pub struct SslClient<T, E, C, D, H, const SESSIONS: usize> {
    pub(crate) transport: T,
    pub(crate) engine: E,
    pub(crate) clock: C,
    pub(crate) delay: D,
    pub(crate) headroom: H,
    pub(crate) config: SslConfig,
    pub(crate) sessions: SessionCache<SESSIONS>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) cursor: WriteCursor,
    pub(crate) stats: PumpStats,
    pub(crate) last_state: EngineState,
    pub(crate) abort: bool,
}

impl<T, E, C, D, H, const SESSIONS: usize> SslClient<T, E, C, D, H, SESSIONS>
where
    T: Transport,
    E: Engine,
    C: Clock,
    D: DelayNs,
    H: HeadroomProbe,
{
    /// Wrap an already-configured engine and an unconnected transport
    pub fn new(transport: T, engine: E, clock: C, delay: D, headroom: H, config: SslConfig) -> Self {
        Self {
            transport,
            engine,
            clock,
            delay,
            headroom,
            config,
            sessions: SessionCache::new(),
            lifecycle: Lifecycle::new(),
            cursor: WriteCursor::new(),
            stats: PumpStats::default(),
            last_state: EngineState::INVALID,
            abort: false,
        }
    }

    /// Connect to `host:port` and complete a TLS handshake
    ///
    /// If a session for `host` is cached it is offered for resumption, and
    /// on success the cache is updated with the parameters the engine ends
    /// up with. `rng` seeds the engine with 128 bits of entropy.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if the transport already holds a socket
    /// - `Write(TransportConnectFail)` if the socket cannot be opened
    /// - `Write(EngineConnectFail)` if the handshake fails
    /// - `Timeout` / `Abort` / other sticky codes from the engine pump
    pub fn connect<R>(&mut self, host: &str, port: u16, rng: &mut R) -> Result<(), Error>
    where
        R: RngCore + CryptoRng,
    {
        self.open(Host::Name(host), port, rng)
    }

    /// Connect to a raw address
    ///
    /// Prefer [`connect`](Self::connect): without a hostname the server name
    /// cannot be checked against the certificate and the session cannot be
    /// resumed later.
    pub fn connect_ip<R>(&mut self, ip: IpAddr, port: u16, rng: &mut R) -> Result<(), Error>
    where
        R: RngCore + CryptoRng,
    {
        warn!("Using a raw IP address for TLS bypasses hostname verification; use a domain name whenever possible");
        self.open(Host::Ip(ip), port, rng)
    }

    fn open<R>(&mut self, host: Host<'_>, port: u16, rng: &mut R) -> Result<(), Error>
    where
        R: RngCore + CryptoRng,
    {
        if self.transport.connected() {
            error!("Transport is already connected; call stop() before connecting again");
            return Err(Error::AlreadyConnected);
        }
        self.lifecycle.clear_error();
        self.cursor.reset();
        self.stats = PumpStats::default();
        self.last_state = EngineState::INVALID;
        self.abort = false;

        if self.transport.connect(host, port).is_err() {
            error!("Failed to open transport socket. Is the network up?");
            self.lifecycle.fail(WriteError::TransportConnectFail);
            return Err(Error::Write(WriteError::TransportConnectFail));
        }
        info!("Transport connected (port {})", port);
        self.start_tls(host.name(), rng)
    }

    fn start_tls<R>(&mut self, server_name: Option<&str>, rng: &mut R) -> Result<(), Error>
    where
        R: RngCore + CryptoRng,
    {
        self.lifecycle.begin_handshake();

        let mut seed = [0u8; ENTROPY_LEN];
        rng.fill_bytes(&mut seed);
        self.engine.inject_entropy(&seed);

        let resuming = match self.sessions.get(server_name) {
            Some(session) => {
                self.engine.set_session_parameters(session.parameters());
                true
            }
            None => false,
        };

        if let Err(code) = self.engine.reset(server_name) {
            error!("Engine reset failed ({}); is the engine set up properly?", code.0);
            self.fail(WriteError::EngineConnectFail);
            return Err(Error::Write(WriteError::EngineConnectFail));
        }

        if let Err(err) = self.drive(EngineState::SEND_APP) {
            error!("TLS handshake failed: {}", err);
            if self.lifecycle.write_error().is_ok() {
                self.fail(WriteError::EngineConnectFail);
            }
            return Err(match err {
                Error::EngineClosed => Error::Write(self.lifecycle.write_error()),
                other => other,
            });
        }

        self.lifecycle.established();
        if resuming {
            info!("TLS connection established (session offered for resumption)");
        } else {
            info!("TLS connection established");
        }

        if let Some(name) = server_name {
            let params = self.engine.session_parameters();
            if self.sessions.remember(name, params) {
                debug!("Cached session for {}", name);
            }
        }
        Ok(())
    }

    /// Number of decrypted bytes ready to read
    ///
    /// Also drives the engine: buffered writes are handed over and sent,
    /// and incoming records are pulled from the transport. Call it
    /// periodically while waiting for a response.
    pub fn available(&mut self) -> Result<usize, Error> {
        self.lifecycle.soft_connected(self.engine.state())?;
        let state = self.pump();
        if self.abort {
            return Err(Error::Abort);
        }
        if state.is_invalid() {
            let code = self.lifecycle.write_error();
            if !code.is_ok() {
                return Err(Error::Write(code));
            }
            return Ok(0);
        }
        if state.has_recv_app() {
            return Ok(self.engine.recvapp_buf().len());
        }
        if state.is_closed() {
            info!("Engine closed after update");
            return Err(Error::EngineClosed);
        }
        if state.can_send_app() {
            // Idle in SENDAPP: push out anything the engine is still holding.
            self.engine.flush(false);
        }
        Ok(0)
    }

    /// Copy decrypted bytes into `buf`
    ///
    /// Returns `Ok(0)` when nothing has arrived yet; the read never waits.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.available()? == 0 {
            return Ok(0);
        }
        Ok(self.copy_unread(buf))
    }

    /// Next decrypted byte without consuming it
    pub fn peek(&mut self) -> Result<Option<u8>, Error> {
        if self.available()? == 0 {
            return Ok(None);
        }
        Ok(self.engine.recvapp_buf().first().copied())
    }

    pub(crate) fn copy_unread(&mut self, buf: &mut [u8]) -> usize {
        let unread = self.engine.recvapp_buf();
        let n = buf.len().min(unread.len());
        buf[..n].copy_from_slice(&unread[..n]);
        if n > 0 {
            self.engine.recvapp_ack(n);
        }
        n
    }

    /// Close the connection
    ///
    /// Unread data is discarded and pending writes are flushed (bounded by
    /// the timeout) before the transport is stopped. Safe to call at any
    /// time, including twice in a row.
    pub fn stop(&mut self) {
        let state = self.engine.state();
        if self.lifecycle.engine_connected()
            && !state.is_closed()
            && !state.is_invalid()
            && self.transport.connected()
        {
            self.lifecycle.closing();
            if state.has_recv_app() {
                let unread = self.engine.recvapp_buf().len();
                if unread > 0 {
                    self.engine.recvapp_ack(unread);
                }
            }
            if let Err(err) = self.flush() {
                warn!("Pending data could not be flushed before closing: {}", err);
            }
        }
        self.teardown();
    }

    /// Whether the TLS session is usable right now
    ///
    /// Polls the transport on every call. A socket that vanished while the
    /// engine still considered the session open is treated as an abnormal
    /// peer drop: `TransportWriteError` is recorded and the connection torn
    /// down.
    pub fn connected(&mut self) -> bool {
        let transport_up = self.transport.connected();
        let state = self.engine.state();
        let engine_up = self.lifecycle.engine_connected() && !state.is_closed();
        if engine_up && !transport_up {
            warn!("Socket was dropped unexpectedly by the peer");
            self.fail(WriteError::TransportWriteError);
            return false;
        }
        let code = self.lifecycle.write_error();
        if !code.is_ok() {
            debug!("Not connected because a write error is set: {}", code);
        }
        self.lifecycle.verdict(transport_up, state)
    }

    /// Record `code`, then tear the connection down
    pub(crate) fn fail(&mut self, code: WriteError) {
        error!("Connection failed: {}", code);
        let engine_error = self.engine.last_error();
        if !engine_error.is_ok() {
            error!("Engine last error: {}", engine_error.0);
        }
        self.lifecycle.fail(code);
        self.teardown();
    }

    /// Discard unread data, forget pending writes and stop the transport
    pub(crate) fn teardown(&mut self) {
        if self.engine.state().has_recv_app() {
            let unread = self.engine.recvapp_buf().len();
            if unread > 0 {
                self.engine.recvapp_ack(unread);
            }
        }
        self.cursor.reset();
        let _ = self.transport.flush();
        self.transport.stop();
        self.lifecycle.closed();
    }

    /// Sticky error since the last connect
    pub fn write_error(&self) -> WriteError {
        self.lifecycle.write_error()
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Last error reported by the engine
    pub fn engine_error(&self) -> EngineErrorCode {
        self.engine.last_error()
    }

    /// True if the memory probe detected corruption; the application
    /// should reset the device
    pub fn abort_requested(&self) -> bool {
        self.abort
    }

    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    /// Cached session for `host`, if a valid one exists
    pub fn get_session(&mut self, host: &str) -> Option<&Session> {
        self.sessions.get(Some(host)).map(|session| &*session)
    }

    /// Forget the cached session for `host`
    ///
    /// Useful when resumption keeps failing for a host.
    pub fn remove_session(&mut self, host: &str) {
        self.sessions.remove(Some(host));
    }

    pub fn sessions(&self) -> &SessionCache<SESSIONS> {
        &self.sessions
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_capacity(&self) -> usize {
        SESSIONS
    }

    pub fn config(&self) -> &SslConfig {
        &self.config
    }

    /// Change the blocking deadline
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.config.timeout_ms = timeout_ms;
    }

    pub fn timeout(&self) -> u32 {
        self.config.timeout_ms
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Give back the transport and engine
    pub fn release(self) -> (T, E) {
        (self.transport, self.engine)
    }
}
