//! TLS engine boundary
//!
//! The engine is an opaque, already-configured TLS state machine (trust
//! anchors, cipher suites and buffers are set up by the board). It talks to
//! the outside world exclusively through four directional buffers and a
//! state bitmask:
//!
//! | buffer    | direction                  | state flag  |
//! |-----------|----------------------------|-------------|
//! | `sendrec` | ciphertext to the network  | `SEND_REC`  |
//! | `recvrec` | ciphertext from network    | `RECV_REC`  |
//! | `sendapp` | plaintext from the caller  | `SEND_APP`  |
//! | `recvapp` | plaintext to the caller    | `RECV_APP`  |
//!
//! Every `*_buf` accessor hands out the currently available window; the
//! matching `*_ack` consumes exactly the number of bytes produced or used.
//! Acking more than the window just handed out is a protocol violation.

use core::fmt;

use heapless::Vec;

/// Maximum length of a TLS session id
pub const MAX_SESSION_ID_LEN: usize = 32;

/// Capacity for the engine-serialized remainder of the session parameters
///
/// Sized for protocol version (2) + cipher suite (2) + master secret (48),
/// with room to spare for engines that store a little more.
pub const MAX_SESSION_DATA_LEN: usize = 64;

/// Snapshot of the engine state bitmask
///
/// Bit values match the wrapped engine (`BR_SSL_*`). Zero means the engine
/// has not been started or has failed in a way it cannot describe.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineState(u8);

impl EngineState {
    /// Not yet started, or no usable state
    pub const INVALID: Self = Self(0);
    /// Engine is closed; terminal
    pub const CLOSED: Self = Self(0x01);
    /// Ciphertext is queued for the network
    pub const SEND_REC: Self = Self(0x02);
    /// Engine is waiting for ciphertext
    pub const RECV_REC: Self = Self(0x04);
    /// Engine accepts plaintext from the caller
    pub const SEND_APP: Self = Self(0x08);
    /// Decrypted plaintext is waiting for the caller
    pub const RECV_APP: Self = Self(0x10);

    const ALL: u8 = 0x1f;

    /// Build a state from raw engine bits, dropping unknown ones
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL)
    }

    /// Raw bitmask
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Union of two states
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True if any flag is shared with `other`
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_invalid(self) -> bool {
        self.0 == 0
    }

    pub const fn is_closed(self) -> bool {
        self.intersects(Self::CLOSED)
    }

    /// Engine has records that must leave through the transport
    pub const fn wants_send_record(self) -> bool {
        self.intersects(Self::SEND_REC)
    }

    /// Engine is waiting for records from the transport
    pub const fn wants_recv_record(self) -> bool {
        self.intersects(Self::RECV_REC)
    }

    /// Engine will accept application plaintext
    pub const fn can_send_app(self) -> bool {
        self.intersects(Self::SEND_APP)
    }

    /// Engine holds decrypted application data
    pub const fn has_recv_app(self) -> bool {
        self.intersects(Self::RECV_APP)
    }
}

impl core::ops::BitOr for EngineState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            return f.write_str("INVALID");
        }
        if self.is_closed() {
            return f.write_str("CLOSED");
        }
        let names = [
            (Self::SEND_REC, "SENDREC"),
            (Self::RECV_REC, "RECVREC"),
            (Self::SEND_APP, "SENDAPP"),
            (Self::RECV_APP, "RECVAPP"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.intersects(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineState({self})")
    }
}

/// Engine error code as reported by `last_error()`; zero means no error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineErrorCode(pub i32);

impl EngineErrorCode {
    pub const OK: Self = Self(0);

    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine error {}", self.0)
    }
}

/// Resumable session parameters, opaque to everything but the engine
///
/// Persisted and restored byte-for-byte. Only the emptiness of `id` is
/// meaningful outside the engine: an empty id cannot be resumed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionParameters {
    id: Vec<u8, MAX_SESSION_ID_LEN>,
    data: Vec<u8, MAX_SESSION_DATA_LEN>,
}

impl SessionParameters {
    /// Empty, non-resumable parameters
    pub const fn empty() -> Self {
        Self {
            id: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Build parameters from an engine's serialized form
    ///
    /// Returns `None` if either part exceeds its capacity.
    pub fn new(id: &[u8], data: &[u8]) -> Option<Self> {
        Some(Self {
            id: Vec::from_slice(id).ok()?,
            data: Vec::from_slice(data).ok()?,
        })
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// True if the engine issued a session id that can be offered again
    pub fn is_resumable(&self) -> bool {
        !self.id.is_empty()
    }
}

/// Buffer-driven TLS engine
///
/// Implemented by the board on top of its TLS library. All methods are
/// non-blocking; the engine never performs I/O itself.
pub trait Engine {
    /// Current state bitmask
    fn state(&self) -> EngineState;

    /// Outgoing ciphertext window; empty if nothing is queued
    fn sendrec_buf(&self) -> &[u8];
    /// Mark `len` bytes of the outgoing ciphertext window as sent
    fn sendrec_ack(&mut self, len: usize);

    /// Window to receive ciphertext into; its length is what the engine wants
    fn recvrec_buf(&mut self) -> &mut [u8];
    /// Mark `len` bytes of the receive window as filled
    fn recvrec_ack(&mut self, len: usize);

    /// Window for caller plaintext; its length is the current capacity
    fn sendapp_buf(&mut self) -> &mut [u8];
    /// Hand `len` bytes of the plaintext window to the engine for encryption
    fn sendapp_ack(&mut self, len: usize);

    /// Decrypted plaintext ready for the caller
    fn recvapp_buf(&self) -> &[u8];
    /// Mark `len` bytes of decrypted plaintext as consumed
    fn recvapp_ack(&mut self, len: usize);

    /// Push buffered application data into records
    ///
    /// With `force` the engine emits a record even if nothing is buffered.
    fn flush(&mut self, force: bool);

    /// Start a fresh handshake, resuming the session parameters set last
    fn reset(&mut self, server_name: Option<&str>) -> Result<(), EngineErrorCode>;

    /// Parameters negotiated by the last completed handshake
    fn session_parameters(&self) -> SessionParameters;

    /// Offer previously negotiated parameters on the next `reset`
    fn set_session_parameters(&mut self, params: &SessionParameters);

    /// Mix seed material into the engine's DRBG
    fn inject_entropy(&mut self, seed: &[u8]);

    /// Last error reported by the engine
    fn last_error(&self) -> EngineErrorCode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        let state = EngineState::SEND_APP | EngineState::RECV_REC;
        assert!(state.can_send_app());
        assert!(state.wants_recv_record());
        assert!(!state.wants_send_record());
        assert!(!state.has_recv_app());
        assert!(!state.is_closed());
        assert!(!state.is_invalid());
        assert!(EngineState::INVALID.is_invalid());
    }

    #[test]
    fn test_unknown_bits_dropped() {
        let state = EngineState::from_bits_truncate(0xe8);
        assert_eq!(state, EngineState::SEND_APP);
    }

    #[test]
    fn test_state_display() {
        use std::string::ToString;

        assert_eq!(EngineState::INVALID.to_string(), "INVALID");
        assert_eq!(EngineState::CLOSED.to_string(), "CLOSED");
        assert_eq!(
            (EngineState::RECV_REC | EngineState::SEND_APP).to_string(),
            "RECVREC|SENDAPP"
        );
    }

    #[test]
    fn test_session_parameters_capacity() {
        assert!(SessionParameters::new(&[1; 32], &[2; 52]).is_some());
        assert!(SessionParameters::new(&[1; 33], &[]).is_none());
        assert!(SessionParameters::new(&[], &[0; 65]).is_none());

        let params = SessionParameters::new(&[7, 7], &[1, 2, 3]).unwrap();
        assert!(params.is_resumable());
        assert_eq!(params.id(), &[7, 7]);
        assert_eq!(params.data(), &[1, 2, 3]);
        assert!(!SessionParameters::empty().is_resumable());
    }
}
