//! Platform-agnostic TLS client for IoT firmware
//!
//! Drives a buffer-oriented TLS engine over a plain byte socket: moves
//! records between the two, batches application writes, resumes sessions
//! from a small fixed cache and keeps a sticky error per connection. It has
//! NO hardware dependencies; boards plug in their socket, engine, clock and
//! memory probe through the traits in `hal-abstractions`.
//!
//! Everything is blocking and single-threaded, bounded by
//! [`SslConfig::timeout_ms`].

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// Must come first so the other modules see the logging macros.
mod fmt;

mod client;
mod config;
mod error;
mod io;
mod lifecycle;
mod pump;
pub mod session;
mod writer;

#[cfg(test)]
mod testing;

pub use client::SslClient;
pub use config::{SslConfig, ENTROPY_LEN};
pub use error::{Error, WriteError};
pub use lifecycle::{Lifecycle, Phase};
pub use pump::PumpStats;
pub use session::{Session, SessionCache};
pub use writer::WriteCursor;

pub use hal_abstractions::memory::{Headroom, HeadroomProbe, Unbounded};
pub use hal_abstractions::net::{Host, Transport};
pub use hal_abstractions::time::Clock;
pub use hal_abstractions::tls::{Engine, EngineErrorCode, EngineState, SessionParameters};
