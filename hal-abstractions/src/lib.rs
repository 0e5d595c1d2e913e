//! Hardware abstraction traits for IoT firmware
//!
//! This crate defines the traits the TLS client core is written against.
//! Boards implement them on top of their network chip, TLS engine and
//! timers; the core never touches hardware directly.
//!
//! - [`net::Transport`]: non-blocking byte socket (W5500 and friends)
//! - [`tls::Engine`]: buffer/flag driven TLS record engine
//! - [`time::Clock`]: monotonic milliseconds for deadlines
//! - [`memory::HeadroomProbe`]: free scratch memory check before record reads

#![cfg_attr(not(any(test, feature = "mock")), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod net;
pub mod time;
pub mod tls;

#[cfg(feature = "mock")]
pub mod mock;
