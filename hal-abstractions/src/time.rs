//! Time sources
//!
//! Delays use `embedded_hal::delay::DelayNs` directly; only the monotonic
//! clock needs a trait of its own.

/// Monotonic millisecond clock
///
/// Boards typically back this with the RTIC monotonic or `embassy_time::Instant`.
/// Only differences between readings are used, so the epoch is arbitrary.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
