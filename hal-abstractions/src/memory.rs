//! Scratch memory headroom checks
//!
//! Decrypting a record is stack hungry. On small parts the stack can run
//! into the heap without any fault being raised, so the core asks the board
//! whether enough free memory remains before it hands a record to the engine.

/// Result of a headroom check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Headroom {
    /// At least the requested number of bytes is free
    Sufficient,
    /// Less than the requested number of bytes is free
    Insufficient,
    /// The measurement is impossible (stack and heap have already collided);
    /// nothing the CPU does from here on can be trusted
    Corrupted,
}

/// Free memory probe
pub trait HeadroomProbe {
    /// Check that at least `required` bytes of scratch memory are free
    fn check(&mut self, required: usize) -> Headroom;
}

/// Probe for targets where stack/heap collision is not a concern
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl HeadroomProbe for Unbounded {
    fn check(&mut self, _required: usize) -> Headroom {
        Headroom::Sufficient
    }
}

/// Probe backed by a closure reporting free bytes
///
/// `ceiling` is the largest plausible reading; anything above it means the
/// stack pointer has wrapped below the heap and the reading is garbage.
pub struct FreeBytes<F> {
    free: F,
    ceiling: usize,
}

impl<F: FnMut() -> usize> FreeBytes<F> {
    pub fn new(free: F, ceiling: usize) -> Self {
        Self { free, ceiling }
    }
}

impl<F: FnMut() -> usize> HeadroomProbe for FreeBytes<F> {
    fn check(&mut self, required: usize) -> Headroom {
        let free = (self.free)();
        if free > self.ceiling {
            Headroom::Corrupted
        } else if free < required {
            Headroom::Insufficient
        } else {
            Headroom::Sufficient
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_bytes_thresholds() {
        let mut probe = FreeBytes::new(|| 8000, 32 * 1024);
        assert_eq!(probe.check(7000), Headroom::Sufficient);
        assert_eq!(probe.check(9000), Headroom::Insufficient);

        let mut garbage = FreeBytes::new(|| 40 * 1024, 32 * 1024);
        assert_eq!(garbage.check(7000), Headroom::Corrupted);
    }

    #[test]
    fn test_unbounded() {
        assert_eq!(Unbounded.check(usize::MAX), Headroom::Sufficient);
    }
}
