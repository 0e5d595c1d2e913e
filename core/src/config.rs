//! Client configuration

/// Number of entropy bytes injected before every handshake (128 bits)
pub const ENTROPY_LEN: usize = 16;

/// Tuning knobs for [`SslClient`](crate::SslClient)
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SslConfig {
    /// Deadline for a single blocking engine run in milliseconds
    ///
    /// Handshakes on a Cortex-M0 can take several seconds; keep this generous.
    pub timeout_ms: u32,
    /// Sleep after an empty `available()` poll in milliseconds
    ///
    /// SPI network chips such as the W5500 lock up when polled in a tight loop.
    pub poll_delay_ms: u32,
    /// Free scratch memory required before a record is handed to the engine
    pub min_headroom: usize,
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            poll_delay_ms: 10,
            min_headroom: 7_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SslConfig::default();
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.poll_delay_ms, 10);
        assert_eq!(config.min_headroom, 7_000);
    }
}
