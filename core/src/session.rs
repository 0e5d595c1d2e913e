//! Session resumption cache
//!
//! Resuming a session skips the certificate exchange and the expensive key
//! agreement, cutting a 1-4 s handshake on a Cortex-M0 down to a few hundred
//! milliseconds. Each cached entry costs roughly 350 bytes of RAM, so the
//! cache is small and fixed-size: three entries is a sensible upper bound.
//!
//! Eviction is strictly FIFO. Looking an entry up never moves it.

use hal_abstractions::tls::SessionParameters;
use heapless::{String, Vec};

/// Longest hostname that can be cached (RFC 1035 limit)
pub const MAX_HOSTNAME_LEN: usize = 255;

/// One resumable session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    hostname: Option<String<MAX_HOSTNAME_LEN>>,
    requested_hostname: bool,
    valid: bool,
    params: SessionParameters,
}

impl Session {
    /// Empty, invalid session for `hostname`
    ///
    /// Returns `None` if the hostname does not fit.
    pub fn new(hostname: Option<&str>) -> Option<Self> {
        let hostname = match hostname {
            Some(name) => Some(String::try_from(name).ok()?),
            None => None,
        };
        Some(Self {
            requested_hostname: hostname.is_some(),
            hostname,
            valid: false,
            params: SessionParameters::empty(),
        })
    }

    /// Store parameters pulled from the engine after a handshake
    ///
    /// The session becomes valid only if the engine issued a session id and,
    /// when a hostname was requested, that hostname is non-empty.
    pub fn set_parameters(&mut self, params: SessionParameters) {
        let host_ok = !self.requested_hostname
            || self.hostname.as_ref().is_some_and(|name| !name.is_empty());
        self.valid = params.is_resumable() && host_ok;
        self.params = params;
    }

    /// Drop the parameters and mark the session invalid
    pub fn clear_parameters(&mut self) {
        self.valid = false;
        self.params = SessionParameters::empty();
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_ref().map(|name| name.as_str())
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn parameters(&self) -> &SessionParameters {
        &self.params
    }
}

/// Fixed-capacity FIFO of sessions, keyed by exact hostname
#[derive(Debug, Clone, Default)]
pub struct SessionCache<const N: usize> {
    sessions: Vec<Session, N>,
}

impl<const N: usize> SessionCache<N> {
    pub const fn new() -> Self {
        Self {
            sessions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    fn position(&self, hostname: Option<&str>) -> Option<usize> {
        // Only named hosts are ever cached, so a raw-IP lookup never matches.
        let hostname = hostname?;
        self.sessions
            .iter()
            .position(|s| s.is_valid() && s.hostname() == Some(hostname))
    }

    /// Find a valid session for `hostname` (case-sensitive exact match)
    pub fn get(&mut self, hostname: Option<&str>) -> Option<&mut Session> {
        let index = self.position(hostname)?;
        trace!("Using session index {}", index);
        self.sessions.get_mut(index)
    }

    /// Store parameters for `hostname`
    ///
    /// An existing entry for the host is refreshed in place. Otherwise the
    /// oldest entry is evicted if the cache is full and a new one appended.
    /// Parameters that cannot be resumed are not cached; they also drop any
    /// stale entry for the host. Returns whether an entry was stored.
    pub fn remember(&mut self, hostname: &str, params: SessionParameters) -> bool {
        if N == 0 {
            return false;
        }
        if !params.is_resumable() {
            debug!("Engine issued no session id for {}", hostname);
            self.remove(Some(hostname));
            return false;
        }
        if let Some(existing) = self
            .sessions
            .iter_mut()
            .find(|s| s.hostname() == Some(hostname))
        {
            existing.set_parameters(params);
            return existing.is_valid();
        }
        let Some(mut session) = Session::new(Some(hostname)) else {
            warn!("Hostname too long to cache a session ({} bytes)", hostname.len());
            return false;
        };
        session.set_parameters(params);
        if !session.is_valid() {
            return false;
        }
        if self.sessions.is_full() {
            let evicted = self.sessions.remove(0);
            debug!("Evicted session for {:?}", evicted.hostname());
        }
        // Cannot fail: a slot was freed above if the cache was full.
        let _ = self.sessions.push(session);
        true
    }

    /// Delete the entry for `hostname`, if any
    pub fn remove(&mut self, hostname: Option<&str>) {
        let Some(hostname) = hostname else {
            return;
        };
        if let Some(index) = self
            .sessions
            .iter()
            .position(|s| s.hostname() == Some(hostname))
        {
            self.sessions.remove(index);
            debug!("Deleted session index {}", index);
        }
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
