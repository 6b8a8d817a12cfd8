//! Replay settings

use std::fmt;
use std::time::Duration;

/// Default bound on a single live round trip
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// URL scheme used for the live target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    /// `https` when TLS is enabled, `http` otherwise
    #[must_use]
    pub fn from_tls(tls: bool) -> Self {
        if tls {
            Self::Https
        } else {
            Self::Http
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when a class of error shows up in the middle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Stop the run and return the error
    #[default]
    Abort,
    /// Log the error and move on to the next frame
    Skip,
}

/// Settings for a [`crate::replay::Replayer`]
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub scheme: Scheme,
    /// Bound on each live round trip
    pub timeout: Duration,
    /// Policy for truncated or malformed link, IPv4 and TCP headers
    pub decode_errors: ErrorPolicy,
    /// Policy for failed live round trips, including timeouts
    pub transport_errors: ErrorPolicy,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::Http,
            timeout: DEFAULT_TIMEOUT,
            decode_errors: ErrorPolicy::Abort,
            transport_errors: ErrorPolicy::Abort,
        }
    }
}

impl ReplayConfig {
    #[must_use]
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_decode_errors(mut self, policy: ErrorPolicy) -> Self {
        self.decode_errors = policy;
        self
    }

    #[must_use]
    pub fn with_transport_errors(mut self, policy: ErrorPolicy) -> Self {
        self.transport_errors = policy;
        self
    }
}
