//! Engine configuration
//!
//! Both roles share the parent domain; everything else is per-role. The
//! defaults match the CLI surface: port 53 on all interfaces for the
//! server, a five-second poll ceiling and a one-minute prune interval.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default server bind address
pub const DEFAULT_LISTEN: &str = "0.0.0.0:53";

/// Default maximum client poll interval
pub const DEFAULT_POLL_MAX: Duration = Duration::from_secs(5);

/// Default interval between idle-session sweeps
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Server-role configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Parent domain the server is authoritative for
    pub domain: String,
    /// UDP listen address
    pub listen: SocketAddr,
    /// Upstream `host:port` each session connects to
    pub upstream: String,
    /// Interval between idle-session sweeps
    pub prune_interval: Duration,
}

impl ServerConfig {
    /// Create a server configuration with default listen address and
    /// prune interval
    pub fn new(domain: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            listen: DEFAULT_LISTEN.parse().expect("default listen address"),
            upstream: upstream.into(),
            prune_interval: DEFAULT_PRUNE_INTERVAL,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim_matches('.').is_empty() {
            return Err(Error::Config("parent domain must not be empty".into()));
        }
        if self.upstream.is_empty() {
            return Err(Error::Config("upstream address must not be empty".into()));
        }
        if self.prune_interval.is_zero() {
            return Err(Error::Config("prune interval must be nonzero".into()));
        }
        Ok(())
    }
}

/// Client-role configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Parent domain to append to every query
    pub domain: String,
    /// Maximum poll interval (before jitter)
    pub poll_max: Duration,
}

impl ClientConfig {
    /// Create a client configuration with the default poll ceiling
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            poll_max: DEFAULT_POLL_MAX,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim_matches('.').is_empty() {
            return Err(Error::Config("parent domain must not be empty".into()));
        }
        if self.poll_max.is_zero() {
            return Err(Error::Config("poll interval must be nonzero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::new("example.com", "127.0.0.1:22");
        assert_eq!(config.listen, "0.0.0.0:53".parse::<SocketAddr>().unwrap());
        assert_eq!(config.prune_interval, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_domain_rejected() {
        assert!(ServerConfig::new("", "127.0.0.1:22").validate().is_err());
        assert!(ServerConfig::new("...", "127.0.0.1:22").validate().is_err());
        assert!(ClientConfig::new("").validate().is_err());
    }

    #[test]
    fn test_empty_upstream_rejected() {
        assert!(ServerConfig::new("example.com", "").validate().is_err());
    }
}
