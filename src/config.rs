//! Configuration for Courier
//!
//! Centralized connection settings with sensible defaults.

use std::time::Duration;

/// Connection and session configuration for a [`Client`](crate::Client)
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Store host name or address
    pub host: String,

    /// Store TCP port
    pub port: u16,

    /// Socket read/write timeout. `None` blocks indefinitely
    pub timeout: Option<Duration>,

    // -------------------------------------------------------------------------
    // Session Configuration
    // -------------------------------------------------------------------------
    /// Keyspace selected when the connection is (re)established
    pub db: i64,

    /// Credential sent with AUTH on connect
    pub password: Option<String>,

    // -------------------------------------------------------------------------
    // Retry Policy
    // -------------------------------------------------------------------------
    /// Retry a command once after a transport failure
    pub safe: bool,

    /// Backoff slept before the retry
    pub safe_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            timeout: None,
            db: 0,
            password: None,
            safe: false,
            safe_wait: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `host:port` form used for logging
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the store host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the store port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the socket timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set the initial keyspace
    pub fn db(mut self, db: i64) -> Self {
        self.config.db = db;
        self
    }

    /// Set the AUTH credential
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Enable or disable the safe retry policy
    pub fn safe(mut self, safe: bool) -> Self {
        self.config.safe = safe;
        self
    }

    /// Set the backoff used by the safe retry policy
    pub fn safe_wait(mut self, wait: Duration) -> Self {
        self.config.safe_wait = wait;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
