//! Realtime core configuration

use std::time::Duration;

/// Default greeting written to every new connection.
pub const DEFAULT_GREETING: &str = "hello there";

/// Tunables for the registry, connection handles and liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Frame written to a connection right after it is accepted
    pub greeting: String,
    /// Upper bound for each probe step (lock, heartbeat write, reply read)
    pub probe_timeout: Duration,
    /// How long disposal waits for an in-flight operation before skipping the close frame
    pub close_timeout: Duration,
    /// Interval between background liveness sweeps
    pub sweep_interval: Duration,
    /// Maximum number of connections probed at the same time
    pub max_concurrent_probes: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            probe_timeout: Duration::from_millis(300),
            close_timeout: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(30),
            max_concurrent_probes: 256,
        }
    }
}

impl RealtimeConfig {
    pub fn builder() -> RealtimeConfigBuilder {
        RealtimeConfigBuilder::new()
    }
}

/// Errors that can occur when building a `RealtimeConfig`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeConfigError {
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Invalid greeting: {0}")]
    InvalidGreeting(String),
}

/// Validated builder for `RealtimeConfig`
///
/// Unset fields fall back to [`RealtimeConfig::default`] on build.
#[derive(Debug, Clone, Default)]
pub struct RealtimeConfigBuilder {
    greeting: Option<String>,
    probe_timeout: Option<Duration>,
    close_timeout: Option<Duration>,
    sweep_interval: Option<Duration>,
    max_concurrent_probes: Option<usize>,
}

impl RealtimeConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the greeting frame (non-empty, at most 1KB)
    pub fn greeting(mut self, greeting: impl Into<String>) -> Result<Self, RealtimeConfigError> {
        let greeting = greeting.into();
        if greeting.is_empty() {
            return Err(RealtimeConfigError::InvalidGreeting(
                "greeting must not be empty".to_string(),
            ));
        }
        if greeting.len() > 1024 {
            return Err(RealtimeConfigError::InvalidGreeting(
                "greeting cannot exceed 1024 bytes".to_string(),
            ));
        }
        self.greeting = Some(greeting);
        Ok(self)
    }

    /// Set the per-step probe timeout (must be between 10ms and 10s)
    pub fn probe_timeout(mut self, timeout: Duration) -> Result<Self, RealtimeConfigError> {
        if timeout < Duration::from_millis(10) {
            return Err(RealtimeConfigError::InvalidTimeout(
                "probe_timeout must be at least 10 milliseconds".to_string(),
            ));
        }
        if timeout > Duration::from_secs(10) {
            return Err(RealtimeConfigError::InvalidTimeout(
                "probe_timeout cannot exceed 10 seconds".to_string(),
            ));
        }
        self.probe_timeout = Some(timeout);
        Ok(self)
    }

    /// Set the disposal timeout (must be between 10ms and 60s)
    pub fn close_timeout(mut self, timeout: Duration) -> Result<Self, RealtimeConfigError> {
        if timeout < Duration::from_millis(10) {
            return Err(RealtimeConfigError::InvalidTimeout(
                "close_timeout must be at least 10 milliseconds".to_string(),
            ));
        }
        if timeout > Duration::from_secs(60) {
            return Err(RealtimeConfigError::InvalidTimeout(
                "close_timeout cannot exceed 60 seconds".to_string(),
            ));
        }
        self.close_timeout = Some(timeout);
        Ok(self)
    }

    /// Set the sweep interval (must be between 1s and 1h)
    pub fn sweep_interval(mut self, interval: Duration) -> Result<Self, RealtimeConfigError> {
        if interval < Duration::from_secs(1) {
            return Err(RealtimeConfigError::InvalidTimeout(
                "sweep_interval must be at least 1 second".to_string(),
            ));
        }
        if interval > Duration::from_secs(3600) {
            return Err(RealtimeConfigError::InvalidTimeout(
                "sweep_interval cannot exceed 1 hour".to_string(),
            ));
        }
        self.sweep_interval = Some(interval);
        Ok(self)
    }

    /// Set how many probes may run at once (must be between 1 and 65,536)
    pub fn max_concurrent_probes(mut self, max: usize) -> Result<Self, RealtimeConfigError> {
        if max == 0 {
            return Err(RealtimeConfigError::InvalidLimit(
                "max_concurrent_probes must be at least 1".to_string(),
            ));
        }
        if max > 65_536 {
            return Err(RealtimeConfigError::InvalidLimit(
                "max_concurrent_probes cannot exceed 65,536".to_string(),
            ));
        }
        self.max_concurrent_probes = Some(max);
        Ok(self)
    }

    pub fn build(self) -> RealtimeConfig {
        let defaults = RealtimeConfig::default();

        RealtimeConfig {
            greeting: self.greeting.unwrap_or(defaults.greeting),
            probe_timeout: self.probe_timeout.unwrap_or(defaults.probe_timeout),
            close_timeout: self.close_timeout.unwrap_or(defaults.close_timeout),
            sweep_interval: self.sweep_interval.unwrap_or(defaults.sweep_interval),
            max_concurrent_probes: self
                .max_concurrent_probes
                .unwrap_or(defaults.max_concurrent_probes),
        }
    }
}
