#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

/// Delay applied by `open()` when reopening after a clean, stable session.
pub const SETTLE_DELAY: Duration = Duration::from_millis(1000);
/// Tick period of the heartbeat and reconnect-window checks.
pub const TIMER_RESOLUTION: Duration = Duration::from_secs(1);
/// Frame sent as a heartbeat when no other payload is configured.
pub const DEFAULT_PING_PAYLOAD: &str = "ping";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable configuration of one logical connection.
///
/// ```
/// use std::time::Duration;
///
/// use sockrates::config::ConnectionConfig;
///
/// let config = ConnectionConfig::builder()
///     .max_attempts(5)
///     .heartbeat_interval(Duration::from_secs(30))
///     .build();
///
/// assert_eq!(config.ping_payload(), "ping");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Sub-protocols offered in the opening handshake.
    #[builder(default)]
    pub(crate) protocols: Vec<String>,
    /// Upper bound on consecutive reconnect attempts. `None` and `Some(0)` mean unbounded.
    pub(crate) max_attempts: Option<u32>,
    /// Idle time after which a ping is sent. Zero disables heartbeats.
    #[builder(default = Duration::ZERO)]
    pub(crate) heartbeat_interval: Duration,
    #[builder(default = DEFAULT_PING_PAYLOAD.to_owned(), into)]
    pub(crate) ping_payload: String,
    /// Lifetime of a healthy connection before it is rotated. Zero disables rotation.
    #[builder(default = Duration::ZERO)]
    pub(crate) reconnect_window: Duration,
    /// Upper bound on the opening handshake of a single socket.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    pub(crate) connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// The effective attempt limit, `None` when reconnects are unbounded.
    #[must_use]
    pub fn attempt_limit(&self) -> Option<u32> {
        self.max_attempts.filter(|max| *max > 0)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (!self.heartbeat_interval.is_zero()).then_some(self.heartbeat_interval)
    }

    #[must_use]
    pub fn ping_payload(&self) -> &str {
        &self.ping_payload
    }

    #[must_use]
    pub fn reconnect_window(&self) -> Option<Duration> {
        (!self.reconnect_window.is_zero()).then_some(self.reconnect_window)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_timers_and_bound_nothing() {
        let config = ConnectionConfig::default();

        assert!(config.protocols().is_empty());
        assert_eq!(config.attempt_limit(), None);
        assert_eq!(config.heartbeat_interval(), None);
        assert_eq!(config.reconnect_window(), None);
        assert_eq!(config.ping_payload(), "ping");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn zero_max_attempts_is_unbounded() {
        let config = ConnectionConfig::builder().max_attempts(0).build();
        assert_eq!(config.attempt_limit(), None);

        let config = ConnectionConfig::builder().max_attempts(3).build();
        assert_eq!(config.attempt_limit(), Some(3));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{ "protocols": ["v1"], "ping_payload": "hb" }"#).unwrap();

        assert_eq!(config.protocols(), ["v1".to_owned()]);
        assert_eq!(config.ping_payload(), "hb");
        assert_eq!(config.heartbeat_interval(), None);
    }
}
