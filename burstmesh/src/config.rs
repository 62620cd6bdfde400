//! Node configuration.
//!
//! [`NodeConfig`] is built in code through [`NodeConfigBuilder`];
//! [`NodeConfigFile`] is the JSON file form read by the `burstmesh` binary.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Activation key shared by the in-process and external burst workers.
pub const DEFAULT_ACTIVATION_KEY: &str =
    "IISABPDENLCAEIKFLMBORDQQNLMLBLKJLQELSIJPIESFIAQAJINCMHLDLALMSLAM";

/// Longest accepted runtime budget.
pub const MAX_RUNTIME_LIMIT: Duration = Duration::from_secs(60 * 60);

/// Longest accepted session lifetime.
pub const SESSION_LIMIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Longest accepted value of every other duration setting.
pub const DURATION_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Transport used by in-process burst runners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunnerTransport {
    /// Long-poll `/idle` over HTTP.
    #[default]
    Http,
    /// Register and poll over the UDP task channel.
    Udp,
}

/// Timing budgets for burst dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstConfig {
    /// Budget of each rendezvous step; results are awaited for twice as long.
    pub max_runtime: Duration,
    /// Warm-up of the first worker registered by this process.
    pub first_warmup: Duration,
    /// Warm-up of every later worker registration.
    pub warmup: Duration,
    /// How long a posted result waits for its client.
    pub result_post_window: Duration,
    /// Lifetime of a redeemed session.
    pub session_valid_for: Duration,
    /// Polls of a container slot before a run is reported as pending.
    pub container_poll_attempts: u32,
    /// Delay between container polls.
    pub container_poll_interval: Duration,
    /// Extra wait before the one deferred fetch of a pending container run.
    pub deferred_fetch_delay: Duration,
    /// How long a ready worker may go without polling before it is forgotten.
    pub worker_idle_ttl: Duration,
}

impl BurstConfig {
    /// Budgets derived from a runtime budget, with the usual multiples.
    pub fn with_runtime(max_runtime: Duration) -> Self {
        Self {
            max_runtime,
            first_warmup: Duration::ZERO,
            warmup: max_runtime.saturating_mul(2),
            result_post_window: Duration::from_millis(10),
            session_valid_for: Duration::from_secs(24 * 60 * 60),
            container_poll_attempts: 15,
            container_poll_interval: Duration::from_millis(1),
            deferred_fetch_delay: Duration::from_secs(3),
            worker_idle_ttl: max_runtime.saturating_mul(4),
        }
    }

    /// Age after which an unclaimed pending result is dropped.
    pub fn pending_ttl(&self) -> Duration {
        self.max_runtime.saturating_mul(2)
    }

    /// Outbound HTTP timeout that outlasts a full forwarded run.
    pub fn forward_timeout(&self) -> Duration {
        self.max_runtime
            .saturating_mul(3)
            .saturating_add(Duration::from_secs(1))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_runtime.is_zero() {
            return Err(ConfigError::Invalid("max_runtime must be positive".into()));
        }
        check_at_most("max_runtime", self.max_runtime, MAX_RUNTIME_LIMIT)?;
        check_at_most("session_valid_for", self.session_valid_for, SESSION_LIMIT)?;
        for (name, value) in [
            ("first_warmup", self.first_warmup),
            ("warmup", self.warmup),
            ("result_post_window", self.result_post_window),
            ("container_poll_interval", self.container_poll_interval),
            ("deferred_fetch_delay", self.deferred_fetch_delay),
            ("worker_idle_ttl", self.worker_idle_ttl),
        ] {
            check_at_most(name, value, DURATION_LIMIT)?;
        }
        Ok(())
    }
}

fn check_at_most(name: &str, value: Duration, limit: Duration) -> Result<(), ConfigError> {
    if value > limit {
        return Err(ConfigError::Invalid(format!(
            "{name} must be at most {limit:?}, got {value:?}"
        )));
    }
    Ok(())
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self::with_runtime(Duration::from_secs(2))
    }
}

/// Configuration of one mesh node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// HTTP listen address.
    pub http_listen: SocketAddr,
    /// UDP task channel listen address; `None` disables the channel.
    pub udp_listen: Option<SocketAddr>,
    /// Public site root of this node, e.g. `http://10.0.0.1:7777`.
    pub site_url: String,
    /// Address this node is known by in the registry and the key index.
    /// Defaults to `site_url`.
    pub advertise_address: Option<String>,
    /// Administrator key for `/node`, `/index` and `/containers`.
    pub admin_key: String,
    /// Key workers present to obtain a worker key.
    pub activation_key: String,
    /// Burst dispatch budgets.
    pub burst: BurstConfig,
    /// Timeout of every outbound HTTP request.
    pub http_client_timeout: Duration,
    /// Interval of the background sweeper.
    pub sweep_interval: Duration,
    /// Largest datagram sent on the UDP channel.
    pub max_datagram: usize,
    /// Number of in-process burst runners.
    pub local_runners: usize,
    /// Transport of the in-process runners.
    pub runner_transport: RunnerTransport,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let burst = BurstConfig::default();
        Self {
            http_listen: SocketAddr::from(([127, 0, 0, 1], 7777)),
            udp_listen: Some(SocketAddr::from(([127, 0, 0, 1], 7779))),
            site_url: "http://127.0.0.1:7777".to_string(),
            advertise_address: None,
            admin_key: crate::key::generate_unique_key(),
            activation_key: DEFAULT_ACTIVATION_KEY.to_string(),
            http_client_timeout: burst.forward_timeout(),
            burst,
            sweep_interval: Duration::from_secs(1),
            max_datagram: 1024,
            local_runners: 0,
            runner_transport: RunnerTransport::Http,
        }
    }
}

impl NodeConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }

    /// Address used for this node in the registry and the key index.
    pub fn own_address(&self) -> &str {
        self.advertise_address
            .as_deref()
            .unwrap_or(self.site_url.as_str())
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.site_url.starts_with("http://") || self.site_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "site_url must start with http:// or https://, got {:?}",
                self.site_url
            )));
        }
        if self.admin_key.is_empty() || self.activation_key.is_empty() {
            return Err(ConfigError::Invalid("keys must not be empty".into()));
        }
        self.burst.validate()?;
        check_at_most("http_client_timeout", self.http_client_timeout, DURATION_LIMIT)?;
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("sweep_interval must be positive".into()));
        }
        check_at_most("sweep_interval", self.sweep_interval, DURATION_LIMIT)?;
        if self.max_datagram == 0 {
            return Err(ConfigError::Invalid("max_datagram must be positive".into()));
        }
        if self.local_runners > 0
            && self.runner_transport == RunnerTransport::Udp
            && self.udp_listen.is_none()
        {
            return Err(ConfigError::Invalid(
                "udp runners need the UDP task channel".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`NodeConfig`].
#[derive(Debug, Clone, Default)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Set the HTTP listen address.
    pub fn http_listen(mut self, address: SocketAddr) -> Self {
        self.config.http_listen = address;
        self
    }

    /// Set or disable the UDP listen address.
    pub fn udp_listen(mut self, address: Option<SocketAddr>) -> Self {
        self.config.udp_listen = address;
        self
    }

    /// Set the public site root.
    pub fn site_url(mut self, url: impl Into<String>) -> Self {
        self.config.site_url = url.into();
        self
    }

    /// Set the advertised address.
    pub fn advertise_address(mut self, address: impl Into<String>) -> Self {
        self.config.advertise_address = Some(address.into());
        self
    }

    /// Set the administrator key.
    pub fn admin_key(mut self, key: impl Into<String>) -> Self {
        self.config.admin_key = key.into();
        self
    }

    /// Set the worker activation key.
    pub fn activation_key(mut self, key: impl Into<String>) -> Self {
        self.config.activation_key = key.into();
        self
    }

    /// Set the burst budgets.
    pub fn burst(mut self, burst: BurstConfig) -> Self {
        self.config.burst = burst;
        self
    }

    /// Set the outbound HTTP timeout.
    pub fn http_client_timeout(mut self, timeout: Duration) -> Self {
        self.config.http_client_timeout = timeout;
        self
    }

    /// Set the sweeper interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Set the largest UDP datagram.
    pub fn max_datagram(mut self, size: usize) -> Self {
        self.config.max_datagram = size;
        self
    }

    /// Run `count` in-process burst runners over `transport`.
    pub fn local_runners(mut self, count: usize, transport: RunnerTransport) -> Self {
        self.config.local_runners = count;
        self.config.runner_transport = transport;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<NodeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// JSON file form of [`NodeConfig`]. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfigFile {
    /// HTTP listen address.
    pub http_listen: Option<SocketAddr>,
    /// UDP listen address.
    pub udp_listen: Option<SocketAddr>,
    /// Disable the UDP task channel.
    pub disable_udp: bool,
    /// Public site root.
    pub site_url: Option<String>,
    /// Advertised address.
    pub advertise_address: Option<String>,
    /// Administrator key.
    pub admin_key: Option<String>,
    /// Worker activation key.
    pub activation_key: Option<String>,
    /// Runtime budget in milliseconds.
    pub max_runtime_ms: Option<u64>,
    /// Session lifetime in seconds.
    pub session_valid_secs: Option<u64>,
    /// Outbound HTTP timeout in milliseconds.
    pub http_client_timeout_ms: Option<u64>,
    /// Largest UDP datagram in bytes.
    pub max_datagram: Option<usize>,
    /// Number of in-process burst runners.
    pub local_runners: Option<usize>,
    /// Transport of the in-process runners.
    pub runner_transport: Option<RunnerTransport>,
}

impl NodeConfigFile {
    /// Read a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Overlay the file onto the defaults and validate.
    pub fn into_config(self) -> Result<NodeConfig, ConfigError> {
        let mut config = NodeConfig::default();
        if let Some(runtime) = self.max_runtime_ms {
            config.burst = BurstConfig::with_runtime(Duration::from_millis(runtime));
            config.http_client_timeout = config.burst.forward_timeout();
        }
        if let Some(secs) = self.session_valid_secs {
            config.burst.session_valid_for = Duration::from_secs(secs);
        }
        if let Some(address) = self.http_listen {
            config.http_listen = address;
        }
        if self.disable_udp {
            config.udp_listen = None;
        } else if let Some(address) = self.udp_listen {
            config.udp_listen = Some(address);
        }
        if let Some(url) = self.site_url {
            config.site_url = url;
        }
        config.advertise_address = self.advertise_address.or(config.advertise_address);
        if let Some(key) = self.admin_key {
            config.admin_key = key;
        }
        if let Some(key) = self.activation_key {
            config.activation_key = key;
        }
        if let Some(timeout) = self.http_client_timeout_ms {
            config.http_client_timeout = Duration::from_millis(timeout);
        }
        if let Some(size) = self.max_datagram {
            config.max_datagram = size;
        }
        if let Some(count) = self.local_runners {
            config.local_runners = count;
        }
        if let Some(transport) = self.runner_transport {
            config.runner_transport = transport;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.own_address(), "http://127.0.0.1:7777");
        assert_eq!(config.burst.warmup, config.burst.max_runtime * 2);
        assert_eq!(config.burst.pending_ttl(), config.burst.max_runtime * 2);
    }

    #[test]
    fn test_builder() {
        let config = NodeConfig::builder()
            .site_url("http://10.0.0.1:7777")
            .advertise_address("10.0.0.1:7777")
            .admin_key("ADMIN")
            .build()
            .unwrap();
        assert_eq!(config.own_address(), "10.0.0.1:7777");
        assert_eq!(config.admin_key, "ADMIN");
    }

    #[test]
    fn test_builder_rejects_bad_site_url() {
        let err = NodeConfig::builder().site_url("ftp://x").build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_udp_runners_need_udp() {
        let err = NodeConfig::builder()
            .udp_listen(None)
            .local_runners(1, RunnerTransport::Udp)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_config_file_overlay() {
        let file: NodeConfigFile = serde_json::from_str(
            r#"{"max_runtime_ms": 500, "disable_udp": true, "admin_key": "A",
                "runner_transport": "http", "local_runners": 2}"#,
        )
        .unwrap();
        let config = file.into_config().unwrap();
        assert_eq!(config.burst.max_runtime, Duration::from_millis(500));
        assert_eq!(config.burst.warmup, Duration::from_secs(1));
        assert_eq!(config.udp_listen, None);
        assert_eq!(config.admin_key, "A");
        assert_eq!(config.local_runners, 2);
    }

    #[test]
    fn test_config_file_rejects_out_of_range_durations() {
        let file = NodeConfigFile {
            session_valid_secs: Some(u64::MAX),
            ..NodeConfigFile::default()
        };
        assert!(matches!(file.into_config(), Err(ConfigError::Invalid(_))));

        let file = NodeConfigFile {
            max_runtime_ms: Some(u64::MAX),
            ..NodeConfigFile::default()
        };
        assert!(matches!(file.into_config(), Err(ConfigError::Invalid(_))));

        let file = NodeConfigFile {
            http_client_timeout_ms: Some(u64::MAX),
            ..NodeConfigFile::default()
        };
        assert!(matches!(file.into_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_derived_budgets_saturate() {
        let burst = BurstConfig::with_runtime(Duration::MAX);
        assert_eq!(burst.warmup, Duration::MAX);
        assert_eq!(burst.worker_idle_ttl, Duration::MAX);
        assert_eq!(burst.pending_ttl(), Duration::MAX);
        assert_eq!(burst.forward_timeout(), Duration::MAX);

        let err = NodeConfig::builder().burst(burst).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_sweep_interval_bounds() {
        let err = NodeConfig::builder()
            .sweep_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(NodeConfig::builder()
            .sweep_interval(DURATION_LIMIT + Duration::from_secs(1))
            .build()
            .is_err());
    }

    #[test]
    fn test_config_file_rejects_unknown_fields() {
        assert!(serde_json::from_str::<NodeConfigFile>(r#"{"bogus": 1}"#).is_err());
    }
}
