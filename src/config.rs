//! Configuration management for the rate limiter.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::ratelimit::{LimitRule, RuleConfig, DEFAULT_PREFIX, MAX_WINDOW};

/// Environment variable prefix for overrides, e.g. `RATEWARDEN__DRIVER=local`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Counter store selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Shared when a host primitive is available, local otherwise
    #[default]
    Auto,
    /// Process-local map
    #[serde(alias = "memory")]
    Local,
    /// Host shared counter primitive
    #[serde(alias = "apcu")]
    Shared,
    /// Daily buckets in Redis
    #[serde(alias = "redis")]
    Distributed,
}

/// Main configuration for the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// When false every check accepts without counting
    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Counter store driver
    #[serde(default)]
    pub driver: Driver,

    /// Namespace prepended to every counter key
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Window length for declarative rules that omit `ttl_secs`
    #[serde(default = "default_window_ttl")]
    pub window_default_ttl_secs: u64,

    /// IP values exempt from IP-keyed rules
    #[serde(default)]
    pub ip_whitelist: Vec<String>,

    /// Local store configuration
    #[serde(default)]
    pub local: LocalStoreConfig,

    /// Distributed store configuration
    #[serde(default)]
    pub distributed: DistributedStoreConfig,

    /// Declarative rules, keyed by operation
    #[serde(default)]
    pub rules: HashMap<String, Vec<RuleConfig>>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enable: default_enable(),
            driver: Driver::default(),
            prefix: default_prefix(),
            window_default_ttl_secs: default_window_ttl(),
            ip_whitelist: Vec::new(),
            local: LocalStoreConfig::default(),
            distributed: DistributedStoreConfig::default(),
            rules: HashMap::new(),
        }
    }
}

fn default_enable() -> bool {
    true
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_window_ttl() -> u64 {
    1
}

/// Local store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// Seconds between expiry sweeps
    #[serde(default = "default_local_sweep")]
    pub sweep_interval_secs: u64,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_local_sweep(),
        }
    }
}

fn default_local_sweep() -> u64 {
    60
}

/// Distributed store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedStoreConfig {
    /// Redis connection URL
    #[serde(default = "default_connection")]
    pub connection: String,

    /// Prefix of the daily bucket names
    #[serde(default = "default_prefix")]
    pub bucket_prefix: String,

    /// Connection establishment deadline in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-command deadline in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Seconds between stale bucket sweeps
    #[serde(default = "default_distributed_sweep")]
    pub sweep_interval_secs: u64,
}

impl Default for DistributedStoreConfig {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            bucket_prefix: default_prefix(),
            connect_timeout_ms: default_connect_timeout(),
            command_timeout_ms: default_command_timeout(),
            sweep_interval_secs: default_distributed_sweep(),
        }
    }
}

fn default_connection() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_command_timeout() -> u64 {
    500
}

fn default_distributed_sweep() -> u64 {
    24 * 60 * 60
}

impl DistributedStoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Scalar settings that may be overridden from the environment.
///
/// Rules are file-only: environment keys are case-folded, operation names
/// are not.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    #[serde(default)]
    enable: Option<bool>,
    #[serde(default)]
    driver: Option<Driver>,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    window_default_ttl_secs: Option<u64>,
    #[serde(default)]
    ip_whitelist: Option<Vec<String>>,
    #[serde(default)]
    distributed: Option<DistributedOverrides>,
}

#[derive(Debug, Default, Deserialize)]
struct DistributedOverrides {
    #[serde(default)]
    connection: Option<String>,
    #[serde(default)]
    bucket_prefix: Option<String>,
    #[serde(default)]
    command_timeout_ms: Option<u64>,
}

impl EnvOverrides {
    fn from_env() -> Result<Self> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ip_whitelist")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| LimiterError::Config(e.to_string()))
    }

    fn apply(self, config: &mut LimiterConfig) {
        if let Some(enable) = self.enable {
            config.enable = enable;
        }
        if let Some(driver) = self.driver {
            config.driver = driver;
        }
        if let Some(prefix) = self.prefix {
            config.prefix = prefix;
        }
        if let Some(ttl) = self.window_default_ttl_secs {
            config.window_default_ttl_secs = ttl;
        }
        if let Some(whitelist) = self.ip_whitelist {
            config.ip_whitelist = whitelist;
        }
        if let Some(distributed) = self.distributed {
            if let Some(connection) = distributed.connection {
                config.distributed.connection = connection;
            }
            if let Some(bucket_prefix) = distributed.bucket_prefix {
                config.distributed.bucket_prefix = bucket_prefix;
            }
            if let Some(timeout) = distributed.command_timeout_ms {
                config.distributed.command_timeout_ms = timeout;
            }
        }
    }
}

impl LimiterConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LimiterConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse limiter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply
    /// `RATEWARDEN__*` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!(path = %path, "Loading limiter configuration");
                let contents = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&contents)
                    .map_err(|e| LimiterError::Config(format!("Failed to parse {}: {}", path, e)))?
            }
            None => LimiterConfig::default(),
        };

        EnvOverrides::from_env()?.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Default window length for declarative rules.
    pub fn window_default_ttl(&self) -> Duration {
        Duration::from_secs(self.window_default_ttl_secs)
    }

    pub fn local_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.local.sweep_interval_secs)
    }

    /// Check values that serde accepts but the limiter cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.window_default_ttl_secs == 0 {
            return Err(LimiterError::Config("window_default_ttl_secs must be positive".to_string()));
        }
        if self.local.sweep_interval_secs == 0 {
            return Err(LimiterError::Config("local.sweep_interval_secs must be positive".to_string()));
        }
        if self.distributed.sweep_interval_secs == 0 {
            return Err(LimiterError::Config(
                "distributed.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.distributed.command_timeout_ms == 0 || self.distributed.connect_timeout_ms == 0 {
            return Err(LimiterError::Config("distributed timeouts must be positive".to_string()));
        }
        let rules = self.compiled_rules()?;
        if self.driver == Driver::Distributed {
            for (operation, rules) in &rules {
                for rule in rules {
                    rule.check_max_ttl(Some(MAX_WINDOW))
                        .map_err(|e| LimiterError::Config(format!("operation {}: {}", operation, e)))?;
                }
            }
        }
        Ok(())
    }

    /// Declarative rules converted to validated [`LimitRule`]s.
    pub fn compiled_rules(&self) -> Result<HashMap<String, Vec<LimitRule>>> {
        let default_ttl = self.window_default_ttl();
        self.rules
            .iter()
            .map(|(operation, configs)| {
                let rules = configs
                    .iter()
                    .map(|c| c.to_rule(default_ttl))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| LimiterError::Config(format!("operation {}: {}", operation, e)))?;
                Ok((operation.clone(), rules))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LimiterConfig::default();
        assert!(config.enable);
        assert_eq!(config.driver, Driver::Auto);
        assert_eq!(config.prefix, "rate-limiter");
        assert_eq!(config.local_sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.distributed.sweep_interval(), Duration::from_secs(86_400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
driver: redis
ip_whitelist: ["127.0.0.1", "10.0.0.2"]
window_default_ttl_secs: 10
distributed:
  connection: redis://cache:6379/2
  command_timeout_ms: 250
rules:
  OrderController-create:
    - limit: 5
      ttl_secs: 1
    - limit: 100
      key: uid
"#;
        let config = LimiterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.driver, Driver::Distributed);
        assert_eq!(config.ip_whitelist.len(), 2);
        assert_eq!(config.distributed.connection, "redis://cache:6379/2");
        assert_eq!(config.distributed.command_timeout(), Duration::from_millis(250));

        let rules = config.compiled_rules().unwrap();
        let order_rules = &rules["OrderController-create"];
        assert_eq!(order_rules.len(), 2);
        assert_eq!(order_rules[1].ttl(), Duration::from_secs(10));
    }

    #[test]
    fn test_driver_aliases() {
        let config = LimiterConfig::from_yaml("driver: memory").unwrap();
        assert_eq!(config.driver, Driver::Local);
        let config = LimiterConfig::from_yaml("driver: apcu").unwrap();
        assert_eq!(config.driver, Driver::Shared);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            LimiterConfig::from_yaml("window_default_ttl_secs: 0"),
            Err(LimiterError::Config(_))
        ));
        assert!(matches!(
            LimiterConfig::from_yaml("rules:\n  op:\n    - limit: 0\n"),
            Err(LimiterError::Config(_))
        ));
        assert!(matches!(
            LimiterConfig::from_yaml("driver: carrier-pigeon"),
            Err(LimiterError::Config(_))
        ));
    }

    #[test]
    fn test_distributed_rules_limited_to_one_day() {
        let too_long = "rules:\n  op:\n    - limit: 1\n      ttl_secs: 172800\n";

        let err = LimiterConfig::from_yaml(&format!("driver: redis\n{}", too_long)).unwrap_err();
        match err {
            LimiterError::Config(msg) => assert!(msg.contains("operation op"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }

        let one_day = "driver: distributed\nrules:\n  op:\n    - limit: 1\n      ttl_secs: 86400\n";
        assert!(LimiterConfig::from_yaml(one_day).is_ok());

        assert!(LimiterConfig::from_yaml(&format!("driver: local\n{}", too_long)).is_ok());
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = LimiterConfig::default();
        let overrides = EnvOverrides {
            driver: Some(Driver::Local),
            ip_whitelist: Some(vec!["127.0.0.1".to_string()]),
            distributed: Some(DistributedOverrides {
                connection: Some("redis://other:6379".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        overrides.apply(&mut config);

        assert_eq!(config.driver, Driver::Local);
        assert_eq!(config.ip_whitelist, vec!["127.0.0.1".to_string()]);
        assert_eq!(config.distributed.connection, "redis://other:6379");
        assert_eq!(config.prefix, "rate-limiter");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = LimiterConfig::load(None).unwrap();
        assert_eq!(config.prefix, "rate-limiter");
    }
}
