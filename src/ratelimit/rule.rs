//! Limit rules and their declarative configuration form.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};

/// Message used when a rule does not set one.
pub const DEFAULT_MESSAGE: &str = "Too Many Requests";

/// Status code suggested for rejections when a rule does not set one.
pub const DEFAULT_STATUS: u16 = 429;

/// A caller-supplied function producing a custom key fragment.
#[derive(Clone)]
pub struct DynamicKey(Arc<dyn Fn() -> String + Send + Sync>);

impl DynamicKey {
    /// Invoke the function.
    pub fn call(&self) -> String {
        (self.0)()
    }
}

impl fmt::Debug for DynamicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DynamicKey(..)")
    }
}

/// How the identity component of a window key is derived.
#[derive(Debug, Clone)]
pub enum KeyStrategy {
    /// The caller's resolved client address. Subject to the whitelist.
    Ip,
    /// The session identifier.
    Session,
    /// The user identifier, falling back to the session for anonymous users.
    User,
    /// A custom fragment computed at check time.
    Dynamic(DynamicKey),
    /// A fixed string, for limits on a shared resource.
    Literal(String),
}

impl KeyStrategy {
    /// Build a dynamic strategy from a closure.
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        KeyStrategy::Dynamic(DynamicKey(Arc::new(f)))
    }

    /// Parse the declarative form: `ip`, `uid`, `sid`, anything else is literal.
    pub fn parse(value: &str) -> Self {
        match value {
            "ip" => KeyStrategy::Ip,
            "uid" => KeyStrategy::User,
            "sid" => KeyStrategy::Session,
            other => KeyStrategy::Literal(other.to_string()),
        }
    }

    /// Tag embedded in window keys for identity-bound strategies.
    pub fn tag(&self) -> &str {
        match self {
            KeyStrategy::Ip => "ip",
            KeyStrategy::User => "uid",
            KeyStrategy::Session => "sid",
            KeyStrategy::Dynamic(_) => "fn",
            KeyStrategy::Literal(value) => value,
        }
    }
}

impl Default for KeyStrategy {
    fn default() -> Self {
        KeyStrategy::Ip
    }
}

/// A limit on one protected operation: at most `limit` hits per `ttl` window.
#[derive(Debug, Clone)]
pub struct LimitRule {
    limit: u64,
    ttl: Duration,
    key: KeyStrategy,
    message: String,
    status: u16,
}

impl LimitRule {
    /// Create a rule keyed by client IP with the default message.
    pub fn new(limit: u64, ttl: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(LimiterError::InvalidRule("limit must be greater than zero".to_string()));
        }
        if ttl.as_millis() == 0 {
            return Err(LimiterError::InvalidRule(
                "ttl must be at least one millisecond".to_string(),
            ));
        }
        Ok(Self {
            limit,
            ttl,
            key: KeyStrategy::default(),
            message: DEFAULT_MESSAGE.to_string(),
            status: DEFAULT_STATUS,
        })
    }

    /// Set the key strategy.
    pub fn with_key(mut self, key: KeyStrategy) -> Self {
        self.key = key;
        self
    }

    /// Set the rejection message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the suggested rejection status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(&self) -> &KeyStrategy {
        &self.key
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reject rules whose window is longer than a store can hold.
    pub fn check_max_ttl(&self, max_ttl: Option<Duration>) -> Result<()> {
        match max_ttl {
            Some(max) if self.ttl > max => Err(LimiterError::InvalidRule(format!(
                "ttl of {:?} exceeds the store maximum of {:?}",
                self.ttl, max
            ))),
            _ => Ok(()),
        }
    }
}

/// Declarative rule as written in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Number of hits allowed per window
    pub limit: u64,
    /// Window length in seconds; the configured default when absent
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// `ip`, `uid`, `sid` or a literal key
    #[serde(default = "default_key")]
    pub key: String,
    /// Message carried by rejections
    #[serde(default = "default_message")]
    pub message: String,
    /// Suggested status code for rejections
    #[serde(default = "default_status")]
    pub status: u16,
}

fn default_key() -> String {
    "ip".to_string()
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

fn default_status() -> u16 {
    DEFAULT_STATUS
}

impl RuleConfig {
    /// Convert to a validated rule.
    pub fn to_rule(&self, default_ttl: Duration) -> Result<LimitRule> {
        let ttl = self.ttl_secs.map(Duration::from_secs).unwrap_or(default_ttl);
        Ok(LimitRule::new(self.limit, ttl)?
            .with_key(KeyStrategy::parse(&self.key))
            .with_message(self.message.clone())
            .with_status(self.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_defaults() {
        let rule = LimitRule::new(10, Duration::from_secs(1)).unwrap();
        assert_eq!(rule.limit(), 10);
        assert_eq!(rule.message(), "Too Many Requests");
        assert_eq!(rule.status(), 429);
        assert!(matches!(rule.key(), KeyStrategy::Ip));
    }

    #[test]
    fn test_rule_validation() {
        assert!(matches!(
            LimitRule::new(0, Duration::from_secs(1)),
            Err(LimiterError::InvalidRule(_))
        ));
        assert!(matches!(
            LimitRule::new(1, Duration::from_micros(10)),
            Err(LimiterError::InvalidRule(_))
        ));
    }

    #[test]
    fn test_max_ttl() {
        let day = Duration::from_secs(86_400);
        let rule = LimitRule::new(1, day).unwrap();
        assert!(rule.check_max_ttl(Some(day)).is_ok());
        assert!(rule.check_max_ttl(None).is_ok());

        let rule = LimitRule::new(1, day + Duration::from_secs(1)).unwrap();
        assert!(matches!(rule.check_max_ttl(Some(day)), Err(LimiterError::InvalidRule(_))));
    }

    #[test]
    fn test_parse_key_strategy() {
        assert!(matches!(KeyStrategy::parse("ip"), KeyStrategy::Ip));
        assert!(matches!(KeyStrategy::parse("uid"), KeyStrategy::User));
        assert!(matches!(KeyStrategy::parse("sid"), KeyStrategy::Session));
        match KeyStrategy::parse("global-export") {
            KeyStrategy::Literal(value) => assert_eq!(value, "global-export"),
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_dynamic_strategy() {
        let strategy = KeyStrategy::dynamic(|| "order-42".to_string());
        assert_eq!(strategy.tag(), "fn");
        match strategy {
            KeyStrategy::Dynamic(f) => assert_eq!(f.call(), "order-42"),
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_rule_config_from_yaml() {
        let yaml = r#"
- limit: 5
  ttl_secs: 60
  key: uid
  message: Slow down
- limit: 100
"#;
        let configs: Vec<RuleConfig> = serde_yaml::from_str(yaml).unwrap();
        let rules: Vec<LimitRule> = configs
            .iter()
            .map(|c| c.to_rule(Duration::from_secs(1)).unwrap())
            .collect();

        assert_eq!(rules[0].ttl(), Duration::from_secs(60));
        assert!(matches!(rules[0].key(), KeyStrategy::User));
        assert_eq!(rules[0].message(), "Slow down");

        assert_eq!(rules[1].ttl(), Duration::from_secs(1));
        assert!(matches!(rules[1].key(), KeyStrategy::Ip));
        assert_eq!(rules[1].status(), 429);
    }
}
