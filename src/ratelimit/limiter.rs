//! Core rate limiter: resolves keys, counts hits and decides.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use super::decision::{Decision, Rejection};
use super::distributed::DistributedStore;
use super::identity::{IdentityContext, KeyResolver, Resolution};
use super::local::LocalStore;
use super::redis_buckets::RedisBuckets;
use super::rule::{LimitRule, DEFAULT_STATUS};
use super::shared::{SharedCounters, SharedStore};
use super::store::CounterStore;
use super::sweep::{spawn_sweeper, SweeperHandle};
use super::whitelist::Whitelist;
use crate::config::{Driver, LimiterConfig};
use crate::error::{LimiterError, Result};

/// Default key namespace.
pub const DEFAULT_PREFIX: &str = "rate-limiter";

/// The rate limiter.
///
/// Holds no per-call state: every check resolves its keys, increments the
/// store and compares. Several independently configured limiters may
/// coexist in one process.
#[derive(Debug)]
pub struct Limiter {
    store: Arc<dyn CounterStore>,
    whitelist: Whitelist,
    prefix: String,
    enabled: bool,
    /// Rules registered per operation
    rules: HashMap<String, Vec<LimitRule>>,
    sweeper: Option<SweeperHandle>,
}

/// Builder for a [`Limiter`] over an existing store.
#[derive(Debug)]
pub struct LimiterBuilder {
    store: Arc<dyn CounterStore>,
    whitelist: Whitelist,
    prefix: String,
    enabled: bool,
}

impl LimiterBuilder {
    pub fn whitelist(mut self, whitelist: Whitelist) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn build(self) -> Limiter {
        Limiter {
            store: self.store,
            whitelist: self.whitelist,
            prefix: self.prefix,
            enabled: self.enabled,
            rules: HashMap::new(),
            sweeper: None,
        }
    }
}

impl Limiter {
    /// Start building a limiter over `store`.
    pub fn builder(store: Arc<dyn CounterStore>) -> LimiterBuilder {
        LimiterBuilder {
            store,
            whitelist: Whitelist::default(),
            prefix: DEFAULT_PREFIX.to_string(),
            enabled: true,
        }
    }

    /// Build a limiter from configuration, start its expiry sweeper and
    /// register the configured rules.
    ///
    /// `host_counters` is the host's shared counter primitive, if it has one.
    /// Must be called from within a Tokio runtime.
    pub async fn from_config(
        config: &LimiterConfig,
        host_counters: Option<Arc<dyn SharedCounters>>,
    ) -> Result<Self> {
        config.validate()?;

        let store = open_store(config, host_counters).await?;
        info!(store = store.name(), prefix = %config.prefix, enabled = config.enable, "Rate limiter initialized");

        let mut limiter = Limiter::builder(store)
            .whitelist(Whitelist::new(config.ip_whitelist.iter().cloned()))
            .prefix(config.prefix.clone())
            .enabled(config.enable)
            .build();

        for (operation, rules) in config.compiled_rules()? {
            limiter.register(operation, rules)?;
        }

        limiter.start_sweeper();
        Ok(limiter)
    }

    /// Start the background expiry sweeper if the store needs one and it is
    /// not already running.
    pub fn start_sweeper(&mut self) {
        if self.sweeper.is_none() {
            self.sweeper = spawn_sweeper(self.store.clone());
        }
    }

    /// Register the rules that apply to `operation`, in evaluation order.
    ///
    /// Replaces any rules registered earlier for the same operation.
    pub fn register(&mut self, operation: impl Into<String>, rules: Vec<LimitRule>) -> Result<()> {
        let operation = operation.into();
        for rule in &rules {
            rule.check_max_ttl(self.store.max_ttl())?;
        }
        debug!(operation = %operation, rules = rules.len(), "Registered rate limit rules");
        self.rules.insert(operation, rules);
        Ok(())
    }

    /// Rules registered for `operation`.
    pub fn rules_for(&self, operation: &str) -> &[LimitRule] {
        self.rules.get(operation).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Evaluate the rules registered for `ctx.operation`.
    ///
    /// Operations without registered rules are accepted.
    pub async fn check(&self, ctx: &IdentityContext) -> Result<Decision> {
        self.check_rules(self.rules_for(&ctx.operation), ctx).await
    }

    /// Evaluate `rules` in order; the first rejection stops evaluation.
    ///
    /// Store failures are returned as errors, never as a decision.
    pub async fn check_rules(&self, rules: &[LimitRule], ctx: &IdentityContext) -> Result<Decision> {
        if !self.enabled {
            return Ok(Decision::Accept);
        }

        let resolver = KeyResolver::new(&self.prefix, &self.whitelist);
        for rule in rules {
            rule.check_max_ttl(self.store.max_ttl())?;

            let key = match resolver.resolve(rule.key(), ctx) {
                Resolution::Key(key) => key,
                Resolution::Exempt => {
                    trace!(operation = %ctx.operation, "Identity whitelisted, skipping rule");
                    continue;
                }
            };

            let count = self.store.increase(&key, rule.ttl(), 1).await?;
            trace!(key = %key, count = count, limit = rule.limit(), "Checked rate limit");

            if count > rule.limit() {
                debug!(key = %key, count = count, limit = rule.limit(), "Rate limit exceeded");
                return Ok(Decision::Reject(Rejection::new(
                    rule.message(),
                    rule.status(),
                    rule.limit(),
                    count,
                )));
            }
        }

        Ok(Decision::Accept)
    }

    /// Ad-hoc check against `<prefix>-<key>` without registered rules.
    pub async fn check_key(&self, key: &str, limit: u64, ttl: Duration, message: &str) -> Result<Decision> {
        let rule = LimitRule::new(limit, ttl)?;
        rule.check_max_ttl(self.store.max_ttl())?;

        if !self.enabled {
            return Ok(Decision::Accept);
        }

        let key = format!("{}-{}", self.prefix, key);
        let count = self.store.increase(&key, ttl, 1).await?;
        trace!(key = %key, count = count, limit = limit, "Checked rate limit");

        if count > limit {
            debug!(key = %key, count = count, limit = limit, "Rate limit exceeded");
            return Ok(Decision::Reject(Rejection::new(message, DEFAULT_STATUS, limit, count)));
        }
        Ok(Decision::Accept)
    }

    /// The counter store in use.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a background sweeper is attached.
    pub fn has_sweeper(&self) -> bool {
        self.sweeper.is_some()
    }
}

/// Open the counter store selected by `config.driver`.
///
/// `auto` picks the shared store when an enabled host primitive is given
/// and the local store otherwise. An explicit driver whose backend is
/// unusable fails instead of falling back.
pub async fn open_store(
    config: &LimiterConfig,
    host_counters: Option<Arc<dyn SharedCounters>>,
) -> Result<Arc<dyn CounterStore>> {
    let driver = match config.driver {
        Driver::Auto => match &host_counters {
            Some(counters) if counters.is_enabled() => Driver::Shared,
            _ => Driver::Local,
        },
        driver => driver,
    };
    info!(requested = ?config.driver, selected = ?driver, "Selecting counter store");

    let store: Arc<dyn CounterStore> = match driver {
        Driver::Shared => {
            let counters = host_counters.ok_or_else(|| {
                LimiterError::BackendUnavailable("no shared counter primitive available".to_string())
            })?;
            Arc::new(SharedStore::new(counters)?)
        }
        Driver::Distributed => {
            let distributed = &config.distributed;
            let backend = RedisBuckets::connect(
                &distributed.connection,
                distributed.connect_timeout(),
                distributed.command_timeout(),
            )
            .await?;
            Arc::new(
                DistributedStore::new(Arc::new(backend), distributed.bucket_prefix.clone())
                    .await?
                    .with_sweep_interval(distributed.sweep_interval()),
            )
        }
        Driver::Local | Driver::Auto => {
            Arc::new(LocalStore::new().with_sweep_interval(config.local_sweep_interval()))
        }
    };

    Ok(store)
}
