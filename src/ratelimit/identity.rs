//! Per-call identity context and key derivation.

use super::rule::KeyStrategy;
use super::whitelist::Whitelist;

/// Identity value used when the context lacks the one a strategy needs.
pub const ANONYMOUS: &str = "anonymous";

/// Who is calling which operation. Built per call, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityContext {
    /// Operation being protected, e.g. `OrderController-create`
    pub operation: String,
    /// Resolved client address
    pub ip: Option<String>,
    /// Session identifier
    pub session_id: Option<String>,
    /// Authenticated user identifier
    pub user_id: Option<String>,
}

impl IdentityContext {
    /// Context for a caller-named operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Context for a controller action, named `<controller>-<action>`.
    pub fn for_action(controller: &str, action: &str) -> Self {
        Self::new(format!("{}-{}", controller, action))
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Outcome of key resolution for one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Count against this key.
    Key(String),
    /// The identity is whitelisted; skip the rule.
    Exempt,
}

/// Derives counter keys from a strategy and an identity context.
#[derive(Debug, Clone, Copy)]
pub struct KeyResolver<'a> {
    prefix: &'a str,
    whitelist: &'a Whitelist,
}

impl<'a> KeyResolver<'a> {
    pub fn new(prefix: &'a str, whitelist: &'a Whitelist) -> Self {
        Self { prefix, whitelist }
    }

    /// Resolve the key for `strategy`.
    ///
    /// Identity-bound strategies produce `<prefix>-<operation>-<tag>-<identity>`;
    /// dynamic and literal strategies produce `<prefix>-<fragment>` so they
    /// can span operations.
    pub fn resolve(&self, strategy: &KeyStrategy, ctx: &IdentityContext) -> Resolution {
        let identity = match strategy {
            KeyStrategy::Ip => {
                let ip = ctx.ip.as_deref().unwrap_or(ANONYMOUS);
                if self.whitelist.contains(ip) {
                    return Resolution::Exempt;
                }
                ip
            }
            KeyStrategy::Session => ctx.session_id.as_deref().unwrap_or(ANONYMOUS),
            KeyStrategy::User => ctx
                .user_id
                .as_deref()
                .or(ctx.session_id.as_deref())
                .unwrap_or(ANONYMOUS),
            KeyStrategy::Dynamic(f) => return Resolution::Key(format!("{}-{}", self.prefix, f.call())),
            KeyStrategy::Literal(value) => return Resolution::Key(format!("{}-{}", self.prefix, value)),
        };

        Resolution::Key(format!(
            "{}-{}-{}-{}",
            self.prefix,
            ctx.operation,
            strategy.tag(),
            identity
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> IdentityContext {
        IdentityContext::for_action("OrderController", "create")
            .with_ip("203.0.113.7")
            .with_session("sess-1")
    }

    #[test]
    fn test_identity_keys() {
        let whitelist = Whitelist::default();
        let resolver = KeyResolver::new("rl", &whitelist);

        assert_eq!(
            resolver.resolve(&KeyStrategy::Ip, &ctx()),
            Resolution::Key("rl-OrderController-create-ip-203.0.113.7".to_string())
        );
        assert_eq!(
            resolver.resolve(&KeyStrategy::Session, &ctx()),
            Resolution::Key("rl-OrderController-create-sid-sess-1".to_string())
        );
        assert_eq!(
            resolver.resolve(&KeyStrategy::User, &ctx().with_user("42")),
            Resolution::Key("rl-OrderController-create-uid-42".to_string())
        );
    }

    #[test]
    fn test_anonymous_user_falls_back_to_session() {
        let whitelist = Whitelist::default();
        let resolver = KeyResolver::new("rl", &whitelist);

        assert_eq!(
            resolver.resolve(&KeyStrategy::User, &ctx()),
            Resolution::Key("rl-OrderController-create-uid-sess-1".to_string())
        );
        assert_eq!(
            resolver.resolve(&KeyStrategy::User, &IdentityContext::new("op")),
            Resolution::Key("rl-op-uid-anonymous".to_string())
        );
    }

    #[test]
    fn test_whitelisted_ip_is_exempt() {
        let whitelist = Whitelist::new(["203.0.113.7"]);
        let resolver = KeyResolver::new("rl", &whitelist);

        assert_eq!(resolver.resolve(&KeyStrategy::Ip, &ctx()), Resolution::Exempt);
        // Only the IP strategy consults the whitelist
        assert!(matches!(resolver.resolve(&KeyStrategy::Session, &ctx()), Resolution::Key(_)));
    }

    #[test]
    fn test_dynamic_and_literal_keys_skip_operation() {
        let whitelist = Whitelist::default();
        let resolver = KeyResolver::new("rl", &whitelist);

        let dynamic = KeyStrategy::dynamic(|| "tenant-9:export".to_string());
        assert_eq!(
            resolver.resolve(&dynamic, &ctx()),
            Resolution::Key("rl-tenant-9:export".to_string())
        );
        assert_eq!(
            resolver.resolve(&KeyStrategy::Literal("sms".to_string()), &ctx()),
            Resolution::Key("rl-sms".to_string())
        );
    }

    #[test]
    fn test_keys_are_stable() {
        let whitelist = Whitelist::default();
        let resolver = KeyResolver::new("rl", &whitelist);
        assert_eq!(
            resolver.resolve(&KeyStrategy::Ip, &ctx()),
            resolver.resolve(&KeyStrategy::Ip, &ctx())
        );
    }
}
