//! Identities exempt from IP-keyed limits.

use std::collections::HashSet;

/// Immutable set of exempt IP values, matched by exact string equality.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    entries: HashSet<String>,
}

impl Whitelist {
    /// Build a whitelist from configured values.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        self.entries.contains(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_only() {
        let whitelist = Whitelist::new(["127.0.0.1", "10.0.0.0/8"]);

        assert!(whitelist.contains("127.0.0.1"));
        assert!(!whitelist.contains("127.0.0.10"));
        assert!(!whitelist.contains("10.1.2.3"));
        assert!(whitelist.contains("10.0.0.0/8"));
        assert_eq!(whitelist.len(), 2);
    }
}
