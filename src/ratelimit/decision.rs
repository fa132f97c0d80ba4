//! Outcome of a rate limit check.

use std::fmt;

use serde_json::{json, Map, Value};

/// Result of evaluating one or more rules.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Every applicable rule is within its limit.
    Accept,
    /// A rule's limit was exceeded.
    Reject(Rejection),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accept)
    }

    pub fn is_rejected(&self) -> bool {
        !self.is_accepted()
    }

    /// The rejection, if any.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Decision::Accept => None,
            Decision::Reject(rejection) => Some(rejection),
        }
    }

    /// Turn a rejection into an `Err` so callers can use `?`.
    pub fn into_result(self) -> std::result::Result<(), Rejection> {
        match self {
            Decision::Accept => Ok(()),
            Decision::Reject(rejection) => Err(rejection),
        }
    }
}

/// Structured "limit exceeded" signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Human-readable message from the rule
    pub message: String,
    /// Suggested status code
    pub status: u16,
    /// Limit of the rule that rejected
    pub limit: u64,
    /// Counter value that exceeded the limit
    pub count: u64,
    /// Extra machine-readable data for the response
    pub data: Map<String, Value>,
}

impl Rejection {
    pub fn new(message: impl Into<String>, status: u16, limit: u64, count: u64) -> Self {
        Self {
            message: message.into(),
            status,
            limit,
            count,
            data: Map::new(),
        }
    }

    /// Attach a data field.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Machine-readable body: `{"code": .., "msg": .., "data": {..}}`.
    pub fn to_json(&self) -> Value {
        json!({
            "code": self.status,
            "msg": self.message,
            "data": self.data,
        })
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for Rejection {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_json() {
        let rejection = Rejection::new("Too Many Requests", 429, 3, 4).with_data("retry_after", 1);

        assert_eq!(
            rejection.to_json(),
            json!({"code": 429, "msg": "Too Many Requests", "data": {"retry_after": 1}})
        );
        assert_eq!(rejection.to_string(), "Too Many Requests (429)");
    }

    #[test]
    fn test_into_result() {
        assert!(Decision::Accept.into_result().is_ok());

        let decision = Decision::Reject(Rejection::new("nope", 429, 1, 2));
        assert!(decision.is_rejected());
        assert_eq!(decision.rejection().map(|r| r.count), Some(2));
        assert_eq!(decision.into_result().unwrap_err().message, "nope");
    }
}
