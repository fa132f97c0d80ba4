//! Ratewarden - fixed-window request rate limiting
//!
//! This crate counts hits per logical actor (IP, session, user or any
//! caller-chosen key) in epoch-aligned fixed windows and rejects calls once
//! a rule's limit is exceeded. Counters live in an interchangeable store:
//! a process-local map, a host-shared counter primitive, or daily buckets
//! in Redis.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use config::{Driver, LimiterConfig};
pub use error::{LimiterError, Result};
pub use ratelimit::{Decision, IdentityContext, KeyStrategy, LimitRule, Limiter, Rejection};
