//! Error types for the RPC router.
//!
//! Node, transport and timeout errors are per-endpoint failures. The executor
//! recovers from them locally and only hands them to callers wrapped in
//! [`RouterError::Exhausted`].

use std::fmt;

/// Message surfaced for failures that carry no node-provided text.
pub const UNREACHABLE_MESSAGE: &str = "endpoint unreachable";

/// Errors produced by the router.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouterError {
    /// The node answered with a well-formed JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Node { code: i64, message: String },

    /// Connection, DNS, HTTP status or body failures.
    #[error("transport error: {0}")]
    Transport(String),

    /// The attempt exceeded its deadline (milliseconds).
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Every sequential attempt or every raced endpoint failed.
    #[error("all {attempts} attempts failed: {}", FailureList(.failures))]
    Exhausted {
        attempts: usize,
        failures: Vec<EndpointFailure>,
    },

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The result could not be decoded into the requested type.
    #[error("failed to decode result: {0}")]
    Decode(String),
}

impl RouterError {
    /// Whether this error counts against the endpoint that produced it.
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            RouterError::Node { .. } | RouterError::Transport(_) | RouterError::Timeout(_)
        )
    }

    /// Last observed failure of an exhausted call.
    pub fn last_failure(&self) -> Option<&EndpointFailure> {
        match self {
            RouterError::Exhausted { failures, .. } => failures.last(),
            _ => None,
        }
    }
}

/// One endpoint's failure within an exhausted call.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointFailure {
    pub url: String,
    pub error: RouterError,
}

impl EndpointFailure {
    pub fn new(url: impl Into<String>, error: RouterError) -> Self {
        Self {
            url: url.into(),
            error,
        }
    }

    /// Caller-facing message: the node's own text when it sent one.
    pub fn message(&self) -> &str {
        match &self.error {
            RouterError::Node { message, .. } => message,
            _ => UNREACHABLE_MESSAGE,
        }
    }
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.message())
    }
}

struct FailureList<'a>(&'a [EndpointFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
