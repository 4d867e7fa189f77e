//! Decision types for admission results.
//!
//! When an admission check is performed, the result is a `Decision` that
//! indicates whether the request may proceed, the headers to attach to the
//! response, and on denial a structured rejection payload.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::headers::RateLimitHeaders;

/// Error classification reported in every rejection payload.
pub const RATE_LIMIT_EXCEEDED: &str = "rate limit exceeded";

/// The result of an admission check.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request is allowed.
    allowed: bool,
    /// Headers to attach to the response.
    headers: RateLimitHeaders,
    /// Denial payload, present only when denied.
    rejection: Option<Rejection>,
}

impl Decision {
    /// Create a new "allowed" decision.
    pub fn allowed(headers: RateLimitHeaders) -> Self {
        Self {
            allowed: true,
            headers,
            rejection: None,
        }
    }

    /// Create a new "denied" decision.
    pub fn denied(headers: RateLimitHeaders, rejection: Rejection) -> Self {
        Self {
            allowed: false,
            headers,
            rejection: Some(rejection),
        }
    }

    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Check if the request is denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Get the response headers.
    pub fn headers(&self) -> &RateLimitHeaders {
        &self.headers
    }

    /// Get the rejection payload, if denied.
    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }

    /// Consume the decision and return its parts.
    pub fn into_parts(self) -> (bool, RateLimitHeaders, Option<Rejection>) {
        (self.allowed, self.headers, self.rejection)
    }
}

/// Structured body returned to a denied client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Error classification.
    pub error: String,
    /// Seconds until the client should retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Configured wait budget in seconds (wait mode only, informational).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl Rejection {
    /// Rejection carrying a retry hint.
    pub fn new(retry_after: u64) -> Self {
        Self {
            error: RATE_LIMIT_EXCEEDED.to_string(),
            retry_after: Some(retry_after),
            timeout: None,
        }
    }

    /// Minimal rejection used when no retry hint can be computed.
    pub fn fallback() -> Self {
        Self {
            error: RATE_LIMIT_EXCEEDED.to_string(),
            retry_after: None,
            timeout: None,
        }
    }

    /// Report the wait budget that was exhausted.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_secs_f64());
        self
    }

    /// Serialize to a JSON body.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"error":"{}"}}"#, RATE_LIMIT_EXCEEDED)
        })
    }
}
