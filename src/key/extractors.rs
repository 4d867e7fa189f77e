//! Built-in key strategies and the request traits they read from.
//!
//! These strategies are generic and work with any request type that exposes
//! the necessary data through the traits below.

use crate::key::Key;

/// Prefix reserved for subject-based keys. No address or route key starts with it.
pub const SUBJECT_PREFIX: &str = "user:";

/// Key used when a request carries no usable origin address.
pub const UNKNOWN_ADDR: &str = "unknown";

// ============================================================================
// Request Info Traits
// ============================================================================

/// Trait for requests that have an origin address.
pub trait HasClientAddr {
    /// Get the client address.
    fn client_addr(&self) -> &str;
}

/// Trait for requests that have a route path.
pub trait HasPath {
    /// Get the request path.
    fn path(&self) -> &str;
}

/// Trait for requests that may carry an authenticated subject.
pub trait HasSubject {
    /// Get the authenticated subject, if any.
    fn subject(&self) -> Option<&str>;
}

/// Owned request context carrying everything the built-in strategies need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Origin address of the caller.
    pub client_addr: String,
    /// Route path.
    pub path: String,
    /// Authenticated subject, if any.
    pub subject: Option<String>,
}

impl RequestInfo {
    /// Create a request context for an anonymous caller.
    pub fn new(client_addr: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            client_addr: client_addr.into(),
            path: path.into(),
            subject: None,
        }
    }

    /// Attach an authenticated subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl HasClientAddr for RequestInfo {
    fn client_addr(&self) -> &str {
        &self.client_addr
    }
}

impl HasPath for RequestInfo {
    fn path(&self) -> &str {
        &self.path
    }
}

impl HasSubject for RequestInfo {
    fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }
}

fn addr_or_unknown<R: HasClientAddr>(request: &R) -> &str {
    let addr = request.client_addr();
    if addr.is_empty() { UNKNOWN_ADDR } else { addr }
}

// ============================================================================
// Address-based Strategies
// ============================================================================

/// Key by client address. This is the default strategy.
#[derive(Debug, Clone, Default)]
pub struct IpKey;

impl IpKey {
    /// Create a new address key strategy.
    pub fn new() -> Self {
        Self
    }
}

impl<R: HasClientAddr> Key<R> for IpKey {
    fn extract(&self, request: &R) -> String {
        addr_or_unknown(request).to_string()
    }

    fn name(&self) -> &'static str {
        "ip"
    }
}

// ============================================================================
// Subject-based Strategies
// ============================================================================

/// Key by authenticated subject, falling back to the client address.
///
/// Subject keys are tagged with [`SUBJECT_PREFIX`] so that a subject can
/// never share a bucket with an address.
#[derive(Debug, Clone, Default)]
pub struct SubjectKey;

impl SubjectKey {
    /// Create a new subject key strategy.
    pub fn new() -> Self {
        Self
    }
}

impl<R: HasClientAddr + HasSubject> Key<R> for SubjectKey {
    fn extract(&self, request: &R) -> String {
        match request.subject() {
            Some(subject) if !subject.is_empty() => format!("{}{}", SUBJECT_PREFIX, subject),
            _ => addr_or_unknown(request).to_string(),
        }
    }

    fn name(&self) -> &'static str {
        "subject"
    }
}

// ============================================================================
// Route-based Strategies
// ============================================================================

/// Key by client address and route path, giving each endpoint its own bucket per client.
#[derive(Debug, Clone, Default)]
pub struct PathKey;

impl PathKey {
    /// Create a new path key strategy.
    pub fn new() -> Self {
        Self
    }
}

impl<R: HasClientAddr + HasPath> Key<R> for PathKey {
    fn extract(&self, request: &R) -> String {
        format!("{}:{}", addr_or_unknown(request), request.path())
    }

    fn name(&self) -> &'static str {
        "path"
    }
}
